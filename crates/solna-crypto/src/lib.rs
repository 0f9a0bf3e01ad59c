#![forbid(unsafe_code)]

//! RustCrypto backend for the Solna XML security engine.
//!
//! Provides digests, HMAC, RSA/ECDSA signatures, AES-CBC/GCM, AES key
//! wrap and RSA-OAEP as [`solna_transforms::Transform`]s, all reachable
//! through [`Backend`].

pub mod backend;
pub mod cipher;
pub mod digest;
pub mod hash;
pub mod hmac;
pub mod keytransport;
pub mod keywrap;
pub mod sign;

pub use backend::Backend;
pub use hash::{constant_time_eq, HashAlg};
