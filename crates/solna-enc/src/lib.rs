#![forbid(unsafe_code)]

//! XML Encryption (XML-Enc) processing.
//!
//! [`EncContext`] fills `<EncryptedData>` templates and decrypts them back,
//! running the cipher, key-wrap and key-transport algorithms as transform
//! chains.

pub mod context;
pub mod decrypt;
pub mod encrypt;

pub use context::EncContext;
