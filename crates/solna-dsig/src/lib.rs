#![forbid(unsafe_code)]

//! XML Digital Signature (XML-DSig) processing.
//!
//! [`DsigContext`] signs a template or verifies a signed document by
//! building one transform chain per `<Reference>` and one for
//! `<SignedInfo>`. The engine only establishes byte-level integrity; what
//! the references point at is checked afterwards with a
//! [`ReferencePolicy`].

pub mod context;
pub mod policy;
pub mod reference;
mod signature;
pub mod sign;
pub mod verify;

pub use context::DsigContext;
pub use policy::{PolicyViolation, ReferencePolicy};
pub use reference::{Manifest, Reference};
