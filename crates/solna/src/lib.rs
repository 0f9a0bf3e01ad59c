#![forbid(unsafe_code)]

//! Solna: XML Digital Signature and XML Encryption over a transform
//! pipeline.
//!
//! ```no_run
//! use solna::dsig::DsigContext;
//! use solna::keys::{loader, KeysManager};
//!
//! # fn main() -> solna::core::Result<()> {
//! let registry = solna::init()?;
//! let mut keys = KeysManager::new();
//! keys.add_key(loader::load_key_file("key.pem".as_ref())?);
//! let mut ctx = DsigContext::new(&registry, keys);
//! let status = ctx.verify("<doc>...</doc>")?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

pub use solna_c14n as c14n;
pub use solna_core as core;
pub use solna_crypto as crypto;
pub use solna_dsig as dsig;
pub use solna_enc as enc;
pub use solna_keys as keys;
pub use solna_transforms as transforms;
pub use solna_xml as xml;

pub use solna_core::{Error, Outcome, Result};

/// A transform registry bound to a freshly initialized RustCrypto backend.
pub fn init() -> Result<transforms::TransformRegistry> {
    let backend = crypto::Backend::init()?;
    Ok(transforms::TransformRegistry::new().with_backend(Box::new(backend)))
}
