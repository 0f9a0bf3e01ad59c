#![forbid(unsafe_code)]

//! Key management for the Solna XML security engine.
//!
//! Keys are loaded from PEM or raw bytes into a [`KeysManager`]. Transforms
//! state what they need as a [`KeyRequirement`]; [`KeyInfoContext`] finds a
//! matching key from `<KeyInfo>` and the manager.

pub mod key;
pub mod keyinfo;
pub mod loader;
pub mod manager;

pub use key::{Key, KeyData, KeyDataId, KeyRequirement, KeyType, KeyUsage};
pub use keyinfo::{KeyInfoContext, KeySource};
pub use manager::KeysManager;
