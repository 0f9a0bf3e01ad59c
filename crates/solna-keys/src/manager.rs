#![forbid(unsafe_code)]

//! Key manager with named key store.

use crate::key::{Key, KeyRequirement};
use solna_core::{Error, Result};

/// A collection of keys consulted during signature and encryption
/// processing.
#[derive(Debug, Default, Clone)]
pub struct KeysManager {
    keys: Vec<Key>,
}

impl KeysManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Insert a key ahead of all others so it wins lookups.
    pub fn insert_key_first(&mut self, key: Key) {
        self.keys.insert(0, key);
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name.as_deref() == Some(name))
    }

    /// The first key satisfying `req`, optionally restricted to keys named
    /// `name`.
    pub fn find(&self, req: &KeyRequirement, name: Option<&str>) -> Option<&Key> {
        self.keys.iter().find(|k| {
            name.map_or(true, |n| k.name.as_deref() == Some(n)) && req.matches(k)
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// The first key, for single-key setups.
    pub fn first_key(&self) -> Result<&Key> {
        self.keys
            .first()
            .ok_or_else(|| Error::MissingKey("no keys in manager".into()))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
