#![forbid(unsafe_code)]

//! The RustCrypto backend.

use crate::hash::{hash, HashAlg};
use rand::RngCore;
use solna_core::{Error, Result};
use solna_transforms::{CryptoBackend, Transform, TransformId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SELF_TEST_INPUT: &[u8] = b"abc";
const SELF_TEST_SHA256: [u8; 32] = [
    0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae, 0x22, 0x23,
    0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00, 0x15, 0xad,
];

/// Handle to the backend. Clones share the active flag, so shutting one
/// down shuts down all of them.
#[derive(Debug, Clone)]
pub struct Backend {
    active: Arc<AtomicBool>,
}

impl Backend {
    /// Start the backend after a known-answer self test.
    pub fn init() -> Result<Self> {
        if hash(HashAlg::Sha256, SELF_TEST_INPUT) != SELF_TEST_SHA256 {
            return Err(Error::Backend("SHA-256 self test failed".into()));
        }
        let mut sample = [0u8; 8];
        rand::thread_rng()
            .try_fill_bytes(&mut sample)
            .map_err(|e| Error::Backend(format!("random generator unavailable: {e}")))?;
        log::debug!("crypto backend initialized");
        Ok(Self {
            active: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Stop handing out transforms. Idempotent.
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            log::debug!("crypto backend shut down");
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::Backend("backend has been shut down".into()))
        }
    }
}

impl CryptoBackend for Backend {
    fn name(&self) -> &'static str {
        "rustcrypto"
    }

    fn transform_ids(&self) -> Vec<&'static TransformId> {
        crate::digest::ids()
            .chain(crate::hmac::ids())
            .chain(crate::sign::ids())
            .chain(crate::cipher::ids())
            .chain(crate::keywrap::ids())
            .chain(crate::keytransport::ids())
            .collect()
    }

    fn create(&self, href: &str) -> Result<Box<dyn Transform>> {
        self.ensure_active()?;
        crate::digest::create(href)
            .or_else(|| crate::hmac::create(href))
            .or_else(|| crate::sign::create(href))
            .or_else(|| crate::cipher::create(href))
            .or_else(|| crate::keywrap::create(href))
            .or_else(|| crate::keytransport::create(href))
            .ok_or_else(|| Error::InvalidTransform(format!("unsupported algorithm: {href}")))
    }

    fn random_bytes(&self, out: &mut [u8]) -> Result<()> {
        self.ensure_active()?;
        rand::thread_rng()
            .try_fill_bytes(out)
            .map_err(|e| Error::Backend(format!("random generator: {e}")))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
