#![forbid(unsafe_code)]

//! Algorithm URI → transform factory registry, and the crypto backend
//! contract.

use crate::base64_transform::{Base64DecodeTransform, BASE64_ID};
use crate::c14n_transform::{id_for_mode, C14nTransform};
use crate::enveloped::{EnvelopedSignatureTransform, ENVELOPED_ID};
use crate::memory::{MemoryBufferTransform, MEMORY_BUFFER_ID};
use crate::parser::{TextContentTransform, TEXT_CONTENT_ID};
use crate::transform::{Transform, TransformId, TransformUsage};
use crate::xpath_transform::{XPath2Transform, XPathTransform, XPATH2_ID, XPATH_ID};
use solna_c14n::C14nMode;
use solna_core::{Error, Result};

/// A provider of digest, HMAC, signature, cipher, key-wrap and key
/// transport transforms.
///
/// The engine only ever talks to a backend through this trait, so every
/// backend must expose the same algorithms under the same identities.
pub trait CryptoBackend {
    fn name(&self) -> &'static str;

    /// Every algorithm this backend can instantiate.
    fn transform_ids(&self) -> Vec<&'static TransformId>;

    /// A fresh instance for `href`. `InvalidTransform` for unknown
    /// algorithms, `Backend` if the backend has been shut down.
    fn create(&self, href: &str) -> Result<Box<dyn Transform>>;

    /// Fill `out` from a cryptographically secure generator.
    fn random_bytes(&self, out: &mut [u8]) -> Result<()>;

    fn is_active(&self) -> bool;
}

type Factory = Box<dyn Fn() -> Box<dyn Transform>>;

/// The set of algorithms available to a context.
///
/// Generic transforms are built in; crypto transforms come from the one
/// bound backend.
pub struct TransformRegistry {
    generic: Vec<(&'static TransformId, Factory)>,
    backend: Option<Box<dyn CryptoBackend>>,
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field(
                "generic",
                &self.generic.iter().map(|(id, _)| id.name).collect::<Vec<_>>(),
            )
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    /// A registry with the generic transforms and no backend.
    pub fn new() -> Self {
        let mut registry = Self {
            generic: Vec::new(),
            backend: None,
        };
        for mode in [
            C14nMode::Inclusive,
            C14nMode::InclusiveWithComments,
            C14nMode::Inclusive11,
            C14nMode::Inclusive11WithComments,
            C14nMode::Exclusive,
            C14nMode::ExclusiveWithComments,
        ] {
            registry.register(id_for_mode(mode), move || Box::new(C14nTransform::new(mode)));
        }
        registry.register(&BASE64_ID, || Box::new(Base64DecodeTransform::new()));
        registry.register(&ENVELOPED_ID, || Box::new(EnvelopedSignatureTransform::new()));
        registry.register(&XPATH_ID, || Box::new(XPathTransform::new()));
        registry.register(&XPATH2_ID, || Box::new(XPath2Transform::new()));
        registry.register(&TEXT_CONTENT_ID, || Box::new(TextContentTransform::new()));
        registry.register(&MEMORY_BUFFER_ID, || Box::new(MemoryBufferTransform::new()));
        registry
    }

    /// Bind the crypto backend, replacing any previous one.
    pub fn with_backend(mut self, backend: Box<dyn CryptoBackend>) -> Self {
        log::debug!("registry bound to backend {}", backend.name());
        self.backend = Some(backend);
        self
    }

    /// Register a generic transform. A later registration for the same URI
    /// replaces the earlier one.
    pub fn register(
        &mut self,
        id: &'static TransformId,
        factory: impl Fn() -> Box<dyn Transform> + 'static,
    ) {
        self.generic.retain(|(existing, _)| existing.href != id.href);
        self.generic.push((id, Box::new(factory)));
    }

    pub fn backend(&self) -> Option<&dyn CryptoBackend> {
        self.backend.as_deref()
    }

    /// Identities of every available algorithm.
    pub fn ids(&self) -> Vec<&'static TransformId> {
        let mut ids: Vec<_> = self.generic.iter().map(|(id, _)| *id).collect();
        if let Some(backend) = &self.backend {
            ids.extend(backend.transform_ids());
        }
        ids
    }

    /// Look up the identity registered for `href`.
    pub fn find_id(&self, href: &str) -> Option<&'static TransformId> {
        self.ids().into_iter().find(|id| id.href == href)
    }

    /// A new transform for `href`.
    pub fn create(&self, href: &str) -> Result<Box<dyn Transform>> {
        let transform = match self.generic.iter().find(|(id, _)| id.href == href) {
            Some((_, factory)) => factory(),
            None => match &self.backend {
                Some(backend) => backend.create(href)?,
                None => {
                    return Err(Error::InvalidTransform(format!(
                        "unsupported algorithm (no crypto backend): {href}"
                    )))
                }
            },
        };
        if transform.id().href != href {
            return Err(Error::InvalidTransform(format!(
                "{} created for {href}",
                transform.id().name
            )));
        }
        Ok(transform)
    }

    /// A new transform for `href`, which must be one of the `allowed`
    /// usages (e.g. a digest algorithm for `<DigestMethod>`).
    pub fn create_for(&self, href: &str, allowed: &[TransformUsage]) -> Result<Box<dyn Transform>> {
        let transform = self.create(href)?;
        if !allowed.contains(&transform.id().usage) {
            return Err(Error::InvalidTransform(format!(
                "{} cannot be used here (usage {:?})",
                transform.id().name,
                transform.id().usage
            )));
        }
        Ok(transform)
    }

    pub fn random_bytes(&self, out: &mut [u8]) -> Result<()> {
        self.backend
            .as_ref()
            .ok_or_else(|| Error::Backend("no crypto backend bound".into()))?
            .random_bytes(out)
    }
}
