#![forbid(unsafe_code)]

//! Post-verification checks on what was signed.
//!
//! A successful [`DsigContext::verify`] only proves that the referenced
//! bytes are intact. Whether the right things were referenced (the whole
//! document, with the expected transforms and an acceptable digest) and
//! whether the key was one the caller supplied are separate questions
//! answered here.

use crate::context::DsigContext;

/// Why a verified signature was rejected by a [`ReferencePolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("signature was not successfully verified")]
    NotVerified,

    #[error("expected {expected} reference(s), found {found}")]
    ReferenceCount { expected: usize, found: usize },

    #[error("reference URI '{0}' does not cover the whole document")]
    UnexpectedUri(String),

    #[error("reference '{uri}' has transforms {found:?}")]
    UnexpectedTransforms { uri: String, found: Vec<String> },

    #[error("digest method not allowed: {0}")]
    DisallowedDigest(String),

    #[error("verification key came from the document, not the keys manager")]
    UntrustedKey,
}

/// Constraints on the `<SignedInfo>` references of a verified signature.
#[derive(Debug, Clone, Default)]
pub struct ReferencePolicy {
    /// Exactly one reference.
    pub require_single_reference: bool,
    /// Every reference has `URI=""`.
    pub require_whole_document: bool,
    /// Every reference has exactly these transforms, in order.
    pub required_transforms: Option<Vec<String>>,
    /// Digest methods that may be used.
    pub allowed_digests: Option<Vec<String>>,
    /// The key must come from the keys manager, not from `<KeyValue>`.
    pub require_manager_key: bool,
}

impl ReferencePolicy {
    /// The usual enveloped-signature profile: one reference to the whole
    /// document through the enveloped transform and exclusive c14n.
    pub fn enveloped_whole_document() -> Self {
        Self {
            require_single_reference: true,
            require_whole_document: true,
            required_transforms: Some(vec![
                solna_core::algorithm::ENVELOPED_SIGNATURE.to_owned(),
                solna_core::algorithm::EXC_C14N.to_owned(),
            ]),
            allowed_digests: None,
            require_manager_key: true,
        }
    }

    /// Check a context after verification.
    pub fn check(&self, ctx: &DsigContext<'_>) -> Result<(), PolicyViolation> {
        if !ctx.status().is_success() {
            return Err(PolicyViolation::NotVerified);
        }
        if self.require_manager_key
            && !ctx.key_source().is_some_and(|source| source.is_from_manager())
        {
            return Err(PolicyViolation::UntrustedKey);
        }
        let references = ctx.references();
        if self.require_single_reference && references.len() != 1 {
            return Err(PolicyViolation::ReferenceCount {
                expected: 1,
                found: references.len(),
            });
        }
        for r in references {
            if self.require_whole_document && !r.uri.is_empty() {
                return Err(PolicyViolation::UnexpectedUri(r.uri.clone()));
            }
            if let Some(required) = &self.required_transforms {
                if &r.transforms != required {
                    return Err(PolicyViolation::UnexpectedTransforms {
                        uri: r.uri.clone(),
                        found: r.transforms.clone(),
                    });
                }
            }
            if let Some(allowed) = &self.allowed_digests {
                if !allowed.iter().any(|d| *d == r.digest_method) {
                    return Err(PolicyViolation::DisallowedDigest(r.digest_method.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_core::{algorithm, Outcome};
    use solna_keys::{Key, KeyData, KeyUsage, KeysManager};
    use solna_transforms::TransformRegistry;

    fn registry() -> TransformRegistry {
        TransformRegistry::new().with_backend(Box::new(solna_crypto::Backend::init().unwrap()))
    }

    fn keys() -> KeysManager {
        let mut keys = KeysManager::new();
        keys.add_key(Key::new(KeyData::Hmac(b"k".to_vec()), KeyUsage::Any));
        keys
    }

    const TWO_REFS: &str = r##"<doc><a Id="a">one</a><b Id="b">two</b><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2000/09/xmldsig#hmac-sha1"/><ds:Reference URI="#a"><ds:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/><ds:DigestValue/></ds:Reference><ds:Reference URI="#b"><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue/></ds:Reference></ds:SignedInfo><ds:SignatureValue/></ds:Signature></doc>"##;

    fn verified(registry: &TransformRegistry) -> DsigContext<'_> {
        let signed = DsigContext::new(registry, keys()).sign(TWO_REFS).unwrap();
        let mut ctx = DsigContext::new(registry, keys());
        assert_eq!(ctx.verify(&signed).unwrap(), Outcome::Succeeded);
        ctx
    }

    #[test]
    fn test_valid_signature_can_fail_policy() {
        let registry = registry();
        let ctx = verified(&registry);
        assert_eq!(ReferencePolicy::default().check(&ctx), Ok(()));
        assert_eq!(
            ReferencePolicy::enveloped_whole_document().check(&ctx),
            Err(PolicyViolation::ReferenceCount {
                expected: 1,
                found: 2
            })
        );
        let whole = ReferencePolicy {
            require_whole_document: true,
            ..Default::default()
        };
        assert_eq!(
            whole.check(&ctx),
            Err(PolicyViolation::UnexpectedUri("#a".into()))
        );
    }

    #[test]
    fn test_transforms_and_digests() {
        let registry = registry();
        let ctx = verified(&registry);
        let transforms = ReferencePolicy {
            required_transforms: Some(vec![algorithm::EXC_C14N.to_owned()]),
            ..Default::default()
        };
        assert!(matches!(
            transforms.check(&ctx),
            Err(PolicyViolation::UnexpectedTransforms { .. })
        ));
        let digests = ReferencePolicy {
            allowed_digests: Some(vec![algorithm::SHA256.to_owned()]),
            ..Default::default()
        };
        assert_eq!(
            digests.check(&ctx),
            Err(PolicyViolation::DisallowedDigest(algorithm::SHA1.into()))
        );
    }

    #[test]
    fn test_manager_key_requirement() {
        let registry = registry();
        let ctx = verified(&registry);
        assert_eq!(ctx.key_source(), Some(solna_keys::KeySource::Manager));
        let strict = ReferencePolicy {
            require_manager_key: true,
            ..Default::default()
        };
        assert_eq!(strict.check(&ctx), Ok(()));
    }

    #[test]
    fn test_unverified_context_rejected() {
        let registry = registry();
        let ctx = DsigContext::new(&registry, keys());
        assert_eq!(
            ReferencePolicy::default().check(&ctx),
            Err(PolicyViolation::NotVerified)
        );
    }
}
