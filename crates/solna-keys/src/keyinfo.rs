#![forbid(unsafe_code)]

//! `<ds:KeyInfo>` processing: find the key a transform asked for.

use crate::key::{Key, KeyData, KeyRequirement, KeyUsage};
use crate::manager::KeysManager;
use base64::Engine;
use solna_core::{ns, Error, Result};
use solna_xml::document::{find_child_element, is_element, text_content};
use std::borrow::Cow;

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// A manager key named by `<KeyName>`.
    KeyName,
    /// Parsed from the document's own `<KeyValue>`.
    Inline,
    /// The first manager key satisfying the requirement.
    Manager,
}

impl KeySource {
    /// Whether the key was supplied by the caller rather than the document.
    pub fn is_from_manager(self) -> bool {
        !matches!(self, KeySource::Inline)
    }
}

/// Options for resolving a key from `<KeyInfo>`.
///
/// Resolution order is `<KeyName>` lookup in the manager, inline
/// `<KeyValue><RSAKeyValue>`, then the first manager key that satisfies the
/// requirement.
#[derive(Debug, Clone)]
pub struct KeyInfoContext {
    pub use_key_name: bool,
    pub use_key_value: bool,
    /// Fall back to any manager key satisfying the requirement.
    pub use_manager_fallback: bool,
}

impl Default for KeyInfoContext {
    fn default() -> Self {
        Self {
            use_key_name: true,
            use_key_value: true,
            use_manager_fallback: true,
        }
    }
}

impl KeyInfoContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for resolving against `manager`. Keys carried by the
    /// document are only consulted when the manager holds none.
    pub fn for_manager(manager: &KeysManager) -> Self {
        Self {
            use_key_value: manager.is_empty(),
            ..Self::default()
        }
    }

    /// Resolve a key for `req`.
    ///
    /// Keys found by name that do not satisfy the requirement are skipped
    /// with a warning; if nothing matches, `MissingKey`.
    pub fn resolve<'m>(
        &self,
        key_info: Option<roxmltree::Node<'_, '_>>,
        req: &KeyRequirement,
        manager: &'m KeysManager,
    ) -> Result<Cow<'m, Key>> {
        self.resolve_with_source(key_info, req, manager)
            .map(|(key, _)| key)
    }

    /// Like [`KeyInfoContext::resolve`], also reporting where the key came
    /// from.
    pub fn resolve_with_source<'m>(
        &self,
        key_info: Option<roxmltree::Node<'_, '_>>,
        req: &KeyRequirement,
        manager: &'m KeysManager,
    ) -> Result<(Cow<'m, Key>, KeySource)> {
        if let Some(key_info) = key_info {
            if self.use_key_name {
                for name in key_names(key_info) {
                    match manager.find_by_name(&name) {
                        Some(key) => match req.check(key) {
                            Ok(()) => {
                                log::debug!("key resolved by KeyName '{name}'");
                                return Ok((Cow::Borrowed(key), KeySource::KeyName));
                            }
                            Err(e) => log::warn!("key '{name}' rejected: {e}"),
                        },
                        None => log::debug!("no key named '{name}' in manager"),
                    }
                }
            }

            if self.use_key_value {
                for key_value in key_info
                    .children()
                    .filter(|n| is_element(*n, ns::DSIG, ns::node::KEY_VALUE))
                {
                    if find_child_element(key_value, ns::DSIG, ns::node::RSA_KEY_VALUE).is_none() {
                        continue;
                    }
                    let key = parse_rsa_key_value(key_value)?;
                    match req.check(&key) {
                        Ok(()) => {
                            log::debug!("key resolved from inline RSAKeyValue");
                            return Ok((Cow::Owned(key), KeySource::Inline));
                        }
                        Err(e) => log::warn!("inline RSAKeyValue rejected: {e}"),
                    }
                }
            }
        }

        if self.use_manager_fallback {
            if let Some(key) = manager.find(req, None) {
                log::debug!("key resolved from manager: {:?}", key.data);
                return Ok((Cow::Borrowed(key), KeySource::Manager));
            }
        }

        Err(Error::MissingKey(format!(
            "no {} key satisfies the requirement",
            req.key_id
        )))
    }
}

/// Non-empty `<KeyName>` texts under `<KeyInfo>`.
pub fn key_names(key_info: roxmltree::Node<'_, '_>) -> Vec<String> {
    key_info
        .children()
        .filter(|n| is_element(*n, ns::DSIG, ns::node::KEY_NAME))
        .map(|n| text_content(n).trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Decode a base64 CryptoBinary value, ignoring embedded whitespace.
fn decode_crypto_binary(text: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.is_empty() {
        return Err(Error::Base64("empty value".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(e.to_string()))
}

/// Extract an RSA public key from `<KeyValue><RSAKeyValue>`.
pub fn parse_rsa_key_value(key_value: roxmltree::Node<'_, '_>) -> Result<Key> {
    let rsa_kv = find_child_element(key_value, ns::DSIG, ns::node::RSA_KEY_VALUE)
        .ok_or_else(|| Error::MissingElement("RSAKeyValue".into()))?;
    let modulus = find_child_element(rsa_kv, ns::DSIG, ns::node::RSA_MODULUS)
        .ok_or_else(|| Error::MissingElement("Modulus".into()))?;
    let exponent = find_child_element(rsa_kv, ns::DSIG, ns::node::RSA_EXPONENT)
        .ok_or_else(|| Error::MissingElement("Exponent".into()))?;

    let n = rsa::BigUint::from_bytes_be(&decode_crypto_binary(&text_content(modulus))?);
    let e = rsa::BigUint::from_bytes_be(&decode_crypto_binary(&text_content(exponent))?);
    let public = rsa::RsaPublicKey::new(n, e)
        .map_err(|err| Error::InvalidKeyData(format!("invalid RSA public key: {err}")))?;
    Ok(Key::new(
        KeyData::Rsa {
            private: None,
            public,
        },
        KeyUsage::Verify,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyDataId, KeyType};
    use rsa::traits::PublicKeyParts;

    const RSA_PKCS8: &str = include_str!("../../solna/tests/data/rsa-2048.pem");

    fn key_info_xml(body: &str) -> String {
        format!(r#"<ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{body}</ds:KeyInfo>"#)
    }

    fn hmac_req() -> KeyRequirement {
        KeyRequirement::new(KeyDataId::Hmac, KeyType::Symmetric, KeyUsage::Verify)
    }

    #[test]
    fn test_key_name_wins() {
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(KeyData::Hmac(b"first".to_vec()), KeyUsage::Any).with_name("a"));
        mgr.add_key(Key::new(KeyData::Hmac(b"second".to_vec()), KeyUsage::Any).with_name("b"));
        let xml = key_info_xml("<ds:KeyName> b </ds:KeyName>");
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let key = KeyInfoContext::new()
            .resolve(Some(doc.root_element()), &hmac_req(), &mgr)
            .unwrap();
        assert_eq!(key.name.as_deref(), Some("b"));
        assert!(matches!(key, Cow::Borrowed(_)));
    }

    #[test]
    fn test_mismatched_named_key_falls_back() {
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(KeyData::Aes(vec![0; 16]), KeyUsage::Any).with_name("n"));
        mgr.add_key(Key::new(KeyData::Hmac(b"k".to_vec()), KeyUsage::Any).with_name("mac"));
        let xml = key_info_xml("<ds:KeyName>n</ds:KeyName>");
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let ctx = KeyInfoContext::new();
        let key = ctx
            .resolve(Some(doc.root_element()), &hmac_req(), &mgr)
            .unwrap();
        assert_eq!(key.name.as_deref(), Some("mac"));

        let strict = KeyInfoContext {
            use_manager_fallback: false,
            ..KeyInfoContext::new()
        };
        assert!(matches!(
            strict.resolve(Some(doc.root_element()), &hmac_req(), &mgr),
            Err(Error::MissingKey(_))
        ));
    }

    #[test]
    fn test_inline_rsa_key_value() {
        let private = crate::loader::load_rsa_private_pem(RSA_PKCS8.as_bytes()).unwrap();
        let public = private.rsa_public_key().unwrap();
        let b64 = base64::engine::general_purpose::STANDARD;
        let xml = key_info_xml(&format!(
            "<ds:KeyValue><ds:RSAKeyValue><ds:Modulus>{}</ds:Modulus>\
             <ds:Exponent>{}</ds:Exponent></ds:RSAKeyValue></ds:KeyValue>",
            b64.encode(public.n().to_bytes_be()),
            b64.encode(public.e().to_bytes_be()),
        ));
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let req = KeyRequirement::new(KeyDataId::Rsa, KeyType::Public, KeyUsage::Verify);
        let empty = KeysManager::new();
        let (key, source) = KeyInfoContext::new()
            .resolve_with_source(Some(doc.root_element()), &req, &empty)
            .unwrap();
        assert!(matches!(key, Cow::Owned(_)));
        assert_eq!(source, KeySource::Inline);
        assert!(!source.is_from_manager());
        assert_eq!(key.rsa_public_key(), Some(public));

        // A populated manager turns inline keys off.
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(KeyData::Hmac(b"k".to_vec()), KeyUsage::Any));
        let ctx = KeyInfoContext::for_manager(&mgr);
        assert!(!ctx.use_key_value);
        assert!(matches!(
            ctx.resolve(Some(doc.root_element()), &req, &mgr),
            Err(Error::MissingKey(_))
        ));
        assert!(KeyInfoContext::for_manager(&empty).use_key_value);
    }

    #[test]
    fn test_manager_sources_reported() {
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(KeyData::Hmac(b"k".to_vec()), KeyUsage::Any).with_name("mac"));
        let named = key_info_xml("<ds:KeyName>mac</ds:KeyName>");
        let doc = roxmltree::Document::parse(&named).unwrap();
        let ctx = KeyInfoContext::new();
        let (_, source) = ctx
            .resolve_with_source(Some(doc.root_element()), &hmac_req(), &mgr)
            .unwrap();
        assert_eq!(source, KeySource::KeyName);
        let (_, source) = ctx.resolve_with_source(None, &hmac_req(), &mgr).unwrap();
        assert_eq!(source, KeySource::Manager);
        assert!(source.is_from_manager());
    }

    #[test]
    fn test_nothing_found() {
        let req = KeyRequirement::new(KeyDataId::Rsa, KeyType::Private, KeyUsage::Sign);
        let empty = KeysManager::new();
        assert!(matches!(
            KeyInfoContext::new().resolve(None, &req, &empty),
            Err(Error::MissingKey(_))
        ));
    }
}
