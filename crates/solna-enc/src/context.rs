#![forbid(unsafe_code)]

//! Encryption context: keys, configuration and results of one operation.

use base64::Engine;
use solna_core::{ns, Error, Result};
use solna_keys::{Key, KeyInfoContext, KeyRequirement, KeysManager};
use solna_transforms::{Operation, TransformChain, TransformRegistry, TransformUsage, UriTypeSet};
use solna_xml::document::find_child_element;
use solna_xml::{ParserOptions, XmlDocument};
use std::path::PathBuf;

/// Context for one XML-Enc encrypt or decrypt operation.
pub struct EncContext<'r> {
    /// Where transforms come from.
    pub registry: &'r TransformRegistry,
    /// Keys manager for key lookup.
    pub keys_manager: KeysManager,
    /// How `<KeyInfo>` is searched.
    pub key_info_ctx: KeyInfoContext,
    /// Additional ID attribute names.
    pub id_attrs: Vec<String>,
    /// URI-to-file mappings for external `<CipherReference>`s.
    pub url_maps: Vec<(String, String)>,
    /// Base directory for relative external references.
    pub base_dir: Option<PathBuf>,
    /// Whether CipherReference resolution is disabled.
    pub disable_cipher_reference: bool,
    /// URI kinds a `<CipherReference>` may use.
    pub enabled_uri_types: UriTypeSet,
    pub parser_options: ParserOptions,
    pub(crate) encryption_method: Option<String>,
    pub(crate) result: Option<Vec<u8>>,
    used: bool,
}

impl std::fmt::Debug for EncContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncContext")
            .field("keys", &self.keys_manager.len())
            .field("id_attrs", &self.id_attrs)
            .field("disable_cipher_reference", &self.disable_cipher_reference)
            .field("encryption_method", &self.encryption_method)
            .field("used", &self.used)
            .finish()
    }
}

impl<'r> EncContext<'r> {
    pub fn new(registry: &'r TransformRegistry, keys_manager: KeysManager) -> Self {
        Self {
            registry,
            keys_manager,
            key_info_ctx: KeyInfoContext::default(),
            id_attrs: Vec::new(),
            url_maps: Vec::new(),
            base_dir: None,
            disable_cipher_reference: false,
            enabled_uri_types: UriTypeSet::default(),
            parser_options: ParserOptions::default(),
            encryption_method: None,
            result: None,
            used: false,
        }
    }

    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }

    /// Map an external URI to a local file path.
    pub fn add_url_map(&mut self, url: &str, file_path: &str) {
        self.url_maps.push((url.to_owned(), file_path.to_owned()));
    }

    /// The `<EncryptionMethod>` algorithm of the processed `<EncryptedData>`.
    pub fn encryption_method(&self) -> Option<&str> {
        self.encryption_method.as_deref()
    }

    /// The ciphertext after encryption, the plaintext after decryption.
    pub fn result(&self) -> Option<&[u8]> {
        self.result.as_deref()
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.used {
            return Err(Error::InvalidStatus("EncContext has already been used".into()));
        }
        self.used = true;
        Ok(())
    }

    pub(crate) fn load(&self, text: String) -> Result<XmlDocument> {
        let mut doc = XmlDocument::parse_with(text, self.parser_options.clone())?;
        for attr in &self.id_attrs {
            doc.add_id_attr(attr);
        }
        Ok(doc)
    }
}

/// The child element `name` in the XML-Enc namespace.
pub(crate) fn enc_child<'a, 'i>(
    node: roxmltree::Node<'a, 'i>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'i>> {
    find_child_element(node, ns::ENC, name).ok_or_else(|| {
        Error::MissingElement(format!("{name} in {}", node.tag_name().name()))
    })
}

/// `<EncryptionMethod>` and its `Algorithm`.
pub(crate) fn encryption_method<'a, 'i>(
    node: roxmltree::Node<'a, 'i>,
) -> Result<(roxmltree::Node<'a, 'i>, &'a str)> {
    let method = enc_child(node, ns::node::ENCRYPTION_METHOD)?;
    let href = method.attribute(ns::attr::ALGORITHM).ok_or_else(|| {
        Error::MissingAttribute("Algorithm on EncryptionMethod".into())
    })?;
    Ok((method, href))
}

/// `<EncryptedKey>` children of a `<KeyInfo>`.
pub(crate) fn encrypted_keys<'a, 'i>(
    key_info: Option<roxmltree::Node<'a, 'i>>,
) -> Vec<roxmltree::Node<'a, 'i>> {
    key_info
        .map(|ki| solna_xml::document::find_child_elements(ki, ns::ENC, ns::node::ENCRYPTED_KEY))
        .unwrap_or_default()
}

pub(crate) fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(format!("CipherValue: {e}")))
}

impl EncContext<'_> {
    /// A chain running `href` for `op`, its parameters read from `method`.
    pub(crate) fn method_chain<'d>(
        &self,
        href: &str,
        method: roxmltree::Node<'_, '_>,
        usage: TransformUsage,
        op: Operation,
    ) -> Result<TransformChain<'d>> {
        let mut chain = TransformChain::new(op).with_parser_options(self.parser_options.clone());
        chain.push_with_params(self.registry.create_for(href, &[usage])?, method)?;
        Ok(chain)
    }

    /// Resolve the key for the chain's last stage from `key_info` and set it.
    pub(crate) fn resolve_chain_key(
        &self,
        chain: &mut TransformChain<'_>,
        key_info: Option<roxmltree::Node<'_, '_>>,
    ) -> Result<()> {
        let req = last_requirement(chain)?;
        let key = self
            .key_info_ctx
            .resolve(key_info, &req, &self.keys_manager)?;
        set_last_key(chain, &key)
    }
}

/// What the chain's last stage needs as a key.
pub(crate) fn last_requirement(chain: &TransformChain<'_>) -> Result<KeyRequirement> {
    let stage = chain
        .last()
        .ok_or_else(|| Error::InvalidStatus("empty chain".into()))?;
    stage
        .key_requirement()?
        .ok_or_else(|| Error::InvalidTransform(format!("{} takes no key", stage.name())))
}

pub(crate) fn set_last_key(chain: &mut TransformChain<'_>, key: &Key) -> Result<()> {
    chain
        .last_mut()
        .ok_or_else(|| Error::InvalidStatus("empty chain".into()))?
        .set_key(key)
}
