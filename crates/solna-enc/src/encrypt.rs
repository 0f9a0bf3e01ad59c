#![forbid(unsafe_code)]

//! XML-Enc encryption.
//!
//! Takes a template with an `<EncryptedData>` element whose `<CipherValue>`
//! is empty and fills it in. The data key comes from `<KeyInfo>` and the
//! keys manager, unless `<KeyInfo>` holds `<EncryptedKey>` elements: then
//! a random session key is generated and each `<EncryptedKey>` gets it
//! wrapped or transported under its own key.

use crate::context::{
    enc_child, encode_base64, encrypted_keys, encryption_method, last_requirement, set_last_key,
    EncContext,
};
use solna_core::{ns, Error, Result};
use solna_keys::{Key, KeyData, KeyUsage};
use solna_transforms::{Operation, TransformUsage};
use solna_xml::document::{find_child_element, find_element};
use solna_xml::edit::{apply_edits, inner_text, replace_content, replace_node, set_element_text, TextEdit};
use solna_xml::XmlDocument;

impl EncContext<'_> {
    /// Encrypt `data` into the template, returning the filled template.
    pub fn encrypt_data(&mut self, template: &str, data: &[u8]) -> Result<String> {
        self.begin()?;
        let template = self.load(template.to_owned())?;
        self.fill_template(&template, data)
    }

    /// Encrypt the element with ID `id` inside `xml`.
    ///
    /// The template's `Type` decides what is replaced: `#Element` replaces
    /// the element itself, `#Content` only its children. The template's
    /// `<EncryptedData>` must carry its own namespace declarations.
    pub fn encrypt_xml(&mut self, template: &str, xml: &str, id: &str) -> Result<String> {
        self.begin()?;
        let template = self.load(template.to_owned())?;
        let content = {
            let parsed = template.parse_doc()?;
            let enc_data = find_encrypted_data(&parsed)?;
            match enc_data.attribute(ns::attr::TYPE) {
                Some(ns::ENC_TYPE_ELEMENT) => false,
                Some(ns::ENC_TYPE_CONTENT) => true,
                other => {
                    return Err(Error::XmlStructure(format!(
                        "EncryptedData Type must be Element or Content to encrypt XML, got {other:?}"
                    )))
                }
            }
        };

        let doc = self.load(xml.to_owned())?;
        let parsed = doc.parse_doc()?;
        let ids = doc.build_id_map(&parsed)?;
        let target = ids
            .get(id)
            .and_then(|node| parsed.get_node(*node))
            .ok_or_else(|| Error::InvalidUri(format!("ID not found: {id}")))?;
        let plaintext = if content {
            inner_text(target)?
        } else {
            &doc.text()[target.range()]
        };

        let filled = self.fill_template(&template, plaintext.as_bytes())?;
        let filled = self.load(filled)?;
        let filled_parsed = filled.parse_doc()?;
        let enc_text = filled.text()[find_encrypted_data(&filled_parsed)?.range()].to_owned();
        let edit = if content {
            replace_content(target, enc_text)?
        } else {
            replace_node(target, enc_text)
        };
        apply_edits(doc.text(), vec![edit])
    }

    fn fill_template(&mut self, template: &XmlDocument, data: &[u8]) -> Result<String> {
        let parsed = template.parse_doc()?;
        let enc_data = find_encrypted_data(&parsed)?;
        let (method, href) = encryption_method(enc_data)?;
        let key_info = find_child_element(enc_data, ns::DSIG, ns::node::KEY_INFO);
        let cipher_value = enc_child(
            enc_child(enc_data, ns::node::CIPHER_DATA)?,
            ns::node::CIPHER_VALUE,
        )?;

        let mut chain = self.method_chain(href, method, TransformUsage::Cipher, Operation::Encrypt)?;
        let mut edits = Vec::new();
        let encrypted_keys = encrypted_keys(key_info);
        if encrypted_keys.is_empty() {
            self.resolve_chain_key(&mut chain, key_info)?;
        } else {
            let req = last_requirement(&chain)?;
            if req.bits == 0 {
                return Err(Error::InvalidKeyData(format!(
                    "{href} does not state its key size"
                )));
            }
            let mut session = vec![0u8; req.bits / 8];
            self.registry.random_bytes(&mut session)?;
            set_last_key(&mut chain, &Key::new(KeyData::Aes(session.clone()), KeyUsage::Any))?;
            for encrypted_key in encrypted_keys {
                edits.push(self.encrypt_key(encrypted_key, &session)?);
            }
        }

        chain.push_binary(data, true)?;
        let ciphertext = chain.take_output();
        log::debug!(
            "encrypted {} bytes with {href} into {} bytes",
            data.len(),
            ciphertext.len()
        );
        edits.push(set_element_text(cipher_value, &encode_base64(&ciphertext))?);
        let out = apply_edits(template.text(), edits)?;

        self.encryption_method = Some(href.to_owned());
        self.result = Some(ciphertext);
        Ok(out)
    }

    /// Wrap or transport the session key into one `<EncryptedKey>`.
    fn encrypt_key(
        &self,
        encrypted_key: roxmltree::Node<'_, '_>,
        session: &[u8],
    ) -> Result<TextEdit> {
        let (method, href) = encryption_method(encrypted_key)?;
        let cipher_value = enc_child(
            enc_child(encrypted_key, ns::node::CIPHER_DATA)?,
            ns::node::CIPHER_VALUE,
        )?;
        let mut chain =
            self.method_chain(href, method, TransformUsage::KeyTransport, Operation::Encrypt)?;
        let key_info = find_child_element(encrypted_key, ns::DSIG, ns::node::KEY_INFO);
        self.resolve_chain_key(&mut chain, key_info)?;
        chain.push_binary(session, true)?;
        let wrapped = chain.take_output();
        log::debug!("session key encrypted with {href}");
        set_element_text(cipher_value, &encode_base64(&wrapped))
    }
}

pub(crate) fn find_encrypted_data<'a, 'i>(
    doc: &'a roxmltree::Document<'i>,
) -> Result<roxmltree::Node<'a, 'i>> {
    find_element(doc, ns::ENC, ns::node::ENCRYPTED_DATA)
        .ok_or_else(|| Error::MissingElement(ns::node::ENCRYPTED_DATA.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_keys::KeysManager;
    use solna_transforms::TransformRegistry;

    fn registry() -> TransformRegistry {
        TransformRegistry::new().with_backend(Box::new(solna_crypto::Backend::init().unwrap()))
    }

    fn aes_keys() -> KeysManager {
        let mut keys = KeysManager::new();
        keys.add_key(Key::new(KeyData::Aes(vec![3; 16]), KeyUsage::Any).with_name("data-key"));
        keys.add_key(Key::new(KeyData::Aes(vec![9; 32]), KeyUsage::Wrap).with_name("kek"));
        keys
    }

    const DATA_TEMPLATE: &str = r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/><ds:KeyInfo><ds:KeyName>data-key</ds:KeyName></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedData>"#;

    const WRAPPED_TEMPLATE: &str = r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Type="http://www.w3.org/2001/04/xmlenc#Element"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-cbc"/><ds:KeyInfo><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#kw-aes256"/><ds:KeyInfo><ds:KeyName>kek</ds:KeyName></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedData>"#;

    fn cipher_values(xml: &str) -> Vec<String> {
        let doc = roxmltree::Document::parse(xml).unwrap();
        doc.descendants()
            .filter(|n| n.has_tag_name((ns::ENC, ns::node::CIPHER_VALUE)))
            .map(solna_xml::document::text_content)
            .collect()
    }

    #[test]
    fn test_encrypt_data_with_named_key() {
        let registry = registry();
        let mut ctx = EncContext::new(&registry, aes_keys());
        let out = ctx.encrypt_data(DATA_TEMPLATE, b"attack at dawn").unwrap();
        let values = cipher_values(&out);
        assert_eq!(values.len(), 1);
        // IV plus one padded block.
        assert_eq!(ctx.result().unwrap().len(), 32);
        assert_eq!(
            ctx.encryption_method(),
            Some("http://www.w3.org/2001/04/xmlenc#aes128-cbc")
        );
    }

    #[test]
    fn test_session_key_is_wrapped() {
        let registry = registry();
        let mut ctx = EncContext::new(&registry, aes_keys());
        let out = ctx.encrypt_data(WRAPPED_TEMPLATE, b"<secret/>").unwrap();
        let values = cipher_values(&out);
        assert_eq!(values.len(), 2);
        // A 256-bit session key wraps to 40 bytes.
        assert_eq!(crate::context::decode_base64(&values[0]).unwrap().len(), 40);
    }

    #[test]
    fn test_encrypt_xml_replaces_element() {
        let registry = registry();
        let mut ctx = EncContext::new(&registry, aes_keys());
        let xml = r#"<order><card Id="c">4111</card><total>10</total></order>"#;
        let out = ctx.encrypt_xml(WRAPPED_TEMPLATE, xml, "c").unwrap();
        assert!(!out.contains("4111"));
        assert!(out.starts_with("<order><xenc:EncryptedData"));
        assert!(out.ends_with("<total>10</total></order>"));
    }

    #[test]
    fn test_encrypt_xml_requires_xml_type() {
        let registry = registry();
        let mut ctx = EncContext::new(&registry, aes_keys());
        let err = ctx
            .encrypt_xml(DATA_TEMPLATE, r#"<r Id="x"/>"#, "x")
            .unwrap_err();
        assert!(matches!(err, Error::XmlStructure(_)));
    }

    #[test]
    fn test_wrong_key_usage_for_wrap() {
        let registry = registry();
        let mut keys = KeysManager::new();
        keys.add_key(Key::new(KeyData::Aes(vec![9; 32]), KeyUsage::Encrypt).with_name("kek"));
        let mut ctx = EncContext::new(&registry, keys);
        ctx.key_info_ctx.use_manager_fallback = false;
        assert!(matches!(
            ctx.encrypt_data(WRAPPED_TEMPLATE, b"x"),
            Err(Error::MissingKey(_))
        ));
    }

    #[test]
    fn test_context_is_single_use() {
        let registry = registry();
        let mut ctx = EncContext::new(&registry, aes_keys());
        ctx.encrypt_data(DATA_TEMPLATE, b"one").unwrap();
        assert!(matches!(
            ctx.encrypt_data(DATA_TEMPLATE, b"two"),
            Err(Error::InvalidStatus(_))
        ));
    }
}
