#![forbid(unsafe_code)]

//! XML-Enc decryption.
//!
//! Processing order:
//! 1. Parse the document, register ID attributes
//! 2. Find the first `<EncryptedData>` and its `<EncryptionMethod>`
//! 3. Read `<CipherData>`: `<CipherValue>` or a `<CipherReference>` run
//!    through its own transform chain
//! 4. Resolve the key: an `<EncryptedKey>` (inline, or elsewhere in the
//!    document with a matching `<CarriedKeyName>`), else `<KeyInfo>` and
//!    the keys manager
//! 5. Decrypt, then replace `<EncryptedData>` according to its `Type`

use crate::context::{
    decode_base64, enc_child, encrypted_keys, encryption_method, last_requirement, set_last_key,
    EncContext,
};
use crate::encrypt::find_encrypted_data;
use solna_core::{algorithm, ns, Error, Result};
use solna_keys::keyinfo::key_names;
use solna_keys::{Key, KeyData, KeyRequirement, KeyUsage};
use solna_transforms::uri::{resolve_external, resolve_same_document};
use solna_transforms::{Operation, TransformChain, TransformUsage, UriType};
use solna_xml::document::{
    find_child_element, find_child_elements, in_scope_namespaces, is_element, text_content,
};
use solna_xml::edit::{apply_edits, escape_text, replace_node};
use solna_xml::XmlDocument;
use std::borrow::Cow;
use std::fs::File;

/// Chunk size for streaming an external `<CipherReference>`.
const READ_CHUNK: usize = 8192;

impl EncContext<'_> {
    /// Decrypt the first `<EncryptedData>` of `xml`.
    ///
    /// `#Element` and `#Content` plaintext takes the place of the
    /// `<EncryptedData>` and the whole document is returned. Any other type
    /// returns the plaintext itself, which must then be UTF-8.
    pub fn decrypt(&mut self, xml: &str) -> Result<String> {
        self.begin()?;
        let doc = self.load(xml.to_owned())?;
        let parsed = doc.parse_doc()?;
        let enc_data = find_encrypted_data(&parsed)?;
        let plaintext = self.decrypt_node(&doc, &parsed, enc_data)?;

        let enc_type = enc_data.attribute(ns::attr::TYPE);
        let out = match enc_type {
            Some(ns::ENC_TYPE_ELEMENT) | Some(ns::ENC_TYPE_CONTENT) => {
                self.check_fragment(enc_data, &plaintext, enc_type == Some(ns::ENC_TYPE_ELEMENT))?;
                let body = utf8(&plaintext)?.to_owned();
                apply_edits(doc.text(), vec![replace_node(enc_data, body)])?
            }
            _ => utf8(&plaintext)?.to_owned(),
        };
        self.result = Some(plaintext);
        Ok(out)
    }

    /// Decrypt the first `<EncryptedData>` of `xml`, returning the raw
    /// plaintext.
    pub fn decrypt_to_bytes(&mut self, xml: &str) -> Result<Vec<u8>> {
        self.begin()?;
        let doc = self.load(xml.to_owned())?;
        let parsed = doc.parse_doc()?;
        let enc_data = find_encrypted_data(&parsed)?;
        let plaintext = self.decrypt_node(&doc, &parsed, enc_data)?;
        self.result = Some(plaintext.clone());
        Ok(plaintext)
    }

    fn decrypt_node<'a, 'i>(
        &mut self,
        doc: &XmlDocument,
        parsed: &'a roxmltree::Document<'i>,
        enc_data: roxmltree::Node<'a, 'i>,
    ) -> Result<Vec<u8>> {
        let (method, href) = encryption_method(enc_data)?;
        let key_info = find_child_element(enc_data, ns::DSIG, ns::node::KEY_INFO);
        let cipher_bytes =
            self.read_cipher_data(doc, enc_child(enc_data, ns::node::CIPHER_DATA)?)?;

        let mut chain = self.method_chain(href, method, TransformUsage::Cipher, Operation::Decrypt)?;
        let req = last_requirement(&chain)?;
        {
            let key = self.data_key(doc, parsed, key_info, &req)?;
            set_last_key(&mut chain, &key)?;
        }
        chain.push_binary(&cipher_bytes, true)?;
        let plaintext = chain.take_output();
        log::debug!(
            "decrypted {} bytes with {href} into {} bytes",
            cipher_bytes.len(),
            plaintext.len()
        );
        self.encryption_method = Some(href.to_owned());
        Ok(plaintext)
    }

    /// The data key: from an `<EncryptedKey>` if there is one for this
    /// `<EncryptedData>`, otherwise through `<KeyInfo>`.
    fn data_key<'a, 'i>(
        &self,
        doc: &XmlDocument,
        parsed: &'a roxmltree::Document<'i>,
        key_info: Option<roxmltree::Node<'a, 'i>>,
        req: &KeyRequirement,
    ) -> Result<Cow<'_, Key>> {
        let mut candidates = encrypted_keys(key_info);
        if let Some(key_info) = key_info {
            let names = key_names(key_info);
            candidates.extend(parsed.descendants().filter(|n| {
                is_element(*n, ns::ENC, ns::node::ENCRYPTED_KEY)
                    && find_child_element(*n, ns::ENC, ns::node::CARRIED_KEY_NAME)
                        .map(|c| names.contains(&text_content(c).trim().to_owned()))
                        .unwrap_or(false)
            }));
        }
        if candidates.is_empty() {
            return self.key_info_ctx.resolve(key_info, req, &self.keys_manager);
        }

        let mut last_error = None;
        for encrypted_key in candidates {
            match self.decrypt_key(doc, encrypted_key, req) {
                Ok(key) => return Ok(Cow::Owned(key)),
                Err(e) => {
                    log::warn!("EncryptedKey not usable: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::MissingKey("no usable EncryptedKey".into())))
    }

    /// Recover a session key from one `<EncryptedKey>`.
    fn decrypt_key(
        &self,
        doc: &XmlDocument,
        encrypted_key: roxmltree::Node<'_, '_>,
        req: &KeyRequirement,
    ) -> Result<Key> {
        let (method, href) = encryption_method(encrypted_key)?;
        let wrapped =
            self.read_cipher_data(doc, enc_child(encrypted_key, ns::node::CIPHER_DATA)?)?;
        let mut chain =
            self.method_chain(href, method, TransformUsage::KeyTransport, Operation::Decrypt)?;
        let key_info = find_child_element(encrypted_key, ns::DSIG, ns::node::KEY_INFO);
        self.resolve_chain_key(&mut chain, key_info)?;
        chain.push_binary(&wrapped, true)?;
        let mut session = chain.take_output();

        // A longer key than the cipher takes is cut to size.
        let wanted = req.bits / 8;
        if wanted > 0 && session.len() > wanted {
            session.truncate(wanted);
        }
        log::debug!("session key recovered with {href}");
        Ok(Key::new(KeyData::Aes(session), KeyUsage::Any))
    }

    fn read_cipher_data(
        &self,
        doc: &XmlDocument,
        cipher_data: roxmltree::Node<'_, '_>,
    ) -> Result<Vec<u8>> {
        if let Some(value) = find_child_element(cipher_data, ns::ENC, ns::node::CIPHER_VALUE) {
            return decode_base64(&text_content(value));
        }
        let reference = find_child_element(cipher_data, ns::ENC, ns::node::CIPHER_REFERENCE)
            .ok_or_else(|| Error::MissingElement("CipherValue or CipherReference".into()))?;
        if self.disable_cipher_reference {
            return Err(Error::InvalidUri(
                "CipherReference resolution is disabled".into(),
            ));
        }
        self.resolve_cipher_reference(doc, reference)
    }

    /// Fetch the octets a `<CipherReference>` points at and run its
    /// transforms over them.
    fn resolve_cipher_reference(
        &self,
        doc: &XmlDocument,
        reference: roxmltree::Node<'_, '_>,
    ) -> Result<Vec<u8>> {
        let uri = reference
            .attribute(ns::attr::URI)
            .ok_or_else(|| Error::MissingAttribute("URI on CipherReference".into()))?;
        let uri_type = UriType::classify(uri);
        if !self.enabled_uri_types.allows(uri_type) {
            return Err(Error::InvalidUri(format!(
                "{uri_type:?} URI not enabled: {uri}"
            )));
        }

        let mut chain =
            TransformChain::new(Operation::Decrypt).with_parser_options(self.parser_options.clone());
        let transforms = find_child_element(reference, ns::ENC, ns::node::TRANSFORMS)
            .or_else(|| find_child_element(reference, ns::DSIG, ns::node::TRANSFORMS));
        for node in transforms
            .map(|t| find_child_elements(t, ns::DSIG, ns::node::TRANSFORM))
            .unwrap_or_default()
        {
            let href = node.attribute(ns::attr::ALGORITHM).ok_or_else(|| {
                Error::MissingAttribute("Algorithm on Transform".into())
            })?;
            let transform = self.registry.create_for(
                href,
                &[TransformUsage::Generic, TransformUsage::Canonicalization],
            )?;
            chain.push_with_params(transform, node)?;
        }
        if chain.is_empty() {
            chain.push(self.registry.create(algorithm::MEMORY_BUFFER)?)?;
        }

        match uri_type {
            UriType::External => {
                let path = resolve_external(uri, &self.url_maps, self.base_dir.as_deref())?;
                log::debug!("CipherReference {uri} -> {}", path.display());
                chain.push_reader(File::open(&path)?, READ_CHUNK)?;
            }
            UriType::Empty | UriType::SameDocument => {
                chain.push_tree(resolve_same_document(doc, uri)?)?;
            }
        }
        Ok(chain.take_output())
    }

    /// Check that decrypted XML parses in the namespace context of the
    /// `<EncryptedData>` it replaces.
    fn check_fragment(
        &self,
        enc_data: roxmltree::Node<'_, '_>,
        plaintext: &[u8],
        single_element: bool,
    ) -> Result<()> {
        let scope = enc_data.parent_element().unwrap_or(enc_data);
        let mut prefix = String::from("<fragment");
        for (name, uri) in in_scope_namespaces(scope) {
            let uri = escape_text(&uri).replace('"', "&quot;");
            if name.is_empty() {
                prefix.push_str(&format!(" xmlns=\"{uri}\""));
            } else {
                prefix.push_str(&format!(" xmlns:{name}=\"{uri}\""));
            }
        }
        prefix.push('>');
        let fragment =
            XmlDocument::parse_wrapped(&prefix, plaintext, "</fragment>", self.parser_options.clone())?;
        if single_element {
            let parsed = fragment.parse_doc()?;
            let root = parsed.root_element();
            let elements = root.children().filter(|n| n.is_element()).count();
            let stray_text = root
                .children()
                .any(|n| n.is_text() && !n.text().unwrap_or("").trim().is_empty());
            if elements != 1 || stray_text {
                return Err(Error::XmlStructure(
                    "Element-type plaintext is not a single element".into(),
                ));
            }
        }
        Ok(())
    }
}

fn utf8(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data)
        .map_err(|e| Error::Transform(format!("plaintext is not valid UTF-8: {e}")))
}
