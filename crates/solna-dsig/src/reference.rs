#![forbid(unsafe_code)]

//! `<Reference>` processing.
//!
//! Each reference gets its own chain: the `<Transforms>` in order, an
//! optional capture tap, then the `<DigestMethod>`. The URI is resolved to
//! a node set (same-document) or a byte stream (external) and pushed in.

use crate::context::DsigContext;
use base64::Engine;
use solna_core::{algorithm, ns, Error, Outcome, Result};
use solna_transforms::memory::MemoryBufferTransform;
use solna_transforms::uri::{resolve_external, resolve_same_document};
use solna_transforms::{MemoryTap, Operation, TransformChain, TransformUsage, UriType};
use solna_xml::document::{find_child_element, find_child_elements, is_element, text_content};
use solna_xml::XmlDocument;
use std::fs::File;

/// Chunk size for streaming external references.
const READ_CHUNK: usize = 8192;

/// The result of processing one `<Reference>`.
#[derive(Debug, Clone)]
pub struct Reference {
    pub uri: String,
    pub id: Option<String>,
    pub ref_type: Option<String>,
    pub digest_method: String,
    /// Algorithm URIs of the `<Transforms>`, in order.
    pub transforms: Vec<String>,
    /// The digest computed over the transformed content.
    pub digest_value: Vec<u8>,
    pub status: Outcome,
    /// The bytes that were digested, when capture is enabled.
    pub pre_digest: Option<Vec<u8>>,
}

impl Reference {
    /// Whether the reference declares that it points at a `<Manifest>`.
    pub fn is_manifest(&self) -> bool {
        self.ref_type.as_deref() == Some(algorithm::MANIFEST)
    }
}

/// References of one `<Manifest>`.
///
/// Reported for the caller to judge; never part of the overall status.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub id: Option<String>,
    pub references: Vec<Reference>,
}

impl Manifest {
    pub fn all_succeeded(&self) -> bool {
        self.references.iter().all(|r| r.status.is_success())
    }
}

/// Decode a base64 element value, ignoring whitespace.
pub(crate) fn decode_base64(text: &str, what: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(format!("{what}: {e}")))
}

pub(crate) fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// The child element `name` in the DSig namespace.
pub(crate) fn required_child<'a, 'i>(
    node: roxmltree::Node<'a, 'i>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'i>> {
    find_child_element(node, ns::DSIG, name).ok_or_else(|| Error::MissingElement(name.into()))
}

/// The `Algorithm` attribute of a method element.
pub(crate) fn algorithm_of<'a>(node: roxmltree::Node<'a, '_>) -> Result<&'a str> {
    node.attribute(ns::attr::ALGORITHM).ok_or_else(|| {
        Error::MissingAttribute(format!("Algorithm on {}", node.tag_name().name()))
    })
}

impl DsigContext<'_> {
    /// Load `text` with this context's parser options and ID attributes.
    pub(crate) fn load(&self, text: String) -> Result<XmlDocument> {
        let mut doc = XmlDocument::parse_with(text, self.parser_options.clone())?;
        for attr in &self.id_attrs {
            doc.add_id_attr(attr);
        }
        Ok(doc)
    }

    fn check_transform_enabled(&self, href: &str) -> Result<()> {
        match &self.enabled_transforms {
            Some(enabled) if !enabled.iter().any(|e| e == href) => Err(Error::InvalidTransform(
                format!("transform not enabled: {href}"),
            )),
            _ => Ok(()),
        }
    }

    /// Digest one `<Reference>` of `doc`. When verifying, the result is
    /// compared with its `<DigestValue>`.
    pub(crate) fn process_reference(
        &self,
        doc: &XmlDocument,
        node: roxmltree::Node<'_, '_>,
        op: Operation,
    ) -> Result<Reference> {
        let uri = node.attribute(ns::attr::URI).unwrap_or("");
        let uri_type = UriType::classify(uri);
        if !self.enabled_uri_types.allows(uri_type) {
            return Err(Error::InvalidUri(format!(
                "{uri_type:?} reference URIs are disabled: '{uri}'"
            )));
        }

        let digest_node = required_child(node, ns::node::DIGEST_METHOD)?;
        let digest_method = algorithm_of(digest_node)?;

        let mut chain = TransformChain::new(op).with_parser_options(self.parser_options.clone());
        let mut transforms = Vec::new();
        if let Some(list) = find_child_element(node, ns::DSIG, ns::node::TRANSFORMS) {
            for t in find_child_elements(list, ns::DSIG, ns::node::TRANSFORM) {
                let href = algorithm_of(t)?;
                self.check_transform_enabled(href)?;
                let transform = self.registry.create_for(
                    href,
                    &[TransformUsage::Canonicalization, TransformUsage::Generic],
                )?;
                chain.push_with_params(transform, t)?;
                transforms.push(href.to_owned());
            }
        }

        let tap = self.store_references.then(MemoryTap::new);
        if let Some(tap) = &tap {
            chain.push(Box::new(MemoryBufferTransform::with_tap(tap.clone())))?;
        }
        let digest = self
            .registry
            .create_for(digest_method, &[TransformUsage::Digest])?;
        chain.push_with_params(digest, digest_node)?;

        match uri_type {
            UriType::Empty | UriType::SameDocument => {
                chain.push_tree(resolve_same_document(doc, uri)?)?;
            }
            UriType::External => {
                let path = resolve_external(uri, &self.url_maps, self.base_dir.as_deref())?;
                log::debug!("reference '{uri}' read from {}", path.display());
                chain.push_reader(File::open(&path)?, READ_CHUNK)?;
            }
        }
        let digest_value = chain.take_output();

        let status = match op {
            Operation::Sign => Outcome::Succeeded,
            _ => {
                let value = required_child(node, ns::node::DIGEST_VALUE)?;
                let expected = decode_base64(&text_content(value), "DigestValue")?;
                let outcome = chain.verify_last(&expected)?;
                if chain.is_finished() {
                    outcome
                } else {
                    Outcome::Failed
                }
            }
        };
        match status {
            Outcome::Succeeded => log::debug!("reference '{uri}': {status:?}"),
            _ => log::warn!("reference '{uri}': digest mismatch"),
        }

        Ok(Reference {
            uri: uri.to_owned(),
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            ref_type: node.attribute(ns::attr::TYPE).map(str::to_owned),
            digest_method: digest_method.to_owned(),
            transforms,
            digest_value,
            status,
            pre_digest: tap.map(|t| t.take()),
        })
    }

    /// The `<Manifest>` a manifest-typed reference points at.
    ///
    /// Only same-document `#id` references are followed; anything else is
    /// left unprocessed.
    pub(crate) fn manifest_target<'a, 'i>(
        &self,
        doc: &XmlDocument,
        parsed: &'a roxmltree::Document<'i>,
        node: roxmltree::Node<'_, '_>,
    ) -> Result<Option<roxmltree::Node<'a, 'i>>> {
        if node.attribute(ns::attr::TYPE) != Some(algorithm::MANIFEST) {
            return Ok(None);
        }
        let uri = node.attribute(ns::attr::URI).unwrap_or("");
        let Some(id) = uri.strip_prefix('#').filter(|id| !id.starts_with("xpointer(")) else {
            log::debug!("manifest reference '{uri}' not followed");
            return Ok(None);
        };
        let ids = doc.build_id_map(parsed)?;
        let target = ids
            .get(id)
            .and_then(|nid| parsed.get_node(*nid))
            .ok_or_else(|| Error::InvalidUri(format!("ID not found: {id}")))?;
        if !is_element(target, ns::DSIG, ns::node::MANIFEST) {
            return Err(Error::XmlStructure(format!(
                "reference '{uri}' is typed Manifest but points at <{}>",
                target.tag_name().name()
            )));
        }
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_keys::KeysManager;
    use solna_transforms::TransformRegistry;

    fn registry() -> TransformRegistry {
        TransformRegistry::new().with_backend(Box::new(solna_crypto::Backend::init().unwrap()))
    }

    const DOC: &str = r##"<root xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><data Id="d">hello</data><ds:Reference URI="#d"><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue/></ds:Reference></root>"##;

    fn reference_node<'a, 'i>(parsed: &'a roxmltree::Document<'i>) -> roxmltree::Node<'a, 'i> {
        parsed
            .descendants()
            .find(|n| n.has_tag_name((ns::DSIG, "Reference")))
            .unwrap()
    }

    #[test]
    fn test_digest_of_same_document_reference() {
        let registry = registry();
        let mut ctx = DsigContext::new(&registry, KeysManager::new());
        ctx.store_references = true;
        let doc = ctx.load(DOC.into()).unwrap();
        let parsed = doc.parse_doc().unwrap();
        let r = ctx
            .process_reference(&doc, reference_node(&parsed), Operation::Sign)
            .unwrap();
        assert_eq!(r.uri, "#d");
        assert_eq!(r.digest_value.len(), 32);
        // Inclusive c14n carries the namespace declared on the root.
        assert_eq!(
            r.pre_digest.as_deref(),
            Some(&br#"<data xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="d">hello</data>"#[..])
        );
    }

    #[test]
    fn test_disabled_uri_type() {
        let registry = registry();
        let mut ctx = DsigContext::new(&registry, KeysManager::new());
        ctx.enabled_uri_types.same_document = false;
        let doc = ctx.load(DOC.into()).unwrap();
        let parsed = doc.parse_doc().unwrap();
        assert!(matches!(
            ctx.process_reference(&doc, reference_node(&parsed), Operation::Sign),
            Err(Error::InvalidUri(_))
        ));
    }

    #[test]
    fn test_external_reference_needs_mapping() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"external bytes").unwrap();
        let xml = r#"<ds:Reference xmlns:ds="http://www.w3.org/2000/09/xmldsig#" URI="http://example.com/payload"><ds:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/><ds:DigestValue/></ds:Reference>"#;

        let ctx = DsigContext::new(&registry, KeysManager::new());
        let doc = ctx.load(xml.into()).unwrap();
        let parsed = doc.parse_doc().unwrap();
        assert!(matches!(
            ctx.process_reference(&doc, parsed.root_element(), Operation::Sign),
            Err(Error::InvalidUri(_))
        ));

        let mut ctx = DsigContext::new(&registry, KeysManager::new());
        ctx.add_url_map("http://example.com/payload", path.to_str().unwrap());
        let r = ctx
            .process_reference(&doc, parsed.root_element(), Operation::Sign)
            .unwrap();
        assert_eq!(r.digest_value.len(), 20);
    }
}
