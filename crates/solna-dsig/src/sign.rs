#![forbid(unsafe_code)]

//! XML-DSig signature creation.
//!
//! Signs a template: a document holding a `<Signature>` whose
//! `<DigestValue>` and `<SignatureValue>` elements are empty. Values are
//! written by editing the document text and re-parsing, in three passes:
//! manifest digests, `<SignedInfo>` digests, then the signature itself.

use crate::context::DsigContext;
use crate::reference::{encode_base64, required_child, Manifest};
use crate::signature::SignatureParts;
use solna_core::{ns, Outcome, Result};
use solna_transforms::Operation;
use solna_xml::document::{find_child_elements, text_content};
use solna_xml::edit::{apply_edits, set_element_text, TextEdit};

impl DsigContext<'_> {
    /// Sign an XML template, returning the signed document.
    pub fn sign(&mut self, template: &str) -> Result<String> {
        self.begin()?;
        let mut text = template.to_owned();
        if self.process_manifests {
            text = self.sign_manifests(text)?;
        }

        let (text, references) = {
            let doc = self.load(text)?;
            let parsed = doc.parse_doc()?;
            let parts = SignatureParts::locate(&parsed)?;
            let mut edits = Vec::new();
            let mut references = Vec::new();
            for node in parts.references()? {
                let reference = self.process_reference(&doc, node, Operation::Sign)?;
                let value = required_child(node, ns::node::DIGEST_VALUE)?;
                edits.push(set_element_text(value, &encode_base64(&reference.digest_value))?);
                references.push(reference);
            }
            let text = apply_edits(doc.text(), edits)?;
            (text, references)
        };
        self.references = references;

        let doc = self.load(text)?;
        let parsed = doc.parse_doc()?;
        let parts = SignatureParts::locate(&parsed)?;
        let result = self.run_signed_info(&doc, &parts, Operation::Sign, None)?;

        let mut edits = vec![set_element_text(
            parts.signature_value,
            &encode_base64(&result.value),
        )?];
        if let (Some(name), Some(key_info)) = (&result.key_name, parts.key_info) {
            edits.extend(fill_empty_key_names(key_info, name)?);
        }
        let signed = apply_edits(doc.text(), edits)?;

        log::debug!(
            "signed with {} over {} reference(s)",
            self.signature_method().unwrap_or("?"),
            self.references.len()
        );
        self.signature_value = Some(result.value);
        self.status = Outcome::Succeeded;
        Ok(signed)
    }

    /// Fill the digests of every referenced `<Manifest>`.
    fn sign_manifests(&mut self, text: String) -> Result<String> {
        let doc = self.load(text)?;
        let parsed = doc.parse_doc()?;
        let parts = SignatureParts::locate(&parsed)?;
        let mut edits = Vec::new();
        let mut manifests = Vec::new();
        for node in parts.references()? {
            let Some(target) = self.manifest_target(&doc, &parsed, node)? else {
                continue;
            };
            let mut references = Vec::new();
            for inner in find_child_elements(target, ns::DSIG, ns::node::REFERENCE) {
                let reference = self.process_reference(&doc, inner, Operation::Sign)?;
                let value = required_child(inner, ns::node::DIGEST_VALUE)?;
                edits.push(set_element_text(value, &encode_base64(&reference.digest_value))?);
                references.push(reference);
            }
            manifests.push(Manifest {
                id: target.attribute(ns::attr::ID).map(str::to_owned),
                references,
            });
        }
        let text = apply_edits(doc.text(), edits)?;
        self.manifests = manifests;
        Ok(text)
    }
}

fn fill_empty_key_names(key_info: roxmltree::Node<'_, '_>, name: &str) -> Result<Vec<TextEdit>> {
    find_child_elements(key_info, ns::DSIG, ns::node::KEY_NAME)
        .into_iter()
        .filter(|n| text_content(*n).trim().is_empty())
        .map(|n| set_element_text(n, name))
        .collect()
}
