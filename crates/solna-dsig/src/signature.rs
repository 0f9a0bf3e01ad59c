#![forbid(unsafe_code)]

//! The `<SignedInfo>` chain shared by signing and verification.

use crate::context::DsigContext;
use crate::reference::{algorithm_of, required_child};
use solna_core::{ns, Error, Outcome, Result};
use solna_transforms::memory::MemoryBufferTransform;
use solna_transforms::{MemoryTap, Operation, TransformChain, TransformUsage};
use solna_xml::document::{find_child_element, find_child_elements, find_element, text_content};
use solna_xml::{NodeSet, XmlDocument};

/// The elements of one `<Signature>`.
pub(crate) struct SignatureParts<'a, 'i> {
    pub signed_info: roxmltree::Node<'a, 'i>,
    pub c14n_method: roxmltree::Node<'a, 'i>,
    pub signature_method: roxmltree::Node<'a, 'i>,
    pub signature_value: roxmltree::Node<'a, 'i>,
    pub key_info: Option<roxmltree::Node<'a, 'i>>,
}

impl<'a, 'i> SignatureParts<'a, 'i> {
    /// Locate the first `<ds:Signature>` in the document.
    pub fn locate(doc: &'a roxmltree::Document<'i>) -> Result<Self> {
        let signature = find_element(doc, ns::DSIG, ns::node::SIGNATURE)
            .ok_or_else(|| Error::MissingElement(ns::node::SIGNATURE.into()))?;
        let signed_info = required_child(signature, ns::node::SIGNED_INFO)?;
        Ok(Self {
            signed_info,
            c14n_method: required_child(signed_info, ns::node::CANONICALIZATION_METHOD)?,
            signature_method: required_child(signed_info, ns::node::SIGNATURE_METHOD)?,
            signature_value: required_child(signature, ns::node::SIGNATURE_VALUE)?,
            key_info: find_child_element(signature, ns::DSIG, ns::node::KEY_INFO),
        })
    }

    /// The `<Reference>` children of `<SignedInfo>`; at least one.
    pub fn references(&self) -> Result<Vec<roxmltree::Node<'a, 'i>>> {
        let refs = find_child_elements(self.signed_info, ns::DSIG, ns::node::REFERENCE);
        if refs.is_empty() {
            return Err(Error::MissingElement("Reference in SignedInfo".into()));
        }
        Ok(refs)
    }
}

/// Output of the `<SignedInfo>` chain.
pub(crate) struct SignatureResult {
    /// The signature value when signing; empty when verifying.
    pub value: Vec<u8>,
    pub outcome: Outcome,
    /// Name of the key used, if it has one.
    pub key_name: Option<String>,
}

impl DsigContext<'_> {
    fn check_hmac_length(&self, method: roxmltree::Node<'_, '_>) -> Result<()> {
        if self.hmac_min_out_len == 0 {
            return Ok(());
        }
        let Some(length) = find_child_element(method, ns::DSIG, ns::node::HMAC_OUTPUT_LENGTH)
        else {
            return Ok(());
        };
        let text = text_content(length);
        let bits: usize = text.trim().parse().map_err(|_| {
            Error::InvalidTransform(format!("invalid HMACOutputLength: '{}'", text.trim()))
        })?;
        if bits < self.hmac_min_out_len {
            return Err(Error::SizeMismatch(format!(
                "HMACOutputLength {bits} below the configured minimum {}",
                self.hmac_min_out_len
            )));
        }
        Ok(())
    }

    /// Canonicalize `<SignedInfo>` and run it through the signature method.
    ///
    /// With `expected`, the computed value is verified against it.
    pub(crate) fn run_signed_info(
        &mut self,
        doc: &XmlDocument,
        parts: &SignatureParts<'_, '_>,
        op: Operation,
        expected: Option<&[u8]>,
    ) -> Result<SignatureResult> {
        let c14n_href = algorithm_of(parts.c14n_method)?;
        let method_href = algorithm_of(parts.signature_method)?;
        self.check_hmac_length(parts.signature_method)?;

        let mut chain = TransformChain::new(op).with_parser_options(self.parser_options.clone());
        let c14n = self
            .registry
            .create_for(c14n_href, &[TransformUsage::Canonicalization])?;
        chain.push_with_params(c14n, parts.c14n_method)?;
        let tap = self.store_signed_info.then(MemoryTap::new);
        if let Some(tap) = &tap {
            chain.push(Box::new(MemoryBufferTransform::with_tap(tap.clone())))?;
        }
        let method = self
            .registry
            .create_for(method_href, &[TransformUsage::Signature])?;
        chain.push_with_params(method, parts.signature_method)?;

        let (key_name, key_source) = {
            let stage = chain
                .last_mut()
                .ok_or_else(|| Error::InvalidStatus("empty SignedInfo chain".into()))?;
            let req = stage.key_requirement()?.ok_or_else(|| {
                Error::InvalidTransform(format!("{} takes no key", stage.name()))
            })?;
            let (key, source) =
                self.key_info_ctx
                    .resolve_with_source(parts.key_info, &req, &self.keys_manager)?;
            stage.set_key(&key)?;
            (key.name.clone(), source)
        };

        chain.push_tree(NodeSet::tree(doc, parts.signed_info.id(), true))?;
        let value = chain.take_output();
        let outcome = match expected {
            Some(expected) => chain.verify_last(expected)?,
            None => Outcome::Succeeded,
        };

        self.signed_info = tap.map(|t| t.take());
        self.c14n_method = Some(c14n_href.to_owned());
        self.signature_method = Some(method_href.to_owned());
        self.key_source = Some(key_source);
        Ok(SignatureResult {
            value,
            outcome,
            key_name,
        })
    }
}
