#![forbid(unsafe_code)]

//! XML-DSig signature verification.
//!
//! Core validation per XML-DSig section 3.2:
//! 1. Parse the document, register ID attributes
//! 2. Locate `<Signature>` and read `<SignedInfo>`
//! 3. For each `<Reference>`: resolve the URI, run its chain, compare digests
//! 4. Resolve the key from `<KeyInfo>` and the keys manager
//! 5. Canonicalize `<SignedInfo>` and check `<SignatureValue>`
//!
//! A digest or signature mismatch is `Ok(Outcome::Failed)`. Only faults are
//! errors.

use crate::context::DsigContext;
use crate::reference::{decode_base64, Manifest};
use crate::signature::SignatureParts;
use solna_core::{ns, Outcome, Result};
use solna_transforms::Operation;
use solna_xml::document::{find_child_elements, text_content};

impl DsigContext<'_> {
    /// Verify the first `<Signature>` of a document.
    pub fn verify(&mut self, xml: &str) -> Result<Outcome> {
        self.begin()?;
        let doc = self.load(xml.to_owned())?;
        let parsed = doc.parse_doc()?;
        let parts = SignatureParts::locate(&parsed)?;
        let expected = decode_base64(&text_content(parts.signature_value), "SignatureValue")?;

        let mut references = Vec::new();
        let mut manifests = Vec::new();
        for node in parts.references()? {
            references.push(self.process_reference(&doc, node, Operation::Verify)?);
            if !self.process_manifests {
                continue;
            }
            if let Some(target) = self.manifest_target(&doc, &parsed, node)? {
                let mut inner = Vec::new();
                for r in find_child_elements(target, ns::DSIG, ns::node::REFERENCE) {
                    inner.push(self.process_reference(&doc, r, Operation::Verify)?);
                }
                manifests.push(Manifest {
                    id: target.attribute(ns::attr::ID).map(str::to_owned),
                    references: inner,
                });
            }
        }
        self.references = references;
        self.manifests = manifests;

        let result = self.run_signed_info(&doc, &parts, Operation::Verify, Some(&expected))?;
        let references_ok = self.references.iter().all(|r| r.status.is_success());
        self.status = Outcome::from_bool(result.outcome.is_success() && references_ok);
        self.signature_value = Some(expected);

        if self.status.is_success() {
            log::debug!("signature verified");
        } else if !result.outcome.is_success() {
            log::warn!("SignatureValue does not match");
        } else {
            log::warn!("signature value matches but a reference failed");
        }
        Ok(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_core::{algorithm, Error};
    use solna_keys::{Key, KeyData, KeyUsage, KeysManager};
    use solna_transforms::{TransformRegistry, UriTypeSet};

    fn registry() -> TransformRegistry {
        TransformRegistry::new().with_backend(Box::new(solna_crypto::Backend::init().unwrap()))
    }

    fn keys() -> KeysManager {
        let mut keys = KeysManager::new();
        keys.add_key(Key::new(KeyData::Hmac(b"secret".to_vec()), KeyUsage::Any));
        keys
    }

    const ENVELOPED: &str = r#"<doc><item>payload</item><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#hmac-sha256"/><ds:Reference URI=""><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue/></ds:Reference></ds:SignedInfo><ds:SignatureValue/></ds:Signature></doc>"#;

    const WITH_MANIFEST: &str = r##"<doc><a Id="a">one</a><b Id="b">two</b><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/TR/2001/REC-xml-c14n-20010315"/><ds:SignatureMethod Algorithm="http://www.w3.org/2000/09/xmldsig#hmac-sha1"/><ds:Reference URI="#m" Type="http://www.w3.org/2000/09/xmldsig#Manifest"><ds:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/><ds:DigestValue/></ds:Reference></ds:SignedInfo><ds:SignatureValue/><ds:Object><ds:Manifest Id="m"><ds:Reference URI="#a"><ds:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/><ds:DigestValue/></ds:Reference><ds:Reference URI="#b"><ds:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/><ds:DigestValue/></ds:Reference></ds:Manifest></ds:Object></ds:Signature></doc>"##;

    fn sign(template: &str, manifests: bool) -> String {
        let registry = registry();
        let mut ctx = DsigContext::new(&registry, keys());
        ctx.process_manifests = manifests;
        ctx.sign(template).unwrap()
    }

    #[test]
    fn test_round_trip_and_tamper() {
        let signed = sign(ENVELOPED, false);
        let registry = registry();

        let mut ctx = DsigContext::new(&registry, keys());
        ctx.store_references = true;
        assert_eq!(ctx.verify(&signed).unwrap(), Outcome::Succeeded);
        assert_eq!(
            ctx.references()[0].pre_digest.as_deref(),
            Some(&b"<doc><item>payload</item></doc>"[..])
        );

        let tampered = signed.replace("payload", "pavload");
        let mut ctx = DsigContext::new(&registry, keys());
        assert_eq!(ctx.verify(&tampered).unwrap(), Outcome::Failed);
        assert_eq!(ctx.references()[0].status, Outcome::Failed);
    }

    #[test]
    fn test_bad_signature_value_is_failure_not_error() {
        let signed = sign(ENVELOPED, false);
        let parsed = roxmltree::Document::parse(&signed).unwrap();
        let value = parsed
            .descendants()
            .find(|n| n.has_tag_name((ns::DSIG, "SignatureValue")))
            .map(text_content)
            .unwrap();
        let zeros = format!("{}=", "A".repeat(43));
        assert_ne!(value, zeros);
        let forged = signed.replace(&value, &zeros);
        let registry = registry();
        let mut ctx = DsigContext::new(&registry, keys());
        let outcome = ctx.verify(&forged).unwrap();
        assert_eq!(outcome, Outcome::Failed);
        assert!(ctx.references()[0].status.is_success());
    }

    #[test]
    fn test_manifest_results_kept_apart() {
        let signed = sign(WITH_MANIFEST, true);
        let tampered = signed.replace(">two<", ">2<");
        let registry = registry();
        let mut ctx = DsigContext::new(&registry, keys());
        ctx.process_manifests = true;
        // The manifest element itself is unchanged, so core validation holds.
        assert_eq!(ctx.verify(&tampered).unwrap(), Outcome::Succeeded);
        let manifest = &ctx.manifests()[0];
        assert_eq!(manifest.id.as_deref(), Some("m"));
        assert_eq!(manifest.references[0].status, Outcome::Succeeded);
        assert_eq!(manifest.references[1].status, Outcome::Failed);
        assert!(!manifest.all_succeeded());
        assert!(ctx.references()[0].is_manifest());
    }

    #[test]
    fn test_hmac_minimum_output_length() {
        let template = ENVELOPED.replace(
            r#"hmac-sha256"/>"#,
            r#"hmac-sha256"><ds:HMACOutputLength>128</ds:HMACOutputLength></ds:SignatureMethod>"#,
        );
        let signed = sign(&template, false);
        let registry = registry();
        let mut ctx = DsigContext::new(&registry, keys());
        assert!(ctx.verify(&signed).unwrap().is_success());

        let mut ctx = DsigContext::new(&registry, keys());
        ctx.hmac_min_out_len = 160;
        assert!(matches!(ctx.verify(&signed), Err(Error::SizeMismatch(_))));
    }

    #[test]
    fn test_signed_info_comment_follows_c14n_mode() {
        let commented = ENVELOPED.replace(
            "<ds:SignedInfo>",
            "<ds:SignedInfo><!--note-->",
        );
        let with_comments = commented.replace(
            "http://www.w3.org/2001/10/xml-exc-c14n#",
            algorithm::C14N11_WITH_COMMENTS,
        );
        let registry = registry();

        let mut ctx = DsigContext::new(&registry, keys());
        ctx.store_signed_info = true;
        let signed = ctx.sign(&with_comments).unwrap();
        let canonical = String::from_utf8(ctx.signed_info().unwrap().to_vec()).unwrap();
        assert!(canonical.contains("<!--note-->"));

        let mut ctx = DsigContext::new(&registry, keys());
        assert!(ctx.verify(&signed).unwrap().is_success());
        let stripped = signed.replacen("<!--note-->", "", 1);
        let mut ctx = DsigContext::new(&registry, keys());
        assert_eq!(ctx.verify(&stripped).unwrap(), Outcome::Failed);

        // Without comments the comment is not signed.
        let mut ctx = DsigContext::new(&registry, keys());
        ctx.store_signed_info = true;
        let signed = ctx.sign(&commented).unwrap();
        assert!(!ctx.signed_info().unwrap().windows(4).any(|w| w == b"<!--"));
        let stripped = signed.replacen("<!--note-->", "", 1);
        let mut ctx = DsigContext::new(&registry, keys());
        assert!(ctx.verify(&stripped).unwrap().is_success());
    }

    #[test]
    fn test_enabled_transforms_allow_list() {
        let signed = sign(ENVELOPED, false);
        let registry = registry();
        let mut ctx = DsigContext::new(&registry, keys());
        ctx.enabled_transforms = Some(vec![algorithm::EXC_C14N.to_owned()]);
        assert!(matches!(ctx.verify(&signed), Err(Error::InvalidTransform(_))));

        let mut ctx = DsigContext::new(&registry, keys());
        ctx.enabled_uri_types = UriTypeSet::local();
        ctx.enabled_transforms = Some(vec![algorithm::ENVELOPED_SIGNATURE.to_owned()]);
        assert!(ctx.verify(&signed).unwrap().is_success());
    }
}
