#![forbid(unsafe_code)]

//! RSA-OAEP key transport (`rsa-oaep-mgf1p`).
//!
//! MGF1 is always SHA-1; the OAEP digest defaults to SHA-1 and may be
//! changed by a `<ds:DigestMethod>` child of `<EncryptionMethod>`.

use crate::digest::hash_for;
use crate::hash::{with_hash, HashAlg};
use base64::Engine;
use solna_core::{algorithm, ns, Error, Result};
use solna_keys::{Key, KeyData, KeyDataId, KeyRequirement, KeyType, KeyUsage};
use solna_transforms::{
    require_operation, DataType, Operation, Transform, TransformId, TransformIo, TransformUsage,
};

static RSA_OAEP_ID: TransformId = TransformId {
    name: "rsa-oaep-mgf1p",
    href: algorithm::RSA_OAEP,
    usage: TransformUsage::KeyTransport,
};

pub(crate) fn ids() -> impl Iterator<Item = &'static TransformId> {
    std::iter::once(&RSA_OAEP_ID)
}

pub(crate) fn create(href: &str) -> Option<Box<dyn Transform>> {
    (href == RSA_OAEP_ID.href).then(|| Box::new(RsaOaepTransform::default()) as Box<dyn Transform>)
}

pub struct RsaOaepTransform {
    digest: HashAlg,
    label: Option<String>,
    operation: Option<Operation>,
    key: Option<KeyData>,
    data: Vec<u8>,
}

impl Default for RsaOaepTransform {
    fn default() -> Self {
        Self {
            digest: HashAlg::Sha1,
            label: None,
            operation: None,
            key: None,
            data: Vec::new(),
        }
    }
}

impl RsaOaepTransform {
    fn encrypt(&self, key: &KeyData, data: &[u8]) -> Result<Vec<u8>> {
        let KeyData::Rsa { public, .. } = key else {
            return Err(Error::InvalidKeyData("RSA public key required".into()));
        };
        let mut rng = rand::thread_rng();
        with_hash!(self.digest, |D| {
            let mut padding = rsa::Oaep::new_with_mgf_hash::<D, sha1::Sha1>();
            padding.label = self.label.clone();
            public
                .encrypt(&mut rng, padding, data)
                .map_err(|e| Error::Backend(format!("RSA-OAEP encrypt: {e}")))
        })
    }

    fn decrypt(&self, key: &KeyData, data: &[u8]) -> Result<Vec<u8>> {
        let KeyData::Rsa {
            private: Some(private),
            ..
        } = key
        else {
            return Err(Error::InvalidKeyData("RSA private key required".into()));
        };
        with_hash!(self.digest, |D| {
            let mut padding = rsa::Oaep::new_with_mgf_hash::<D, sha1::Sha1>();
            padding.label = self.label.clone();
            private
                .decrypt(padding, data)
                .map_err(|e| Error::Backend(format!("RSA-OAEP decrypt: {e}")))
        })
    }
}

impl Transform for RsaOaepTransform {
    fn id(&self) -> &'static TransformId {
        &RSA_OAEP_ID
    }

    fn input_type(&self) -> DataType {
        DataType::Binary
    }

    fn output_type(&self) -> DataType {
        DataType::Binary
    }

    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        for child in node.children().filter(|n| n.is_element()) {
            let tag = child.tag_name();
            if tag.name() == ns::node::DIGEST_METHOD && tag.namespace() == Some(ns::DSIG) {
                let href = child.attribute(ns::attr::ALGORITHM).ok_or_else(|| {
                    Error::MissingAttribute("DigestMethod/@Algorithm".into())
                })?;
                self.digest = hash_for(href).ok_or_else(|| {
                    Error::InvalidTransform(format!("unsupported OAEP digest: {href}"))
                })?;
            } else if tag.name() == ns::node::OAEP_PARAMS && tag.namespace() == Some(ns::ENC) {
                let text: String = child
                    .text()
                    .unwrap_or("")
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(text)
                    .map_err(|e| Error::Base64(format!("OAEPparams: {e}")))?;
                if !bytes.is_empty() {
                    let label = String::from_utf8(bytes).map_err(|_| {
                        Error::InvalidTransform("OAEPparams must be UTF-8".into())
                    })?;
                    self.label = Some(label);
                }
            }
        }
        Ok(())
    }

    fn initialize(&mut self, op: Operation) -> Result<()> {
        require_operation(&RSA_OAEP_ID, op, &[Operation::Encrypt, Operation::Decrypt])?;
        self.operation = Some(op);
        Ok(())
    }

    fn key_requirement(&self) -> Option<KeyRequirement> {
        Some(match self.operation {
            Some(Operation::Encrypt) => {
                KeyRequirement::new(KeyDataId::Rsa, KeyType::Public, KeyUsage::Encrypt)
            }
            _ => KeyRequirement::new(KeyDataId::Rsa, KeyType::Private, KeyUsage::Decrypt),
        })
    }

    fn set_key(&mut self, key: &Key) -> Result<()> {
        self.key = Some(key.data.clone());
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        self.data.extend(io.input.take());
        if !last {
            return Ok(());
        }
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::MissingKey("rsa-oaep-mgf1p: no key".into()))?;
        let out = match self.operation {
            Some(Operation::Encrypt) => self.encrypt(key, &self.data)?,
            _ => self.decrypt(key, &self.data)?,
        };
        self.data.clear();
        io.output.append(&out)
    }

    fn finalize(&mut self) {
        self.key = None;
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_keys::loader;
    use solna_transforms::TransformChain;

    const RSA_PEM: &str = include_str!("../../solna/tests/data/rsa-2048.pem");
    const RSA_PUB_PEM: &str = include_str!("../../solna/tests/data/rsa-2048-pub.pem");

    fn run(op: Operation, params: Option<&str>, key: &Key, data: &[u8]) -> Result<Vec<u8>> {
        let mut chain = TransformChain::new(op);
        let t = create(algorithm::RSA_OAEP).unwrap();
        match params {
            Some(xml) => {
                let doc = roxmltree::Document::parse(xml).unwrap();
                chain.push_with_params(t, doc.root_element())?;
            }
            None => {
                chain.push(t)?;
            }
        }
        chain.last_mut().unwrap().set_key(key)?;
        chain.push_binary(data, true)?;
        Ok(chain.take_output())
    }

    #[test]
    fn test_round_trip_default_digest() {
        let public = loader::load_rsa_public_pem(RSA_PUB_PEM.as_bytes()).unwrap();
        let private = loader::load_rsa_private_pem(RSA_PEM.as_bytes()).unwrap();
        let session = [0x5Au8; 16];
        let wrapped = run(Operation::Encrypt, None, &public, &session).unwrap();
        assert_eq!(wrapped.len(), 256);
        assert_eq!(run(Operation::Decrypt, None, &private, &wrapped).unwrap(), session);
    }

    #[test]
    fn test_digest_and_label_parameters() {
        let params = r#"<EncryptionMethod xmlns="http://www.w3.org/2001/04/xmlenc#" Algorithm="http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p"><OAEPparams>bGFiZWw=</OAEPparams><ds:DigestMethod xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/></EncryptionMethod>"#;
        let public = loader::load_rsa_public_pem(RSA_PUB_PEM.as_bytes()).unwrap();
        let private = loader::load_rsa_private_pem(RSA_PEM.as_bytes()).unwrap();
        let wrapped = run(Operation::Encrypt, Some(params), &public, b"0123456789abcdef").unwrap();
        assert_eq!(
            run(Operation::Decrypt, Some(params), &private, &wrapped).unwrap(),
            b"0123456789abcdef"
        );
        // Without the same parameters the label check fails.
        assert!(run(Operation::Decrypt, None, &private, &wrapped).is_err());
    }

    #[test]
    fn test_decrypt_needs_private_key() {
        let public = loader::load_rsa_public_pem(RSA_PUB_PEM.as_bytes()).unwrap();
        assert!(matches!(
            run(Operation::Decrypt, None, &public, &[0u8; 256]),
            Err(Error::InvalidKeyData(_))
        ));
    }
}
