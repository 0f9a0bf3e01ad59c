#![forbid(unsafe_code)]

//! Public-key signature transforms (RSA PKCS#1 v1.5, RSA-PSS, ECDSA).
//!
//! The input is hashed incrementally; the key operation runs once on the
//! final hash, so memory stays bounded however large `<SignedInfo>` is.

use crate::hash::{new_hasher, with_hash, HashAlg};
use digest::DynDigest;
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use std::borrow::Cow;
use solna_core::{algorithm, Error, Result};
use solna_keys::{Key, KeyData, KeyDataId, KeyRequirement, KeyType, KeyUsage};
use solna_transforms::{
    require_operation, DataType, Operation, Transform, TransformId, TransformIo, TransformUsage,
};

const P256_FIELD_LEN: usize = 32;
const P384_FIELD_LEN: usize = 48;

/// A hash shorter than the curve order, left-padded to the field size.
/// The padded value is the same integer, so signatures match unpadded ones.
fn field_prehash(prehash: &[u8], field_len: usize) -> Cow<'_, [u8]> {
    if prehash.len() >= field_len {
        return Cow::Borrowed(prehash);
    }
    let mut padded = vec![0u8; field_len - prehash.len()];
    padded.extend_from_slice(prehash);
    Cow::Owned(padded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    RsaPkcs1,
    RsaPss,
    Ecdsa,
}

macro_rules! sig_id {
    ($name:literal, $href:expr, $scheme:expr, $alg:expr) => {
        (
            TransformId {
                name: $name,
                href: $href,
                usage: TransformUsage::Signature,
            },
            $scheme,
            $alg,
        )
    };
}

static SIGNATURES: [(TransformId, Scheme, HashAlg); 15] = [
    sig_id!("rsa-md5", algorithm::RSA_MD5, Scheme::RsaPkcs1, HashAlg::Md5),
    sig_id!("rsa-ripemd160", algorithm::RSA_RIPEMD160, Scheme::RsaPkcs1, HashAlg::Ripemd160),
    sig_id!("rsa-sha1", algorithm::RSA_SHA1, Scheme::RsaPkcs1, HashAlg::Sha1),
    sig_id!("rsa-sha224", algorithm::RSA_SHA224, Scheme::RsaPkcs1, HashAlg::Sha224),
    sig_id!("rsa-sha256", algorithm::RSA_SHA256, Scheme::RsaPkcs1, HashAlg::Sha256),
    sig_id!("rsa-sha384", algorithm::RSA_SHA384, Scheme::RsaPkcs1, HashAlg::Sha384),
    sig_id!("rsa-sha512", algorithm::RSA_SHA512, Scheme::RsaPkcs1, HashAlg::Sha512),
    sig_id!("rsa-pss-sha256", algorithm::RSA_PSS_SHA256, Scheme::RsaPss, HashAlg::Sha256),
    sig_id!("rsa-pss-sha384", algorithm::RSA_PSS_SHA384, Scheme::RsaPss, HashAlg::Sha384),
    sig_id!("rsa-pss-sha512", algorithm::RSA_PSS_SHA512, Scheme::RsaPss, HashAlg::Sha512),
    sig_id!("ecdsa-ripemd160", algorithm::ECDSA_RIPEMD160, Scheme::Ecdsa, HashAlg::Ripemd160),
    sig_id!("ecdsa-sha1", algorithm::ECDSA_SHA1, Scheme::Ecdsa, HashAlg::Sha1),
    sig_id!("ecdsa-sha256", algorithm::ECDSA_SHA256, Scheme::Ecdsa, HashAlg::Sha256),
    sig_id!("ecdsa-sha384", algorithm::ECDSA_SHA384, Scheme::Ecdsa, HashAlg::Sha384),
    sig_id!("ecdsa-sha512", algorithm::ECDSA_SHA512, Scheme::Ecdsa, HashAlg::Sha512),
];

pub(crate) fn ids() -> impl Iterator<Item = &'static TransformId> {
    SIGNATURES.iter().map(|(id, _, _)| id)
}

pub(crate) fn create(href: &str) -> Option<Box<dyn Transform>> {
    SIGNATURES
        .iter()
        .find(|(id, _, _)| id.href == href)
        .map(|(id, scheme, alg)| {
            Box::new(SignatureTransform::new(id, *scheme, *alg)) as Box<dyn Transform>
        })
}

pub struct SignatureTransform {
    id: &'static TransformId,
    scheme: Scheme,
    alg: HashAlg,
    operation: Option<Operation>,
    key: Option<KeyData>,
    hasher: Option<Box<dyn DynDigest>>,
    /// The hash of the complete input, once known.
    prehash: Option<Vec<u8>>,
}

impl SignatureTransform {
    fn new(id: &'static TransformId, scheme: Scheme, alg: HashAlg) -> Self {
        Self {
            id,
            scheme,
            alg,
            operation: None,
            key: None,
            hasher: None,
            prehash: None,
        }
    }

    fn backend_error(&self, e: impl std::fmt::Display) -> Error {
        Error::Backend(format!("{}: {e}", self.id.name))
    }

    fn sign_prehash(&self, key: &KeyData, prehash: &[u8]) -> Result<Vec<u8>> {
        match (self.scheme, key) {
            (Scheme::RsaPkcs1, KeyData::Rsa { private: Some(pk), .. }) => with_hash!(self.alg, |D| {
                pk.sign(rsa::Pkcs1v15Sign::new::<D>(), prehash)
                    .map_err(|e| self.backend_error(e))
            }),
            (Scheme::RsaPss, KeyData::Rsa { private: Some(pk), .. }) => {
                let mut rng = rand::thread_rng();
                with_hash!(self.alg, |D| {
                    pk.sign_with_rng(&mut rng, rsa::Pss::new::<D>(), prehash)
                        .map_err(|e| self.backend_error(e))
                })
            }
            (Scheme::Ecdsa, KeyData::EcP256 { private: Some(sk), .. }) => {
                let sig: p256::ecdsa::Signature = sk
                    .sign_prehash(&field_prehash(prehash, P256_FIELD_LEN))
                    .map_err(|e| self.backend_error(e))?;
                Ok(sig.to_bytes().to_vec())
            }
            (Scheme::Ecdsa, KeyData::EcP384 { private: Some(sk), .. }) => {
                let sig: p384::ecdsa::Signature = sk
                    .sign_prehash(&field_prehash(prehash, P384_FIELD_LEN))
                    .map_err(|e| self.backend_error(e))?;
                Ok(sig.to_bytes().to_vec())
            }
            _ => Err(Error::InvalidKeyData(format!(
                "{}: private key of the right type required",
                self.id.name
            ))),
        }
    }

    fn verify_prehash(&self, key: &KeyData, prehash: &[u8], signature: &[u8]) -> Result<bool> {
        match (self.scheme, key) {
            (Scheme::RsaPkcs1, KeyData::Rsa { public, .. }) => Ok(with_hash!(self.alg, |D| {
                public
                    .verify(rsa::Pkcs1v15Sign::new::<D>(), prehash, signature)
                    .is_ok()
            })),
            (Scheme::RsaPss, KeyData::Rsa { public, .. }) => Ok(with_hash!(self.alg, |D| {
                public
                    .verify(rsa::Pss::new::<D>(), prehash, signature)
                    .is_ok()
            })),
            (Scheme::Ecdsa, KeyData::EcP256 { public, .. }) => {
                // A value of the wrong shape is a failed signature, not a fault.
                let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(public
                    .verify_prehash(&field_prehash(prehash, P256_FIELD_LEN), &sig)
                    .is_ok())
            }
            (Scheme::Ecdsa, KeyData::EcP384 { public, .. }) => {
                let Ok(sig) = p384::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(public
                    .verify_prehash(&field_prehash(prehash, P384_FIELD_LEN), &sig)
                    .is_ok())
            }
            _ => Err(Error::InvalidKeyData(format!(
                "{}: public key of the right type required",
                self.id.name
            ))),
        }
    }
}

impl Transform for SignatureTransform {
    fn id(&self) -> &'static TransformId {
        self.id
    }

    fn input_type(&self) -> DataType {
        DataType::Binary
    }

    fn output_type(&self) -> DataType {
        DataType::Binary
    }

    fn initialize(&mut self, op: Operation) -> Result<()> {
        require_operation(self.id, op, &[Operation::Sign, Operation::Verify])?;
        self.operation = Some(op);
        self.hasher = Some(new_hasher(self.alg));
        Ok(())
    }

    fn key_requirement(&self) -> Option<KeyRequirement> {
        let key_id = match self.scheme {
            Scheme::RsaPkcs1 | Scheme::RsaPss => KeyDataId::Rsa,
            Scheme::Ecdsa => KeyDataId::Ec,
        };
        Some(match self.operation {
            Some(Operation::Sign) => KeyRequirement::new(key_id, KeyType::Private, KeyUsage::Sign),
            _ => KeyRequirement::new(key_id, KeyType::Public, KeyUsage::Verify),
        })
    }

    fn set_key(&mut self, key: &Key) -> Result<()> {
        self.key = Some(key.data.clone());
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(io.input.as_slice());
        }
        io.input.clear();
        if !last {
            return Ok(());
        }
        let Some(hasher) = self.hasher.take() else {
            return Ok(());
        };
        let prehash = hasher.finalize().into_vec();
        if self.operation == Some(Operation::Sign) {
            let key = self
                .key
                .as_ref()
                .ok_or_else(|| Error::MissingKey(format!("{}: no key", self.id.name)))?;
            let signature = self.sign_prehash(key, &prehash)?;
            io.output.append(&signature)?;
        }
        self.prehash = Some(prehash);
        Ok(())
    }

    fn verify(&mut self, expected: &[u8]) -> Result<bool> {
        let prehash = self
            .prehash
            .as_deref()
            .ok_or_else(|| Error::InvalidStatus(format!("{}: input not finished", self.id.name)))?;
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::MissingKey(format!("{}: no key", self.id.name)))?;
        self.verify_prehash(key, prehash, expected)
    }

    fn finalize(&mut self) {
        self.key = None;
        self.hasher = None;
        self.prehash = None;
    }
}
