#![forbid(unsafe_code)]

//! HMAC signature transforms, with `HMACOutputLength` truncation.

use crate::hash::{constant_time_eq, HashAlg};
use hmac::{Hmac, Mac};
use solna_core::{algorithm, ns, Error, Result};
use solna_keys::{Key, KeyDataId, KeyRequirement, KeyType, KeyUsage};
use solna_transforms::{
    require_operation, DataType, Operation, Transform, TransformId, TransformIo, TransformUsage,
};

/// Truncation below this many bits is always rejected.
pub const MIN_OUTPUT_BITS: usize = 80;

macro_rules! hmac_id {
    ($name:literal, $href:expr, $alg:expr) => {
        (
            TransformId {
                name: $name,
                href: $href,
                usage: TransformUsage::Signature,
            },
            $alg,
        )
    };
}

static HMACS: [(TransformId, HashAlg); 7] = [
    hmac_id!("hmac-md5", algorithm::HMAC_MD5, HashAlg::Md5),
    hmac_id!("hmac-ripemd160", algorithm::HMAC_RIPEMD160, HashAlg::Ripemd160),
    hmac_id!("hmac-sha1", algorithm::HMAC_SHA1, HashAlg::Sha1),
    hmac_id!("hmac-sha224", algorithm::HMAC_SHA224, HashAlg::Sha224),
    hmac_id!("hmac-sha256", algorithm::HMAC_SHA256, HashAlg::Sha256),
    hmac_id!("hmac-sha384", algorithm::HMAC_SHA384, HashAlg::Sha384),
    hmac_id!("hmac-sha512", algorithm::HMAC_SHA512, HashAlg::Sha512),
];

pub(crate) fn ids() -> impl Iterator<Item = &'static TransformId> {
    HMACS.iter().map(|(id, _)| id)
}

pub(crate) fn create(href: &str) -> Option<Box<dyn Transform>> {
    HMACS
        .iter()
        .find(|(id, _)| id.href == href)
        .map(|(id, alg)| Box::new(HmacTransform::new(id, *alg)) as Box<dyn Transform>)
}

enum MacState {
    Md5(Hmac<md5::Md5>),
    Ripemd160(Hmac<ripemd::Ripemd160>),
    Sha1(Hmac<sha1::Sha1>),
    Sha224(Hmac<sha2::Sha224>),
    Sha256(Hmac<sha2::Sha256>),
    Sha384(Hmac<sha2::Sha384>),
    Sha512(Hmac<sha2::Sha512>),
}

macro_rules! each_mac {
    ($state:expr, |$m:ident| $body:expr) => {
        match $state {
            MacState::Md5($m) => $body,
            MacState::Ripemd160($m) => $body,
            MacState::Sha1($m) => $body,
            MacState::Sha224($m) => $body,
            MacState::Sha256($m) => $body,
            MacState::Sha384($m) => $body,
            MacState::Sha512($m) => $body,
        }
    };
}

impl MacState {
    fn new(alg: HashAlg, key: &[u8]) -> Result<Self> {
        let invalid = |e: hmac::digest::InvalidLength| Error::InvalidKeyData(format!("HMAC key: {e}"));
        Ok(match alg {
            HashAlg::Md5 => Self::Md5(Hmac::new_from_slice(key).map_err(invalid)?),
            HashAlg::Ripemd160 => Self::Ripemd160(Hmac::new_from_slice(key).map_err(invalid)?),
            HashAlg::Sha1 => Self::Sha1(Hmac::new_from_slice(key).map_err(invalid)?),
            HashAlg::Sha224 => Self::Sha224(Hmac::new_from_slice(key).map_err(invalid)?),
            HashAlg::Sha256 => Self::Sha256(Hmac::new_from_slice(key).map_err(invalid)?),
            HashAlg::Sha384 => Self::Sha384(Hmac::new_from_slice(key).map_err(invalid)?),
            HashAlg::Sha512 => Self::Sha512(Hmac::new_from_slice(key).map_err(invalid)?),
            other => {
                return Err(Error::InvalidTransform(format!(
                    "HMAC not available with {other:?}"
                )))
            }
        })
    }

    fn update(&mut self, data: &[u8]) {
        each_mac!(self, |m| m.update(data))
    }

    fn finalize(self) -> Vec<u8> {
        each_mac!(self, |m| m.finalize().into_bytes().to_vec())
    }
}

/// Truncate `mac` to `bits`, zeroing the unused low bits of the last byte.
fn truncate(mut mac: Vec<u8>, bits: usize) -> Vec<u8> {
    mac.truncate((bits + 7) / 8);
    if bits % 8 != 0 {
        if let Some(last) = mac.last_mut() {
            *last &= 0xFFu8 << (8 - bits % 8);
        }
    }
    mac
}

pub struct HmacTransform {
    id: &'static TransformId,
    alg: HashAlg,
    operation: Option<Operation>,
    /// Requested output length in bits; the full MAC when absent.
    output_bits: Option<usize>,
    key: Option<Vec<u8>>,
    state: Option<MacState>,
    result: Option<Vec<u8>>,
}

impl HmacTransform {
    fn new(id: &'static TransformId, alg: HashAlg) -> Self {
        Self {
            id,
            alg,
            operation: None,
            output_bits: None,
            key: None,
            state: None,
            result: None,
        }
    }

    /// Output length in bits.
    pub fn output_bits(&self) -> usize {
        self.output_bits.unwrap_or(self.alg.output_bits())
    }

    /// Set the truncated output length, as `HMACOutputLength` would.
    pub fn set_output_bits(&mut self, bits: usize) -> Result<()> {
        let full = self.alg.output_bits();
        let floor = MIN_OUTPUT_BITS.max(full / 2);
        if bits < floor || bits > full {
            return Err(Error::SizeMismatch(format!(
                "{}: HMACOutputLength {bits} outside {floor}..={full}",
                self.id.name
            )));
        }
        self.output_bits = Some(bits);
        Ok(())
    }
}

impl Transform for HmacTransform {
    fn id(&self) -> &'static TransformId {
        self.id
    }

    fn input_type(&self) -> DataType {
        DataType::Binary
    }

    fn output_type(&self) -> DataType {
        DataType::Binary
    }

    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        let Some(length) = node.children().find(|n| {
            n.is_element()
                && n.tag_name().name() == ns::node::HMAC_OUTPUT_LENGTH
                && n.tag_name().namespace() == Some(ns::DSIG)
        }) else {
            return Ok(());
        };
        let text = length.text().unwrap_or("").trim();
        let bits: usize = text.parse().map_err(|_| {
            Error::InvalidTransform(format!("invalid HMACOutputLength: '{text}'"))
        })?;
        self.set_output_bits(bits)
    }

    fn initialize(&mut self, op: Operation) -> Result<()> {
        require_operation(self.id, op, &[Operation::Sign, Operation::Verify])?;
        self.operation = Some(op);
        Ok(())
    }

    fn key_requirement(&self) -> Option<KeyRequirement> {
        let usage = match self.operation {
            Some(Operation::Sign) => KeyUsage::Sign,
            _ => KeyUsage::Verify,
        };
        Some(KeyRequirement::new(KeyDataId::Hmac, KeyType::Symmetric, usage))
    }

    fn set_key(&mut self, key: &Key) -> Result<()> {
        let bytes = key
            .symmetric_key_bytes()
            .ok_or_else(|| Error::InvalidKeyData("HMAC key required".into()))?;
        self.key = Some(bytes.to_vec());
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        if self.state.is_none() && self.result.is_none() {
            let key = self
                .key
                .as_deref()
                .ok_or_else(|| Error::MissingKey(format!("{}: no key", self.id.name)))?;
            self.state = Some(MacState::new(self.alg, key)?);
        }
        if let Some(state) = self.state.as_mut() {
            state.update(io.input.as_slice());
        }
        io.input.clear();

        if last {
            if let Some(state) = self.state.take() {
                let mac = truncate(state.finalize(), self.output_bits());
                if self.operation == Some(Operation::Sign) {
                    io.output.append(&mac)?;
                }
                self.result = Some(mac);
            }
        }
        Ok(())
    }

    fn verify(&mut self, expected: &[u8]) -> Result<bool> {
        let computed = self
            .result
            .as_deref()
            .ok_or_else(|| Error::InvalidStatus(format!("{}: no MAC yet", self.id.name)))?;
        // Only the first output_bits of the stored value count.
        let expected = truncate(expected.to_vec(), self.output_bits());
        Ok(expected.len() == (self.output_bits() + 7) / 8 && constant_time_eq(computed, &expected))
    }

    fn finalize(&mut self) {
        self.key = None;
        self.state = None;
        self.result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_keys::KeyData;
    use solna_transforms::TransformChain;

    fn params(bits: usize) -> String {
        format!(
            r#"<SignatureMethod xmlns="http://www.w3.org/2000/09/xmldsig#"><HMACOutputLength>{bits}</HMACOutputLength></SignatureMethod>"#
        )
    }

    fn hmac_key() -> Key {
        Key::new(KeyData::Hmac(b"secret".to_vec()), KeyUsage::Any)
    }

    fn run(op: Operation, bits: Option<usize>, data: &[u8]) -> TransformChain<'static> {
        let mut chain = TransformChain::new(op);
        let t = create(algorithm::HMAC_SHA1).unwrap();
        match bits {
            Some(bits) => {
                let xml = params(bits);
                let doc = roxmltree::Document::parse(&xml).unwrap();
                chain.push_with_params(t, doc.root_element()).unwrap();
            }
            None => {
                chain.push(t).unwrap();
            }
        }
        chain.last_mut().unwrap().set_key(&hmac_key()).unwrap();
        chain.push_binary(data, true).unwrap();
        chain
    }

    #[test]
    fn test_rfc2202_case_2() {
        let mut chain = TransformChain::new(Operation::Sign);
        chain.push(create(algorithm::HMAC_SHA1).unwrap()).unwrap();
        let key = Key::new(KeyData::Hmac(b"Jefe".to_vec()), KeyUsage::Sign);
        chain.last_mut().unwrap().set_key(&key).unwrap();
        chain.push_binary(b"what do ya want for nothing?", true).unwrap();
        let hex: String = chain.output().iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(hex, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn test_jefe_vectors_md5_ripemd160() {
        for (href, expected) in [
            (algorithm::HMAC_MD5, "750c783e6ab0b503eaa86e310a5db738"),
            (
                algorithm::HMAC_RIPEMD160,
                "dda6c0213a485a9e24f4742064a7f033b43c4069",
            ),
        ] {
            let mut chain = TransformChain::new(Operation::Sign);
            chain.push(create(href).unwrap()).unwrap();
            let key = Key::new(KeyData::Hmac(b"Jefe".to_vec()), KeyUsage::Sign);
            chain.last_mut().unwrap().set_key(&key).unwrap();
            chain.push_binary(b"what do ya want for nothing?", true).unwrap();
            let hex: String = chain.output().iter().map(|b| format!("{b:02x}")).collect();
            assert_eq!(hex, expected, "{href}");
        }
    }

    #[test]
    fn test_80_bit_truncation() {
        let full = run(Operation::Sign, None, b"payload").take_output();
        let short = run(Operation::Sign, Some(80), b"payload").take_output();
        assert_eq!(short.len(), 10);
        assert_eq!(short, full[..10]);

        let mut verify = run(Operation::Verify, Some(80), b"payload");
        assert!(verify.verify_last(&short).unwrap().is_success());

        let mut tampered = short.clone();
        tampered[9] ^= 0x01;
        let mut verify = run(Operation::Verify, Some(80), b"payload");
        assert!(!verify.verify_last(&tampered).unwrap().is_success());
    }

    #[test]
    fn test_partial_byte_truncation() {
        let full = run(Operation::Sign, None, b"payload").take_output();
        let short = run(Operation::Sign, Some(84), b"payload").take_output();
        assert_eq!(short.len(), 11);
        assert_eq!(short[10], full[10] & 0xF0);

        // Bits past the output length are ignored on verify.
        let mut noisy = short.clone();
        noisy[10] |= 0x0F;
        let mut verify = run(Operation::Verify, Some(84), b"payload");
        assert!(verify.verify_last(&noisy).unwrap().is_success());
    }

    #[test]
    fn test_output_length_bounds() {
        let mut t = HmacTransform::new(&HMACS[0].0, HashAlg::Sha1);
        assert!(matches!(t.set_output_bits(40), Err(Error::SizeMismatch(_))));
        assert!(matches!(t.set_output_bits(161), Err(Error::SizeMismatch(_))));
        let mut t = HmacTransform::new(&HMACS[2].0, HashAlg::Sha256);
        assert!(matches!(t.set_output_bits(96), Err(Error::SizeMismatch(_))));
        assert!(t.set_output_bits(128).is_ok());
    }

    #[test]
    fn test_requires_hmac_key() {
        let mut chain = TransformChain::new(Operation::Sign);
        chain.push(create(algorithm::HMAC_SHA256).unwrap()).unwrap();
        let aes = Key::new(KeyData::Aes(vec![0; 16]), KeyUsage::Any);
        assert!(matches!(
            chain.last_mut().unwrap().set_key(&aes),
            Err(Error::InvalidKeyData(_))
        ));
        assert!(matches!(
            chain.push_binary(b"x", true),
            Err(Error::MissingKey(_))
        ));
    }
}
