#![forbid(unsafe_code)]

//! Digest transforms for `<DigestMethod>`.

use crate::hash::{constant_time_eq, new_hasher, HashAlg};
use digest::DynDigest;
use solna_core::{algorithm, Error, Result};
use solna_transforms::{
    require_operation, DataType, Operation, Transform, TransformId, TransformIo, TransformUsage,
};

macro_rules! digest_id {
    ($name:literal, $href:expr, $alg:expr) => {
        (
            TransformId {
                name: $name,
                href: $href,
                usage: TransformUsage::Digest,
            },
            $alg,
        )
    };
}

static DIGESTS: [(TransformId, HashAlg); 11] = [
    digest_id!("md5", algorithm::MD5, HashAlg::Md5),
    digest_id!("ripemd160", algorithm::RIPEMD160, HashAlg::Ripemd160),
    digest_id!("sha1", algorithm::SHA1, HashAlg::Sha1),
    digest_id!("sha224", algorithm::SHA224, HashAlg::Sha224),
    digest_id!("sha256", algorithm::SHA256, HashAlg::Sha256),
    digest_id!("sha384", algorithm::SHA384, HashAlg::Sha384),
    digest_id!("sha512", algorithm::SHA512, HashAlg::Sha512),
    digest_id!("sha3-224", algorithm::SHA3_224, HashAlg::Sha3_224),
    digest_id!("sha3-256", algorithm::SHA3_256, HashAlg::Sha3_256),
    digest_id!("sha3-384", algorithm::SHA3_384, HashAlg::Sha3_384),
    digest_id!("sha3-512", algorithm::SHA3_512, HashAlg::Sha3_512),
];

pub(crate) fn ids() -> impl Iterator<Item = &'static TransformId> {
    DIGESTS.iter().map(|(id, _)| id)
}

/// The hash behind a `<DigestMethod>` algorithm.
pub(crate) fn hash_for(href: &str) -> Option<HashAlg> {
    DIGESTS
        .iter()
        .find(|(id, _)| id.href == href)
        .map(|(_, alg)| *alg)
}

pub(crate) fn create(href: &str) -> Option<Box<dyn Transform>> {
    DIGESTS
        .iter()
        .find(|(id, _)| id.href == href)
        .map(|(id, alg)| Box::new(DigestTransform::new(id, *alg)) as Box<dyn Transform>)
}

/// Hashes its input; the digest value is the output.
pub struct DigestTransform {
    id: &'static TransformId,
    alg: HashAlg,
    hasher: Option<Box<dyn DynDigest>>,
    result: Option<Vec<u8>>,
}

impl DigestTransform {
    fn new(id: &'static TransformId, alg: HashAlg) -> Self {
        Self {
            id,
            alg,
            hasher: None,
            result: None,
        }
    }

    pub fn result(&self) -> Option<&[u8]> {
        self.result.as_deref()
    }
}

impl Transform for DigestTransform {
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
        self.hasher = Some(new_hasher(self.alg));
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        let hasher = self
            .hasher
            .as_mut()
            .ok_or_else(|| Error::InvalidStatus(format!("{}: already finished", self.id.name)))?;
        hasher.update(io.input.as_slice());
        io.input.clear();
        if last {
            if let Some(hasher) = self.hasher.take() {
                let value = hasher.finalize().into_vec();
                io.output.append(&value)?;
                self.result = Some(value);
            }
        }
        Ok(())
    }

    fn verify(&mut self, expected: &[u8]) -> Result<bool> {
        let result = self
            .result
            .as_deref()
            .ok_or_else(|| Error::InvalidStatus(format!("{}: no digest yet", self.id.name)))?;
        Ok(constant_time_eq(result, expected))
    }

    fn finalize(&mut self) {
        self.hasher = None;
        self.result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use solna_transforms::TransformChain;

    fn digest_chain(href: &str, data: &[u8]) -> Vec<u8> {
        let mut chain = TransformChain::new(Operation::Sign);
        chain.push(create(href).unwrap()).unwrap();
        chain.push_binary(data, true).unwrap();
        chain.take_output()
    }

    #[test]
    fn test_sha256_value_and_verify() {
        let mut chain = TransformChain::new(Operation::Verify);
        chain.push(create(algorithm::SHA256).unwrap()).unwrap();
        chain.push_binary(b"hel", false).unwrap();
        chain.push_binary(b"lo", true).unwrap();
        let expected = crate::hash::hash(HashAlg::Sha256, b"hello");
        assert_eq!(chain.output(), expected.as_slice());
        assert!(chain.verify_last(&expected).unwrap().is_success());
    }

    #[test]
    fn test_md5_and_ripemd160_registered() {
        let hex = |data: Vec<u8>| -> String { data.iter().map(|b| format!("{b:02x}")).collect() };
        assert_eq!(
            hex(digest_chain(algorithm::MD5, b"message digest")),
            "f96b697d7cb7938d525a2f31aaf161d0"
        );
        assert_eq!(
            hex(digest_chain(algorithm::RIPEMD160, b"message digest")),
            "5d0689ef49d2fae572b881b123a85ffa21595f36"
        );
        assert_eq!(hash_for(algorithm::RIPEMD160), Some(HashAlg::Ripemd160));
    }

    #[test]
    fn test_mismatch_is_not_an_error() {
        let mut chain = TransformChain::new(Operation::Verify);
        chain.push(create(algorithm::SHA1).unwrap()).unwrap();
        chain.push_binary(b"data", true).unwrap();
        let outcome = chain.verify_last(&[0u8; 20]).unwrap();
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_rejects_encrypt() {
        let mut t = create(algorithm::SHA256).unwrap();
        assert!(matches!(
            t.initialize(Operation::Encrypt),
            Err(Error::InvalidTransform(_))
        ));
    }

    proptest! {
        #[test]
        fn digest_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            for (id, _) in DIGESTS.iter() {
                prop_assert_eq!(digest_chain(id.href, &data), digest_chain(id.href, &data));
            }
        }
    }
}
