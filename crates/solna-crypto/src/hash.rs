#![forbid(unsafe_code)]

//! Hash selection shared by the digest, HMAC and signature transforms.

use digest::DynDigest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Md5,
    Ripemd160,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

impl HashAlg {
    pub fn output_bits(self) -> usize {
        match self {
            Self::Md5 => 128,
            Self::Ripemd160 | Self::Sha1 => 160,
            Self::Sha224 | Self::Sha3_224 => 224,
            Self::Sha256 | Self::Sha3_256 => 256,
            Self::Sha384 | Self::Sha3_384 => 384,
            Self::Sha512 | Self::Sha3_512 => 512,
        }
    }
}

/// Run `$body` with `$d` bound to the hash type for `$alg`.
macro_rules! with_hash {
    ($alg:expr, |$d:ident| $body:expr) => {
        match $alg {
            $crate::hash::HashAlg::Md5 => {
                type $d = md5::Md5;
                $body
            }
            $crate::hash::HashAlg::Ripemd160 => {
                type $d = ripemd::Ripemd160;
                $body
            }
            $crate::hash::HashAlg::Sha1 => {
                type $d = sha1::Sha1;
                $body
            }
            $crate::hash::HashAlg::Sha224 => {
                type $d = sha2::Sha224;
                $body
            }
            $crate::hash::HashAlg::Sha256 => {
                type $d = sha2::Sha256;
                $body
            }
            $crate::hash::HashAlg::Sha384 => {
                type $d = sha2::Sha384;
                $body
            }
            $crate::hash::HashAlg::Sha512 => {
                type $d = sha2::Sha512;
                $body
            }
            $crate::hash::HashAlg::Sha3_224 => {
                type $d = sha3::Sha3_224;
                $body
            }
            $crate::hash::HashAlg::Sha3_256 => {
                type $d = sha3::Sha3_256;
                $body
            }
            $crate::hash::HashAlg::Sha3_384 => {
                type $d = sha3::Sha3_384;
                $body
            }
            $crate::hash::HashAlg::Sha3_512 => {
                type $d = sha3::Sha3_512;
                $body
            }
        }
    };
}
pub(crate) use with_hash;

/// A fresh incremental hasher.
pub fn new_hasher(alg: HashAlg) -> Box<dyn DynDigest> {
    with_hash!(alg, |D| Box::new(D::default()) as Box<dyn DynDigest>)
}

/// One-shot hash.
pub fn hash(alg: HashAlg, data: &[u8]) -> Vec<u8> {
    let mut hasher = new_hasher(alg);
    hasher.update(data);
    hasher.finalize().into_vec()
}

/// Equality that does not stop at the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
