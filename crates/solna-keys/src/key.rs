#![forbid(unsafe_code)]

//! Key types and the requirement a transform places on its key.

use rsa::traits::PublicKeyParts;
use solna_core::{Error, Result};

/// What a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
    Wrap,
    Any,
}

impl KeyUsage {
    /// Whether a key restricted to `self` may serve `wanted`.
    pub fn permits(self, wanted: KeyUsage) -> bool {
        self == KeyUsage::Any || wanted == KeyUsage::Any || self == wanted
    }
}

/// The key klass: which family of key data a transform can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDataId {
    Rsa,
    Ec,
    Hmac,
    Aes,
}

impl std::fmt::Display for KeyDataId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rsa => "rsa",
            Self::Ec => "ec",
            Self::Hmac => "hmac",
            Self::Aes => "aes",
        };
        f.write_str(name)
    }
}

/// Key type. A private asymmetric key also carries its public half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Symmetric,
    Public,
    Private,
}

impl KeyType {
    /// Whether a key of type `self` satisfies a requirement for `required`.
    pub fn satisfies(self, required: KeyType) -> bool {
        match required {
            KeyType::Symmetric => self == KeyType::Symmetric,
            KeyType::Public => matches!(self, KeyType::Public | KeyType::Private),
            KeyType::Private => self == KeyType::Private,
        }
    }
}

/// The underlying key data.
#[derive(Clone)]
pub enum KeyData {
    Rsa {
        private: Option<rsa::RsaPrivateKey>,
        public: rsa::RsaPublicKey,
    },
    EcP256 {
        private: Option<p256::ecdsa::SigningKey>,
        public: p256::ecdsa::VerifyingKey,
    },
    EcP384 {
        private: Option<p384::ecdsa::SigningKey>,
        public: p384::ecdsa::VerifyingKey,
    },
    Hmac(Vec<u8>),
    Aes(Vec<u8>),
}

impl std::fmt::Debug for KeyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa { private, public } => {
                let bits = public.size() * 8;
                if private.is_some() {
                    write!(f, "RSA-{bits} private+public key")
                } else {
                    write!(f, "RSA-{bits} public key")
                }
            }
            Self::EcP256 { private, .. } => {
                if private.is_some() {
                    write!(f, "EC P-256 private+public key")
                } else {
                    write!(f, "EC P-256 public key")
                }
            }
            Self::EcP384 { private, .. } => {
                if private.is_some() {
                    write!(f, "EC P-384 private+public key")
                } else {
                    write!(f, "EC P-384 public key")
                }
            }
            Self::Hmac(k) => write!(f, "HMAC key ({} bytes)", k.len()),
            Self::Aes(k) => write!(f, "AES key ({} bytes)", k.len()),
        }
    }
}

impl KeyData {
    pub fn id(&self) -> KeyDataId {
        match self {
            Self::Rsa { .. } => KeyDataId::Rsa,
            Self::EcP256 { .. } | Self::EcP384 { .. } => KeyDataId::Ec,
            Self::Hmac(_) => KeyDataId::Hmac,
            Self::Aes(_) => KeyDataId::Aes,
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa { private, .. } => asymmetric(private.is_some()),
            Self::EcP256 { private, .. } => asymmetric(private.is_some()),
            Self::EcP384 { private, .. } => asymmetric(private.is_some()),
            Self::Hmac(_) | Self::Aes(_) => KeyType::Symmetric,
        }
    }

    /// Key size in bits: the modulus for RSA, the field for EC, the raw
    /// length for symmetric keys.
    pub fn bits(&self) -> usize {
        match self {
            Self::Rsa { public, .. } => public.size() * 8,
            Self::EcP256 { .. } => 256,
            Self::EcP384 { .. } => 384,
            Self::Hmac(k) | Self::Aes(k) => k.len() * 8,
        }
    }
}

fn asymmetric(has_private: bool) -> KeyType {
    if has_private {
        KeyType::Private
    } else {
        KeyType::Public
    }
}

/// A named key with associated data.
#[derive(Debug, Clone)]
pub struct Key {
    /// Optional name for `<KeyName>` lookup.
    pub name: Option<String>,
    pub data: KeyData,
    pub usage: KeyUsage,
}

impl Key {
    pub fn new(data: KeyData, usage: KeyUsage) -> Self {
        Self {
            name: None,
            data,
            usage,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_usage(mut self, usage: KeyUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn bits(&self) -> usize {
        self.data.bits()
    }

    /// Raw symmetric key bytes (AES, HMAC).
    pub fn symmetric_key_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            KeyData::Hmac(k) | KeyData::Aes(k) => Some(k),
            _ => None,
        }
    }

    pub fn rsa_public_key(&self) -> Option<&rsa::RsaPublicKey> {
        match &self.data {
            KeyData::Rsa { public, .. } => Some(public),
            _ => None,
        }
    }

    pub fn rsa_private_key(&self) -> Option<&rsa::RsaPrivateKey> {
        match &self.data {
            KeyData::Rsa {
                private: Some(pk), ..
            } => Some(pk),
            _ => None,
        }
    }
}

/// What key a transform needs for the operation it was initialized with.
///
/// Produced before any key is available and used twice: by key resolution
/// to pick a candidate, and by `set_key` to re-validate the chosen key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRequirement {
    pub key_id: KeyDataId,
    pub key_type: KeyType,
    pub usage: KeyUsage,
    /// Exact key size in bits, 0 for any.
    pub bits: usize,
}

impl KeyRequirement {
    pub fn new(key_id: KeyDataId, key_type: KeyType, usage: KeyUsage) -> Self {
        Self {
            key_id,
            key_type,
            usage,
            bits: 0,
        }
    }

    pub fn with_bits(mut self, bits: usize) -> Self {
        self.bits = bits;
        self
    }

    /// Validate `key` against this requirement.
    ///
    /// Wrong klass, type or size is `InvalidKeyData`; a usage the key is
    /// not allowed for is `KeyUsageMismatch`.
    pub fn check(&self, key: &Key) -> Result<()> {
        let id = key.data.id();
        if id != self.key_id {
            return Err(Error::InvalidKeyData(format!(
                "expected {} key, got {id}",
                self.key_id
            )));
        }
        let key_type = key.data.key_type();
        if !key_type.satisfies(self.key_type) {
            return Err(Error::InvalidKeyData(format!(
                "expected {:?} key, got {key_type:?}",
                self.key_type
            )));
        }
        if self.bits != 0 && key.bits() != self.bits {
            return Err(Error::InvalidKeyData(format!(
                "expected {}-bit key, got {} bits",
                self.bits,
                key.bits()
            )));
        }
        if !key.usage.permits(self.usage) {
            return Err(Error::KeyUsageMismatch(format!(
                "key restricted to {:?}, needed for {:?}",
                key.usage, self.usage
            )));
        }
        Ok(())
    }

    /// Like [`KeyRequirement::check`], as a predicate.
    pub fn matches(&self, key: &Key) -> bool {
        self.check(key).is_ok()
    }
}
