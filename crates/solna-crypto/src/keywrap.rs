#![forbid(unsafe_code)]

//! AES key wrap (RFC 3394) for `<EncryptedKey>`.

use aes_kw::Kek;
use solna_core::{algorithm, Error, Result};
use solna_keys::{Key, KeyDataId, KeyRequirement, KeyType, KeyUsage};
use solna_transforms::{
    require_operation, DataType, Operation, Transform, TransformId, TransformIo, TransformUsage,
};

macro_rules! kw_id {
    ($name:literal, $href:expr, $kek_len:literal) => {
        (
            TransformId {
                name: $name,
                href: $href,
                usage: TransformUsage::KeyTransport,
            },
            $kek_len,
        )
    };
}

static KEY_WRAPS: [(TransformId, usize); 3] = [
    kw_id!("kw-aes128", algorithm::KW_AES128, 16),
    kw_id!("kw-aes192", algorithm::KW_AES192, 24),
    kw_id!("kw-aes256", algorithm::KW_AES256, 32),
];

pub(crate) fn ids() -> impl Iterator<Item = &'static TransformId> {
    KEY_WRAPS.iter().map(|(id, _)| id)
}

pub(crate) fn create(href: &str) -> Option<Box<dyn Transform>> {
    KEY_WRAPS
        .iter()
        .find(|(id, _)| id.href == href)
        .map(|(id, kek_len)| Box::new(AesKeyWrapTransform::new(id, *kek_len)) as Box<dyn Transform>)
}

/// Wraps on encrypt, unwraps on decrypt. The key being wrapped is the
/// whole input.
pub struct AesKeyWrapTransform {
    id: &'static TransformId,
    kek_len: usize,
    operation: Option<Operation>,
    kek: Option<Vec<u8>>,
    data: Vec<u8>,
}

impl AesKeyWrapTransform {
    fn new(id: &'static TransformId, kek_len: usize) -> Self {
        Self {
            id,
            kek_len,
            operation: None,
            kek: None,
            data: Vec::new(),
        }
    }

    fn wrap(&self, kek: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 16 || data.len() % 8 != 0 {
            return Err(Error::SizeMismatch(format!(
                "{}: cannot wrap {} bytes",
                self.id.name,
                data.len()
            )));
        }
        let mut out = vec![0u8; data.len() + 8];
        macro_rules! do_wrap {
            ($aes:ty) => {
                Kek::<$aes>::new(kek.into())
                    .wrap(data, &mut out)
                    .map_err(|e| Error::Backend(format!("{}: {e}", self.id.name)))?
            };
        }
        match kek.len() {
            16 => do_wrap!(aes::Aes128),
            24 => do_wrap!(aes::Aes192),
            32 => do_wrap!(aes::Aes256),
            n => return Err(Error::InvalidKeyData(format!("unsupported KEK size {n}"))),
        }
        Ok(out)
    }

    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
        if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
            return Err(Error::SizeMismatch(format!(
                "{}: wrapped key of {} bytes",
                self.id.name,
                wrapped.len()
            )));
        }
        let mut out = vec![0u8; wrapped.len() - 8];
        macro_rules! do_unwrap {
            ($aes:ty) => {
                Kek::<$aes>::new(kek.into())
                    .unwrap(wrapped, &mut out)
                    .map_err(|e| Error::Backend(format!("{}: {e}", self.id.name)))?
            };
        }
        match kek.len() {
            16 => do_unwrap!(aes::Aes128),
            24 => do_unwrap!(aes::Aes192),
            32 => do_unwrap!(aes::Aes256),
            n => return Err(Error::InvalidKeyData(format!("unsupported KEK size {n}"))),
        }
        Ok(out)
    }
}

impl Transform for AesKeyWrapTransform {
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
        require_operation(self.id, op, &[Operation::Encrypt, Operation::Decrypt])?;
        self.operation = Some(op);
        Ok(())
    }

    fn key_requirement(&self) -> Option<KeyRequirement> {
        Some(
            KeyRequirement::new(KeyDataId::Aes, KeyType::Symmetric, KeyUsage::Wrap)
                .with_bits(self.kek_len * 8),
        )
    }

    fn set_key(&mut self, key: &Key) -> Result<()> {
        match key.symmetric_key_bytes() {
            Some(bytes) if bytes.len() == self.kek_len => {
                self.kek = Some(bytes.to_vec());
                Ok(())
            }
            _ => Err(Error::InvalidKeyData(format!(
                "{}: {}-byte AES key required",
                self.id.name, self.kek_len
            ))),
        }
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        self.data.extend(io.input.take());
        if !last {
            return Ok(());
        }
        let kek = self
            .kek
            .as_deref()
            .ok_or_else(|| Error::MissingKey(format!("{}: no key", self.id.name)))?;
        let out = match self.operation {
            Some(Operation::Encrypt) => self.wrap(kek, &self.data)?,
            _ => self.unwrap(kek, &self.data)?,
        };
        self.data.clear();
        io.output.append(&out)
    }

    fn finalize(&mut self) {
        self.kek = None;
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_keys::KeyData;
    use solna_transforms::TransformChain;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn run(op: Operation, kek: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut chain = TransformChain::new(op);
        chain.push(create(algorithm::KW_AES128).unwrap())?;
        let key = Key::new(KeyData::Aes(kek.to_vec()), KeyUsage::Wrap);
        chain.last_mut().unwrap().set_key(&key)?;
        chain.push_binary(data, true)?;
        Ok(chain.take_output())
    }

    #[test]
    fn test_rfc3394_vector() {
        let kek = hex("000102030405060708090A0B0C0D0E0F");
        let data = hex("00112233445566778899AABBCCDDEEFF");
        let wrapped = run(Operation::Encrypt, &kek, &data).unwrap();
        assert_eq!(wrapped, hex("1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5"));
        assert_eq!(run(Operation::Decrypt, &kek, &wrapped).unwrap(), data);
    }

    #[test]
    fn test_unwrap_integrity_failure() {
        let kek = hex("000102030405060708090A0B0C0D0E0F");
        let mut wrapped = hex("1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5");
        wrapped[3] ^= 1;
        assert!(matches!(
            run(Operation::Decrypt, &kek, &wrapped),
            Err(Error::Backend(_))
        ));
    }

    #[test]
    fn test_bad_lengths() {
        let kek = [0u8; 16];
        assert!(matches!(
            run(Operation::Encrypt, &kek, &[0u8; 12]),
            Err(Error::SizeMismatch(_))
        ));
        assert!(matches!(
            run(Operation::Decrypt, &kek, &[0u8; 16]),
            Err(Error::SizeMismatch(_))
        ));
    }

    #[test]
    fn test_wrap_usage_required() {
        let mut chain = TransformChain::new(Operation::Encrypt);
        chain.push(create(algorithm::KW_AES128).unwrap()).unwrap();
        let key = Key::new(KeyData::Aes(vec![0; 16]), KeyUsage::Encrypt);
        assert!(matches!(
            chain.last_mut().unwrap().set_key(&key),
            Err(Error::KeyUsageMismatch(_))
        ));
    }
}
