#![forbid(unsafe_code)]

//! Block cipher transforms for `<EncryptionMethod>` (AES-CBC, AES-GCM).
//!
//! Ciphertext layout follows XML Encryption: the IV (CBC) or nonce (GCM)
//! is prepended to the cipher output.

use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use solna_core::{algorithm, Error, Result};
use solna_keys::{Key, KeyDataId, KeyRequirement, KeyType, KeyUsage};
use solna_transforms::{
    require_operation, DataType, Operation, Transform, TransformId, TransformIo, TransformUsage,
};

const AES_BLOCK: usize = 16;
const GCM_NONCE: usize = 12;
const GCM_TAG: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Cbc,
    Gcm,
}

macro_rules! cipher_id {
    ($name:literal, $href:expr, $mode:expr, $key_len:literal) => {
        (
            TransformId {
                name: $name,
                href: $href,
                usage: TransformUsage::Cipher,
            },
            $mode,
            $key_len,
        )
    };
}

static CIPHERS: [(TransformId, Mode, usize); 6] = [
    cipher_id!("aes128-cbc", algorithm::AES128_CBC, Mode::Cbc, 16),
    cipher_id!("aes192-cbc", algorithm::AES192_CBC, Mode::Cbc, 24),
    cipher_id!("aes256-cbc", algorithm::AES256_CBC, Mode::Cbc, 32),
    cipher_id!("aes128-gcm", algorithm::AES128_GCM, Mode::Gcm, 16),
    cipher_id!("aes192-gcm", algorithm::AES192_GCM, Mode::Gcm, 24),
    cipher_id!("aes256-gcm", algorithm::AES256_GCM, Mode::Gcm, 32),
];

pub(crate) fn ids() -> impl Iterator<Item = &'static TransformId> {
    CIPHERS.iter().map(|(id, _, _)| id)
}

pub(crate) fn create(href: &str) -> Option<Box<dyn Transform>> {
    CIPHERS
        .iter()
        .find(|(id, _, _)| id.href == href)
        .map(|(id, mode, key_len)| match mode {
            Mode::Cbc => Box::new(AesCbcTransform::new(id, *key_len)) as Box<dyn Transform>,
            Mode::Gcm => Box::new(AesGcmTransform::new(id, *key_len)) as Box<dyn Transform>,
        })
}

fn cipher_key_requirement(op: Option<Operation>, key_len: usize) -> KeyRequirement {
    let usage = match op {
        Some(Operation::Encrypt) => KeyUsage::Encrypt,
        _ => KeyUsage::Decrypt,
    };
    KeyRequirement::new(KeyDataId::Aes, KeyType::Symmetric, usage).with_bits(key_len * 8)
}

fn aes_key(key: &Key, key_len: usize) -> Result<Vec<u8>> {
    match key.symmetric_key_bytes() {
        Some(bytes) if bytes.len() == key_len => Ok(bytes.to_vec()),
        _ => Err(Error::InvalidKeyData(format!("{key_len}-byte AES key required"))),
    }
}

// ── AES-CBC ──────────────────────────────────────────────────────────

enum CbcState {
    Enc128(cbc::Encryptor<aes::Aes128>),
    Enc192(cbc::Encryptor<aes::Aes192>),
    Enc256(cbc::Encryptor<aes::Aes256>),
    Dec128(cbc::Decryptor<aes::Aes128>),
    Dec192(cbc::Decryptor<aes::Aes192>),
    Dec256(cbc::Decryptor<aes::Aes256>),
}

impl CbcState {
    fn new(encrypt: bool, key: &[u8], iv: &[u8]) -> Result<Self> {
        let init = |e: cipher::InvalidLength| Error::Backend(format!("AES-CBC init: {e}"));
        Ok(match (encrypt, key.len()) {
            (true, 16) => Self::Enc128(cbc::Encryptor::new_from_slices(key, iv).map_err(init)?),
            (true, 24) => Self::Enc192(cbc::Encryptor::new_from_slices(key, iv).map_err(init)?),
            (true, 32) => Self::Enc256(cbc::Encryptor::new_from_slices(key, iv).map_err(init)?),
            (false, 16) => Self::Dec128(cbc::Decryptor::new_from_slices(key, iv).map_err(init)?),
            (false, 24) => Self::Dec192(cbc::Decryptor::new_from_slices(key, iv).map_err(init)?),
            (false, 32) => Self::Dec256(cbc::Decryptor::new_from_slices(key, iv).map_err(init)?),
            (_, n) => return Err(Error::InvalidKeyData(format!("unsupported AES key size {n}"))),
        })
    }

    /// Process whole blocks in place, carrying the chaining state.
    fn process(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(AES_BLOCK) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Enc128(c) => c.encrypt_block_mut(block),
                Self::Enc192(c) => c.encrypt_block_mut(block),
                Self::Enc256(c) => c.encrypt_block_mut(block),
                Self::Dec128(c) => c.decrypt_block_mut(block),
                Self::Dec192(c) => c.decrypt_block_mut(block),
                Self::Dec256(c) => c.decrypt_block_mut(block),
            }
        }
    }
}

/// Streaming AES-CBC with XML Encryption padding.
///
/// Only the final block is held back on decryption, since it carries the
/// padding length.
pub struct AesCbcTransform {
    id: &'static TransformId,
    key_len: usize,
    operation: Option<Operation>,
    key: Option<Vec<u8>>,
    state: Option<CbcState>,
    pending: Vec<u8>,
}

impl AesCbcTransform {
    fn new(id: &'static TransformId, key_len: usize) -> Self {
        Self {
            id,
            key_len,
            operation: None,
            key: None,
            state: None,
            pending: Vec::new(),
        }
    }

    fn key(&self) -> Result<&[u8]> {
        self.key
            .as_deref()
            .ok_or_else(|| Error::MissingKey(format!("{}: no key", self.id.name)))
    }

    fn encrypt(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        if self.state.is_none() {
            let mut iv = [0u8; AES_BLOCK];
            rand::thread_rng().fill_bytes(&mut iv);
            self.state = Some(CbcState::new(true, self.key()?, &iv)?);
            io.output.append(&iv)?;
        }
        if last {
            // At least one byte of padding, so aligned input gains a block.
            let pad = AES_BLOCK - self.pending.len() % AES_BLOCK;
            let mut fill = vec![0u8; pad - 1];
            rand::thread_rng().fill_bytes(&mut fill);
            self.pending.extend_from_slice(&fill);
            self.pending.push(pad as u8);
        }
        let ready = self.pending.len() - self.pending.len() % AES_BLOCK;
        if let Some(state) = self.state.as_mut() {
            state.process(&mut self.pending[..ready]);
        }
        io.output.append(&self.pending[..ready])?;
        self.pending.drain(..ready);
        Ok(())
    }

    fn decrypt(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        if self.state.is_none() {
            if self.pending.len() < AES_BLOCK {
                if last {
                    return Err(Error::Backend(format!("{}: ciphertext too short", self.id.name)));
                }
                return Ok(());
            }
            let iv: Vec<u8> = self.pending.drain(..AES_BLOCK).collect();
            self.state = Some(CbcState::new(false, self.key()?, &iv)?);
        }

        let ready = if last {
            if self.pending.len() % AES_BLOCK != 0 {
                return Err(Error::Backend(format!(
                    "{}: ciphertext is not a whole number of blocks",
                    self.id.name
                )));
            }
            self.pending.len()
        } else {
            // Keep the final block for unpadding.
            self.pending.len().saturating_sub(1) / AES_BLOCK * AES_BLOCK
        };
        if let Some(state) = self.state.as_mut() {
            state.process(&mut self.pending[..ready]);
        }
        io.output.append(&self.pending[..ready])?;
        self.pending.drain(..ready);

        if last {
            let pad = io.output.as_slice().last().copied().unwrap_or(0) as usize;
            if ready == 0 || pad == 0 || pad > AES_BLOCK {
                return Err(Error::Backend(format!("{}: invalid padding", self.id.name)));
            }
            io.output.remove_tail(pad)?;
        }
        Ok(())
    }
}

impl Transform for AesCbcTransform {
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
        Some(cipher_key_requirement(self.operation, self.key_len))
    }

    fn set_key(&mut self, key: &Key) -> Result<()> {
        self.key = Some(aes_key(key, self.key_len)?);
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        self.pending.extend(io.input.take());
        match self.operation {
            Some(Operation::Encrypt) => self.encrypt(io, last),
            _ => self.decrypt(io, last),
        }
    }

    fn finalize(&mut self) {
        self.key = None;
        self.state = None;
        self.pending.clear();
    }
}

// ── AES-GCM ──────────────────────────────────────────────────────────

/// One-shot AES-GCM. The whole message is buffered; nothing is released
/// before the tag has been checked.
pub struct AesGcmTransform {
    id: &'static TransformId,
    key_len: usize,
    operation: Option<Operation>,
    key: Option<Vec<u8>>,
    data: Vec<u8>,
}

impl AesGcmTransform {
    fn new(id: &'static TransformId, key_len: usize) -> Self {
        Self {
            id,
            key_len,
            operation: None,
            key: None,
            data: Vec::new(),
        }
    }

    fn seal(&self, key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::aead::consts::U12;
        use aes_gcm::aead::{Aead, KeyInit};
        use aes_gcm::Nonce;

        let nonce = Nonce::<U12>::from_slice(nonce);
        let fail = |e: aes_gcm::Error| Error::Backend(format!("{}: {e}", self.id.name));
        let init = |e: cipher::InvalidLength| {
            Error::InvalidKeyData(format!("{}: {e}", self.id.name))
        };
        match key.len() {
            16 => aes_gcm::Aes128Gcm::new_from_slice(key)
                .map_err(init)?
                .encrypt(nonce, plaintext)
                .map_err(fail),
            24 => aes_gcm::AesGcm::<aes::Aes192, U12>::new_from_slice(key)
                .map_err(init)?
                .encrypt(nonce, plaintext)
                .map_err(fail),
            32 => aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(init)?
                .encrypt(nonce, plaintext)
                .map_err(fail),
            n => Err(Error::InvalidKeyData(format!("unsupported AES key size {n}"))),
        }
    }

    fn open(&self, key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::aead::consts::U12;
        use aes_gcm::aead::{Aead, KeyInit};
        use aes_gcm::Nonce;

        let nonce = Nonce::<U12>::from_slice(nonce);
        let fail = |_: aes_gcm::Error| {
            Error::Backend(format!("{}: authentication failed", self.id.name))
        };
        let init = |e: cipher::InvalidLength| {
            Error::InvalidKeyData(format!("{}: {e}", self.id.name))
        };
        match key.len() {
            16 => aes_gcm::Aes128Gcm::new_from_slice(key)
                .map_err(init)?
                .decrypt(nonce, ciphertext)
                .map_err(fail),
            24 => aes_gcm::AesGcm::<aes::Aes192, U12>::new_from_slice(key)
                .map_err(init)?
                .decrypt(nonce, ciphertext)
                .map_err(fail),
            32 => aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(init)?
                .decrypt(nonce, ciphertext)
                .map_err(fail),
            n => Err(Error::InvalidKeyData(format!("unsupported AES key size {n}"))),
        }
    }
}

impl Transform for AesGcmTransform {
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
        Some(cipher_key_requirement(self.operation, self.key_len))
    }

    fn set_key(&mut self, key: &Key) -> Result<()> {
        self.key = Some(aes_key(key, self.key_len)?);
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        self.data.extend(io.input.take());
        if !last {
            return Ok(());
        }
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| Error::MissingKey(format!("{}: no key", self.id.name)))?;
        let data = std::mem::take(&mut self.data);
        match self.operation {
            Some(Operation::Encrypt) => {
                let mut nonce = [0u8; GCM_NONCE];
                rand::thread_rng().fill_bytes(&mut nonce);
                let sealed = self.seal(key, &nonce, &data)?;
                io.output.append(&nonce)?;
                io.output.append(&sealed)?;
            }
            _ => {
                if data.len() < GCM_NONCE + GCM_TAG {
                    return Err(Error::Backend(format!("{}: ciphertext too short", self.id.name)));
                }
                let (nonce, ciphertext) = data.split_at(GCM_NONCE);
                let plain = self.open(key, nonce, ciphertext)?;
                io.output.append(&plain)?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) {
        self.key = None;
        self.data.clear();
    }
}
