#![forbid(unsafe_code)]

//! Key loading from PEM (PKCS#8, PKCS#1, SubjectPublicKeyInfo) and raw
//! binary data.

use crate::key::{Key, KeyData, KeyUsage};
use solna_core::{Error, Result};
use std::path::Path;

fn pem_str(pem_data: &[u8]) -> Result<&str> {
    std::str::from_utf8(pem_data)
        .map_err(|e| Error::InvalidKeyData(format!("invalid PEM encoding: {e}")))
}

/// Load an RSA private key from PKCS#8 or PKCS#1 PEM.
pub fn load_rsa_private_pem(pem_data: &[u8]) -> Result<Key> {
    use pkcs1::DecodeRsaPrivateKey;
    use pkcs8::DecodePrivateKey;
    let pem = pem_str(pem_data)?;

    let pk = match rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
        Ok(pk) => pk,
        Err(_) => rsa::RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| {
            Error::InvalidKeyData(format!("failed to parse RSA private key PEM: {e}"))
        })?,
    };
    let public = pk.to_public_key();
    Ok(Key::new(
        KeyData::Rsa {
            private: Some(pk),
            public,
        },
        KeyUsage::Any,
    ))
}

/// Load an RSA public key from SubjectPublicKeyInfo or PKCS#1 PEM.
pub fn load_rsa_public_pem(pem_data: &[u8]) -> Result<Key> {
    use pkcs1::DecodeRsaPublicKey;
    use pkcs8::DecodePublicKey;
    let pem = pem_str(pem_data)?;

    let public = match rsa::RsaPublicKey::from_public_key_pem(pem) {
        Ok(pk) => pk,
        Err(_) => rsa::RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| {
            Error::InvalidKeyData(format!("failed to parse RSA public key PEM: {e}"))
        })?,
    };
    Ok(Key::new(
        KeyData::Rsa {
            private: None,
            public,
        },
        KeyUsage::Any,
    ))
}

/// Load a P-256 or P-384 private key from PKCS#8 PEM.
pub fn load_ec_private_pem(pem_data: &[u8]) -> Result<Key> {
    use pkcs8::DecodePrivateKey;
    let pem = pem_str(pem_data)?;

    if let Ok(sk) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
        let public = *sk.verifying_key();
        return Ok(Key::new(
            KeyData::EcP256 {
                private: Some(sk),
                public,
            },
            KeyUsage::Any,
        ));
    }
    let sk = p384::ecdsa::SigningKey::from_pkcs8_pem(pem)
        .map_err(|e| Error::InvalidKeyData(format!("failed to parse EC private key: {e}")))?;
    let public = *sk.verifying_key();
    Ok(Key::new(
        KeyData::EcP384 {
            private: Some(sk),
            public,
        },
        KeyUsage::Any,
    ))
}

/// Load an RSA, P-256 or P-384 public key from SubjectPublicKeyInfo PEM.
pub fn load_spki_pem(pem_data: &[u8]) -> Result<Key> {
    use pkcs8::DecodePublicKey;
    let pem = pem_str(pem_data)?;

    if let Ok(public) = rsa::RsaPublicKey::from_public_key_pem(pem) {
        return Ok(Key::new(
            KeyData::Rsa {
                private: None,
                public,
            },
            KeyUsage::Any,
        ));
    }
    if let Ok(public) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
        return Ok(Key::new(
            KeyData::EcP256 {
                private: None,
                public,
            },
            KeyUsage::Any,
        ));
    }
    if let Ok(public) = p384::ecdsa::VerifyingKey::from_public_key_pem(pem) {
        return Ok(Key::new(
            KeyData::EcP384 {
                private: None,
                public,
            },
            KeyUsage::Any,
        ));
    }
    Err(Error::InvalidKeyData(
        "unsupported SubjectPublicKeyInfo algorithm".into(),
    ))
}

/// Load an HMAC key from raw binary data.
pub fn load_hmac_key(data: &[u8]) -> Key {
    Key::new(KeyData::Hmac(data.to_vec()), KeyUsage::Any)
}

/// Load an AES key from raw binary data.
pub fn load_aes_key(data: &[u8]) -> Result<Key> {
    match data.len() {
        16 | 24 | 32 => Ok(Key::new(KeyData::Aes(data.to_vec()), KeyUsage::Any)),
        n => Err(Error::InvalidKeyData(format!(
            "invalid AES key size: {n} (expected 16, 24, or 32)"
        ))),
    }
}

/// Detect the PEM flavour and load it.
///
/// Tries RSA private, EC private, then public keys.
pub fn load_pem_auto(pem_data: &[u8]) -> Result<Key> {
    if let Ok(key) = load_rsa_private_pem(pem_data) {
        return Ok(key);
    }
    if let Ok(key) = load_ec_private_pem(pem_data) {
        return Ok(key);
    }
    if let Ok(key) = load_spki_pem(pem_data) {
        return Ok(key);
    }
    if let Ok(key) = load_rsa_public_pem(pem_data) {
        return Ok(key);
    }
    Err(Error::InvalidKeyData(
        "unable to auto-detect key format from PEM data".into(),
    ))
}

/// Load a PEM key file.
pub fn load_key_file(path: &Path) -> Result<Key> {
    let data = std::fs::read(path)?;
    log::debug!("loading key from {}", path.display());
    load_pem_auto(&data)
}
