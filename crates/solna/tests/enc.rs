//! End-to-end encryption and decryption through the public API.

use solna::core::{algorithm, Error};
use solna::enc::EncContext;
use solna::keys::{loader, KeysManager};

const RSA_PRIVATE: &[u8] = include_bytes!("data/rsa-2048.pem");
const RSA_PUBLIC: &[u8] = include_bytes!("data/rsa-2048-pub.pem");
const RSA_PKCS1: &[u8] = include_bytes!("data/rsa-2048-pkcs1.pem");

const DOCUMENT: &str = r#"<?xml version="1.0"?>
<PaymentInfo xmlns="urn:payments">
  <Name>John Smith</Name>
  <CreditCard Id="card" Limit="5,000" Currency="USD">
    <Number>4019 2445 0277 5567</Number>
    <Expiration>04/02</Expiration>
  </CreditCard>
</PaymentInfo>"#;

fn rsa_template(data_method: &str, enc_type: &str) -> String {
    format!(
        r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Type="http://www.w3.org/2001/04/xmlenc#{enc_type}"><xenc:EncryptionMethod Algorithm="{data_method}"/><ds:KeyInfo><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="{oaep}"><ds:DigestMethod Algorithm="{sha256}"/></xenc:EncryptionMethod><ds:KeyInfo><ds:KeyName>recipient</ds:KeyName></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedData>"#,
        oaep = algorithm::RSA_OAEP,
        sha256 = algorithm::SHA256,
    )
}

fn kw_template(enc_type: &str) -> String {
    format!(
        r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Type="http://www.w3.org/2001/04/xmlenc#{enc_type}"><xenc:EncryptionMethod Algorithm="{cbc}"/><ds:KeyInfo><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="{kw}"/><ds:KeyInfo><ds:KeyName>kek</ds:KeyName></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedData>"#,
        cbc = algorithm::AES128_CBC,
        kw = algorithm::KW_AES128,
    )
}

fn sender() -> KeysManager {
    let mut keys = KeysManager::new();
    keys.add_key(
        loader::load_rsa_public_pem(RSA_PUBLIC)
            .unwrap()
            .with_name("recipient"),
    );
    keys.add_key(loader::load_aes_key(&[0x42; 16]).unwrap().with_name("kek"));
    keys
}

fn recipient() -> KeysManager {
    let mut keys = KeysManager::new();
    keys.add_key(
        loader::load_rsa_private_pem(RSA_PRIVATE)
            .unwrap()
            .with_name("recipient"),
    );
    keys.add_key(loader::load_aes_key(&[0x42; 16]).unwrap().with_name("kek"));
    keys
}

#[test]
fn rsa_oaep_element_round_trip() {
    let registry = solna::init().unwrap();
    let encrypted = EncContext::new(&registry, sender())
        .encrypt_xml(&rsa_template(algorithm::AES256_GCM, "Element"), DOCUMENT, "card")
        .unwrap();
    assert!(!encrypted.contains("4019"));
    assert!(encrypted.contains("<Name>John Smith</Name>"));

    let mut ctx = EncContext::new(&registry, recipient());
    assert_eq!(ctx.decrypt(&encrypted).unwrap(), DOCUMENT);
    assert_eq!(ctx.encryption_method(), Some(algorithm::AES256_GCM));
}

#[test]
fn pkcs1_private_key_decrypts_too() {
    let registry = solna::init().unwrap();
    let encrypted = EncContext::new(&registry, sender())
        .encrypt_xml(&rsa_template(algorithm::AES128_CBC, "Element"), DOCUMENT, "card")
        .unwrap();
    let mut keys = KeysManager::new();
    keys.add_key(loader::load_pem_auto(RSA_PKCS1).unwrap());
    let mut ctx = EncContext::new(&registry, keys);
    assert_eq!(ctx.decrypt(&encrypted).unwrap(), DOCUMENT);
}

#[test]
fn key_wrap_content_round_trip() {
    let registry = solna::init().unwrap();
    let encrypted = EncContext::new(&registry, sender())
        .encrypt_xml(&kw_template("Content"), DOCUMENT, "card")
        .unwrap();
    assert!(encrypted.contains(r#"<CreditCard Id="card" Limit="5,000" Currency="USD"><xenc:EncryptedData"#));
    assert!(!encrypted.contains("<Number>"));

    let decrypted = EncContext::new(&registry, recipient())
        .decrypt(&encrypted)
        .unwrap();
    assert_eq!(decrypted, DOCUMENT);
}

#[test]
fn public_key_cannot_decrypt() {
    let registry = solna::init().unwrap();
    let encrypted = EncContext::new(&registry, sender())
        .encrypt_xml(&rsa_template(algorithm::AES128_CBC, "Element"), DOCUMENT, "card")
        .unwrap();
    let err = EncContext::new(&registry, sender())
        .decrypt(&encrypted)
        .unwrap_err();
    assert!(matches!(err, Error::MissingKey(_)));
}

#[test]
fn gcm_rejects_unauthenticated_ciphertext() {
    let registry = solna::init().unwrap();
    let encrypted = EncContext::new(&registry, sender())
        .encrypt_xml(&kw_template("Element"), DOCUMENT, "card")
        .unwrap()
        .replace(algorithm::AES128_CBC, algorithm::AES128_GCM);
    // Same key size, but the CBC ciphertext is not a valid GCM message.
    let err = EncContext::new(&registry, recipient())
        .decrypt(&encrypted)
        .unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
}

#[test]
fn external_cipher_reference() {
    let registry = solna::init().unwrap();
    let mut ctx = EncContext::new(&registry, recipient());
    let template = format!(
        r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptionMethod Algorithm="{}"/><ds:KeyInfo><ds:KeyName>kek</ds:KeyName></ds:KeyInfo><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedData>"#,
        algorithm::AES128_GCM
    );
    ctx.encrypt_data(&template, b"stored elsewhere").unwrap();
    let ciphertext = ctx.result().unwrap().to_vec();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("payload.bin"), &ciphertext).unwrap();
    let document = format!(
        r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptionMethod Algorithm="{}"/><ds:KeyInfo><ds:KeyName>kek</ds:KeyName></ds:KeyInfo><xenc:CipherData><xenc:CipherReference URI="payload.bin"/></xenc:CipherData></xenc:EncryptedData>"#,
        algorithm::AES128_GCM
    );

    let mut ctx = EncContext::new(&registry, recipient());
    ctx.base_dir = Some(dir.path().to_path_buf());
    assert_eq!(ctx.decrypt_to_bytes(&document).unwrap(), b"stored elsewhere");

    let mut ctx = EncContext::new(&registry, recipient());
    assert!(matches!(ctx.decrypt(&document), Err(Error::InvalidUri(_))));
}
