//! Self-signed enrolment into a file store.

use crate::error::{Error, Result};
use crate::pin::Pin;
use der::pem::LineEnding;
use der::{Decode, EncodePem};
use pkcs8::pkcs5::pbes2;
use pkcs8::{EncodePrivateKey, PrivateKeyInfo};
use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

/// PBKDF2 rounds for PIN-protected keys.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Parameters of [`enroll`].
#[derive(Debug, Clone)]
pub struct EnrollOptions {
    /// Subject DN, e.g. `CN=Alice,O=Example`
    pub subject: String,
    /// RSA modulus size
    pub key_bits: usize,
    /// Validity from now
    pub validity_days: u32,
    /// Encrypt the key with this PIN
    pub pin: Option<Pin>,
    /// PBKDF2 rounds when `pin` is set
    pub kdf_iterations: u32,
    /// File name without extension; derived from the subject when absent
    pub file_stem: Option<String>,
}

impl EnrollOptions {
    /// 2048-bit key valid for a year.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            key_bits: 2048,
            validity_days: 365,
            pin: None,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            file_stem: None,
        }
    }

    /// Set the key size.
    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// Protect the key with a PIN.
    pub fn with_pin(mut self, pin: Pin) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Set the PBKDF2 rounds.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Set the file name without extension.
    pub fn with_file_stem(mut self, stem: impl Into<String>) -> Self {
        self.file_stem = Some(stem.into());
        self
    }

    fn stem(&self) -> String {
        if let Some(stem) = &self.file_stem {
            return stem.clone();
        }
        let stem: String = self
            .subject
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let stem = stem.trim_matches('_').to_string();
        if stem.is_empty() {
            "certificate".to_string()
        } else {
            stem
        }
    }
}

/// Generate an RSA key and a self-signed certificate and write them into
/// `store` as `<stem>.pem` and `<stem>.key`. Returns the certificate path.
pub fn enroll(store: &Path, options: &EnrollOptions) -> Result<PathBuf> {
    if !(1024..=8192).contains(&options.key_bits) {
        return Err(Error::InvalidRequest(format!("unsupported key size {}", options.key_bits)));
    }
    if options.pin.as_ref().is_some_and(Pin::is_empty) {
        return Err(Error::InvalidRequest("PIN must not be empty".to_string()));
    }
    let subject =
        Name::from_str(&options.subject).map_err(|e| Error::InvalidRequest(format!("invalid subject: {}", e)))?;

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, options.key_bits)
        .map_err(|e| Error::Crypto(format!("key generation failed: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let mut serial = [0u8; 16];
    rng.fill_bytes(&mut serial);
    // Positive and without a leading zero byte
    serial[0] = (serial[0] & 0x7F) | 0x40;
    let serial = SerialNumber::new(&serial)?;
    let validity = Validity::from_now(Duration::from_secs(u64::from(options.validity_days) * 86_400))?;
    let spki = SubjectPublicKeyInfoOwned::from_key(public_key)
        .map_err(|e| Error::Crypto(format!("public key encoding failed: {}", e)))?;

    let signer = SigningKey::<Sha256>::new(private_key.clone());
    let builder = CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, &signer)
        .map_err(|e| Error::Crypto(format!("certificate builder: {}", e)))?;
    let certificate = builder
        .build::<Signature>()
        .map_err(|e| Error::Crypto(format!("certificate signing failed: {}", e)))?;

    let key_pem = private_key_pem(&private_key, options)?;
    let cert_pem = certificate.to_pem(LineEnding::LF)?;

    std::fs::create_dir_all(store)?;
    let stem = options.stem();
    let cert_path = store.join(format!("{}.pem", stem));
    let key_path = store.join(format!("{}.key", stem));
    if cert_path.exists() || key_path.exists() {
        return Err(Error::InvalidRequest(format!("{} already exists in the store", stem)));
    }
    std::fs::write(&cert_path, cert_pem)?;
    std::fs::write(&key_path, key_pem.as_bytes())?;
    log::info!(
        "enrolled {} into {} ({}-bit key{})",
        options.subject,
        cert_path.display(),
        options.key_bits,
        if options.pin.is_some() { ", PIN protected" } else { "" }
    );
    Ok(cert_path)
}

fn private_key_pem(key: &RsaPrivateKey, options: &EnrollOptions) -> Result<zeroize::Zeroizing<String>> {
    let plain = key
        .to_pkcs8_der()
        .map_err(|e| Error::Crypto(format!("private key encoding failed: {}", e)))?;
    let Some(pin) = &options.pin else {
        return Ok(plain.to_pem("PRIVATE KEY", LineEnding::LF)?);
    };

    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);
    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(options.kdf_iterations, &salt, &iv)
        .map_err(|e| Error::Crypto(format!("PBES2 parameters: {}", e)))?;
    let info = PrivateKeyInfo::from_der(plain.as_bytes())?;
    let encrypted = info
        .encrypt_with_params(params, pin.expose().as_bytes())
        .map_err(|e| Error::Crypto(format!("private key encryption failed: {}", e)))?;
    Ok(encrypted.to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)?)
}
