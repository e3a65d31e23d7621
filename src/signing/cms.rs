//! CMS SignedData producer for software keys.

use super::oid::{ID_DATA, ID_SHA_256, ID_SIGNING_TIME};
use super::{DetachedSignature, DetachedSigner, SignOutcome};
use crate::certificates::{Certificate, KeyHandle};
use crate::error::{Error, Result};
use crate::pin::Pin;
use ::cms::builder::{SignedDataBuilder, SignerInfoBuilder};
use ::cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use ::cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use chrono::{DateTime, Utc};
use der::asn1::{SetOfVec, UtcTime};
use der::{Any, Decode, Encode};
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo, SecretDocument};
use rsa::pkcs1v15::{Signature, SigningKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use std::time::Duration;
use x509_cert::attr::Attribute;

/// Signs with PKCS#8 keys held by the certificate store.
///
/// Produces RSA PKCS#1 v1.5 / SHA-256 detached SignedData with the signer
/// certificate embedded and content-type, message-digest and signing-time
/// as signed attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmsSigner;

impl CmsSigner {
    /// Create a signer.
    pub fn new() -> Self {
        Self
    }
}

impl DetachedSigner for CmsSigner {
    fn sign(&self, payload: &[u8], certificate: &Certificate, pin: Option<&Pin>) -> Result<SignOutcome> {
        let key = match unlock_key(certificate.key(), pin)? {
            Ok(key) => key,
            Err(outcome) => {
                log::debug!("key of {} not unlocked: {:?}", certificate.subject, outcome);
                return Ok(outcome);
            },
        };
        let x509 = x509_cert::Certificate::from_der(certificate.der())?;
        let spki_der = x509.tbs_certificate.subject_public_key_info.to_der()?;
        match RsaPublicKey::from_public_key_der(&spki_der) {
            Ok(public) if public == RsaPublicKey::from(&key) => {},
            Ok(_) => {
                return Ok(SignOutcome::DeviceError(
                    "private key does not belong to the certificate".to_string(),
                ))
            },
            Err(e) => return Ok(SignOutcome::DeviceError(format!("certificate key is not RSA: {}", e))),
        }

        let now = Utc::now();
        let signed_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let der = signed_data(key, x509, payload, signed_at)?;
        log::info!("signed {} bytes with {} ({} byte CMS)", payload.len(), certificate.subject, der.len());
        Ok(SignOutcome::Signed(DetachedSignature {
            der,
            subject: certificate.subject.clone(),
            issuer: certificate.issuer.clone(),
            serial_number: certificate.serial_number.clone(),
            signed_at,
        }))
    }
}

/// Turn a key handle into an RSA key, or the outcome explaining why not.
fn unlock_key(handle: &KeyHandle, pin: Option<&Pin>) -> Result<std::result::Result<RsaPrivateKey, SignOutcome>> {
    let (pem, encrypted) = match handle {
        KeyHandle::None => {
            return Ok(Err(SignOutcome::DeviceError("certificate has no private key".to_string())))
        },
        KeyHandle::HardwareToken { description } => {
            return Err(Error::NotImplemented(format!("signing with hardware token '{}'", description)))
        },
        KeyHandle::Software { pem, encrypted } => (pem, *encrypted),
    };

    let pin = match (encrypted, pin) {
        (true, None) => return Ok(Err(SignOutcome::PinRequired)),
        (_, pin) => pin,
    };
    let document = match SecretDocument::from_pem(pem) {
        Ok((_, document)) => document,
        Err(e) => return Ok(Err(SignOutcome::DeviceError(format!("unreadable key file: {}", e)))),
    };
    let Some(pin) = pin.filter(|_| encrypted) else {
        return Ok(match PrivateKeyInfo::try_from(document.as_bytes()) {
            Ok(info) => rsa_key(info),
            Err(e) => Err(SignOutcome::DeviceError(format!("malformed PKCS#8 key: {}", e))),
        });
    };
    let encrypted_info = match EncryptedPrivateKeyInfo::try_from(document.as_bytes()) {
        Ok(info) => info,
        Err(e) => return Ok(Err(SignOutcome::DeviceError(format!("malformed encrypted key: {}", e)))),
    };
    let decrypted = match encrypted_info.decrypt(pin.expose().as_bytes()) {
        Ok(decrypted) => decrypted,
        Err(_) => return Ok(Err(SignOutcome::PinInvalid)),
    };
    // A wrong PIN can still produce valid padding; the result is then noise
    Ok(match PrivateKeyInfo::try_from(decrypted.as_bytes()) {
        Ok(info) => rsa_key(info),
        Err(_) => Err(SignOutcome::PinInvalid),
    })
}

fn rsa_key(info: PrivateKeyInfo<'_>) -> std::result::Result<RsaPrivateKey, SignOutcome> {
    RsaPrivateKey::try_from(info).map_err(|e| SignOutcome::DeviceError(format!("unsupported private key: {}", e)))
}

fn builder_error(err: ::cms::builder::Error) -> Error {
    Error::Crypto(format!("CMS builder: {:?}", err))
}

fn signing_time(at: DateTime<Utc>) -> Result<Attribute> {
    let secs = u64::try_from(at.timestamp()).map_err(|_| Error::Crypto(format!("signing time {} predates 1970", at)))?;
    let time = UtcTime::from_unix_duration(Duration::from_secs(secs))?;
    let values = SetOfVec::try_from(vec![Any::encode_from(&time)?])?;
    Ok(Attribute {
        oid: ID_SIGNING_TIME,
        values,
    })
}

/// DER ContentInfo with detached SignedData over `payload`.
fn signed_data(
    key: RsaPrivateKey,
    certificate: x509_cert::Certificate,
    payload: &[u8],
    signed_at: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let digest = Sha256::digest(payload);
    let content = EncapsulatedContentInfo {
        econtent_type: ID_DATA,
        econtent: None,
    };
    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: ID_SHA_256,
        parameters: None,
    };
    let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: certificate.tbs_certificate.issuer.clone(),
        serial_number: certificate.tbs_certificate.serial_number.clone(),
    });
    let signer = SigningKey::<Sha256>::new(key);

    let mut signer_info = SignerInfoBuilder::new(&signer, sid, digest_algorithm.clone(), &content, Some(digest.as_slice()))
        .map_err(builder_error)?;
    signer_info
        .add_signed_attribute(signing_time(signed_at)?)
        .map_err(builder_error)?;

    let mut builder = SignedDataBuilder::new(&content);
    let content_info = builder
        .add_digest_algorithm(digest_algorithm)
        .map_err(builder_error)?
        .add_certificate(CertificateChoices::Certificate(certificate))
        .map_err(builder_error)?
        .add_signer_info::<SigningKey<Sha256>, Signature>(signer_info)
        .map_err(builder_error)?
        .build()
        .map_err(builder_error)?;
    Ok(content_info.to_der()?)
}
