//! Verification of detached CMS signatures.

use super::oid::{ID_MESSAGE_DIGEST, ID_SHA_256, ID_SIGNED_DATA, ID_SIGNING_TIME};
use crate::certificates::{Certificate, KeyHandle};
use crate::error::{Error, Result};
use ::cms::cert::CertificateChoices;
use ::cms::content_info::ContentInfo;
use ::cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use chrono::{DateTime, Utc};
use der::asn1::OctetString;
use der::{Any, Decode, Encode, SliceReader};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use signature::Verifier;
use x509_cert::time::Time;

/// Who signed, according to a verified signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedVerification {
    /// Signer certificate subject
    pub subject: String,
    /// Signer certificate issuer
    pub issuer: String,
    /// Signer certificate serial, uppercase hex
    pub serial_number: String,
    /// Signing-time attribute, when present
    pub signed_at: Option<DateTime<Utc>>,
    /// DER of the certificate the signature verified against
    pub certificate_der: Vec<u8>,
}

/// Verify `signature` over `payload` with the certificate embedded in it.
///
/// Trailing bytes after the DER value are ignored, so the zero-padded
/// `/Contents` of a PDF signature can be passed as is.
pub fn verify_detached(signature: &[u8], payload: &[u8]) -> Result<DetachedVerification> {
    verify(signature, payload, None)
}

/// Like [`verify_detached`] but against a given DER certificate.
pub fn verify_detached_with_certificate(
    signature: &[u8],
    payload: &[u8],
    certificate: &[u8],
) -> Result<DetachedVerification> {
    verify(signature, payload, Some(certificate))
}

fn verify(signature: &[u8], payload: &[u8], supplied: Option<&[u8]>) -> Result<DetachedVerification> {
    let mut reader = SliceReader::new(signature)?;
    let content_info = ContentInfo::decode(&mut reader)?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(Error::Crypto(format!("content type {} is not SignedData", content_info.content_type)));
    }
    let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;
    if signed_data.encap_content_info.econtent.is_some() {
        return Err(Error::Crypto("signature carries its content, expected detached".to_string()));
    }
    let signer = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::Crypto("SignedData has no signer".to_string()))?;
    if signer.digest_alg.oid != ID_SHA_256 {
        return Err(Error::Crypto(format!("unsupported digest algorithm {}", signer.digest_alg.oid)));
    }
    let signed_attrs = signer
        .signed_attrs
        .as_ref()
        .ok_or_else(|| Error::Crypto("signer has no signed attributes".to_string()))?;

    let message_digest = attribute_value(signer, ID_MESSAGE_DIGEST)
        .ok_or_else(|| Error::Crypto("message-digest attribute missing".to_string()))?;
    let message_digest = OctetString::from_der(&message_digest.to_der()?)?;
    if message_digest.as_bytes() != Sha256::digest(payload).as_slice() {
        return Err(Error::Crypto("message digest does not match the signed data".to_string()));
    }
    let signed_at = match attribute_value(signer, ID_SIGNING_TIME) {
        Some(value) => {
            let time = Time::from_der(&value.to_der()?)?;
            i64::try_from(time.to_unix_duration().as_secs())
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
        },
        None => None,
    };

    let certificate = match supplied {
        Some(der) => x509_cert::Certificate::from_der(der)?,
        None => embedded_certificate(&signed_data, &signer.sid)?,
    };
    let spki = certificate.tbs_certificate.subject_public_key_info.to_der()?;
    let public_key = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| Error::Crypto(format!("signer key is not RSA: {}", e)))?;
    let value = Signature::try_from(signer.signature.as_bytes())
        .map_err(|e| Error::Crypto(format!("malformed signature value: {}", e)))?;
    VerifyingKey::<Sha256>::new(public_key)
        .verify(&signed_attrs.to_der()?, &value)
        .map_err(|_| Error::Crypto("signature does not verify against the signer certificate".to_string()))?;

    let certificate_der = certificate.to_der()?;
    let meta = Certificate::from_der(certificate_der.clone(), KeyHandle::None)?;
    Ok(DetachedVerification {
        subject: meta.subject,
        issuer: meta.issuer,
        serial_number: meta.serial_number,
        signed_at,
        certificate_der,
    })
}

fn attribute_value(signer: &SignerInfo, oid: der::asn1::ObjectIdentifier) -> Option<&Any> {
    signer
        .signed_attrs
        .as_ref()?
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.iter().next())
}

fn embedded_certificate(signed_data: &SignedData, sid: &SignerIdentifier) -> Result<x509_cert::Certificate> {
    let certificates = signed_data
        .certificates
        .as_ref()
        .map(|set| set.0.iter())
        .into_iter()
        .flatten()
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert),
            _ => None,
        });
    for cert in certificates {
        let matches = match sid {
            SignerIdentifier::IssuerAndSerialNumber(id) => {
                cert.tbs_certificate.issuer == id.issuer && cert.tbs_certificate.serial_number == id.serial_number
            },
            SignerIdentifier::SubjectKeyIdentifier(_) => true,
        };
        if matches {
            return Ok(cert.clone());
        }
    }
    Err(Error::Crypto("signer certificate is not embedded".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_rejected() {
        assert!(verify_detached(b"not der", b"payload").is_err());
        assert!(verify_detached(&[], b"payload").is_err());
    }

    #[test]
    fn test_wrong_content_type() {
        // ContentInfo with id-data and an empty OCTET STRING
        let info = ContentInfo {
            content_type: super::super::oid::ID_DATA,
            content: Any::encode_from(&OctetString::new(Vec::new()).unwrap()).unwrap(),
        };
        let der = info.to_der().unwrap();
        let err = verify_detached(&der, b"").unwrap_err();
        assert!(err.to_string().contains("not SignedData"));
    }
}
