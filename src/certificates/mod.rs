//! Certificate discovery and selection.
//!
//! A [`CertificateDirectory`] enumerates the certificates the agent can sign
//! with. Each call to [`CertificateDirectory::list`] returns fresh snapshots;
//! the `index` of a [`Certificate`] is only meaningful within the listing it
//! came from.

mod enroll;
mod store;

pub use enroll::{enroll, EnrollOptions, DEFAULT_KDF_ITERATIONS};
pub use store::FileCertificateStore;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

/// Where the private key of a certificate lives.
#[derive(Clone, Default)]
pub enum KeyHandle {
    /// No key next to the certificate
    #[default]
    None,
    /// PKCS#8 PEM held in memory
    Software {
        /// The PEM text
        pem: Zeroizing<String>,
        /// `ENCRYPTED PRIVATE KEY`, i.e. PIN-protected
        encrypted: bool,
    },
    /// Key on a hardware token
    HardwareToken {
        /// Free-form token description
        description: String,
    },
}

impl KeyHandle {
    /// Whether signing can at least be attempted.
    pub fn is_present(&self) -> bool {
        !matches!(self, KeyHandle::None)
    }

    /// Whether a PIN is needed to use the key.
    pub fn needs_pin(&self) -> bool {
        match self {
            KeyHandle::Software { encrypted, .. } => *encrypted,
            KeyHandle::HardwareToken { .. } => true,
            KeyHandle::None => false,
        }
    }

    /// Short text for the stamp's device line.
    pub fn description(&self) -> String {
        match self {
            KeyHandle::None => "No private key".to_string(),
            KeyHandle::Software { encrypted: true, .. } => "Software key (PIN protected)".to_string(),
            KeyHandle::Software { encrypted: false, .. } => "Software key".to_string(),
            KeyHandle::HardwareToken { description } => description.clone(),
        }
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyHandle::None => f.write_str("None"),
            KeyHandle::Software { encrypted, .. } => f
                .debug_struct("Software")
                .field("encrypted", encrypted)
                .finish_non_exhaustive(),
            KeyHandle::HardwareToken { description } => {
                f.debug_struct("HardwareToken").field("description", description).finish()
            },
        }
    }
}

/// One certificate in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    /// Position in the listing this snapshot came from
    pub index: usize,
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number, uppercase hex
    pub serial_number: String,
    /// SHA-1 of the DER encoding, uppercase hex
    pub thumbprint: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// Whether a private key was found for it
    pub has_private_key: bool,
    #[serde(skip)]
    der: Vec<u8>,
    #[serde(skip)]
    key: KeyHandle,
}

impl Certificate {
    /// Read the metadata of a DER certificate.
    pub fn from_der(der: Vec<u8>, key: KeyHandle) -> Result<Self> {
        let (_, parsed) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| Error::Crypto(format!("invalid X.509 certificate: {}", e)))?;
        let validity = parsed.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;
        let subject = parsed.subject().to_string();
        let issuer = parsed.issuer().to_string();
        let serial_number = serial_hex(parsed.raw_serial());
        let thumbprint = hex::encode_upper(Sha1::digest(&der));
        Ok(Self {
            index: 0,
            subject,
            issuer,
            serial_number,
            thumbprint,
            not_before,
            not_after,
            has_private_key: key.is_present(),
            der,
            key,
        })
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Private key location.
    pub fn key(&self) -> &KeyHandle {
        &self.key
    }

    /// Whether `now` lies within the validity period.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Common name of the subject, or the whole subject when there is none.
    pub fn display_name(&self) -> &str {
        self.subject
            .split(',')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("CN="))
            .unwrap_or(&self.subject)
    }

    /// One-line description for the stamp.
    pub fn description(&self) -> String {
        format!("{} (serial {}), issued by {}", self.display_name(), self.serial_number, self.issuer)
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| Error::Crypto(format!("certificate time {} is out of range", secs)))
}

/// Uppercase hex without the sign-padding zero bytes DER adds.
fn serial_hex(raw: &[u8]) -> String {
    let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len().saturating_sub(1));
    hex::encode_upper(&raw[first..])
}

/// How a request picks a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSelector {
    /// Position in the current listing
    Index(usize),
    /// SHA-1 thumbprint; case, `:` and spaces are ignored
    Thumbprint(String),
}

impl CertificateSelector {
    /// Pick the matching certificate from a listing.
    pub fn select<'a>(&self, certificates: &'a [Certificate]) -> Result<&'a Certificate> {
        match self {
            CertificateSelector::Index(index) => certificates.iter().find(|c| c.index == *index).ok_or_else(|| {
                Error::InvalidCertificateSelector(format!(
                    "index {} is out of range ({} certificates)",
                    index,
                    certificates.len()
                ))
            }),
            CertificateSelector::Thumbprint(thumbprint) => {
                let wanted = normalize_thumbprint(thumbprint);
                if wanted.is_empty() {
                    return Err(Error::InvalidCertificateSelector("empty thumbprint".to_string()));
                }
                certificates
                    .iter()
                    .find(|c| c.thumbprint == wanted)
                    .ok_or_else(|| Error::InvalidCertificateSelector(format!("no certificate with thumbprint {}", wanted)))
            },
        }
    }
}

impl std::fmt::Display for CertificateSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateSelector::Index(i) => write!(f, "index {}", i),
            CertificateSelector::Thumbprint(t) => write!(f, "thumbprint {}", normalize_thumbprint(t)),
        }
    }
}

/// Uppercase hex with `:` and whitespace removed.
pub fn normalize_thumbprint(thumbprint: &str) -> String {
    thumbprint
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// What a directory backend can do beyond listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DirectoryCapabilities {
    /// PIN entry on a hardware token's own pad or middleware dialog
    pub supports_hardware_pin_entry: bool,
}

/// Source of signing certificates.
pub trait CertificateDirectory: Send + Sync {
    /// Enumerate certificates in a stable order, indexed from 0 after
    /// filtering.
    fn list(&self, include_only_with_private_key: bool) -> Result<Vec<Certificate>>;

    /// Backend capabilities.
    fn capabilities(&self) -> DirectoryCapabilities;
}

/// Metadata-only certificate for tests that never touch the DER.
#[cfg(test)]
pub(crate) fn test_certificate(subject: &str, key: KeyHandle) -> Certificate {
    Certificate {
        index: 0,
        subject: subject.to_string(),
        issuer: subject.to_string(),
        serial_number: "01".to_string(),
        thumbprint: "00".repeat(20),
        not_before: Utc::now(),
        not_after: Utc::now(),
        has_private_key: key.is_present(),
        der: Vec::new(),
        key,
    }
}
