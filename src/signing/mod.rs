//! Detached signature production.
//!
//! A [`DetachedSigner`] turns a payload into a CMS SignedData without the
//! payload embedded. PIN problems are reported as [`SignOutcome`] values
//! instead of errors so the challenge controller can branch on them; real
//! failures still come back as `Err`.

mod cms;
mod verify;

/// Object identifiers used in SignedData.
pub(crate) mod oid {
    use der::asn1::ObjectIdentifier;

    pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
    pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
    pub const ID_SHA_256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
    pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
    pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
}

pub use self::cms::CmsSigner;
pub use verify::{verify_detached, verify_detached_with_certificate, DetachedVerification};

use crate::certificates::Certificate;
use crate::error::Result;
use crate::pin::Pin;
use chrono::{DateTime, Utc};

/// A produced signature and the identity behind it.
#[derive(Clone, PartialEq, Eq)]
pub struct DetachedSignature {
    /// DER-encoded CMS ContentInfo
    pub der: Vec<u8>,
    /// Signer certificate subject
    pub subject: String,
    /// Signer certificate issuer
    pub issuer: String,
    /// Signer certificate serial, uppercase hex
    pub serial_number: String,
    /// Value of the signing-time attribute
    pub signed_at: DateTime<Utc>,
}

impl std::fmt::Debug for DetachedSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetachedSignature")
            .field("der", &format_args!("{} bytes", self.der.len()))
            .field("subject", &self.subject)
            .field("serial_number", &self.serial_number)
            .field("signed_at", &self.signed_at)
            .finish_non_exhaustive()
    }
}

/// Result of one signing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    /// The signature was produced
    Signed(DetachedSignature),
    /// The key is protected and no PIN was given
    PinRequired,
    /// The given PIN did not unlock the key
    PinInvalid,
    /// The key or device cannot be used, whatever the PIN
    DeviceError(String),
}

/// Producer of detached signatures.
pub trait DetachedSigner: Send + Sync {
    /// Sign `payload` with the key of `certificate`.
    fn sign(&self, payload: &[u8], certificate: &Certificate, pin: Option<&Pin>) -> Result<SignOutcome>;
}
