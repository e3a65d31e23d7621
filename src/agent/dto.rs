//! Request and response bodies, and the error envelope.

use crate::certificates::CertificateSelector;
use crate::error::Error;
use crate::pin::Pin;
use crate::stamp::PdfStampOptions;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// `POST /sign`
#[derive(Debug, Clone, Deserialize)]
pub struct SignRequest {
    /// Index into the default listing
    pub cert_index: Option<usize>,
    /// Certificate thumbprint
    pub thumbprint: Option<String>,
    /// Base64 payload
    pub payload: String,
    /// Only detached signatures are produced
    #[serde(default = "default_true")]
    pub detached: bool,
    /// PIN for a protected key
    pub pin: Option<String>,
}

/// Answer to `POST /sign`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignResponse {
    /// Base64 DER CMS SignedData
    pub signature: String,
    /// Signer subject
    pub certificate_subject: String,
    /// Signer serial, uppercase hex
    pub certificate_serial: String,
    /// Signer issuer
    pub certificate_issuer: String,
    /// Signing time, RFC 3339 UTC
    pub signed_at: DateTime<Utc>,
}

/// `POST /sign/pdf`
#[derive(Debug, Clone, Deserialize)]
pub struct PdfSignRequest {
    /// Index into the default listing
    pub cert_index: Option<usize>,
    /// Certificate thumbprint
    pub thumbprint: Option<String>,
    /// Base64 PDF
    pub payload: String,
    /// Stamp and field settings
    #[serde(flatten)]
    pub stamp: PdfStampOptions,
    /// PIN for a protected key
    pub pin: Option<String>,
    /// Also return the bare CMS signature
    #[serde(default)]
    pub include_p7s: bool,
}

/// Answer to `POST /sign/pdf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfSignResponse {
    /// Base64 signed PDF
    pub pdf: String,
    /// Protocol number on the stamp
    pub protocol: String,
    /// Signature type label
    pub signature_type: String,
    /// Authentication label
    pub authentication: String,
    /// Base64 CMS signature, when asked for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p7s: Option<String>,
}

/// `POST /pin/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct PinAnswer {
    /// The PIN; empty cancels
    #[serde(default)]
    pub pin: String,
}

/// `GET /certificates` query.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CertificatesQuery {
    /// Include certificates without a private key
    #[serde(default)]
    pub all: bool,
}

/// `GET /status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `not_started`, `listening` or `stopped`
    pub state: String,
    /// Crate version
    pub version: String,
    /// Listening address
    pub address: Option<String>,
    /// Whether a hardware token can take the PIN itself
    pub supports_hardware_pin_entry: bool,
    /// Challenges waiting for an answer
    pub pending_pin_challenges: usize,
}

/// Build a selector from the two optional request fields.
pub fn selector(cert_index: Option<usize>, thumbprint: Option<&str>) -> Result<Option<CertificateSelector>, Error> {
    match (cert_index, thumbprint) {
        (Some(_), Some(_)) => Err(Error::InvalidCertificateSelector(
            "give either cert_index or thumbprint, not both".to_string(),
        )),
        (Some(index), None) => Ok(Some(CertificateSelector::Index(index))),
        (None, Some(thumbprint)) => Ok(Some(CertificateSelector::Thumbprint(thumbprint.to_string()))),
        (None, None) => Ok(None),
    }
}

/// An empty PIN in a request means "none".
pub fn request_pin(pin: Option<String>) -> Option<Pin> {
    pin.filter(|p| !p.is_empty()).map(Pin::new)
}

/// Decode a base64 field.
pub fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| Error::InvalidRequest(format!("{} is not valid base64: {}", field, e)))
}

/// Encode bytes as standard base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// HTTP status for an error kind.
pub fn status_for(kind: &str) -> StatusCode {
    match kind {
        "invalid_certificate_selector" | "invalid_request" => StatusCode::BAD_REQUEST,
        "input_not_found" => StatusCode::NOT_FOUND,
        "pin_required" => StatusCode::PRECONDITION_REQUIRED,
        "pin_invalid" => StatusCode::UNAUTHORIZED,
        "pin_attempts_exhausted" => StatusCode::LOCKED,
        "operation_cancelled" => StatusCode::CONFLICT,
        "device_configuration" => StatusCode::BAD_GATEWAY,
        "invalid_document" => StatusCode::UNPROCESSABLE_ENTITY,
        "not_implemented" => StatusCode::NOT_IMPLEMENTED,
        "store_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorDetail {
    kind: String,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// [`Error`] as an HTTP response: `{"error": {"kind", "message"}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = match self.0.kind() {
            // config errors are startup-only
            "config" => "internal",
            kind => kind,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                kind: kind.to_string(),
                message: self.0.to_string(),
            },
        };
        (status_for(kind), Json(body)).into_response()
    }
}
