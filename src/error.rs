//! Error types for the signing agent.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped
//! by who can act on them: the user (bad selector, missing input), the PIN flow,
//! the device, the document, and the environment. [`Error::kind`] gives each
//! variant a stable code that the HTTP surface and the CLI report.

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while listing, signing or serving.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Certificate index or thumbprint does not match the current listing
    #[error("Invalid certificate selector: {0}")]
    InvalidCertificateSelector(String),

    /// Input file or payload is missing
    #[error("Input not found: {0}")]
    InputNotFound(String),

    /// Request is well-formed JSON but semantically unusable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Key is PIN-protected and no PIN was supplied
    #[error("PIN required to unlock the private key")]
    PinRequired,

    /// Supplied PIN did not unlock the key
    #[error("PIN incorrect ({attempts_remaining} attempts remaining)")]
    PinInvalid {
        /// Attempts left before the limit is reached
        attempts_remaining: u32,
    },

    /// Three wrong PINs in one signing call
    #[error("PIN attempt limit reached")]
    PinAttemptsExhausted,

    /// PIN prompt was cancelled, left empty, or timed out
    #[error("operation cancelled")]
    OperationCancelled,

    /// Driver, middleware or key-material problem unrelated to the PIN
    #[error("Device configuration error: {0}")]
    DeviceConfiguration(String),

    /// Capability exists in the interface but has no backend yet
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Certificate store cannot be opened
    #[error("Certificate store unavailable: {0}")]
    StoreUnavailable(String),

    /// Input is not a well-formed PDF
    #[error("Invalid PDF document: {0}")]
    InvalidDocument(String),

    /// Parse error at a specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where the error occurred
        offset: usize,
        /// Reason for the parse failure
        reason: String,
    },

    /// Cross-reference section is missing or malformed
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not present in the cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has the wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Stream filter failed to decode
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Encoded CMS does not fit the reserved /Contents placeholder
    #[error("Signature of {size} bytes exceeds the reserved capacity of {capacity} bytes")]
    SignatureCapacityExceeded {
        /// DER size of the produced signature
        size: usize,
        /// Bytes reserved in the placeholder
        capacity: usize,
    },

    /// Cryptographic encoding or verification failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Configuration file could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable snake_case code for this error.
    ///
    /// The browser application branches on this value, e.g. to open a PIN
    /// dialog on `pin_required` instead of showing a generic failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidCertificateSelector(_) => "invalid_certificate_selector",
            Error::InputNotFound(_) => "input_not_found",
            Error::InvalidRequest(_) => "invalid_request",
            Error::PinRequired => "pin_required",
            Error::PinInvalid { .. } => "pin_invalid",
            Error::PinAttemptsExhausted => "pin_attempts_exhausted",
            Error::OperationCancelled => "operation_cancelled",
            Error::DeviceConfiguration(_) => "device_configuration",
            Error::NotImplemented(_) => "not_implemented",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::InvalidDocument(_)
            | Error::ParseError { .. }
            | Error::InvalidXref(_)
            | Error::ObjectNotFound(..)
            | Error::InvalidObjectType { .. }
            | Error::Decode(_) => "invalid_document",
            Error::SignatureCapacityExceeded { .. } => "signature_capacity_exceeded",
            Error::Crypto(_) => "crypto",
            Error::Config(_) => "config",
            Error::Io(_) => "internal",
        }
    }

    /// Whether the PIN challenge flow can recover from this error.
    pub fn is_pin_recoverable(&self) -> bool {
        matches!(self, Error::PinRequired | Error::PinInvalid { .. })
    }

    /// Collapse low-level parser errors into [`Error::InvalidDocument`].
    ///
    /// Errors that are not document errors are returned unchanged.
    pub fn into_document_error(self) -> Error {
        match self {
            Error::ParseError { .. }
            | Error::InvalidXref(_)
            | Error::ObjectNotFound(..)
            | Error::InvalidObjectType { .. }
            | Error::Decode(_) => Error::InvalidDocument(self.to_string()),
            other => other,
        }
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Crypto(format!("DER: {}", err))
    }
}
