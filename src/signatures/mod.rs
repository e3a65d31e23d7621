//! PDF signatures.
//!
//! Signing happens in two steps so the PIN flow can sit in between:
//!
//! 1. [`PdfSigningPipeline::prepare`] parses the input, stamps it and
//!    appends one incremental update holding the signature field and a
//!    signature dictionary (`/Filter /Adobe.PPKLite`,
//!    `/SubFilter /adbe.pkcs7.detached`) with a patched `/ByteRange` and a
//!    zero-filled `/Contents`.
//! 2. [`PreparedPdf::finish`] writes the CMS signature of
//!    [`PreparedPdf::signed_bytes`] into the placeholder.
//!
//! [`verify_pdf`] checks signatures produced this way, or by anything else
//! that uses detached CMS.
//!
//! ## References
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures

mod byterange;
mod pipeline;
mod verifier;

pub use byterange::{
    ByteRange, ContentsPlaceholder, BYTE_RANGE_WIDTH, DEFAULT_SIGNATURE_CAPACITY, MAX_SIGNATURE_CAPACITY,
};
pub use pipeline::{PdfSignOutput, PdfSigningPipeline, PreparedPdf};
pub use verifier::{verify_pdf, PdfSignatureReport};
