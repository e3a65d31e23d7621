//! Verification of signatures already in a PDF.

use super::byterange::ByteRange;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{decode_text_string, Dictionary, Object, ObjectRef};
use crate::signing::{verify_detached, DetachedVerification};
use std::collections::HashSet;

/// Deepest field hierarchy that is walked.
const MAX_FIELD_DEPTH: usize = 32;

/// What was found for one signature field.
#[derive(Debug, Clone)]
pub struct PdfSignatureReport {
    /// Fully qualified field name
    pub field_name: String,
    /// `/SubFilter` of the signature dictionary
    pub sub_filter: Option<String>,
    /// `/ByteRange`, when well formed
    pub byte_range: Option<ByteRange>,
    /// Whether the ByteRange covers every byte except its own placeholder
    pub covers_whole_file: bool,
    /// Signer identity, when the CMS verified
    pub signer: Option<DetachedVerification>,
    /// Why verification failed
    pub error: Option<String>,
}

impl PdfSignatureReport {
    /// Whether the signature verified and covers the whole file.
    ///
    /// An earlier signature followed by further incremental updates
    /// verifies but does not cover the whole file.
    pub fn is_valid(&self) -> bool {
        self.signer.is_some() && self.covers_whole_file
    }
}

/// Check every signature field of `pdf`.
///
/// Problems with one signature are reported in its entry; only a file
/// that cannot be parsed at all is an error.
pub fn verify_pdf(pdf: &[u8]) -> Result<Vec<PdfSignatureReport>> {
    let mut doc = PdfDocument::parse(pdf.to_vec()).map_err(Error::into_document_error)?;
    let catalog = doc.catalog().map_err(Error::into_document_error)?;
    let fields = match doc.resolve_dict_entry(&catalog, "AcroForm")? {
        Some(Object::Dictionary(acroform)) => match doc.resolve_dict_entry(&acroform, "Fields")? {
            Some(Object::Array(fields)) => fields,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut found = Vec::new();
    let mut visited = HashSet::new();
    for field in &fields {
        collect_signature_fields(&mut doc, field, "", None, 0, &mut visited, &mut found)?;
    }

    let reports = found
        .into_iter()
        .map(|(name, value)| check_signature(pdf, name, &value))
        .collect::<Vec<_>>();
    for report in &reports {
        match &report.error {
            None => log::debug!("signature {} verified", report.field_name),
            Some(reason) => log::warn!("signature {} failed: {}", report.field_name, reason),
        }
    }
    Ok(reports)
}

fn collect_signature_fields(
    doc: &mut PdfDocument,
    field: &Object,
    parent_name: &str,
    inherited_type: Option<String>,
    depth: usize,
    visited: &mut HashSet<ObjectRef>,
    found: &mut Vec<(String, Dictionary)>,
) -> Result<()> {
    if depth > MAX_FIELD_DEPTH {
        return Ok(());
    }
    if let Some(id) = field.as_reference() {
        if !visited.insert(id) {
            return Ok(());
        }
    }
    let dict = match doc.resolve(field)? {
        Object::Dictionary(dict) => dict,
        _ => return Ok(()),
    };
    let partial = dict.get("T").and_then(Object::as_string).map(decode_text_string);
    let name = match (&partial, parent_name.is_empty()) {
        (Some(partial), true) => partial.clone(),
        (Some(partial), false) => format!("{}.{}", parent_name, partial),
        (None, _) => parent_name.to_string(),
    };
    let field_type = dict.get("FT").and_then(Object::as_name).map(str::to_string).or(inherited_type);

    if let Some(Object::Array(kids)) = doc.resolve_dict_entry(&dict, "Kids")? {
        for kid in &kids {
            collect_signature_fields(doc, kid, &name, field_type.clone(), depth + 1, visited, found)?;
        }
    }
    if field_type.as_deref() == Some("Sig") {
        if let Some(Object::Dictionary(value)) = doc.resolve_dict_entry(&dict, "V")? {
            found.push((name, value));
        }
    }
    Ok(())
}

fn check_signature(pdf: &[u8], field_name: String, value: &Dictionary) -> PdfSignatureReport {
    let mut report = PdfSignatureReport {
        field_name,
        sub_filter: value.get("SubFilter").and_then(Object::as_name).map(str::to_string),
        byte_range: value.get("ByteRange").and_then(ByteRange::from_object),
        covers_whole_file: false,
        signer: None,
        error: None,
    };
    if let Err(e) = verify_value(pdf, value, &mut report) {
        report.error = Some(e.to_string());
    }
    report
}

fn verify_value(pdf: &[u8], value: &Dictionary, report: &mut PdfSignatureReport) -> Result<()> {
    let byte_range = report
        .byte_range
        .ok_or_else(|| Error::InvalidDocument("signature has no well-formed /ByteRange".to_string()))?;
    let contents = value
        .get("Contents")
        .and_then(Object::as_string)
        .ok_or_else(|| Error::InvalidDocument("signature has no /Contents".to_string()))?;
    let signed = byte_range.signed_bytes(pdf)?;

    report.covers_whole_file = byte_range.validate(pdf.len()).is_ok() && byte_range.gap_is_hex_string(pdf);
    report.signer = Some(verify_detached(contents, &signed)?);
    if !report.covers_whole_file {
        return Err(Error::InvalidDocument(
            "signature does not cover the whole file".to_string(),
        ));
    }
    Ok(())
}
