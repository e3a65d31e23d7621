//! Stamp, reserve and sign a PDF in one incremental update.

use super::byterange::{ByteRange, ContentsPlaceholder, BYTE_RANGE_WIDTH, DEFAULT_SIGNATURE_CAPACITY};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::Object;
use crate::stamp::{apply_stamp, PdfStampOptions, StampedField};
use crate::writer::{IncrementalWriter, ObjectSerializer};
use chrono::{DateTime, Utc};
use std::ops::Range;

/// Result of a signed PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfSignOutput {
    /// Signed file: the input bytes followed by one incremental update
    pub pdf: Vec<u8>,
    /// Protocol number printed on the stamp
    pub protocol: String,
    /// Signature type label
    pub signature_type: String,
    /// Authentication label
    pub authentication: String,
    /// The CMS signature as a separate file, when asked for
    pub p7s: Option<Vec<u8>>,
}

/// Builds signed PDFs.
#[derive(Debug, Clone, Copy)]
pub struct PdfSigningPipeline {
    placeholder: ContentsPlaceholder,
}

impl Default for PdfSigningPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfSigningPipeline {
    /// Pipeline reserving [`DEFAULT_SIGNATURE_CAPACITY`] bytes.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SIGNATURE_CAPACITY)
    }

    /// Pipeline reserving `capacity` bytes of DER for the signature.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            placeholder: ContentsPlaceholder::new(capacity),
        }
    }

    /// Bytes of DER the placeholder holds.
    pub fn capacity(&self) -> usize {
        self.placeholder.capacity()
    }

    /// Parse `pdf`, stamp it and append the unsigned signature update.
    ///
    /// The returned [`PreparedPdf`] knows exactly which bytes to sign.
    pub fn prepare(&self, pdf: Vec<u8>, options: &PdfStampOptions) -> Result<PreparedPdf> {
        if self.placeholder.is_empty() {
            return Err(Error::InvalidRequest("signature capacity must be positive".to_string()));
        }
        let options = options.clone().resolved();
        options.validate()?;
        let mut doc = PdfDocument::parse(pdf).map_err(Error::into_document_error)?;

        let mut writer = IncrementalWriter::new(&doc);
        let signature = writer.allocate();
        let field = apply_stamp(&mut doc, &mut writer, &options, signature).map_err(Error::into_document_error)?;
        let (body, layout) = self.signature_dictionary(&options)?;
        writer.set_raw(signature, body);

        let output = writer.write(doc.data())?;
        let base = *output
            .body_offsets
            .get(&signature.id)
            .ok_or_else(|| Error::Crypto("signature object was not written".to_string()))?;
        let mut data = output.data;

        let contents_offset = base + layout.contents.start;
        let byte_range = ByteRange::around(data.len(), contents_offset..base + layout.contents.end);
        let slot = base + layout.byte_range.start..base + layout.byte_range.end;
        data[slot].copy_from_slice(&byte_range.to_padded()?);

        log::debug!(
            "prepared {} with field {} (ByteRange {:?})",
            options.protocol(),
            field.field_name,
            byte_range.0
        );
        Ok(PreparedPdf {
            data,
            byte_range,
            contents_offset,
            placeholder: self.placeholder,
            options,
            field,
        })
    }

    /// Raw body of the signature dictionary and where its placeholders sit.
    fn signature_dictionary(&self, options: &PdfStampOptions) -> Result<(Vec<u8>, SignatureLayout)> {
        let serializer = ObjectSerializer::new();
        let mut body = b"<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached /ByteRange ".to_vec();
        let start = body.len();
        body.extend_from_slice(&ByteRange([0; 4]).to_padded()?);
        let byte_range = start..start + BYTE_RANGE_WIDTH;

        body.extend_from_slice(b" /Contents ");
        let start = body.len();
        body.extend_from_slice(&self.placeholder.bytes());
        let contents = start..body.len();

        let signed_at = options.signed_at.unwrap_or_else(Utc::now);
        body.extend_from_slice(b" /M ");
        serializer.write_object(&mut body, &Object::String(pdf_date(signed_at).into_bytes()));
        let texts = [
            ("Name", &options.signer_name),
            ("Reason", &options.reason),
            ("Location", &options.location),
        ];
        for (key, value) in texts {
            if let Some(value) = value {
                body.extend_from_slice(format!(" /{} ", key).as_bytes());
                serializer.write_object(&mut body, &Object::text(value));
            }
        }
        body.extend_from_slice(b" >>");
        Ok((body, SignatureLayout { byte_range, contents }))
    }
}

struct SignatureLayout {
    byte_range: Range<usize>,
    contents: Range<usize>,
}

/// `D:YYYYMMDDHHmmSS+00'00'`
fn pdf_date(at: DateTime<Utc>) -> String {
    format!("D:{}+00'00'", at.format("%Y%m%d%H%M%S"))
}

/// A stamped document with an empty signature placeholder.
///
/// Signing can be retried with [`finish`](Self::finish) any number of
/// times; the prepared bytes never change.
#[derive(Debug, Clone)]
pub struct PreparedPdf {
    data: Vec<u8>,
    byte_range: ByteRange,
    contents_offset: usize,
    placeholder: ContentsPlaceholder,
    options: PdfStampOptions,
    field: StampedField,
}

impl PreparedPdf {
    /// The bytes the signature must cover.
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        self.byte_range.signed_bytes(&self.data)
    }

    /// The ByteRange written into the signature dictionary.
    pub fn byte_range(&self) -> ByteRange {
        self.byte_range
    }

    /// The whole prepared file, placeholder still zero.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Where the field was placed.
    pub fn field(&self) -> &StampedField {
        &self.field
    }

    /// Stamp options with every default filled in.
    pub fn options(&self) -> &PdfStampOptions {
        &self.options
    }

    /// Protocol number on the stamp.
    pub fn protocol(&self) -> &str {
        self.options.protocol()
    }

    /// Signature type label.
    pub fn signature_type(&self) -> &str {
        self.options.signature_type()
    }

    /// Authentication label.
    pub fn authentication(&self) -> &str {
        self.options.authentication()
    }

    /// Write `cms_der` into the placeholder.
    pub fn finish(&self, cms_der: &[u8], include_p7s: bool) -> Result<PdfSignOutput> {
        let mut pdf = self.data.clone();
        self.placeholder.fill(&mut pdf, self.contents_offset, cms_der)?;
        Ok(PdfSignOutput {
            pdf,
            protocol: self.protocol().to_string(),
            signature_type: self.signature_type().to_string(),
            authentication: self.authentication().to_string(),
            p7s: include_p7s.then(|| cms_der.to_vec()),
        })
    }
}
