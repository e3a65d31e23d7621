//! Visible protocol stamp and signature field.
//!
//! Stamping adds, on every page, a watermark header and an optional footer
//! note, and on the signature page a bordered block describing the signature.
//! Everything is drawn in new content streams appended to each page's
//! /Contents; the original streams are wrapped in `q ... Q` so their graphics
//! state cannot leak into the stamp.
//!
//! The same pass creates the signature field (a merged field and widget
//! annotation) and registers it in the catalog's /AcroForm with
//! `/SigFlags 3`. A zero width or height makes the field invisible.

pub mod winansi;

use crate::document::{Page, PdfDocument};
use crate::error::{Error, Result};
use crate::object::{decode_text_string, Dictionary, Object, ObjectRef};
use crate::writer::{ContentStreamBuilder, IncrementalWriter};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use winansi::fit_text;

/// Default signature block width in points.
pub const DEFAULT_SIGNATURE_WIDTH: f64 = 260.0;
/// Default signature block height in points.
pub const DEFAULT_SIGNATURE_HEIGHT: f64 = 110.0;
/// Default distance of the block from the right and bottom page edges.
pub const DEFAULT_SIGNATURE_MARGIN: f64 = 36.0;

const DEFAULT_SIGNATURE_TYPE: &str = "Digital signature";
const DEFAULT_AUTHENTICATION: &str = "Digital certificate";

/// Resource name tried first for the stamp font.
const FONT_RESOURCE: &str = "DSHelv";

/// Stamp and signature-field settings for one signing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfStampOptions {
    /// Header drawn on every page
    pub watermark: Option<String>,
    /// Protocol number, generated when absent
    pub protocol: Option<String>,
    /// Note drawn at the bottom of every page
    pub footer_note: Option<String>,
    /// Checklist lines listed in the signature block
    pub actions: Vec<String>,
    /// `/Reason` of the signature dictionary
    pub reason: Option<String>,
    /// `/Location` of the signature dictionary
    pub location: Option<String>,
    /// Signer shown in the block and written as `/Name`
    pub signer_name: Option<String>,
    /// Partial field name (`/T`)
    pub field_name: Option<String>,
    /// Signature type label
    pub signature_type: Option<String>,
    /// Authentication label
    pub authentication: Option<String>,
    /// Certificate line of the block
    pub certificate_description: Option<String>,
    /// Device line of the block
    pub token_description: Option<String>,
    /// Signing time shown in the block and written as `/M`
    pub signed_at: Option<DateTime<Utc>>,
    /// 1-based page of the signature field; the last page when absent
    pub signature_page: Option<usize>,
    /// Field width in points
    pub signature_width: f64,
    /// Field height in points
    pub signature_height: f64,
    /// Distance from the right page edge
    pub signature_margin_x: f64,
    /// Distance from the bottom page edge
    pub signature_margin_y: f64,
}

impl Default for PdfStampOptions {
    fn default() -> Self {
        Self {
            watermark: None,
            protocol: None,
            footer_note: None,
            actions: Vec::new(),
            reason: None,
            location: None,
            signer_name: None,
            field_name: None,
            signature_type: None,
            authentication: None,
            certificate_description: None,
            token_description: None,
            signed_at: None,
            signature_page: None,
            signature_width: DEFAULT_SIGNATURE_WIDTH,
            signature_height: DEFAULT_SIGNATURE_HEIGHT,
            signature_margin_x: DEFAULT_SIGNATURE_MARGIN,
            signature_margin_y: DEFAULT_SIGNATURE_MARGIN,
        }
    }
}

impl PdfStampOptions {
    /// Set the protocol number.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set the signer display name.
    pub fn with_signer_name(mut self, name: impl Into<String>) -> Self {
        self.signer_name = Some(name.into());
        self
    }

    /// Set the field size. Zero in either dimension hides the field.
    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.signature_width = width;
        self.signature_height = height;
        self
    }

    /// Place the field on a 1-based page.
    pub fn with_page(mut self, page: usize) -> Self {
        self.signature_page = Some(page);
        self
    }

    /// Whether a visible block and field rectangle are produced.
    pub fn is_visible(&self) -> bool {
        self.signature_width > 0.0 && self.signature_height > 0.0
    }

    /// Fill in every value that has a default so the result is stable for
    /// the rest of the call.
    pub fn resolved(mut self) -> Self {
        if self.protocol.as_deref().map_or(true, str::is_empty) {
            self.protocol = Some(default_protocol());
        }
        self.signed_at.get_or_insert_with(Utc::now);
        self.signature_type.get_or_insert_with(|| DEFAULT_SIGNATURE_TYPE.to_string());
        self.authentication.get_or_insert_with(|| DEFAULT_AUTHENTICATION.to_string());
        self
    }

    /// Reject geometry that cannot be laid out.
    pub fn validate(&self) -> Result<()> {
        let geometry = [
            ("signature_width", self.signature_width),
            ("signature_height", self.signature_height),
            ("signature_margin_x", self.signature_margin_x),
            ("signature_margin_y", self.signature_margin_y),
        ];
        for (name, value) in geometry {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidRequest(format!("{} must be a non-negative number", name)));
            }
        }
        if self.signature_page == Some(0) {
            return Err(Error::InvalidRequest("signature_page is 1-based".to_string()));
        }
        Ok(())
    }

    /// Protocol number, empty before [`resolved`](Self::resolved).
    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or_default()
    }

    /// Signature type label.
    pub fn signature_type(&self) -> &str {
        self.signature_type.as_deref().unwrap_or(DEFAULT_SIGNATURE_TYPE)
    }

    /// Authentication label.
    pub fn authentication(&self) -> &str {
        self.authentication.as_deref().unwrap_or(DEFAULT_AUTHENTICATION)
    }

    fn watermark_text(&self) -> String {
        match &self.watermark {
            Some(text) => text.clone(),
            None => format!("Digitally signed document - Protocol {}", self.protocol()),
        }
    }

    fn block_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Protocol: {}", self.protocol())];
        if let Some(name) = &self.signer_name {
            lines.push(format!("Signed by: {}", name));
        }
        lines.push(format!("{} - {}", self.signature_type(), self.authentication()));
        if let Some(cert) = &self.certificate_description {
            lines.push(format!("Certificate: {}", cert));
        }
        if let Some(token) = &self.token_description {
            lines.push(format!("Device: {}", token));
        }
        lines.extend(self.actions.iter().map(|a| format!("\u{2022} {}", a)));
        if let Some(at) = self.signed_at {
            lines.push(format!("Signed at: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        lines
    }
}

/// Protocol number used when the caller gives none: `NS-` and the local time.
pub fn default_protocol() -> String {
    format!("NS-{}", Local::now().format("%Y%m%d%H%M%S"))
}

/// Where the signature field ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedField {
    /// The merged field/widget object
    pub field: ObjectRef,
    /// Page holding the widget
    pub page: ObjectRef,
    /// Final partial field name
    pub field_name: String,
    /// Widget rectangle, all zeros when invisible
    pub rect: [f64; 4],
}

/// Stamp every page and add a signature field whose `/V` is `signature`.
///
/// All changes are staged in `writer`; `doc` is only read.
pub fn apply_stamp(
    doc: &mut PdfDocument,
    writer: &mut IncrementalWriter,
    options: &PdfStampOptions,
    signature: ObjectRef,
) -> Result<StampedField> {
    options.validate()?;
    let pages = doc.pages()?;
    let page_number = options.signature_page.unwrap_or(pages.len());
    if page_number == 0 || page_number > pages.len() {
        return Err(Error::InvalidRequest(format!(
            "signature page {} is outside 1..={}",
            page_number,
            pages.len()
        )));
    }

    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;
    let (acroform_ref, mut acroform) = load_acroform(doc, &catalog)?;
    let mut fields = match doc.resolve_dict_entry(&acroform, "Fields")? {
        Some(Object::Array(fields)) => fields,
        _ => Vec::new(),
    };
    let taken = field_names(doc, &fields)?;
    let field_name = unique_field_name(options.field_name.as_deref(), &taken);

    let sig_page = &pages[page_number - 1];
    let rect = if options.is_visible() {
        signature_rect(&sig_page.media_box, options)
    } else {
        [0.0; 4]
    };

    let font = writer.add(helvetica());
    let wrap = writer.add(content_stream(b"q\n".to_vec()));
    let widget = writer.allocate();

    for (i, page) in pages.iter().enumerate() {
        let on_sig_page = i + 1 == page_number;
        let mut fonts = match doc.resolve_dict_entry(&page.resources, "Font")? {
            Some(Object::Dictionary(fonts)) => fonts,
            _ => Dictionary::new(),
        };
        let font_name = unused_key(&fonts, FONT_RESOURCE);

        let mut ops = ContentStreamBuilder::new();
        ops.restore_state().save_state();
        draw_page_notes(&mut ops, page, &font_name, options);
        if on_sig_page && options.is_visible() {
            draw_signature_block(&mut ops, rect, &font_name, options);
        }
        ops.restore_state();
        let stamp = writer.add(content_stream(ops.build()));

        let mut dict = page.dict.clone();
        let mut contents = vec![Object::Reference(wrap)];
        contents.extend(existing_array(doc, &dict, "Contents")?);
        contents.push(Object::Reference(stamp));
        dict.insert("Contents".to_string(), Object::Array(contents));

        fonts.insert(font_name, Object::Reference(font));
        let mut resources = page.resources.clone();
        resources.insert("Font".to_string(), Object::Dictionary(fonts));
        dict.insert("Resources".to_string(), Object::Dictionary(resources));

        if on_sig_page {
            let mut annots = existing_array(doc, &dict, "Annots")?;
            annots.push(Object::Reference(widget));
            dict.insert("Annots".to_string(), Object::Array(annots));
        }
        writer.set(page.id, Object::Dictionary(dict));
    }

    let appearance = writer.add(empty_appearance(rect));
    writer.set(widget, signature_widget(&field_name, rect, sig_page.id, signature, appearance));

    fields.push(Object::Reference(widget));
    acroform.insert("Fields".to_string(), Object::Array(fields));
    acroform.insert("SigFlags".to_string(), Object::Integer(3));
    match acroform_ref {
        Some(id) => writer.set(id, Object::Dictionary(acroform)),
        None => {
            catalog.insert("AcroForm".to_string(), Object::Dictionary(acroform));
            writer.set(catalog_ref, Object::Dictionary(catalog));
        },
    }

    log::debug!(
        "stamped {} pages, field '{}' on page {} at {:?}",
        pages.len(),
        field_name,
        page_number,
        rect
    );
    Ok(StampedField {
        field: widget,
        page: sig_page.id,
        field_name,
        rect,
    })
}

/// The catalog's /AcroForm and, when it is indirect, its reference.
fn load_acroform(doc: &mut PdfDocument, catalog: &Dictionary) -> Result<(Option<ObjectRef>, Dictionary)> {
    match catalog.get("AcroForm") {
        Some(Object::Reference(id)) => match doc.resolve(&Object::Reference(*id))? {
            Object::Dictionary(dict) => Ok((Some(*id), dict)),
            Object::Null => Ok((None, Dictionary::new())),
            other => Err(Error::InvalidDocument(format!("/AcroForm is a {}", other.type_name()))),
        },
        Some(Object::Dictionary(dict)) => Ok((None, dict.clone())),
        _ => Ok((None, Dictionary::new())),
    }
}

fn field_names(doc: &mut PdfDocument, fields: &[Object]) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    for field in fields {
        if let Object::Dictionary(dict) = doc.resolve(field)? {
            if let Some(name) = dict.get("T").and_then(Object::as_string) {
                names.insert(decode_text_string(name));
            }
        }
    }
    Ok(names)
}

/// `requested` if free, else `requested_2`, `requested_3`, ...; without a
/// request the first free `SignatureN`.
fn unique_field_name(requested: Option<&str>, taken: &HashSet<String>) -> String {
    match requested.filter(|r| !r.is_empty()) {
        Some(base) if !taken.contains(base) => base.to_string(),
        Some(base) => first_free(taken, 2, |n| format!("{}_{}", base, n)),
        None => first_free(taken, 1, |n| format!("Signature{}", n)),
    }
}

fn first_free(taken: &HashSet<String>, start: usize, candidate: impl Fn(usize) -> String) -> String {
    let mut n = start;
    loop {
        let name = candidate(n);
        if !taken.contains(&name) {
            return name;
        }
        n += 1;
    }
}

fn unused_key(dict: &Dictionary, base: &str) -> String {
    if !dict.contains_key(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let key = format!("{}{}", base, n);
        if !dict.contains_key(&key) {
            return key;
        }
        n += 1;
    }
}

/// Items of an array entry that may be a single reference, an indirect
/// array or a direct array.
fn existing_array(doc: &mut PdfDocument, dict: &Dictionary, key: &str) -> Result<Vec<Object>> {
    match dict.get(key) {
        None => Ok(Vec::new()),
        Some(Object::Array(items)) => Ok(items.clone()),
        Some(Object::Reference(id)) => match doc.resolve(&Object::Reference(*id))? {
            Object::Array(items) => Ok(items),
            Object::Null => Ok(Vec::new()),
            _ => Ok(vec![Object::Reference(*id)]),
        },
        Some(other) => {
            log::warn!("ignoring direct {} in /{}", other.type_name(), key);
            Ok(Vec::new())
        },
    }
}

/// Bottom-right placement inside the media box.
fn signature_rect(media_box: &[f64; 4], options: &PdfStampOptions) -> [f64; 4] {
    let x = media_box[2] - options.signature_margin_x - options.signature_width;
    let y = media_box[1] + options.signature_margin_y;
    [x, y, x + options.signature_width, y + options.signature_height]
}

fn draw_page_notes(ops: &mut ContentStreamBuilder, page: &Page, font: &str, options: &PdfStampOptions) {
    let [llx, lly, urx, ury] = page.media_box;
    let max_width = (urx - llx - 2.0 * DEFAULT_SIGNATURE_MARGIN).max(0.0);
    let header = fit_text(&options.watermark_text(), 8.0, max_width);
    ops.fill_rgb(0.45, 0.45, 0.45)
        .text(font, 8.0, llx + DEFAULT_SIGNATURE_MARGIN, ury - 18.0, &header);
    if let Some(note) = options.footer_note.as_deref().filter(|n| !n.is_empty()) {
        let footer = fit_text(note, 7.0, max_width);
        ops.text(font, 7.0, llx + DEFAULT_SIGNATURE_MARGIN, lly + 12.0, &footer);
    }
}

fn draw_signature_block(ops: &mut ContentStreamBuilder, rect: [f64; 4], font: &str, options: &PdfStampOptions) {
    const PADDING: f64 = 6.0;
    let [x1, y1, x2, y2] = rect;
    let (width, height) = (x2 - x1, y2 - y1);
    let lines = options.block_lines();
    let size = ((height - 2.0 * PADDING) / (lines.len() as f64 * 1.25)).clamp(4.0, 9.0);
    let leading = size * 1.25;

    ops.fill_rgb(0.97, 0.97, 0.97)
        .fill_rect(x1, y1, width, height)
        .stroke_rgb(0.2, 0.3, 0.5)
        .stroke_rect(x1, y1, width, height, 0.75)
        .fill_rgb(0.0, 0.0, 0.0);

    let mut baseline = y2 - PADDING - size;
    for line in &lines {
        if baseline < y1 + PADDING - 0.01 {
            break;
        }
        let fitted = fit_text(line, size, width - 2.0 * PADDING);
        ops.text(font, size, x1 + PADDING, baseline, &fitted);
        baseline -= leading;
    }
}

fn helvetica() -> Object {
    let mut font = Dictionary::new();
    font.insert("Type".to_string(), Object::name("Font"));
    font.insert("Subtype".to_string(), Object::name("Type1"));
    font.insert("BaseFont".to_string(), Object::name("Helvetica"));
    font.insert("Encoding".to_string(), Object::name("WinAnsiEncoding"));
    Object::Dictionary(font)
}

fn content_stream(data: Vec<u8>) -> Object {
    Object::Stream {
        dict: Dictionary::new(),
        data: data.into(),
    }
}

fn empty_appearance(rect: [f64; 4]) -> Object {
    let mut dict = Dictionary::new();
    dict.insert("Type".to_string(), Object::name("XObject"));
    dict.insert("Subtype".to_string(), Object::name("Form"));
    dict.insert("BBox".to_string(), Object::rect(0.0, 0.0, rect[2] - rect[0], rect[3] - rect[1]));
    dict.insert("Resources".to_string(), Object::Dictionary(Dictionary::new()));
    Object::Stream {
        dict,
        data: bytes::Bytes::new(),
    }
}

fn signature_widget(name: &str, rect: [f64; 4], page: ObjectRef, value: ObjectRef, appearance: ObjectRef) -> Object {
    let mut ap = Dictionary::new();
    ap.insert("N".to_string(), Object::Reference(appearance));

    let mut widget = Dictionary::new();
    widget.insert("Type".to_string(), Object::name("Annot"));
    widget.insert("Subtype".to_string(), Object::name("Widget"));
    widget.insert("FT".to_string(), Object::name("Sig"));
    widget.insert("T".to_string(), Object::text(name));
    widget.insert("V".to_string(), Object::Reference(value));
    widget.insert("Rect".to_string(), Object::rect(rect[0], rect[1], rect[2], rect[3]));
    // Print
    widget.insert("F".to_string(), Object::Integer(4));
    widget.insert("P".to_string(), Object::Reference(page));
    widget.insert("AP".to_string(), Object::Dictionary(ap));
    Object::Dictionary(widget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_pdf, sample_pdf};

    fn stamp(pdf: Vec<u8>, options: &PdfStampOptions) -> (Vec<u8>, StampedField) {
        let mut doc = PdfDocument::parse(pdf.clone()).unwrap();
        let mut writer = IncrementalWriter::new(&doc);
        let sig = writer.add(Object::Dictionary(Dictionary::new()));
        let field = apply_stamp(&mut doc, &mut writer, options, sig).unwrap();
        (writer.write(&pdf).unwrap().data, field)
    }

    fn content_of(doc: &mut PdfDocument, page: &Page) -> Vec<u8> {
        let mut all = Vec::new();
        for part in page.dict["Contents"].as_array().unwrap() {
            let stream = doc.resolve(part).unwrap();
            all.extend(stream.decode_stream_data().unwrap());
        }
        all
    }

    // ========================================================================
    // Options
    // ========================================================================

    #[test]
    fn test_default_protocol_shape() {
        let protocol = default_protocol();
        assert!(protocol.starts_with("NS-"));
        assert_eq!(protocol.len(), 17);
        assert!(protocol[3..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_resolved_keeps_explicit_values() {
        let options = PdfStampOptions::default().with_protocol("P-7").resolved();
        assert_eq!(options.protocol(), "P-7");
        assert!(options.signed_at.is_some());
        assert_eq!(options.signature_type(), DEFAULT_SIGNATURE_TYPE);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: PdfStampOptions = serde_json::from_str(r#"{"actions":["Approved"]}"#).unwrap();
        assert_eq!(options.actions, vec!["Approved".to_string()]);
        assert_eq!(options.signature_width, DEFAULT_SIGNATURE_WIDTH);
        assert!(options.protocol.is_none());
    }

    #[test]
    fn test_negative_geometry_rejected() {
        let options = PdfStampOptions::default().with_size(-1.0, 10.0);
        assert!(matches!(options.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_unique_field_names() {
        let taken: HashSet<String> = ["Signature1", "Approval"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_field_name(None, &taken), "Signature2");
        assert_eq!(unique_field_name(Some("Approval"), &taken), "Approval_2");
        assert_eq!(unique_field_name(Some("Final"), &taken), "Final");
        assert_eq!(unique_field_name(Some(""), &taken), "Signature2");
    }

    // ========================================================================
    // Stamping
    // ========================================================================

    #[test]
    fn test_stamp_every_page_and_field_on_last() {
        let options = PdfStampOptions::default()
            .with_protocol("NS-20240101120000")
            .with_signer_name("Alice")
            .resolved();
        let (out, field) = stamp(sample_pdf(2), &options);

        let mut doc = PdfDocument::parse(out).unwrap();
        let pages = doc.pages().unwrap();
        assert_eq!(field.page, pages[1].id);
        assert_eq!(field.field_name, "Signature1");
        assert_eq!(field.rect, [299.0, 36.0, 559.0, 146.0]);

        for page in &pages {
            let contents = page.dict["Contents"].as_array().unwrap();
            assert_eq!(contents.len(), 3);
            let text = content_of(&mut doc, page);
            assert!(text.starts_with(b"q\n"));
            assert!(String::from_utf8_lossy(&text).contains("Protocol NS-20240101120000"));
            let fonts = page.resources["Font"].as_dict().unwrap();
            assert!(fonts.contains_key("F1"));
            assert!(fonts.contains_key(FONT_RESOURCE));
        }
        let last = String::from_utf8_lossy(&content_of(&mut doc, &pages[1])).to_string();
        assert!(last.contains("(Signed by: Alice) Tj"));
        assert!(pages[0].dict.get("Annots").is_none());
        assert_eq!(pages[1].dict["Annots"].as_array().unwrap().len(), 1);

        let catalog = doc.catalog().unwrap();
        let acroform = catalog["AcroForm"].as_dict().unwrap();
        assert_eq!(acroform["SigFlags"], Object::Integer(3));
        assert_eq!(acroform["Fields"], Object::Array(vec![Object::Reference(field.field)]));

        let widget = doc.get_object(field.field).unwrap();
        let widget = widget.as_dict().unwrap();
        assert_eq!(widget["FT"], Object::name("Sig"));
        assert_eq!(widget["P"], Object::Reference(field.page));
        assert!(widget.contains_key("AP"));
    }

    #[test]
    fn test_invisible_field_has_zero_rect_and_no_block() {
        let options = PdfStampOptions::default().with_size(0.0, 110.0).resolved();
        let (out, field) = stamp(sample_pdf(1), &options);
        assert_eq!(field.rect, [0.0; 4]);

        let mut doc = PdfDocument::parse(out).unwrap();
        let pages = doc.pages().unwrap();
        let text = String::from_utf8_lossy(&content_of(&mut doc, &pages[0])).to_string();
        assert!(!text.contains(" re\n"));
        assert!(!text.contains("Signed at:"));
        let widget = doc.get_object(field.field).unwrap();
        assert_eq!(crate::document::parse_rect(&widget.as_dict().unwrap()["Rect"]), Some([0.0; 4]));
    }

    #[test]
    fn test_explicit_signature_page() {
        let options = PdfStampOptions::default().with_page(1).resolved();
        let (out, field) = stamp(sample_pdf(3), &options);
        let mut doc = PdfDocument::parse(out).unwrap();
        assert_eq!(field.page, doc.pages().unwrap()[0].id);
    }

    #[test]
    fn test_signature_page_out_of_range() {
        let pdf = sample_pdf(1);
        let mut doc = PdfDocument::parse(pdf).unwrap();
        let mut writer = IncrementalWriter::new(&doc);
        let sig = writer.allocate();
        let options = PdfStampOptions::default().with_page(2).resolved();
        let err = apply_stamp(&mut doc, &mut writer, &options, sig).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_indirect_acroform_is_updated_in_place() {
        let pdf = build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R /AcroForm 5 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 300 300] /Contents 4 0 R >>".to_string(),
            "<< /Length 0 >>\nstream\n\nendstream".to_string(),
            "<< /Fields [6 0 R] >>".to_string(),
            "<< /FT /Sig /T (Signature1) >>".to_string(),
        ]);
        let options = PdfStampOptions::default().resolved();
        let mut doc = PdfDocument::parse(pdf.clone()).unwrap();
        let catalog_ref = doc.catalog_ref().unwrap();
        let mut writer = IncrementalWriter::new(&doc);
        let sig = writer.allocate();
        let field = apply_stamp(&mut doc, &mut writer, &options, sig).unwrap();

        assert_eq!(field.field_name, "Signature2");
        assert!(writer.contains(ObjectRef::new(5, 0)));
        assert!(!writer.contains(catalog_ref));

        writer.set(sig, Object::Dictionary(Dictionary::new()));
        let out = writer.write(&pdf).unwrap();
        let mut doc = PdfDocument::parse(out.data).unwrap();
        let acroform = doc.get_object(ObjectRef::new(5, 0)).unwrap();
        let fields = acroform.as_dict().unwrap()["Fields"].as_array().unwrap().clone();
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_font_resource_name_avoids_collision() {
        let mut fonts = Dictionary::new();
        fonts.insert(FONT_RESOURCE.to_string(), Object::Null);
        assert_eq!(unused_key(&fonts, FONT_RESOURCE), "DSHelv2");
    }

    #[test]
    fn test_block_lines_order() {
        let mut options = PdfStampOptions::default().with_protocol("NS-1").with_signer_name("Bob");
        options.actions = vec!["Read".to_string(), "Approved".to_string()];
        options.token_description = Some("Software key".to_string());
        let lines = options.resolved().block_lines();
        assert_eq!(lines[0], "Protocol: NS-1");
        assert_eq!(lines[1], "Signed by: Bob");
        assert_eq!(lines[3], "Device: Software key");
        assert_eq!(lines[4], "\u{2022} Read");
        assert!(lines.last().unwrap().starts_with("Signed at: "));
    }
}
