//! In-memory PDF document.
//!
//! [`PdfDocument`] keeps the original bytes untouched (the incremental writer
//! copies them verbatim) and loads objects lazily through the merged
//! cross-reference chain. Only what signing needs is exposed: the trailer,
//! the catalog, the page list with inherited attributes, and object lookup.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object_at;
use crate::xref::{CrossRefTable, XRefEntry, XRefFormat};
use std::collections::{HashMap, HashSet};

/// Page trees deeper than this are treated as corrupt.
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// US Letter, used when no /MediaBox is found up the tree.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// A leaf of the page tree with its inherited attributes resolved.
#[derive(Debug, Clone)]
pub struct Page {
    /// Indirect reference of the page object
    pub id: ObjectRef,
    /// Page dictionary as stored in the file
    pub dict: Dictionary,
    /// `[llx lly urx ury]` after inheritance
    pub media_box: [f64; 4],
    /// Resource dictionary after inheritance, with the top level resolved
    pub resources: Dictionary,
}

impl Page {
    /// Width of the media box.
    pub fn width(&self) -> f64 {
        (self.media_box[2] - self.media_box[0]).abs()
    }

    /// Height of the media box.
    pub fn height(&self) -> f64 {
        (self.media_box[3] - self.media_box[1]).abs()
    }
}

/// Parsed PDF held in memory.
pub struct PdfDocument {
    data: Vec<u8>,
    version: (u8, u8),
    xref: CrossRefTable,
    cache: HashMap<ObjectRef, Object>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("version", &self.version)
            .field("bytes", &self.data.len())
            .field("xref_entries", &self.xref.len())
            .field("cached_objects", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Parse a complete PDF file.
    ///
    /// Checks the header, loads the cross-reference chain and makes sure the
    /// catalog and page tree are reachable. Every failure is reported as
    /// [`Error::InvalidDocument`].
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        Self::parse_inner(data).map_err(Error::into_document_error)
    }

    fn parse_inner(data: Vec<u8>) -> Result<Self> {
        let version = parse_header(&data)?;
        let xref = crate::xref::load(&data)?;
        if xref.trailer().contains_key("Encrypt") {
            return Err(Error::InvalidDocument("encrypted documents cannot be signed".to_string()));
        }
        let mut doc = Self {
            data,
            version,
            xref,
            cache: HashMap::new(),
        };
        let pages = doc.pages()?;
        if pages.is_empty() {
            return Err(Error::InvalidDocument("document has no pages".to_string()));
        }
        log::debug!(
            "parsed PDF {}.{}: {} bytes, {} pages, {:?} cross-reference",
            version.0,
            version.1,
            doc.data.len(),
            pages.len(),
            doc.xref.format()
        );
        Ok(doc)
    }

    /// Original file bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Give back the original bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Header version as `(major, minor)`.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Trailer of the newest cross-reference section.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> usize {
        self.xref.startxref()
    }

    /// Whether the newest section is a cross-reference stream.
    pub fn uses_xref_stream(&self) -> bool {
        self.xref.format() == XRefFormat::Stream
    }

    /// First object number free for new objects.
    pub fn next_object_id(&self) -> u32 {
        self.xref.size().max(1)
    }

    /// Load an indirect object.
    pub fn get_object(&mut self, id: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.cache.get(&id) {
            return Ok(cached.clone());
        }
        let object = match self.xref.get(id.id).copied() {
            Some(XRefEntry::InUse { offset, .. }) => {
                let (found, object) = parse_indirect_object_at(&self.data, offset)?;
                if found.id != id.id {
                    return Err(Error::ParseError {
                        offset,
                        reason: format!("expected object {} but found {}", id, found),
                    });
                }
                object
            },
            Some(XRefEntry::Compressed { stream, .. }) => self.load_compressed(id, stream)?,
            Some(XRefEntry::Free { .. }) | None => return Err(Error::ObjectNotFound(id.id, id.gen)),
        };
        self.cache.insert(id, object.clone());
        Ok(object)
    }

    fn load_compressed(&mut self, id: ObjectRef, stream: u32) -> Result<Object> {
        let container = match self.xref.get(stream).copied() {
            Some(XRefEntry::InUse { offset, .. }) => parse_indirect_object_at(&self.data, offset)?.1,
            _ => {
                return Err(Error::InvalidXref(format!(
                    "object stream {} is not stored uncompressed",
                    stream
                )))
            },
        };
        let members = parse_object_stream(&container)?;
        let mut found = None;
        for (member, object) in members {
            // Members of an object stream always have generation 0
            let member_ref = ObjectRef::new(member, 0);
            if member == id.id {
                found = Some(object.clone());
            }
            // A newer uncompressed copy takes precedence over the stream member
            if matches!(self.xref.get(member), Some(XRefEntry::Compressed { stream: s, .. }) if *s == stream) {
                self.cache.entry(member_ref).or_insert(object);
            }
        }
        found.ok_or(Error::ObjectNotFound(id.id, id.gen))
    }

    /// Follow a reference one level. Dangling references resolve to null.
    pub fn resolve(&mut self, object: &Object) -> Result<Object> {
        match object {
            Object::Reference(id) => match self.get_object(*id) {
                Ok(resolved) => Ok(resolved),
                Err(Error::ObjectNotFound(..)) => {
                    log::debug!("dangling reference {}", id);
                    Ok(Object::Null)
                },
                Err(e) => Err(e),
            },
            other => Ok(other.clone()),
        }
    }

    /// Resolve a dictionary entry that may be indirect.
    pub fn resolve_dict_entry(&mut self, dict: &Dictionary, key: &str) -> Result<Option<Object>> {
        match dict.get(key) {
            Some(value) => {
                let resolved = self.resolve(value)?;
                Ok((!resolved.is_null()).then_some(resolved))
            },
            None => Ok(None),
        }
    }

    /// Reference to the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidDocument("trailer has no /Root reference".to_string()))
    }

    /// The document catalog.
    pub fn catalog(&mut self) -> Result<Dictionary> {
        let root = self.catalog_ref()?;
        let catalog = self.get_object(root)?;
        match catalog {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// All pages in document order.
    pub fn pages(&mut self) -> Result<Vec<Page>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidDocument("catalog has no /Pages reference".to_string()))?;
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, Inherited::default(), 0, &mut visited, &mut pages)?;
        Ok(pages)
    }

    fn collect_pages(
        &mut self,
        node_ref: ObjectRef,
        inherited: Inherited,
        depth: usize,
        visited: &mut HashSet<ObjectRef>,
        pages: &mut Vec<Page>,
    ) -> Result<()> {
        if depth > MAX_PAGE_TREE_DEPTH {
            return Err(Error::InvalidDocument("page tree is too deep".to_string()));
        }
        if !visited.insert(node_ref) {
            return Err(Error::InvalidDocument(format!("page tree cycle at {}", node_ref)));
        }
        let node = self.get_object(node_ref)?.into_dict()?;
        let inherited = Inherited {
            media_box: match self.resolve_dict_entry(&node, "MediaBox")? {
                Some(value) => parse_rect(&value).or(inherited.media_box),
                None => inherited.media_box,
            },
            resources: match self.resolve_dict_entry(&node, "Resources")? {
                Some(Object::Dictionary(res)) => Some(res),
                _ => inherited.resources,
            },
        };

        let is_leaf = match node.get("Type").and_then(Object::as_name) {
            Some("Page") => true,
            Some("Pages") => false,
            _ => !node.contains_key("Kids"),
        };
        if is_leaf {
            pages.push(Page {
                id: node_ref,
                media_box: inherited.media_box.unwrap_or(DEFAULT_MEDIA_BOX),
                resources: inherited.resources.unwrap_or_default(),
                dict: node,
            });
            return Ok(());
        }

        let kids = match self.resolve_dict_entry(&node, "Kids")? {
            Some(Object::Array(kids)) => kids,
            _ => return Err(Error::InvalidDocument(format!("page tree node {} has no /Kids", node_ref))),
        };
        for kid in kids {
            match kid.as_reference() {
                Some(kid_ref) => self.collect_pages(kid_ref, inherited.clone(), depth + 1, visited, pages)?,
                None => log::warn!("skipping direct object in /Kids of {}", node_ref),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct Inherited {
    media_box: Option<[f64; 4]>,
    resources: Option<Dictionary>,
}

/// Read a `[a b c d]` rectangle, normalized so the first corner is lower-left.
pub fn parse_rect(value: &Object) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut v = [0.0; 4];
    for (slot, item) in v.iter_mut().zip(items) {
        *slot = item.as_number()?;
    }
    Some([v[0].min(v[2]), v[1].min(v[3]), v[0].max(v[2]), v[1].max(v[3])])
}

/// Check `%PDF-M.m` within the first kilobyte and return the version.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let start = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| Error::InvalidDocument("missing %PDF- header".to_string()))?;
    if start > 0 {
        log::debug!("{} bytes of junk before the PDF header", start);
    }
    match data.get(start + 5..start + 8) {
        Some([major, b'.', minor]) if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(Error::InvalidDocument("malformed PDF version in header".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a classic-xref PDF from object bodies numbered from 1.
    fn build(objects: &[&str]) -> Vec<u8> {
        let mut pdf = b"%PDF-1.7\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", objects.len() + 1, xref).as_bytes(),
        );
        pdf
    }

    fn two_page_tree() -> Vec<u8> {
        build(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 /MediaBox [0 0 595 842] /Resources 5 0 R >>",
            "<< /Type /Page /Parent 2 0 R >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 300 400] /Resources << /Font << >> >> >>",
            "<< /ProcSet [/PDF] >>",
        ])
    }

    // ========================================================================
    // Header
    // ========================================================================

    #[test]
    fn test_header_versions() {
        assert_eq!(parse_header(b"%PDF-1.4\n").unwrap(), (1, 4));
        assert_eq!(parse_header(b"junk%PDF-2.0\n").unwrap(), (2, 0));
        assert!(parse_header(b"%PDF-x.4").is_err());
        assert!(parse_header(b"hello world").is_err());
    }

    // ========================================================================
    // Parsing and lookup
    // ========================================================================

    #[test]
    fn test_parse_rejects_garbage() {
        let err = PdfDocument::parse(b"not a pdf at all".to_vec()).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
        assert_eq!(err.kind(), "invalid_document");
    }

    #[test]
    fn test_parse_rejects_missing_xref() {
        let err = PdfDocument::parse(b"%PDF-1.4\n1 0 obj << >> endobj\n%%EOF".to_vec()).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    #[test]
    fn test_pages_inherit_media_box_and_resources() {
        let mut doc = PdfDocument::parse(two_page_tree()).unwrap();
        let pages = doc.pages().unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].id, ObjectRef::new(3, 0));
        assert_eq!(pages[0].media_box, [0.0, 0.0, 595.0, 842.0]);
        assert!(pages[0].resources.contains_key("ProcSet"));
        assert_eq!(pages[1].width(), 300.0);
        assert_eq!(pages[1].height(), 400.0);
        assert!(pages[1].resources.contains_key("Font"));
    }

    #[test]
    fn test_page_tree_cycle_is_rejected() {
        let pdf = build(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [2 0 R] /Count 1 >>",
        ]);
        assert!(matches!(PdfDocument::parse(pdf), Err(Error::InvalidDocument(_))));
    }

    #[test]
    fn test_encrypted_document_is_rejected() {
        let mut pdf = two_page_tree();
        let pos = pdf.windows(6).rposition(|w| w == b"/Root ").unwrap();
        pdf.splice(pos..pos, b"/Encrypt 9 0 R ".iter().copied());
        // The xref offsets are still valid because the trailer is after them
        let err = PdfDocument::parse(pdf).unwrap_err();
        assert!(err.to_string().contains("encrypted"));
    }

    #[test]
    fn test_resolve_dangling_is_null() {
        let mut doc = PdfDocument::parse(two_page_tree()).unwrap();
        let resolved = doc.resolve(&Object::Reference(ObjectRef::new(99, 0))).unwrap();
        assert!(resolved.is_null());
        assert!(matches!(doc.get_object(ObjectRef::new(99, 0)), Err(Error::ObjectNotFound(99, 0))));
    }

    #[test]
    fn test_next_object_id_and_metadata() {
        let doc = PdfDocument::parse(two_page_tree()).unwrap();
        assert_eq!(doc.next_object_id(), 6);
        assert_eq!(doc.version(), (1, 7));
        assert!(!doc.uses_xref_stream());
        assert!(doc.data().starts_with(b"%PDF-1.7"));
    }

    #[test]
    fn test_compressed_object_lookup() {
        let mut pdf = b"%PDF-1.5\n".to_vec();
        let obj1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        let members = b"2 0 3 42 << /Type /Pages /Kids [3 0 R] /Count 1 >> << /Type /Page /Parent 2 0 R >>";
        let obj4 = pdf.len();
        pdf.extend_from_slice(
            format!("4 0 obj << /Type /ObjStm /N 2 /First 9 /Length {} >>\nstream\n", members.len()).as_bytes(),
        );
        pdf.extend_from_slice(members);
        pdf.extend_from_slice(b"\nendstream\nendobj\n");
        let xref = pdf.len();
        let mut rows = Vec::new();
        rows.extend_from_slice(&[0, 0, 0, 0]);
        rows.extend_from_slice(&[1, (obj1 >> 8) as u8, obj1 as u8, 0]);
        rows.extend_from_slice(&[2, 0, 4, 0]);
        rows.extend_from_slice(&[2, 0, 4, 1]);
        rows.extend_from_slice(&[1, (obj4 >> 8) as u8, obj4 as u8, 0]);
        rows.extend_from_slice(&[1, (xref >> 8) as u8, xref as u8, 0]);
        pdf.extend_from_slice(
            format!("5 0 obj << /Type /XRef /Size 6 /W [1 2 1] /Root 1 0 R /Length {} >>\nstream\n", rows.len())
                .as_bytes(),
        );
        pdf.extend_from_slice(&rows);
        pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());

        let mut doc = PdfDocument::parse(pdf).unwrap();
        assert!(doc.uses_xref_stream());
        let pages = doc.pages().unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, ObjectRef::new(3, 0));
        assert_eq!(pages[0].media_box, DEFAULT_MEDIA_BOX);
    }

    #[test]
    fn test_parse_rect_normalizes() {
        let rect = Object::Array(vec![
            Object::Integer(100),
            Object::Real(50.5),
            Object::Integer(10),
            Object::Integer(20),
        ]);
        assert_eq!(parse_rect(&rect), Some([10.0, 20.0, 100.0, 50.5]));
        assert_eq!(parse_rect(&Object::Array(vec![Object::Integer(1)])), None);
    }
}
