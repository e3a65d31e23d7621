//! Incremental update writer.
//!
//! Appends new and replaced objects after the original bytes, followed by a
//! cross-reference section that chains to the previous one through /Prev.
//! The original bytes are never rewritten, so signatures and viewers that
//! relied on them keep working.

use super::object_serializer::ObjectSerializer;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Trailer keys carried over from the previous section.
const CARRIED_TRAILER_KEYS: [&str; 3] = ["Root", "Info", "ID"];

#[derive(Debug, Clone)]
enum Body {
    Object(Object),
    /// Pre-serialized bytes placed verbatim between `obj` and `endobj`
    Raw(Vec<u8>),
}

/// Result of [`IncrementalWriter::write`].
#[derive(Debug, Clone)]
pub struct IncrementalOutput {
    /// Complete updated file
    pub data: Vec<u8>,
    /// Offset of each appended `N G obj` header
    pub object_offsets: BTreeMap<u32, usize>,
    /// Offset of the first byte after each `N G obj\n`
    pub body_offsets: BTreeMap<u32, usize>,
}

/// Collects the objects of one incremental update.
#[derive(Debug, Clone)]
pub struct IncrementalWriter {
    prev_startxref: usize,
    previous_trailer: Dictionary,
    use_xref_stream: bool,
    next_id: u32,
    objects: BTreeMap<u32, (u16, Body)>,
}

impl IncrementalWriter {
    /// Start an update on top of `doc`.
    ///
    /// The new cross-reference section uses the same format as the newest
    /// existing one.
    pub fn new(doc: &PdfDocument) -> Self {
        Self {
            prev_startxref: doc.startxref(),
            previous_trailer: doc.trailer().clone(),
            use_xref_stream: doc.uses_xref_stream(),
            next_id: doc.next_object_id(),
            objects: BTreeMap::new(),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let id = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        id
    }

    /// Add a new object and return its reference.
    pub fn add(&mut self, object: Object) -> ObjectRef {
        let id = self.allocate();
        self.set(id, object);
        id
    }

    /// Replace (or define) the object at `id`.
    pub fn set(&mut self, id: ObjectRef, object: Object) {
        self.objects.insert(id.id, (id.gen, Body::Object(object)));
    }

    /// Define `id` with bytes written exactly as given.
    pub fn set_raw(&mut self, id: ObjectRef, body: Vec<u8>) {
        self.objects.insert(id.id, (id.gen, Body::Raw(body)));
    }

    /// Whether `id` is part of this update.
    pub fn contains(&self, id: ObjectRef) -> bool {
        self.objects.contains_key(&id.id)
    }

    /// Append the update to `original` and return the new file.
    pub fn write(&self, original: &[u8]) -> Result<IncrementalOutput> {
        if self.objects.is_empty() {
            return Err(Error::InvalidRequest("incremental update has no objects".to_string()));
        }
        let serializer = ObjectSerializer::new();
        let mut data = Vec::with_capacity(original.len() + 16 * 1024);
        data.extend_from_slice(original);
        if !original.ends_with(b"\n") && !original.ends_with(b"\r") {
            data.push(b'\n');
        }

        let mut object_offsets = BTreeMap::new();
        let mut body_offsets = BTreeMap::new();
        let mut entries: BTreeMap<u32, (usize, u16)> = BTreeMap::new();
        for (&id, (gen, body)) in &self.objects {
            object_offsets.insert(id, data.len());
            entries.insert(id, (data.len(), *gen));
            data.extend_from_slice(format!("{} {} obj\n", id, gen).as_bytes());
            body_offsets.insert(id, data.len());
            match body {
                Body::Object(object) => serializer.write_object(&mut data, object),
                Body::Raw(raw) => data.extend_from_slice(raw),
            }
            data.extend_from_slice(b"\nendobj\n");
        }

        let mut trailer = self.carried_trailer(original);
        trailer.insert("Prev".to_string(), Object::Integer(self.prev_startxref as i64));

        let xref_offset = data.len();
        if self.use_xref_stream {
            let stream_id = self.next_id;
            entries.insert(stream_id, (xref_offset, 0));
            trailer.insert("Size".to_string(), Object::Integer(stream_id as i64 + 1));
            let stream = xref_stream(&entries, trailer)?;
            data.extend_from_slice(&serializer.serialize_indirect(stream_id, 0, &stream));
        } else {
            trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
            data.extend_from_slice(b"xref\n");
            for (start, run) in subsections(&entries) {
                data.extend_from_slice(format!("{} {}\n", start, run.len()).as_bytes());
                for (offset, gen) in run {
                    // Fixed 20-byte entries
                    data.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes());
                }
            }
            data.extend_from_slice(b"trailer\n");
            serializer.write_object(&mut data, &Object::Dictionary(trailer));
            data.push(b'\n');
        }
        data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "incremental update: {} objects, {} bytes appended, {} cross-reference",
            self.objects.len(),
            data.len() - original.len(),
            if self.use_xref_stream { "stream" } else { "table" }
        );
        Ok(IncrementalOutput {
            data,
            object_offsets,
            body_offsets,
        })
    }

    fn carried_trailer(&self, original: &[u8]) -> Dictionary {
        let mut trailer = Dictionary::new();
        for key in CARRIED_TRAILER_KEYS {
            if let Some(value) = self.previous_trailer.get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }
        if !trailer.contains_key("ID") {
            let digest = Sha256::digest(original);
            let id = Object::String(digest[..16].to_vec());
            trailer.insert("ID".to_string(), Object::Array(vec![id.clone(), id]));
        }
        trailer
    }
}

/// Split sorted entries into runs of consecutive object numbers.
fn subsections(entries: &BTreeMap<u32, (usize, u16)>) -> Vec<(u32, Vec<(usize, u16)>)> {
    let mut runs: Vec<(u32, Vec<(usize, u16)>)> = Vec::new();
    for (&id, &entry) in entries {
        match runs.last_mut() {
            Some((start, run)) if *start + run.len() as u32 == id => run.push(entry),
            _ => runs.push((id, vec![entry])),
        }
    }
    runs
}

fn xref_stream(entries: &BTreeMap<u32, (usize, u16)>, mut dict: Dictionary) -> Result<Object> {
    let max_offset = entries.values().map(|(o, _)| *o).max().unwrap_or(0) as u64;
    let offset_width = ((64 - max_offset.leading_zeros() as usize).div_ceil(8)).max(1);

    let mut rows = Vec::with_capacity(entries.len() * (offset_width + 3));
    let mut index = Vec::new();
    for (start, run) in subsections(entries) {
        index.push(Object::Integer(start as i64));
        index.push(Object::Integer(run.len() as i64));
        for (offset, gen) in run {
            rows.push(1u8);
            rows.extend_from_slice(&(offset as u64).to_be_bytes()[8 - offset_width..]);
            rows.extend_from_slice(&gen.to_be_bytes());
        }
    }

    dict.insert("Type".to_string(), Object::name("XRef"));
    dict.insert(
        "W".to_string(),
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(offset_width as i64),
            Object::Integer(2),
        ]),
    );
    dict.insert("Index".to_string(), Object::Array(index));
    dict.insert("Filter".to_string(), Object::name("FlateDecode"));
    Ok(Object::Stream {
        dict,
        data: crate::filters::deflate(&rows)?.into(),
    })
}
