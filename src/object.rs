//! PDF object model.
//!
//! The parser produces these values and the writer serializes them back. They
//! only need to carry what signing touches: catalog, page tree, annotations,
//! AcroForm, content streams and cross-reference streams.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dictionary payload shared by dictionaries and stream headers.
pub type Dictionary = HashMap<String, Object>;

/// A parsed PDF value.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// `null`
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Whole number
    Integer(i64),
    /// Number with a fractional part
    Real(f64),
    /// Literal or hex string, raw bytes after escape decoding
    String(Vec<u8>),
    /// Name, stored without its `/`
    Name(String),
    /// `[ ... ]`
    Array(Vec<Object>),
    /// `<< ... >>`
    Dictionary(Dictionary),
    /// Stream header and body. The body is kept encoded.
    Stream {
        /// Header dictionary
        dict: Dictionary,
        /// Body bytes between `stream` and `endstream`
        data: bytes::Bytes,
    },
    /// `n g R`
    Reference(ObjectRef),
}

/// Number and generation of an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation
    pub gen: u16,
}

impl ObjectRef {
    /// `id gen R`
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

/// `fn $name(&self) -> Option<$out>` for one variant.
macro_rules! variant_accessor {
    ($(#[$doc:meta])* $name:ident, $out:ty, $pattern:pat => $value:expr) => {
        $(#[$doc])*
        pub fn $name(&self) -> Option<$out> {
            match self {
                $pattern => Some($value),
                _ => None,
            }
        }
    };
}

impl Object {
    /// `/name`
    pub fn name(name: &str) -> Self {
        Object::Name(name.to_string())
    }

    /// Text string object.
    ///
    /// ASCII text is stored as-is; anything else becomes UTF-16BE with a
    /// byte-order mark, which every PDF text string field accepts.
    pub fn text(text: &str) -> Self {
        if text.is_ascii() {
            return Object::String(text.as_bytes().to_vec());
        }
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes)
    }

    /// Rectangle array `[llx lly urx ury]`.
    pub fn rect(llx: f64, lly: f64, urx: f64, ury: f64) -> Self {
        Object::Array([llx, lly, urx, ury].into_iter().map(Object::Real).collect())
    }

    /// Variant name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    variant_accessor!(
        /// Integer value.
        as_integer, i64, Object::Integer(i) => *i
    );
    variant_accessor!(
        /// Name without the `/`.
        as_name, &str, Object::Name(name) => name.as_str()
    );
    variant_accessor!(
        /// Array items.
        as_array, &Vec<Object>, Object::Array(items) => items
    );
    variant_accessor!(
        /// Target of a reference.
        as_reference, ObjectRef, Object::Reference(r) => *r
    );
    variant_accessor!(
        /// Raw string bytes.
        as_string, &[u8], Object::String(bytes) => bytes.as_slice()
    );

    /// Integer or real as `f64`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or of a stream header.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(dict) | Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// `null`, or a value that resolved to nothing.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Unwrap a dictionary, failing on any other variant.
    pub fn into_dict(self) -> Result<Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(mismatch("Dictionary", &other)),
        }
    }

    /// Body of a stream with its `/Filter` chain undone.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        match self {
            Object::Stream { dict, data } => crate::filters::decode(data, dict),
            other => Err(mismatch("Stream", other)),
        }
    }
}

fn mismatch(expected: &str, found: &Object) -> Error {
    Error::InvalidObjectType {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

/// Decode a PDF text string (PDFDocEncoding or UTF-16BE with BOM) into Rust text.
///
/// PDFDocEncoding is treated as Latin-1, which agrees with it for the printable
/// range that field names and labels use.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}
