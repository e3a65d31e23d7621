//! Object serialization.
//!
//! Output is compact and deterministic: dictionary keys are sorted so the
//! same object always produces the same bytes.

use crate::object::{Dictionary, Object};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSerializer;

impl ObjectSerializer {
    /// Create a serializer.
    pub fn new() -> Self {
        Self
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize `N G obj ... endobj`.
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    /// Append the serialized form of `obj` to `out`.
    pub fn write_object(&self, out: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => out.extend_from_slice(b"null"),
            Object::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => out.extend_from_slice(format_real(*r).as_bytes()),
            Object::String(s) => write_string(out, s),
            Object::Name(n) => write_name(out, n),
            Object::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    self.write_object(out, item);
                }
                out.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(out, dict),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dictionary(out, &dict);
                out.extend_from_slice(b"\nstream\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => out.extend_from_slice(r.to_string().as_bytes()),
        }
    }

    fn write_dictionary(&self, out: &mut Vec<u8>, dict: &Dictionary) {
        out.extend_from_slice(b"<<");
        let mut keys: Vec<&String> = dict.keys().collect();
        keys.sort();
        for key in keys {
            out.push(b' ');
            write_name(out, key);
            out.push(b' ');
            self.write_object(out, &dict[key]);
        }
        out.extend_from_slice(b" >>");
    }
}

/// Format a real with at most five decimals and no trailing zeros.
pub fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let formatted = format!("{:.5}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Literal string for printable ASCII, hex string otherwise.
fn write_string(out: &mut Vec<u8>, data: &[u8]) {
    let printable = data.iter().all(|&b| matches!(b, b'\n' | b'\r' | b'\t' | 0x20..=0x7E));
    if !printable {
        out.push(b'<');
        out.extend_from_slice(hex::encode_upper(data).as_bytes());
        out.push(b'>');
        return;
    }
    out.push(b'(');
    for &byte in data {
        match byte {
            b'(' | b')' | b'\\' => out.extend_from_slice(&[b'\\', byte]),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            _ => out.push(byte),
        }
    }
    out.push(b')');
}

/// `/Name` with delimiters, whitespace, `#` and non-printable bytes escaped.
fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for byte in name.bytes() {
        let needs_escape = !(0x21..=0x7E).contains(&byte) || byte == b'#' || crate::lexer::is_delimiter(byte);
        if needs_escape {
            out.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        } else {
            out.push(byte);
        }
    }
}
