//! Object streams (`/Type /ObjStm`, PDF 1.5+).
//!
//! The decoded stream starts with /N pairs of `object-number offset`, then
//! the objects themselves beginning at byte /First. Offsets are relative to
//! /First.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Decode an object stream into its member objects.
///
/// Members that fail to parse are skipped with a warning; the rest are
/// returned.
pub fn parse_object_stream(stream: &Object) -> Result<HashMap<u32, Object>> {
    let dict = stream.as_dict().filter(|_| matches!(stream, Object::Stream { .. })).ok_or_else(|| {
        Error::InvalidObjectType {
            expected: "Stream".to_string(),
            found: stream.type_name().to_string(),
        }
    })?;
    if let Some(kind) = dict.get("Type").and_then(Object::as_name) {
        if kind != "ObjStm" {
            return Err(Error::InvalidDocument(format!("expected /Type /ObjStm, found /{}", kind)));
        }
    }
    let count = dict
        .get("N")
        .and_then(Object::as_integer)
        .filter(|n| (0..=1_000_000).contains(n))
        .ok_or_else(|| Error::InvalidDocument("object stream has no valid /N".to_string()))?
        as usize;
    let first = dict
        .get("First")
        .and_then(Object::as_integer)
        .filter(|f| *f >= 0)
        .ok_or_else(|| Error::InvalidDocument("object stream has no valid /First".to_string()))?
        as usize;

    let decoded = stream.decode_stream_data()?;
    if decoded.len() < first {
        return Err(Error::InvalidDocument(format!(
            "object stream is {} bytes but /First is {}",
            decoded.len(),
            first
        )));
    }
    let (header, body) = decoded.split_at(first);

    let mut members = HashMap::with_capacity(count);
    for (id, offset) in offset_pairs(header, count)? {
        let Some(slice) = body.get(offset..) else {
            log::warn!("object {} points past the end of its object stream", id);
            continue;
        };
        match parse_object(slice) {
            Ok((_, object)) => {
                members.insert(id, object);
            },
            Err(e) => log::warn!("object {} in object stream failed to parse: {:?}", id, e.map(|e| e.code)),
        }
    }
    Ok(members)
}

fn offset_pairs(header: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count);
    let mut rest = header;
    for i in 0..count {
        let mut pair = [0i64; 2];
        for slot in pair.iter_mut() {
            match token(rest) {
                Ok((after, Token::Integer(n))) if n >= 0 => {
                    *slot = n;
                    rest = after;
                },
                _ => {
                    return Err(Error::ParseError {
                        offset: header.len() - rest.len(),
                        reason: format!("object stream header pair {} is malformed", i),
                    })
                },
            }
        }
        pairs.push((pair[0] as u32, pair[1] as usize));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;

    fn objstm(n: i64, first: i64, body: &[u8]) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("ObjStm"));
        dict.insert("N".to_string(), Object::Integer(n));
        dict.insert("First".to_string(), Object::Integer(first));
        Object::Stream {
            dict,
            data: bytes::Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn test_members_are_parsed() {
        let body = b"10 0 11 18 << /Type /Page >> [1 2 3]";
        let members = parse_object_stream(&objstm(2, 11, body)).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(
            members[&10].as_dict().and_then(|d| d.get("Type")).and_then(Object::as_name),
            Some("Page")
        );
        assert_eq!(members[&11].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_flate_compressed_members() {
        let raw = b"4 0 <</A 1>>";
        let mut stream = objstm(1, 4, b"");
        if let Object::Stream { dict, data } = &mut stream {
            dict.insert("Filter".to_string(), Object::name("FlateDecode"));
            *data = crate::filters::deflate(raw).unwrap().into();
        }
        let members = parse_object_stream(&stream).unwrap();
        assert!(members.contains_key(&4));
    }

    #[test]
    fn test_not_a_stream() {
        assert!(parse_object_stream(&Object::Integer(1)).is_err());
        assert!(parse_object_stream(&Object::Dictionary(Dictionary::new())).is_err());
    }

    #[test]
    fn test_missing_n_or_first() {
        let mut stream = objstm(1, 4, b"4 0 1");
        if let Object::Stream { dict, .. } = &mut stream {
            dict.remove("N");
        }
        assert!(parse_object_stream(&stream).is_err());
    }

    #[test]
    fn test_first_beyond_data() {
        assert!(parse_object_stream(&objstm(1, 500, b"1 0 null")).is_err());
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            parse_object_stream(&objstm(2, 4, b"1 0 null")),
            Err(Error::ParseError { .. })
        ));
    }

    #[test]
    fn test_offset_past_end_is_skipped() {
        let members = parse_object_stream(&objstm(2, 10, b"1 0 2 900 true")).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[&1], Object::Boolean(true));
    }
}
