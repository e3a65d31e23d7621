//! Recursive-descent object parser on top of [`crate::lexer`].
//!
//! Parsing is lenient where real-world files are sloppy (unclosed arrays at
//! end of input, wrong stream /Length) and strict where signing depends on
//! it (dictionary keys must be names).

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::error::{Error as NomError, ErrorKind};
use nom::IResult;
use std::collections::HashMap;

fn nom_fail<T>(input: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Error(NomError::new(input, kind)))
}

/// Decode the escape sequences of a literal string body (ISO 32000-1 §7.3.4.2).
///
/// Unknown escapes keep the backslash. `\ddd` takes one to three octal digits.
/// A backslash before an end-of-line joins the lines.
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' || i + 1 >= raw.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'(' | b')' | b'\\' => out.push(escaped),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = (escaped - b'0') as u32;
                let mut taken = 1;
                while taken < 3 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            i += 1;
                            taken += 1;
                        },
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            },
            other => {
                out.push(b'\\');
                out.push(other);
            },
        }
    }
    out
}

/// Decode the body of a hex string. Whitespace is ignored and an odd final
/// digit is padded with `0`.
pub fn decode_hex(digits: &[u8]) -> Result<Vec<u8>> {
    let mut cleaned: Vec<u8> = digits.iter().copied().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.len() % 2 == 1 {
        cleaned.push(b'0');
    }
    hex::decode(&cleaned).map_err(|e| Error::ParseError {
        offset: 0,
        reason: format!("invalid hex string: {}", e),
    })
}

/// Parse one direct object.
///
/// An integer followed by `G R` is returned as a reference; a dictionary
/// followed by `stream` is returned as a stream with its raw bytes.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::Integer(n) => Ok(reference_or_integer(rest, n)),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => match decode_hex(raw) {
            Ok(bytes) => Ok((rest, Object::String(bytes))),
            Err(_) => Err(nom::Err::Failure(NomError::new(input, ErrorKind::HexDigit))),
        },
        Token::ArrayStart => parse_array(rest),
        Token::DictStart => {
            let (after_dict, dict) = parse_dictionary(rest)?;
            match token(after_dict) {
                Ok((body, Token::StreamStart)) => {
                    let (after_stream, data) = parse_stream_data(body, &dict)?;
                    Ok((
                        after_stream,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::copy_from_slice(data),
                        },
                    ))
                },
                _ => Ok((after_dict, Object::Dictionary(dict))),
            }
        },
        _ => nom_fail(input, ErrorKind::Tag),
    }
}

fn reference_or_integer(rest: &[u8], n: i64) -> (&[u8], Object) {
    if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
        if let Ok((after_r, Token::R)) = token(after_gen) {
            if (0..=u32::MAX as i64).contains(&n) && (0..=u16::MAX as i64).contains(&gen) {
                return (after_r, Object::Reference(ObjectRef::new(n as u32, gen as u16)));
            }
        }
    }
    (rest, Object::Integer(n))
}

/// Parse `N G obj <object> endobj`.
///
/// A missing `endobj` is tolerated; the object is still returned.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = match token(input)? {
        (rest, Token::Integer(id)) if id >= 0 => (rest, id),
        _ => return nom_fail(input, ErrorKind::Digit),
    };
    let (rest, gen) = match token(rest)? {
        (rest, Token::Integer(gen)) if (0..=u16::MAX as i64).contains(&gen) => (rest, gen),
        _ => return nom_fail(input, ErrorKind::Digit),
    };
    let rest = match token(rest)? {
        (rest, Token::ObjStart) => rest,
        _ => return nom_fail(input, ErrorKind::Tag),
    };
    let (rest, object) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => {
            log::debug!("object {} {} has no endobj", id, gen);
            rest
        },
    };
    Ok((rest, (ObjectRef::new(id as u32, gen as u16), object)))
}

/// Parse an indirect object at `offset` of `data`, converting nom errors.
pub fn parse_indirect_object_at(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let slice = data.get(offset..).ok_or_else(|| Error::ParseError {
        offset,
        reason: "offset past end of file".to_string(),
    })?;
    match parse_indirect_object(slice) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(Error::ParseError {
            offset: offset + (slice.len() - e.input.len()),
            reason: format!("expected indirect object ({:?})", e.code),
        }),
        Err(nom::Err::Incomplete(_)) => Err(Error::ParseError {
            offset,
            reason: "truncated indirect object".to_string(),
        }),
    }
}

/// Stream bytes after the `stream` keyword.
///
/// /Length is trusted only when `endstream` follows it; an indirect or
/// wrong /Length falls back to scanning for `endstream`.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> IResult<&'a [u8], &'a [u8]> {
    let body = if let Some(rest) = input.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\n").or_else(|| input.strip_prefix(b"\r")) {
        rest
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        let length = length.max(0) as usize;
        if length <= body.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&body[length..]) {
                return Ok((rest, &body[..length]));
            }
        }
        log::debug!("stream /Length {} does not end at endstream, scanning", length);
    }

    match find_endstream(body) {
        Some(pos) => {
            let mut data = &body[..pos];
            // The EOL before endstream is not part of the data
            if let Some(d) = data.strip_suffix(b"\r\n") {
                data = d;
            } else if let Some(d) = data.strip_suffix(b"\n").or_else(|| data.strip_suffix(b"\r")) {
                data = d;
            }
            Ok((&body[pos + b"endstream".len()..], data))
        },
        None => nom_fail(input, ErrorKind::Eof),
    }
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    input.windows(b"endstream".len()).position(|w| w == b"endstream")
}

fn parse_array(input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    let mut remaining = input;
    loop {
        if skip_ws(remaining).is_empty() {
            log::debug!("unclosed array at end of input");
            return Ok((skip_ws(remaining), Object::Array(items)));
        }
        if let Ok((rest, Token::ArrayEnd)) = token(remaining) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(remaining)?;
        items.push(item);
        remaining = rest;
    }
}

fn parse_dictionary(input: &[u8]) -> IResult<&[u8], Dictionary> {
    let mut dict = HashMap::new();
    let mut remaining = input;
    loop {
        if skip_ws(remaining).is_empty() {
            log::debug!("unclosed dictionary at end of input");
            return Ok((skip_ws(remaining), dict));
        }
        let (rest, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object(rest)?;
                dict.insert(key, value);
                remaining = rest;
            },
            _ => return nom_fail(remaining, ErrorKind::Tag),
        }
    }
}
