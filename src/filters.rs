//! Stream filters.
//!
//! Signing only needs to read cross-reference streams, object streams and
//! page content, so the supported set is FlateDecode (with TIFF/PNG
//! predictors) and ASCIIHexDecode. Other filters fail with [`Error::Decode`].

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Predictor parameters from a /DecodeParms dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Samples per row
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl PredictorParams {
    fn from_dict(dict: &Dictionary) -> Self {
        let int = |key: &str, default: i64| dict.get(key).and_then(Object::as_integer).unwrap_or(default);
        Self {
            predictor: int("Predictor", 1),
            columns: int("Columns", 1).max(1) as usize,
            colors: int("Colors", 1).max(1) as usize,
            bits_per_component: int("BitsPerComponent", 8).max(1) as usize,
        }
    }

    fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn pixel_bytes(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Decode stream data using the /Filter and /DecodeParms entries of `dict`.
pub fn decode(data: &[u8], dict: &Dictionary) -> Result<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => return Ok(data.to_vec()),
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(Error::Decode(format!("invalid /Filter of type {}", other.type_name())))
        },
    };
    let params: Vec<Option<&Dictionary>> = match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => vec![Some(d)],
        Some(Object::Array(items)) => items.iter().map(Object::as_dict).collect(),
        _ => Vec::new(),
    };

    let mut current = data.to_vec();
    for (i, filter) in filters.iter().enumerate() {
        let param = params.get(i).copied().flatten();
        current = match *filter {
            "FlateDecode" | "Fl" => {
                let inflated = inflate(&current)?;
                match param {
                    Some(p) => unpredict(&inflated, &PredictorParams::from_dict(p))?,
                    None => inflated,
                }
            },
            "ASCIIHexDecode" | "AHx" => decode_ascii_hex(&current)?,
            other => return Err(Error::Decode(format!("unsupported filter /{}", other))),
        };
    }
    Ok(current)
}

/// Zlib-compress data for a /FlateDecode stream.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    match ZlibDecoder::new(data).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(e) if !output.is_empty() => {
            log::warn!("FlateDecode recovered {} bytes before error: {}", output.len(), e);
            Ok(output)
        },
        Err(e) => {
            // Some producers omit the zlib wrapper
            output.clear();
            DeflateDecoder::new(data)
                .read_to_end(&mut output)
                .map_err(|_| Error::Decode(format!("FlateDecode failed: {}", e)))?;
            Ok(output)
        },
    }
}

fn decode_ascii_hex(data: &[u8]) -> Result<Vec<u8>> {
    let mut digits: Vec<u8> = data
        .iter()
        .copied()
        .take_while(|&c| c != b'>')
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 == 1 {
        digits.push(b'0');
    }
    hex::decode(&digits).map_err(|e| Error::Decode(format!("ASCIIHexDecode: {}", e)))
}

/// Reverse a TIFF or PNG predictor.
pub fn unpredict(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => Ok(unpredict_tiff(data, params)),
        10..=15 => unpredict_png(data, params),
        other => Err(Error::Decode(format!("unsupported predictor {}", other))),
    }
}

fn unpredict_tiff(data: &[u8], params: &PredictorParams) -> Vec<u8> {
    let row_len = params.row_bytes();
    let bpp = params.pixel_bytes();
    let mut output = data.to_vec();
    for row in output.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    output
}

fn unpredict_png(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    let row_len = params.row_bytes();
    let bpp = params.pixel_bytes();
    let stride = row_len + 1;
    if data.len() % stride != 0 {
        log::debug!(
            "PNG predictor data length {} is not a multiple of row stride {}",
            data.len(),
            stride
        );
    }

    let mut output = Vec::with_capacity(data.len() / stride * row_len);
    let mut previous = vec![0u8; row_len];
    for chunk in data.chunks(stride) {
        if chunk.len() < 2 {
            break;
        }
        let tag = chunk[0];
        let encoded = &chunk[1..];
        let mut row = vec![0u8; encoded.len()];
        for i in 0..encoded.len() {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous.get(i).copied().unwrap_or(0);
            let up_left = if i >= bpp { previous.get(i - bpp).copied().unwrap_or(0) } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(Error::Decode(format!("invalid PNG predictor tag {}", other)))
                },
            };
            row[i] = encoded[i].wrapping_add(predicted);
        }
        output.extend_from_slice(&row);
        previous = row;
        previous.resize(row_len, 0);
    }
    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn flate_dict() -> Dictionary {
        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        dict
    }

    #[test]
    fn test_no_filter_passthrough() {
        let out = decode(b"plain", &HashMap::new()).unwrap();
        assert_eq!(out, b"plain");
    }

    #[test]
    fn test_flate_roundtrip() {
        let compressed = deflate(b"BT /F1 12 Tf (Hello) Tj ET").unwrap();
        let out = decode(&compressed, &flate_dict()).unwrap();
        assert_eq!(out, b"BT /F1 12 Tf (Hello) Tj ET");
    }

    #[test]
    fn test_ascii_hex() {
        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::name("ASCIIHexDecode"));
        assert_eq!(decode(b"48 65 6C 6C 6F>", &dict).unwrap(), b"Hello");
    }

    #[test]
    fn test_unsupported_filter() {
        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::name("JBIG2Decode"));
        assert!(matches!(decode(b"", &dict), Err(Error::Decode(_))));
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of 3 bytes, both tagged Up (2)
        let params = PredictorParams {
            predictor: 12,
            columns: 3,
            ..Default::default()
        };
        let encoded = [2, 1, 2, 3, 2, 1, 1, 1];
        let out = unpredict(&encoded, &params).unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_predictor() {
        let params = PredictorParams {
            predictor: 15,
            columns: 4,
            ..Default::default()
        };
        let encoded = [1, 5, 1, 1, 1];
        assert_eq!(unpredict(&encoded, &params).unwrap(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_flate_with_predictor_params() {
        let params = PredictorParams {
            predictor: 12,
            columns: 2,
            ..Default::default()
        };
        let raw = [2u8, 0, 10, 2, 0, 5];
        let compressed = deflate(&raw).unwrap();

        let mut parms = HashMap::new();
        parms.insert("Predictor".to_string(), Object::Integer(params.predictor));
        parms.insert("Columns".to_string(), Object::Integer(2));
        let mut dict = flate_dict();
        dict.insert("DecodeParms".to_string(), Object::Dictionary(parms));

        assert_eq!(decode(&compressed, &dict).unwrap(), vec![0, 10, 0, 15]);
    }

    #[test]
    fn test_paeth_picks_nearest() {
        assert_eq!(paeth(10, 20, 10), 20);
        assert_eq!(paeth(0, 0, 0), 0);
    }
}
