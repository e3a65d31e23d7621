//! ByteRange and `/Contents` placeholder arithmetic.
//!
//! A signature covers the whole file except the hex string holding the
//! signature itself. The ByteRange array names the two covered spans:
//! `[0, a, b, len - b]`, where `a..b` is the `<...>` placeholder including
//! its angle brackets.

use crate::error::{Error, Result};
use crate::object::Object;
use std::ops::Range;

/// Bytes reserved for the `/ByteRange` array. Four ten-digit offsets fit.
pub const BYTE_RANGE_WIDTH: usize = 48;

/// Default DER capacity of the `/Contents` placeholder.
pub const DEFAULT_SIGNATURE_CAPACITY: usize = 8192;

/// Largest DER capacity a placeholder reserves.
pub const MAX_SIGNATURE_CAPACITY: usize = 1024 * 1024;

/// The two covered spans of a signed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange(pub [usize; 4]);

impl ByteRange {
    /// ByteRange of a file of `file_size` bytes whose placeholder spans
    /// `excluded`.
    pub fn around(file_size: usize, excluded: Range<usize>) -> Self {
        Self([0, excluded.start, excluded.end, file_size.saturating_sub(excluded.end)])
    }

    /// Read a `/ByteRange` array. Negative or non-integer entries give `None`.
    pub fn from_object(value: &Object) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() != 4 {
            return None;
        }
        let mut out = [0usize; 4];
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = usize::try_from(item.as_integer()?).ok()?;
        }
        Some(Self(out))
    }

    /// The excluded span between the two covered ranges.
    pub fn gap(&self) -> Range<usize> {
        self.0[0] + self.0[1]..self.0[2]
    }

    /// `[0 a b c]` padded with spaces to [`BYTE_RANGE_WIDTH`].
    pub fn to_padded(&self) -> Result<Vec<u8>> {
        let text = format!("[{} {} {} {}]", self.0[0], self.0[1], self.0[2], self.0[3]);
        if text.len() > BYTE_RANGE_WIDTH {
            return Err(Error::Crypto(format!("ByteRange {} does not fit its placeholder", text)));
        }
        let mut out = text.into_bytes();
        out.resize(BYTE_RANGE_WIDTH, b' ');
        Ok(out)
    }

    /// Concatenate the two covered spans of `data`.
    pub fn signed_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let [start1, len1, start2, len2] = self.0;
        let first = start1
            .checked_add(len1)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| Error::InvalidDocument(format!("ByteRange {:?} exceeds the file", self.0)))?;
        let second = start2
            .checked_add(len2)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| Error::InvalidDocument(format!("ByteRange {:?} exceeds the file", self.0)))?;
        let mut out = Vec::with_capacity(len1 + len2);
        out.extend_from_slice(&data[start1..first]);
        out.extend_from_slice(&data[start2..second]);
        Ok(out)
    }

    /// Check that the spans start at 0, do not overlap, and end at
    /// `file_size`.
    pub fn validate(&self, file_size: usize) -> Result<()> {
        let [start1, len1, start2, len2] = self.0;
        if start1 != 0 {
            return Err(Error::InvalidDocument(format!("ByteRange starts at {}, not 0", start1)));
        }
        if len1 > start2 {
            return Err(Error::InvalidDocument(format!(
                "ByteRange spans overlap ({} > {})",
                len1, start2
            )));
        }
        if start2.checked_add(len2) != Some(file_size) {
            return Err(Error::InvalidDocument(format!(
                "ByteRange ends at {}, file is {} bytes",
                start2.saturating_add(len2),
                file_size
            )));
        }
        Ok(())
    }

    /// Whether the gap is exactly one `<...>` hex string in `data`.
    pub fn gap_is_hex_string(&self, data: &[u8]) -> bool {
        let gap = self.gap();
        if gap.end < gap.start + 2 || gap.end > data.len() {
            return false;
        }
        let inner = &data[gap.start + 1..gap.end - 1];
        data[gap.start] == b'<' && data[gap.end - 1] == b'>' && inner.iter().all(u8::is_ascii_hexdigit)
    }
}

/// The zero-filled hex string a signature is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentsPlaceholder {
    capacity: usize,
}

impl ContentsPlaceholder {
    /// Room for `capacity` bytes of DER, at most [`MAX_SIGNATURE_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(MAX_SIGNATURE_CAPACITY),
        }
    }

    /// DER bytes that fit.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of `<...>` in the file.
    pub fn len(&self) -> usize {
        self.capacity * 2 + 2
    }

    /// Whether the placeholder holds nothing.
    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    /// `<000...0>`
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.push(b'<');
        out.resize(self.len() - 1, b'0');
        out.push(b'>');
        out
    }

    /// Write `der` as uppercase hex at `offset` (the `<`), padding with `0`.
    pub fn fill(&self, data: &mut [u8], offset: usize, der: &[u8]) -> Result<()> {
        if der.len() > self.capacity {
            return Err(Error::SignatureCapacityExceeded {
                size: der.len(),
                capacity: self.capacity,
            });
        }
        let slot = data
            .get_mut(offset..offset + self.len())
            .filter(|slot| slot.first() == Some(&b'<') && slot.last() == Some(&b'>'))
            .ok_or_else(|| Error::Crypto(format!("no /Contents placeholder at byte {}", offset)))?;
        let hex = hex::encode_upper(der);
        let inner = &mut slot[1..self.capacity * 2 + 1];
        inner[..hex.len()].copy_from_slice(hex.as_bytes());
        inner[hex.len()..].fill(b'0');
        Ok(())
    }
}

impl Default for ContentsPlaceholder {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE_CAPACITY)
    }
}
