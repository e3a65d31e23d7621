//! Cross-reference loading.
//!
//! Reads the section named by `startxref` and every older section reachable
//! through /Prev (and /XRefStm in hybrid files). Newer sections win over
//! older ones. Both classic tables and cross-reference streams are
//! accepted.

use crate::error::{Error, Result};
use crate::lexer::{keyword, skip_ws};
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object_at, parse_object};
use nom::character::complete::{digit1, one_of, space1};
use nom::combinator::map_res;
use nom::IResult;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// /Prev chains longer than this are treated as corrupt.
const MAX_SECTIONS: usize = 100;

/// How far from the end of the file `startxref` is searched for.
const STARTXREF_WINDOW: usize = 2048;

/// Location of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free slot
    Free {
        /// Generation to use on reuse
        gen: u16,
    },
    /// Object stored at a byte offset
    InUse {
        /// Byte offset of `N G obj`
        offset: usize,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the /ObjStm
        stream: u32,
        /// Index within the stream
        index: u32,
    },
}

/// Cross-reference format of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefFormat {
    /// `xref` table followed by `trailer`
    Table,
    /// `/Type /XRef` stream
    Stream,
}

/// Merged view of all cross-reference sections in a file.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Dictionary,
    format: XRefFormat,
    startxref: usize,
}

impl CrossRefTable {
    /// Entry for an object number.
    pub fn get(&self, id: u32) -> Option<&XRefEntry> {
        self.entries.get(&id)
    }

    /// Trailer of the newest section.
    ///
    /// For cross-reference streams this is the stream dictionary.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Format of the newest section.
    pub fn format(&self) -> XRefFormat {
        self.format
    }

    /// Offset of the newest section, i.e. the value an update writes as /Prev.
    pub fn startxref(&self) -> usize {
        self.startxref
    }

    /// Object numbers with an in-use or compressed entry.
    pub fn object_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| !matches!(e, XRefEntry::Free { .. }))
            .map(|(id, _)| *id)
    }

    /// One past the highest object number in use, or /Size if larger.
    pub fn size(&self) -> u32 {
        let from_entries = self.entries.keys().max().map(|m| m + 1).unwrap_or(0);
        let from_trailer = self
            .trailer
            .get("Size")
            .and_then(Object::as_integer)
            .map(|s| s.clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(0);
        from_entries.max(from_trailer)
    }

    /// Number of entries, free slots included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge_older(&mut self, older: HashMap<u32, XRefEntry>) {
        for (id, entry) in older {
            self.entries.entry(id).or_insert(entry);
        }
    }
}

/// Locate the offset after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let window_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let tail = &data[window_start..];
    let pos = tail
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::InvalidXref("startxref not found".to_string()))?;
    let after = skip_ws(&tail[pos + b"startxref".len()..]);
    let (_, offset) = number::<usize>(after)
        .map_err(|_| Error::InvalidXref("startxref is not followed by an offset".to_string()))?;
    Ok(offset)
}

/// Load the cross-reference chain of a complete file.
pub fn load(data: &[u8]) -> Result<CrossRefTable> {
    let startxref = find_startxref(data)?;
    let (entries, trailer, format) = parse_section(data, startxref)?;
    let mut table = CrossRefTable {
        entries,
        trailer,
        format,
        startxref,
    };

    let mut visited = HashSet::from([startxref]);
    let mut pending: Vec<usize> = chained_offsets(&table.trailer);
    while let Some(offset) = pending.pop() {
        if !visited.insert(offset) {
            log::warn!("cross-reference chain revisits offset {}, stopping", offset);
            continue;
        }
        if visited.len() > MAX_SECTIONS {
            return Err(Error::InvalidXref(format!("more than {} sections", MAX_SECTIONS)));
        }
        let (older, older_trailer, _) = parse_section(data, offset)?;
        log::debug!("merged {} entries from section at {}", older.len(), offset);
        table.merge_older(older);
        pending.extend(chained_offsets(&older_trailer));
    }
    Ok(table)
}

/// Older sections referenced by a trailer, in stack order.
fn chained_offsets(trailer: &Dictionary) -> Vec<usize> {
    let mut offsets = Vec::new();
    for key in ["Prev", "XRefStm"] {
        if let Some(value) = trailer.get(key).and_then(Object::as_integer) {
            if value >= 0 {
                offsets.push(value as usize);
            }
        }
    }
    // Popped from the back, so XRefStm (pushed last) is merged first
    offsets
}

type Section = (HashMap<u32, XRefEntry>, Dictionary, XRefFormat);

fn parse_section(data: &[u8], offset: usize) -> Result<Section> {
    let at = data
        .get(offset..)
        .ok_or_else(|| Error::InvalidXref(format!("offset {} is past end of file", offset)))?;
    if skip_ws(at).starts_with(b"xref") {
        let (entries, trailer) = parse_table(at)?;
        Ok((entries, trailer, XRefFormat::Table))
    } else {
        let (entries, trailer) = parse_stream(data, offset)?;
        Ok((entries, trailer, XRefFormat::Stream))
    }
}

fn number<T: FromStr>(input: &[u8]) -> IResult<&[u8], T> {
    map_res(digit1, |d: &[u8]| {
        std::str::from_utf8(d).ok().and_then(|s| s.parse::<T>().ok()).ok_or(())
    })(input)
}

/// `oooooooooo ggggg n` with any run of spaces between fields.
fn table_entry(input: &[u8]) -> IResult<&[u8], (usize, u16, char)> {
    let input = skip_ws(input);
    let (input, offset) = number::<usize>(input)?;
    let (input, _) = space1(input)?;
    let (input, gen) = number::<u16>(input)?;
    let (input, _) = space1(input)?;
    let (input, kind) = one_of("nf")(input)?;
    Ok((input, (offset, gen, kind)))
}

fn subsection_header(input: &[u8]) -> IResult<&[u8], (u32, usize)> {
    let input = skip_ws(input);
    let (input, start) = number::<u32>(input)?;
    let (input, _) = space1(input)?;
    let (input, count) = number::<usize>(input)?;
    Ok((input, (start, count)))
}

fn parse_table(input: &[u8]) -> Result<(HashMap<u32, XRefEntry>, Dictionary)> {
    let malformed = |what: &str| Error::InvalidXref(format!("classic table: {}", what));
    let (mut rest, _) = keyword("xref")(input).map_err(|_| malformed("missing xref keyword"))?;
    let mut entries = HashMap::new();

    loop {
        if keyword("trailer")(rest).is_ok() {
            break;
        }
        let (after, (start, count)) =
            subsection_header(rest).map_err(|_| malformed("bad subsection header"))?;
        // Every entry takes at least 18 bytes
        if count > after.len() / 18 + 1 {
            return Err(malformed("subsection count exceeds file size"));
        }
        rest = after;
        for i in 0..count {
            let (after, (offset, gen, kind)) =
                table_entry(rest).map_err(|_| malformed("bad entry"))?;
            let id = start
                .checked_add(i as u32)
                .ok_or_else(|| malformed("object number overflow"))?;
            let entry = if kind == 'n' {
                XRefEntry::InUse { offset, gen }
            } else {
                XRefEntry::Free { gen }
            };
            entries.insert(id, entry);
            rest = after;
        }
    }

    let (rest, _) = keyword("trailer")(rest).map_err(|_| malformed("missing trailer"))?;
    let (_, trailer) = parse_object(rest).map_err(|_| malformed("unreadable trailer"))?;
    let trailer = trailer.into_dict().map_err(|_| malformed("trailer is not a dictionary"))?;
    Ok((entries, trailer))
}

fn parse_stream(data: &[u8], offset: usize) -> Result<(HashMap<u32, XRefEntry>, Dictionary)> {
    let malformed = |what: String| Error::InvalidXref(format!("xref stream at {}: {}", offset, what));
    let (_, object) = parse_indirect_object_at(data, offset)?;
    let (dict, raw) = match &object {
        Object::Stream { dict, data } => (dict, data),
        other => return Err(malformed(format!("found {} instead of a stream", other.type_name()))),
    };
    if let Some(kind) = dict.get("Type").and_then(Object::as_name) {
        if kind != "XRef" {
            return Err(malformed(format!("/Type is /{}", kind)));
        }
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_integer).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(malformed("/W must hold three widths of at most 8 bytes".to_string()));
    }
    let size = dict
        .get("Size")
        .and_then(Object::as_integer)
        .ok_or_else(|| malformed("missing /Size".to_string()))?;
    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(Object::as_array) {
        Some(index) => index
            .chunks_exact(2)
            .filter_map(|pair| Some((pair[0].as_integer()? as u32, pair[1].as_integer()? as u32)))
            .collect(),
        None => vec![(0, size.max(0) as u32)],
    };

    let decoded = crate::filters::decode(raw, dict)?;
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(malformed("zero-width rows".to_string()));
    }
    let mut rows = decoded.chunks_exact(row);
    let mut entries = HashMap::new();
    for (start, count) in ranges {
        for i in 0..count {
            let fields = rows
                .next()
                .ok_or_else(|| malformed("stream data shorter than /Index".to_string()))?;
            let (f1, rest) = fields.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type field defaults to type 1
            let kind = if widths[0] == 0 { 1 } else { be_int(f1) };
            let entry = match kind {
                0 => XRefEntry::Free { gen: be_int(f3) as u16 },
                1 => XRefEntry::InUse {
                    offset: be_int(f2) as usize,
                    gen: be_int(f3) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream: be_int(f2) as u32,
                    index: be_int(f3) as u32,
                },
                other => {
                    log::debug!("ignoring xref entry of unknown type {}", other);
                    continue;
                },
            };
            entries.insert(start.saturating_add(i), entry);
        }
    }
    Ok((entries, dict.clone()))
}

fn be_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
