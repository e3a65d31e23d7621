//! WinAnsi (Windows-1252) text encoding for the standard Helvetica font.

/// Code points that WinAnsi places in 0x80..=0x9F, where it departs from
/// Latin-1. Sorted by byte value.
const HIGH_CONTROL_RANGE: [(char, u8); 27] = [
    ('\u{20AC}', 0x80),
    ('\u{201A}', 0x82),
    ('\u{0192}', 0x83),
    ('\u{201E}', 0x84),
    ('\u{2026}', 0x85),
    ('\u{2020}', 0x86),
    ('\u{2021}', 0x87),
    ('\u{02C6}', 0x88),
    ('\u{2030}', 0x89),
    ('\u{0160}', 0x8A),
    ('\u{2039}', 0x8B),
    ('\u{0152}', 0x8C),
    ('\u{017D}', 0x8E),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201C}', 0x93),
    ('\u{201D}', 0x94),
    ('\u{2022}', 0x95),
    ('\u{2013}', 0x96),
    ('\u{2014}', 0x97),
    ('\u{02DC}', 0x98),
    ('\u{2122}', 0x99),
    ('\u{0161}', 0x9A),
    ('\u{203A}', 0x9B),
    ('\u{0153}', 0x9C),
    ('\u{017E}', 0x9E),
    ('\u{0178}', 0x9F),
];

/// Byte for one character, if WinAnsi has it.
pub fn winansi_byte(ch: char) -> Option<u8> {
    match ch as u32 {
        0x20..=0x7E | 0xA0..=0xFF => Some(ch as u32 as u8),
        _ => HIGH_CONTROL_RANGE.iter().find(|(c, _)| *c == ch).map(|(_, b)| *b),
    }
}

/// Encode text for a `Tj` operand. Characters outside WinAnsi, and control
/// characters, become `?`.
pub fn encode_winansi(text: &str) -> Vec<u8> {
    text.chars().map(|ch| winansi_byte(ch).unwrap_or(b'?')).collect()
}

/// Glyph width of `ch` in Helvetica, in thousandths of the font size.
///
/// Approximate: the stamp only needs it to keep lines inside the box.
pub fn helvetica_width(ch: char) -> u16 {
    match ch {
        ' ' | '!' | ',' | '.' | '/' | ':' | ';' | 'I' | '[' | ']' | '\\' | 'f' | 't' => 278,
        'i' | 'j' | 'l' | '\'' | '|' => 222,
        'r' | '(' | ')' | '-' => 333,
        'm' => 833,
        'M' | 'W' => 833,
        'w' => 722,
        'A'..='Z' => 667,
        '0'..='9' | 'a'..='z' => 556,
        _ => 600,
    }
}

/// Width of `text` in points at `size`.
pub fn text_width(text: &str, size: f64) -> f64 {
    text.chars().map(|c| f64::from(helvetica_width(c))).sum::<f64>() * size / 1000.0
}

/// Longest prefix of `text` no wider than `max_width`, with `...` appended
/// when something was cut.
pub fn fit_text(text: &str, size: f64, max_width: f64) -> String {
    if text_width(text, size) <= max_width {
        return text.to_string();
    }
    let ellipsis = text_width("...", size);
    let mut width = 0.0;
    let mut out = String::new();
    for ch in text.chars() {
        let w = f64::from(helvetica_width(ch)) * size / 1000.0;
        if width + w + ellipsis > max_width {
            break;
        }
        width += w;
        out.push(ch);
    }
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_and_latin1_pass_through() {
        assert_eq!(encode_winansi("Alice"), b"Alice".to_vec());
        assert_eq!(encode_winansi("Jos\u{e9}"), vec![b'J', b'o', b's', 0xE9]);
    }

    #[test]
    fn test_high_range() {
        assert_eq!(winansi_byte('\u{20AC}'), Some(0x80));
        assert_eq!(winansi_byte('\u{2019}'), Some(0x92));
        assert_eq!(winansi_byte('\u{2022}'), Some(0x95));
    }

    #[test]
    fn test_unmappable_becomes_question_mark() {
        assert_eq!(encode_winansi("\u{4E2D}\n"), b"??".to_vec());
    }

    #[test]
    fn test_fit_text_truncates() {
        let long = "Certificate issued by an authority with a very long name";
        let fitted = fit_text(long, 8.0, 100.0);
        assert!(fitted.ends_with("..."));
        assert!(text_width(&fitted, 8.0) <= 100.0);
        assert_eq!(fit_text("short", 8.0, 100.0), "short");
    }

    proptest::proptest! {
        #[test]
        fn fitted_text_stays_within_width(text in "[ -~\u{e0}-\u{ff}]{0,80}", max in 20.0f64..300.0) {
            let fitted = fit_text(&text, 8.0, max);
            proptest::prop_assert!(text_width(&fitted, 8.0) <= max + 1e-9);
        }
    }
}
