//! PDF tokenizer.
//!
//! Splits raw bytes into the token types of ISO 32000-1 §7.2: numbers,
//! literal and hex strings, names, keywords and delimiters. Whitespace and
//! `%` comments between tokens are skipped. Escape sequences inside literal
//! strings are left for the parser; `#XX` escapes in names are decoded here.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, recognize, value},
    error::{Error as NomError, ErrorKind},
    sequence::{pair, preceded},
    IResult,
};

/// Token types recognized by the lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (42, -123)
    Integer(i64),
    /// Real number (3.14, -.5)
    Real(f64),
    /// Raw bytes between `(` and `)`, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Raw bytes between `<` and `>`
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded, without the leading `/`
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R` in `10 0 R`
    R,
}

/// PDF whitespace per Table 1 of ISO 32000-1.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn fail<T>(input: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Error(NomError::new(input, kind)))
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip any run of whitespace and comments.
pub fn skip_ws(input: &[u8]) -> &[u8] {
    let mut remaining = input;
    loop {
        let (rest, _) = match take_while::<_, _, NomError<&[u8]>>(is_whitespace)(remaining) {
            Ok(r) => r,
            Err(_) => return remaining,
        };
        remaining = rest;
        match comment(remaining) {
            Ok((rest, _)) => remaining = rest,
            Err(_) => return remaining,
        }
    }
}

fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(pair(
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), opt(digit1))))),
            recognize(pair(char('.'), digit1)),
        )),
    ))(input)?;

    // Safe: recognize only matched ASCII sign, digits and '.'
    let text = std::str::from_utf8(text).map_err(|_| nom::Err::Error(NomError::new(input, ErrorKind::Digit)))?;
    if text.contains('.') {
        let normalized = if text.ends_with('.') { format!("{}0", text) } else { text.to_string() };
        match normalized.parse::<f64>() {
            Ok(v) => Ok((rest, Token::Real(v))),
            Err(_) => fail(input, ErrorKind::Float),
        }
    } else {
        match text.trim_start_matches('+').parse::<i64>() {
            Ok(v) => Ok((rest, Token::Integer(v))),
            Err(_) => fail(input, ErrorKind::Digit),
        }
    }
}

/// Literal string with balanced parentheses; escaped parens do not count.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;
    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }
    fail(input, ErrorKind::Char)
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return fail(input, ErrorKind::Tag);
    }
    let (rest, _) = char('<')(input)?;
    let (rest, digits) = take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c))(rest)?;
    let (rest, _) = char('>')(rest)?;
    Ok((rest, Token::HexString(digits)))
}

/// Decode `#XX` escapes in a name. Malformed escapes are kept literally.
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            if let Ok(byte) = hex::decode(&raw[i + 1..i + 3]) {
                out.push(byte[0]);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(
            take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)),
            |raw: &[u8]| Token::Name(decode_name_escapes(raw)),
        ),
    )(input)
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, tok) = alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::R, tag(b"R")),
    ))(input)?;

    // Alphabetic keywords must end at a token boundary ("nullable" is not null)
    let is_word = !matches!(
        tok,
        Token::DictStart | Token::DictEnd | Token::ArrayStart | Token::ArrayEnd
    );
    if is_word {
        if let Some(&next) = rest.first() {
            if !is_whitespace(next) && !is_delimiter(next) {
                return fail(input, ErrorKind::Tag);
            }
        }
    }
    Ok((rest, tok))
}

/// Parse one token after skipping leading whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((parse_keyword, parse_name, parse_number, parse_literal_string, parse_hex_string))(input)
}

/// Consume a bare word such as `xref`, `trailer` or `startxref`.
pub fn keyword<'a>(word: &'static str) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    move |input: &'a [u8]| {
        let input = skip_ws(input);
        let (rest, found) = take_while1(|c: u8| c.is_ascii_alphabetic())(input)?;
        if found == word.as_bytes() {
            Ok((rest, found))
        } else {
            fail(input, ErrorKind::Tag)
        }
    }
}
