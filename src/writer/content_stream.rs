//! Content stream builder.
//!
//! Covers the operators the stamp needs: graphics state, colour, rectangles
//! and lines, and single-font text. Text is encoded as WinAnsi bytes so it
//! can be shown with a standard Type 1 font.

use super::object_serializer::format_real;
use crate::stamp::winansi::encode_winansi;

/// One content stream operator.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStreamOp {
    /// `q`
    SaveState,
    /// `Q`
    RestoreState,
    /// `BT`
    BeginText,
    /// `ET`
    EndText,
    /// `/F size Tf`
    SetFont(String, f64),
    /// `x y Td`
    MoveText(f64, f64),
    /// `(text) Tj`, text still in Rust form
    ShowText(String),
    /// `r g b rg`
    SetFillColorRgb(f64, f64, f64),
    /// `r g b RG`
    SetStrokeColorRgb(f64, f64, f64),
    /// `w w`
    SetLineWidth(f64),
    /// `x y w h re`
    Rectangle(f64, f64, f64, f64),
    /// `x y m`
    MoveTo(f64, f64),
    /// `x y l`
    LineTo(f64, f64),
    /// `S`
    Stroke,
    /// `f`
    Fill,
}

/// Accumulates operators and renders them to bytes.
#[derive(Debug, Clone, Default)]
pub struct ContentStreamBuilder {
    ops: Vec<ContentStreamOp>,
}

impl ContentStreamBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw operator.
    pub fn op(&mut self, op: ContentStreamOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// `q`
    pub fn save_state(&mut self) -> &mut Self {
        self.op(ContentStreamOp::SaveState)
    }

    /// `Q`
    pub fn restore_state(&mut self) -> &mut Self {
        self.op(ContentStreamOp::RestoreState)
    }

    /// Draw one line of text at `(x, y)` with the given font resource.
    pub fn text(&mut self, font: &str, size: f64, x: f64, y: f64, text: &str) -> &mut Self {
        self.op(ContentStreamOp::BeginText)
            .op(ContentStreamOp::SetFont(font.to_string(), size))
            .op(ContentStreamOp::MoveText(x, y))
            .op(ContentStreamOp::ShowText(text.to_string()))
            .op(ContentStreamOp::EndText)
    }

    /// Fill colour.
    pub fn fill_rgb(&mut self, r: f64, g: f64, b: f64) -> &mut Self {
        self.op(ContentStreamOp::SetFillColorRgb(r, g, b))
    }

    /// Stroke colour.
    pub fn stroke_rgb(&mut self, r: f64, g: f64, b: f64) -> &mut Self {
        self.op(ContentStreamOp::SetStrokeColorRgb(r, g, b))
    }

    /// Stroke a rectangle outline.
    pub fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, line_width: f64) -> &mut Self {
        self.op(ContentStreamOp::SetLineWidth(line_width))
            .op(ContentStreamOp::Rectangle(x, y, width, height))
            .op(ContentStreamOp::Stroke)
    }

    /// Fill a rectangle.
    pub fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        self.op(ContentStreamOp::Rectangle(x, y, width, height))
            .op(ContentStreamOp::Fill)
    }

    /// Stroke a straight line.
    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, line_width: f64) -> &mut Self {
        self.op(ContentStreamOp::SetLineWidth(line_width))
            .op(ContentStreamOp::MoveTo(x1, y1))
            .op(ContentStreamOp::LineTo(x2, y2))
            .op(ContentStreamOp::Stroke)
    }

    /// Whether no operators were added.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Render all operators, one per line.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &self.ops {
            write_op(&mut out, op);
            out.push(b'\n');
        }
        out
    }
}

fn nums(out: &mut Vec<u8>, values: &[f64], operator: &str) {
    for v in values {
        out.extend_from_slice(format_real(*v).as_bytes());
        out.push(b' ');
    }
    out.extend_from_slice(operator.as_bytes());
}

fn write_op(out: &mut Vec<u8>, op: &ContentStreamOp) {
    match op {
        ContentStreamOp::SaveState => out.push(b'q'),
        ContentStreamOp::RestoreState => out.push(b'Q'),
        ContentStreamOp::BeginText => out.extend_from_slice(b"BT"),
        ContentStreamOp::EndText => out.extend_from_slice(b"ET"),
        ContentStreamOp::SetFont(name, size) => {
            out.push(b'/');
            out.extend_from_slice(name.as_bytes());
            out.push(b' ');
            nums(out, &[*size], "Tf");
        },
        ContentStreamOp::MoveText(x, y) => nums(out, &[*x, *y], "Td"),
        ContentStreamOp::ShowText(text) => {
            out.push(b'(');
            for byte in encode_winansi(text) {
                match byte {
                    b'(' | b')' | b'\\' => out.extend_from_slice(&[b'\\', byte]),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    b'\n' => out.extend_from_slice(b"\\n"),
                    _ => out.push(byte),
                }
            }
            out.extend_from_slice(b") Tj");
        },
        ContentStreamOp::SetFillColorRgb(r, g, b) => nums(out, &[*r, *g, *b], "rg"),
        ContentStreamOp::SetStrokeColorRgb(r, g, b) => nums(out, &[*r, *g, *b], "RG"),
        ContentStreamOp::SetLineWidth(w) => nums(out, &[*w], "w"),
        ContentStreamOp::Rectangle(x, y, w, h) => nums(out, &[*x, *y, *w, *h], "re"),
        ContentStreamOp::MoveTo(x, y) => nums(out, &[*x, *y], "m"),
        ContentStreamOp::LineTo(x, y) => nums(out, &[*x, *y], "l"),
        ContentStreamOp::Stroke => out.push(b'S'),
        ContentStreamOp::Fill => out.push(b'f'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_block() {
        let mut b = ContentStreamBuilder::new();
        b.text("F1", 9.0, 36.0, 10.5, "Protocol NS-1");
        assert_eq!(
            String::from_utf8(b.build()).unwrap(),
            "BT\n/F1 9 Tf\n36 10.5 Td\n(Protocol NS-1) Tj\nET\n"
        );
    }

    #[test]
    fn test_text_is_escaped_and_winansi() {
        let mut b = ContentStreamBuilder::new();
        b.op(ContentStreamOp::ShowText("a(b) \u{e9}\u{20ac}".to_string()));
        let out = b.build();
        assert_eq!(out, b"(a\\(b\\) \xE9\x80) Tj\n".to_vec());
    }

    #[test]
    fn test_shapes() {
        let mut b = ContentStreamBuilder::new();
        b.save_state()
            .stroke_rgb(0.2, 0.2, 0.2)
            .stroke_rect(0.0, 0.0, 100.0, 50.0, 0.75)
            .restore_state();
        assert_eq!(
            String::from_utf8(b.build()).unwrap(),
            "q\n0.2 0.2 0.2 RG\n0.75 w\n0 0 100 50 re\nS\nQ\n"
        );
    }

    #[test]
    fn test_empty_builder() {
        let b = ContentStreamBuilder::new();
        assert!(b.is_empty());
        assert!(b.build().is_empty());
    }
}
