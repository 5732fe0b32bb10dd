//! Ordered diagnostics with source spans.
//!
//! Every compilation phase appends [`Diagnostic`]s in the order problems are
//! found; the evaluator only ever appends [`DiagCode::Internal`] or
//! [`DiagCode::DivisionByZero`]. Spans are half-open byte ranges into the
//! original expression text; 1-based line/column [`Location`]s are derived
//! on demand.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open byte range into the filter expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    /// Smallest span covering both.
    pub fn join(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// 1-based line/column region corresponding to a [`Span`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub first_line: u32,
    pub last_line: u32,
    pub first_col: u32,
    pub last_col: u32,
}

/// Computes the line/column region of `span` within `source`.
pub fn locate(source: &str, span: Span) -> Location {
    let pos = |offset: usize| -> (u32, u32) {
        let offset = offset.min(source.len());
        let before = &source.as_bytes()[..offset];
        let line = before.iter().filter(|b| **b == b'\n').count() as u32 + 1;
        let line_start = before.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
        (line, (offset - line_start) as u32 + 1)
    };
    let (first_line, first_col) = pos(span.start);
    let (last_line, last_col) = pos(span.end);
    Location {
        first_line,
        last_line,
        first_col,
        last_col,
    }
}

/// Diagnostic category, mirroring the error taxonomy of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagCode {
    Lex,
    Parse,
    UnknownIdentifier,
    Type,
    Ambiguous,
    List,
    DivisionByZero,
    Internal,
}

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagCode::Lex => "lex",
            DiagCode::Parse => "parse",
            DiagCode::UnknownIdentifier => "unknown-identifier",
            DiagCode::Type => "type",
            DiagCode::Ambiguous => "ambiguous",
            DiagCode::List => "list",
            DiagCode::DivisionByZero => "division-by-zero",
            DiagCode::Internal => "internal",
        };
        write!(f, "{name}")
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagCode,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(code: DiagCode, message: impl Into<String>, span: Option<Span>) -> Diagnostic {
        Diagnostic {
            code,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.code, self.message)?;
        if let Some(span) = self.span {
            write!(f, " at {span}")?;
        }
        Ok(())
    }
}

/// Ordered list of diagnostics owned by a filter.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn report(&mut self, code: DiagCode, message: impl Into<String>, span: Option<Span>) {
        self.push(Diagnostic::new(code, message, span));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Diagnostic> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_join() {
        let a = Span::new(3, 7);
        let b = Span::new(5, 12);
        assert_eq!(a.join(b), Span::new(3, 12));
        assert_eq!(b.join(a), Span::new(3, 12));
    }

    #[test]
    fn locate_single_line() {
        let loc = locate("ip 127.0.0.1", Span::new(3, 12));
        assert_eq!(
            loc,
            Location {
                first_line: 1,
                last_line: 1,
                first_col: 4,
                last_col: 13,
            }
        );
    }

    #[test]
    fn locate_across_lines() {
        let loc = locate("a and\nb", Span::new(2, 7));
        assert_eq!(loc.first_line, 1);
        assert_eq!(loc.first_col, 3);
        assert_eq!(loc.last_line, 2);
        assert_eq!(loc.last_col, 2);
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::new(DiagCode::Lex, "unterminated string literal", Some(Span::new(4, 9)));
        assert_eq!(
            d.to_string(),
            "error[lex]: unterminated string literal at 4..9"
        );
    }

    #[test]
    fn diagnostics_preserve_order() {
        let mut diags = Diagnostics::new();
        diags.report(DiagCode::UnknownIdentifier, "unknown identifier 'a'", None);
        diags.report(DiagCode::UnknownIdentifier, "unknown identifier 'b'", None);
        let messages: Vec<_> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["unknown identifier 'a'", "unknown identifier 'b'"]
        );
    }

    #[test]
    fn serde_roundtrip() {
        let d = Diagnostic::new(DiagCode::Type, "no matching operator", Some(Span::new(0, 3)));
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
