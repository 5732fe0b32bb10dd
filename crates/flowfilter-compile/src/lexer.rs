//! Hand-written lexer for filter expressions.
//!
//! Works on raw bytes (UTF-8-agnostic: multi-byte characters are only legal
//! inside string literals). Number-like character runs are scanned maximally
//! and then classified as MAC address, IP address, integer or float, so the
//! grammar never needs lookahead to tell `1.5` from `1.2.3.4` or `f::a`
//! from an identifier.
//!
//! Identifiers may span several words (`src ip`). The lexer collects the
//! run of adjacent plain words and asks the resolver for the longest
//! concatenation that names a known symbol; if none resolves, the single
//! first word is emitted and the analyser reports it later.

use thiserror::Error;
use tracing::debug;

use flowfilter_core::diag::Span;
use flowfilter_core::symbol::Resolver;
use flowfilter_core::value::{IpParseError, MacParseError};

use crate::token::{Token, TokenKind};

/// Lexical error. Carries the half-open byte span of the offending text.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char, span: Span },

    #[error("unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: String, span: Span },

    #[error("invalid ip address '{text}': {source}")]
    InvalidIp {
        text: String,
        #[source]
        source: IpParseError,
        span: Span,
    },

    #[error("invalid mac address '{text}': {source}")]
    InvalidMac {
        text: String,
        #[source]
        source: MacParseError,
        span: Span,
    },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::UnterminatedString { span, .. }
            | LexError::InvalidNumber { span, .. }
            | LexError::InvalidIp { span, .. }
            | LexError::InvalidMac { span, .. } => *span,
        }
    }
}

/// Lexes the whole expression. The resolver is consulted for multi-word
/// identifier resolution only.
pub fn tokenize(src: &str, resolver: &dyn Resolver) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        src,
        bytes: src.as_bytes(),
        pos: 0,
        resolver,
    };
    let tokens = lexer.run()?;
    debug!(tokens = tokens.len(), "lexed filter expression");
    Ok(tokens)
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    resolver: &'a dyn Resolver,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_numberlike_byte(b: u8) -> bool {
    b.is_ascii_hexdigit() || b == b'.' || b == b':'
}

fn keyword(word: &str) -> Option<TokenKind> {
    match word {
        "and" => Some(TokenKind::KwAnd),
        "or" => Some(TokenKind::KwOr),
        "not" => Some(TokenKind::KwNot),
        "in" => Some(TokenKind::KwIn),
        "contains" => Some(TokenKind::KwContains),
        _ => None,
    }
}

impl<'a> Lexer<'a> {
    fn run(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'"' => tokens.push(self.string()?),
                b'0'..=b'9' => tokens.push(self.numberlike()?),
                b':' => {
                    if self.bytes.get(self.pos + 1) == Some(&b':') {
                        tokens.push(self.numberlike()?);
                    } else {
                        return Err(self.unexpected());
                    }
                }
                _ if is_word_start(b) => tokens.push(self.word()?),
                _ => tokens.push(self.punct()?),
            }
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(self.src.len(), self.src.len()),
        });
        Ok(tokens)
    }

    fn unexpected(&self) -> LexError {
        let ch = self.src[self.pos..].chars().next().unwrap_or('\u{fffd}');
        LexError::UnexpectedChar {
            ch,
            span: Span::new(self.pos, self.pos + ch.len_utf8()),
        }
    }

    fn punct(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let two = |a: u8, b: u8| -> bool {
            self.bytes[start] == a && self.bytes.get(start + 1) == Some(&b)
        };
        let (kind, len) = if two(b'&', b'&') {
            (TokenKind::AmpAmp, 2)
        } else if two(b'|', b'|') {
            (TokenKind::PipePipe, 2)
        } else if two(b'=', b'=') {
            (TokenKind::EqEq, 2)
        } else if two(b'!', b'=') {
            (TokenKind::BangEq, 2)
        } else if two(b'<', b'=') {
            (TokenKind::Le, 2)
        } else if two(b'>', b'=') {
            (TokenKind::Ge, 2)
        } else {
            let kind = match self.bytes[start] {
                b'+' => TokenKind::Plus,
                b'-' => TokenKind::Minus,
                b'*' => TokenKind::Star,
                b'/' => TokenKind::Slash,
                b'%' => TokenKind::Percent,
                b'&' => TokenKind::Amp,
                b'|' => TokenKind::Pipe,
                b'^' => TokenKind::Caret,
                b'~' => TokenKind::Tilde,
                b'!' => TokenKind::Bang,
                b'<' => TokenKind::Lt,
                b'>' => TokenKind::Gt,
                b'(' => TokenKind::LParen,
                b')' => TokenKind::RParen,
                b'[' => TokenKind::LBracket,
                b']' => TokenKind::RBracket,
                b',' => TokenKind::Comma,
                _ => return Err(self.unexpected()),
            };
            (kind, 1)
        };
        self.pos = start + len;
        Ok(Token {
            kind,
            span: Span::new(start, self.pos),
        })
    }

    fn string(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        let mut chunk_start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                None => {
                    return Err(LexError::UnterminatedString {
                        span: Span::new(start, self.pos),
                    })
                }
                Some(b'"') => {
                    text.push_str(&self.src[chunk_start..self.pos]);
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    text.push_str(&self.src[chunk_start..self.pos]);
                    match self.bytes.get(self.pos + 1) {
                        None => {
                            return Err(LexError::UnterminatedString {
                                span: Span::new(start, self.pos + 1),
                            })
                        }
                        Some(b'n') => {
                            text.push('\n');
                            self.pos += 2;
                        }
                        Some(b't') => {
                            text.push('\t');
                            self.pos += 2;
                        }
                        Some(b'r') => {
                            text.push('\r');
                            self.pos += 2;
                        }
                        Some(&c) if c.is_ascii() => {
                            text.push(c as char);
                            self.pos += 2;
                        }
                        // A multi-byte character follows; keep the backslash
                        // and let the plain copy path pick the character up.
                        Some(_) => {
                            text.push('\\');
                            self.pos += 1;
                        }
                    }
                    chunk_start = self.pos;
                }
                Some(_) => self.pos += 1,
            }
        }
        Ok(Token {
            kind: TokenKind::Str(text),
            span: Span::new(start, self.pos),
        })
    }

    /// Scans a maximal run of number-like characters plus an optional
    /// `/prefix`, then classifies it.
    fn numberlike(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(|b| is_numberlike_byte(*b)) {
            self.pos += 1;
        }
        let body = &self.src[start..self.pos];

        // A '/prefix' only belongs to the literal when the body is shaped
        // like an address; '8/2' stays a division.
        let addr_shaped = body.contains(':') || body.bytes().filter(|b| *b == b'.').count() == 3;
        if addr_shaped && self.bytes.get(self.pos) == Some(&b'/') {
            let digits_start = self.pos + 1;
            let mut end = digits_start;
            while self.bytes.get(end).is_some_and(|b| b.is_ascii_digit()) {
                end += 1;
            }
            if end > digits_start {
                self.pos = end;
            }
        }

        let text = &self.src[start..self.pos];
        let span = Span::new(start, self.pos);

        if text.contains(':') {
            if is_mac_shaped(text) {
                return match text.parse() {
                    Ok(mac) => Ok(Token {
                        kind: TokenKind::Mac(mac),
                        span,
                    }),
                    Err(source) => Err(LexError::InvalidMac {
                        text: text.to_string(),
                        source,
                        span,
                    }),
                };
            }
            return match text.parse() {
                Ok(ip) => Ok(Token {
                    kind: TokenKind::Ip(ip),
                    span,
                }),
                Err(source) => Err(LexError::InvalidIp {
                    text: text.to_string(),
                    source,
                    span,
                }),
            };
        }

        if body.bytes().filter(|b| *b == b'.').count() == 3
            && body.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        {
            return match text.parse() {
                Ok(ip) => Ok(Token {
                    kind: TokenKind::Ip(ip),
                    span,
                }),
                Err(source) => Err(LexError::InvalidIp {
                    text: text.to_string(),
                    source,
                    span,
                }),
            };
        }

        if text.bytes().all(|b| b.is_ascii_digit()) {
            return match text.parse() {
                Ok(u) => Ok(Token {
                    kind: TokenKind::UInt(u),
                    span,
                }),
                Err(_) => Err(LexError::InvalidNumber {
                    text: text.to_string(),
                    span,
                }),
            };
        }

        match text.parse() {
            Ok(x) => Ok(Token {
                kind: TokenKind::Float(x),
                span,
            }),
            Err(_) => Err(LexError::InvalidNumber {
                text: text.to_string(),
                span,
            }),
        }
    }

    /// Lexes a word: keyword, or (possibly multi-word) identifier.
    fn word(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(|b| is_word_byte(*b)) {
            self.pos += 1;
        }
        let word = &self.src[start..self.pos];

        // An all-hex word glued to a ':' is an IPv6 literal ('aabb:ccdd::').
        if word.bytes().all(|b| b.is_ascii_hexdigit())
            && self.bytes.get(self.pos) == Some(&b':')
        {
            self.pos = start;
            return self.numberlike();
        }

        if let Some(kind) = keyword(word) {
            return Ok(Token {
                kind,
                span: Span::new(start, self.pos),
            });
        }

        Ok(self.identifier(start, self.pos))
    }

    /// Resolves the longest run of adjacent words naming a known symbol.
    fn identifier(&mut self, first_start: usize, first_end: usize) -> Token {
        let mut words: Vec<(usize, usize)> = vec![(first_start, first_end)];
        let mut pos = first_end;
        loop {
            let mut ws = pos;
            while self.bytes.get(ws).is_some_and(|b| *b == b' ' || *b == b'\t') {
                ws += 1;
            }
            if ws == pos || !self.bytes.get(ws).is_some_and(|b| is_word_start(*b)) {
                break;
            }
            let mut we = ws;
            while self.bytes.get(we).is_some_and(|b| is_word_byte(*b)) {
                we += 1;
            }
            let word = &self.src[ws..we];
            if keyword(word).is_some() {
                break;
            }
            // The next word may open an IPv6 literal; leave it alone.
            if word.bytes().all(|b| b.is_ascii_hexdigit())
                && self.bytes.get(we) == Some(&b':')
            {
                break;
            }
            words.push((ws, we));
            pos = we;
        }

        for take in (1..=words.len()).rev() {
            let name = words[..take]
                .iter()
                .map(|(s, e)| &self.src[*s..*e])
                .collect::<Vec<_>>()
                .join(" ");
            if self.resolver.resolve(&name).is_some() {
                let end = words[take - 1].1;
                self.pos = end;
                return Token {
                    kind: TokenKind::Ident(name),
                    span: Span::new(first_start, end),
                };
            }
        }

        self.pos = first_end;
        Token {
            kind: TokenKind::Ident(self.src[first_start..first_end].to_string()),
            span: Span::new(first_start, first_end),
        }
    }
}

fn is_mac_shaped(text: &str) -> bool {
    let mut groups = 0;
    for group in text.split(':') {
        if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }
        groups += 1;
    }
    groups == 6
}
