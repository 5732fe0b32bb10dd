//! Token model for the filter expression language.

use std::fmt;

use flowfilter_core::diag::Span;
use flowfilter_core::value::{IpAddr, MacAddr};

/// One lexed token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    UInt(u64),
    Float(f64),
    Str(String),
    Ip(IpAddr),
    Mac(MacAddr),
    /// Identifier name; multi-word names carry single interior spaces.
    Ident(String),

    KwAnd,
    KwOr,
    KwNot,
    KwIn,
    KwContains,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Caret,
    Tilde,
    Bang,
    EqEq,
    BangEq,
    Lt,
    Gt,
    Le,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,

    Eof,
}

impl TokenKind {
    /// True if this token can begin an operand (used for the implicit
    /// comparison of juxtaposed operands).
    pub fn starts_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::UInt(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Ip(_)
                | TokenKind::Mac(_)
                | TokenKind::Ident(_)
                | TokenKind::LParen
                | TokenKind::LBracket
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::UInt(u) => write!(f, "number {u}"),
            TokenKind::Float(x) => write!(f, "number {x}"),
            TokenKind::Str(s) => write!(f, "string {s:?}"),
            TokenKind::Ip(ip) => write!(f, "ip address {ip}"),
            TokenKind::Mac(mac) => write!(f, "mac address {mac}"),
            TokenKind::Ident(name) => write!(f, "identifier '{name}'"),
            TokenKind::KwAnd => write!(f, "'and'"),
            TokenKind::KwOr => write!(f, "'or'"),
            TokenKind::KwNot => write!(f, "'not'"),
            TokenKind::KwIn => write!(f, "'in'"),
            TokenKind::KwContains => write!(f, "'contains'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Percent => write!(f, "'%'"),
            TokenKind::Amp => write!(f, "'&'"),
            TokenKind::AmpAmp => write!(f, "'&&'"),
            TokenKind::Pipe => write!(f, "'|'"),
            TokenKind::PipePipe => write!(f, "'||'"),
            TokenKind::Caret => write!(f, "'^'"),
            TokenKind::Tilde => write!(f, "'~'"),
            TokenKind::Bang => write!(f, "'!'"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::BangEq => write!(f, "'!='"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Le => write!(f, "'<='"),
            TokenKind::Ge => write!(f, "'>='"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Eof => write!(f, "end of expression"),
        }
    }
}
