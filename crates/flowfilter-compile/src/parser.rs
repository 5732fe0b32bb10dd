//! Expression parser.
//!
//! Precedence climbing with one function per level, lowest binding first:
//!
//! ```text
//! or < and < not < comparison < containment (in, contains)
//!    < additive < multiplicative < bitwise or/xor < bitwise and < unary
//! ```
//!
//! Comparison and containment do not chain. A complete operand followed
//! directly by the start of another operand is an implicit comparison
//! (`ip 127.0.0.1`), parsed as the `matches` opcode at the comparison
//! level.

use thiserror::Error;
use tracing::debug;

use flowfilter_core::diag::Span;
use flowfilter_core::ops::{BinaryOp, UnaryOp};
use flowfilter_core::value::Value;

use crate::ast::{Ast, ExprKind, NodeId};
use crate::token::{Token, TokenKind};

/// Syntax error; carries the span of the offending token.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected {found}")]
    Unexpected { found: String, span: Span },

    #[error("expected {expected}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
        span: Span,
    },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Unexpected { span, .. } | ParseError::Expected { span, .. } => *span,
        }
    }
}

/// Parses a token stream (as produced by [`crate::lexer::tokenize`],
/// terminated by `Eof`) into an untyped AST.
pub fn parse(tokens: &[Token]) -> Result<Ast, ParseError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        ast: Ast::new(),
    };
    let root = parser.or_expr()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(ParseError::Unexpected {
            found: trailing.kind.to_string(),
            span: trailing.span,
        });
    }
    parser.ast.set_root(root);
    debug!(nodes = parser.ast.len(), "parsed filter expression");
    Ok(parser.ast)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ast: Ast,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &'a Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> &'a Token {
        let token = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let span = self.ast.node(lhs).span.join(self.ast.node(rhs).span);
        self.ast.push(ExprKind::Binary { op, lhs, rhs }, span)
    }

    fn or_expr(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.and_expr()?;
        while matches!(self.peek().kind, TokenKind::KwOr | TokenKind::PipePipe) {
            self.bump();
            let rhs = self.and_expr()?;
            lhs = self.binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.not_expr()?;
        while matches!(self.peek().kind, TokenKind::KwAnd | TokenKind::AmpAmp) {
            self.bump();
            let rhs = self.not_expr()?;
            lhs = self.binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<NodeId, ParseError> {
        if matches!(self.peek().kind, TokenKind::KwNot | TokenKind::Bang) {
            let not_span = self.bump().span;
            let operand = self.not_expr()?;
            let span = not_span.join(self.ast.node(operand).span);
            return Ok(self.ast.push(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand,
                },
                span,
            ));
        }
        self.cmp_expr()
    }

    fn cmp_expr(&mut self) -> Result<NodeId, ParseError> {
        let lhs = self.ranged_expr()?;
        let op = match self.peek().kind {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::BangEq => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let rhs = self.ranged_expr()?;
            return Ok(self.binary(op, lhs, rhs));
        }
        // Implicit comparison of juxtaposed operands.
        if self.peek().kind.starts_operand() {
            let rhs = self.ranged_expr()?;
            return Ok(self.binary(BinaryOp::Matches, lhs, rhs));
        }
        Ok(lhs)
    }

    fn ranged_expr(&mut self) -> Result<NodeId, ParseError> {
        let lhs = self.addsub_expr()?;
        let op = match self.peek().kind {
            TokenKind::KwIn => Some(BinaryOp::In),
            TokenKind::KwContains => Some(BinaryOp::Contains),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let rhs = self.addsub_expr()?;
            return Ok(self.binary(op, lhs, rhs));
        }
        Ok(lhs)
    }

    fn addsub_expr(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.muldiv_expr()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.muldiv_expr()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn muldiv_expr(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.bitor_expr()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.bitor_expr()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bitor_expr(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.bitand_expr()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Pipe => BinaryOp::BitOr,
                TokenKind::Caret => BinaryOp::BitXor,
                _ => break,
            };
            self.bump();
            let rhs = self.bitand_expr()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bitand_expr(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.unary_expr()?;
        while self.peek().kind == TokenKind::Amp {
            self.bump();
            let rhs = self.unary_expr()?;
            lhs = self.binary(BinaryOp::BitAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<NodeId, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let op_span = self.bump().span;
            let operand = self.unary_expr()?;
            let span = op_span.join(self.ast.node(operand).span);
            return Ok(self.ast.push(ExprKind::Unary { op, operand }, span));
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<NodeId, ParseError> {
        let token = self.peek();
        let span = token.span;
        match &token.kind {
            TokenKind::UInt(u) => {
                let v = Value::UInt(*u);
                self.bump();
                Ok(self.ast.push(ExprKind::Const(v), span))
            }
            TokenKind::Float(x) => {
                let v = Value::Float(*x);
                self.bump();
                Ok(self.ast.push(ExprKind::Const(v), span))
            }
            TokenKind::Str(s) => {
                let v = Value::str(s.clone());
                self.bump();
                Ok(self.ast.push(ExprKind::Const(v), span))
            }
            TokenKind::Ip(ip) => {
                let v = Value::Ip(*ip);
                self.bump();
                Ok(self.ast.push(ExprKind::Const(v), span))
            }
            TokenKind::Mac(mac) => {
                let v = Value::Mac(*mac);
                self.bump();
                Ok(self.ast.push(ExprKind::Const(v), span))
            }
            TokenKind::Ident(name) => {
                let kind = ExprKind::Ident {
                    name: name.clone().into_boxed_str(),
                    field: None,
                };
                self.bump();
                Ok(self.ast.push(kind, span))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.or_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.list_expr(),
            _ => Err(ParseError::Expected {
                expected: "an operand",
                found: token.kind.to_string(),
                span,
            }),
        }
    }

    fn list_expr(&mut self) -> Result<NodeId, ParseError> {
        let open = self.bump().span;
        let mut items = smallvec::SmallVec::new();
        if self.peek().kind != TokenKind::RBracket {
            loop {
                items.push(self.or_expr()?);
                if self.peek().kind != TokenKind::Comma {
                    break;
                }
                self.bump();
            }
        }
        let close = self.expect(TokenKind::RBracket, "']'")?;
        Ok(self.ast.push(ExprKind::List { items }, open.join(close)))
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<Span, ParseError> {
        let token = self.peek();
        if token.kind == kind {
            let span = token.span;
            self.bump();
            Ok(span)
        } else {
            Err(ParseError::Expected {
                expected,
                found: token.kind.to_string(),
                span: token.span,
            })
        }
    }
}
