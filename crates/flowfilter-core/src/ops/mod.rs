//! Operator registry.
//!
//! All operator and conversion semantics live in an [`OpTable`]: a flat list
//! of entries scanned in insertion order. The semantic analyser resolves
//! every operator use against the table (it never hard-codes semantics) and
//! the evaluator invokes the bound entry's function pointer.
//!
//! User extensions are appended after the built-ins; when two candidates
//! match with equal coercion cost and the *same* signature, the later entry
//! wins, so extensions shadow built-ins. Equal-cost candidates with
//! different signatures are ambiguous.

mod builtin;

use std::fmt;

use thiserror::Error;

use crate::types::DataType;
use crate::value::Value;

/// Unary operator opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation `-`.
    Neg,
    /// Bitwise complement `~`.
    BitNot,
    /// Logical negation `not` / `!`.
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = match self {
            UnaryOp::Neg => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::Not => "not",
        };
        write!(f, "{sym}")
    }
}

/// Binary operator opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    Contains,
    /// Implicit comparison from operand juxtaposition (`ip 127.0.0.1`).
    Matches,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Contains => "contains",
            BinaryOp::Matches => "matches",
        };
        write!(f, "{sym}")
    }
}

/// Failure of an operator or conversion application.
#[derive(Debug, Clone, Error)]
pub enum OpError {
    #[error("division by zero")]
    DivisionByZero,

    /// A runtime conversion did not apply to the actual value (e.g. a string
    /// field that does not parse as an IP address). Soft: the predicate
    /// attempt evaluates false.
    #[error("cannot convert {value} to {target}")]
    Conversion { value: String, target: DataType },

    /// The value shapes did not match the entry's declared types. Impossible
    /// after successful analysis.
    #[error("operand type mismatch in operator application")]
    TypeMismatch,
}

pub type UnaryFn = fn(&Value) -> Result<Value, OpError>;
pub type BinaryFn = fn(&Value, &Value) -> Result<Value, OpError>;

/// One registry entry.
#[derive(Debug, Clone)]
pub enum OpEntry {
    Unary {
        op: UnaryOp,
        operand: DataType,
        result: DataType,
        apply: UnaryFn,
    },
    Binary {
        op: BinaryOp,
        lhs: DataType,
        rhs: DataType,
        result: DataType,
        apply: BinaryFn,
    },
    /// A conversion. Implicit casts participate in overload resolution with
    /// the given cost; explicit-only casts (cost ignored) are applied only
    /// where the analyser asks for a specific target, such as the
    /// truthiness cast at the expression root.
    Cast {
        from: DataType,
        to: DataType,
        cost: u32,
        implicit: bool,
        apply: UnaryFn,
    },
    /// Compile-time construction of a custom artifact from a constant.
    Constructor {
        from: DataType,
        to: DataType,
        apply: UnaryFn,
    },
}

/// Index of an entry within its [`OpTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpRef(pub usize);

/// Outcome of binary overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryMatch {
    pub entry: OpRef,
    pub lhs_cast: Option<OpRef>,
    pub rhs_cast: Option<OpRef>,
    pub result: DataType,
}

/// Outcome of unary overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnaryMatch {
    pub entry: OpRef,
    pub operand_cast: Option<OpRef>,
    pub result: DataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no matching operator")]
    NoMatch,
    #[error("ambiguous operator")]
    Ambiguous,
}

/// The per-filter operator table.
#[derive(Debug, Clone)]
pub struct OpTable {
    entries: Vec<OpEntry>,
}

impl OpTable {
    /// A table holding only the built-in operators.
    pub fn with_builtins() -> OpTable {
        OpTable {
            entries: builtin::entries(),
        }
    }

    /// An empty table (tests and fully custom setups).
    pub fn empty() -> OpTable {
        OpTable {
            entries: Vec::new(),
        }
    }

    /// Appends user entries; they shadow earlier entries on signature ties.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = OpEntry>) {
        self.entries.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, r: OpRef) -> &OpEntry {
        &self.entries[r.0]
    }

    /// Conversion from `from` to `to`: zero-cost identity, or the latest
    /// implicit cast entry. `None` if no implicit conversion exists.
    pub fn implicit_conversion(&self, from: DataType, to: DataType) -> Option<(u32, Option<OpRef>)> {
        if from == to {
            return Some((0, None));
        }
        for (i, e) in self.entries.iter().enumerate().rev() {
            if let OpEntry::Cast {
                from: f,
                to: t,
                cost,
                implicit: true,
                ..
            } = e
            {
                if *f == from && *t == to {
                    return Some((*cost, Some(OpRef(i))));
                }
            }
        }
        None
    }

    /// Any cast (implicit or explicit) from `from` to `to`, latest wins.
    pub fn cast(&self, from: DataType, to: DataType) -> Option<OpRef> {
        self.entries.iter().enumerate().rev().find_map(|(i, e)| {
            matches!(e, OpEntry::Cast { from: f, to: t, .. } if *f == from && *t == to)
                .then_some(OpRef(i))
        })
    }

    /// The latest constructor taking `from`, if any.
    pub fn constructor(&self, from: DataType) -> Option<(OpRef, DataType)> {
        self.entries.iter().enumerate().rev().find_map(|(i, e)| match e {
            OpEntry::Constructor { from: f, to, .. } if *f == from => Some((OpRef(i), *to)),
            _ => None,
        })
    }

    /// Resolves a binary operator over the given operand types, choosing the
    /// entry with minimum total coercion cost.
    pub fn resolve_binary(
        &self,
        op: BinaryOp,
        lhs: DataType,
        rhs: DataType,
    ) -> Result<BinaryMatch, ResolveError> {
        let mut best: Option<(u32, (DataType, DataType), BinaryMatch)> = None;
        let mut tied = false;
        for (i, e) in self.entries.iter().enumerate() {
            let OpEntry::Binary {
                op: entry_op,
                lhs: el,
                rhs: er,
                result,
                ..
            } = e
            else {
                continue;
            };
            if *entry_op != op {
                continue;
            }
            let Some((lhs_cost, lhs_cast)) = self.implicit_conversion(lhs, *el) else {
                continue;
            };
            let Some((rhs_cost, rhs_cast)) = self.implicit_conversion(rhs, *er) else {
                continue;
            };
            let cost = lhs_cost + rhs_cost;
            let sig = (*el, *er);
            let m = BinaryMatch {
                entry: OpRef(i),
                lhs_cast,
                rhs_cast,
                result: *result,
            };
            match &best {
                Some((best_cost, _, _)) if cost > *best_cost => {}
                Some((best_cost, best_sig, _)) if cost == *best_cost => {
                    if *best_sig == sig {
                        // Same signature later in the table: shadowing.
                        best = Some((cost, sig, m));
                    } else {
                        tied = true;
                    }
                }
                _ => {
                    best = Some((cost, sig, m));
                    tied = false;
                }
            }
        }
        match best {
            None => Err(ResolveError::NoMatch),
            Some(_) if tied => Err(ResolveError::Ambiguous),
            Some((_, _, m)) => Ok(m),
        }
    }

    /// Resolves a unary operator over the given operand type.
    pub fn resolve_unary(
        &self,
        op: UnaryOp,
        operand: DataType,
    ) -> Result<UnaryMatch, ResolveError> {
        let mut best: Option<(u32, DataType, UnaryMatch)> = None;
        let mut tied = false;
        for (i, e) in self.entries.iter().enumerate() {
            let OpEntry::Unary {
                op: entry_op,
                operand: eo,
                result,
                ..
            } = e
            else {
                continue;
            };
            if *entry_op != op {
                continue;
            }
            let Some((cost, operand_cast)) = self.implicit_conversion(operand, *eo) else {
                continue;
            };
            let m = UnaryMatch {
                entry: OpRef(i),
                operand_cast,
                result: *result,
            };
            match &best {
                Some((best_cost, _, _)) if cost > *best_cost => {}
                Some((best_cost, best_sig, _)) if cost == *best_cost => {
                    if *best_sig == *eo {
                        best = Some((cost, *eo, m));
                    } else {
                        tied = true;
                    }
                }
                _ => {
                    best = Some((cost, *eo, m));
                    tied = false;
                }
            }
        }
        match best {
            None => Err(ResolveError::NoMatch),
            Some(_) if tied => Err(ResolveError::Ambiguous),
            Some((_, _, m)) => Ok(m),
        }
    }
}
