//! External interfaces: symbol resolution and per-record value access.
//!
//! The caller supplies a [`Resolver`] (symbol table: identifier name to
//! typed field or constant) at compile time and a [`ValueSource`] (field
//! accessor for the current record) at evaluation time. Both are invoked
//! synchronously from the calling thread.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::DataType;
use crate::value::Value;

/// Opaque field identifier chosen by the resolver; passed back verbatim to
/// the value source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an identifier name resolves to.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: FieldId,
    pub data_type: DataType,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone)]
pub enum SymbolKind {
    /// A record field; values come from the [`ValueSource`] per record.
    Field,
    /// A constant; the value is materialised at compile time.
    Const(Value),
}

impl Symbol {
    pub fn field(id: FieldId, data_type: DataType) -> Symbol {
        Symbol {
            id,
            data_type,
            kind: SymbolKind::Field,
        }
    }

    pub fn constant(id: FieldId, value: Value) -> Symbol {
        Symbol {
            id,
            data_type: value.data_type(),
            kind: SymbolKind::Const(value),
        }
    }
}

/// Caller-supplied symbol table lookup.
pub trait Resolver {
    /// Resolves an identifier name. `None` means the name is unknown.
    /// Multi-word identifiers arrive with single spaces between words.
    fn resolve(&self, name: &str) -> Option<Symbol>;
}

/// Result of one field fetch.
#[derive(Debug, Clone)]
pub enum Fetch {
    /// A value, and it is the last one for this field.
    Value(Value),
    /// A value, and more are available.
    More(Value),
    /// No value. On the first (reset) fetch this means the field is absent
    /// from the record.
    Absent,
}

/// Caller-supplied per-record field accessor.
///
/// The evaluator fetches each field occurrence with `reset = true` once,
/// then keeps fetching while [`Fetch::More`] is returned. The source is
/// expected to capture the record being evaluated.
pub trait ValueSource {
    fn field(&mut self, id: FieldId, reset: bool) -> Fetch;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_symbol_carries_its_type() {
        let sym = Symbol::constant(FieldId(3), Value::UInt(80));
        assert_eq!(sym.data_type, DataType::UINT);
        assert!(matches!(sym.kind, SymbolKind::Const(Value::UInt(80))));
    }
}
