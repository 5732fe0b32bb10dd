//! Flow-filter expression engine.
//!
//! Compiles filter expressions over typed record fields (addresses,
//! prefixes, MAC addresses, numbers, strings, flags and lists) and
//! evaluates them against records, one boolean per record.
//!
//! A [`Filter`] owns its operator table, compiled program and diagnostics.
//! The caller supplies a [`Resolver`] mapping identifier names to typed
//! fields or constants at compile time, and a [`ValueSource`] yielding
//! per-record field values (possibly several per field) at evaluation time:
//!
//! ```
//! use flowfilter::{Fetch, FieldId, Filter, Resolver, Symbol, Value, ValueSource};
//!
//! struct Schema;
//!
//! impl Resolver for Schema {
//!     fn resolve(&self, name: &str) -> Option<Symbol> {
//!         (name == "port").then(|| Symbol::field(FieldId(0), flowfilter::DataType::UINT))
//!     }
//! }
//!
//! struct Record(u64);
//!
//! impl ValueSource for Record {
//!     fn field(&mut self, _id: FieldId, _reset: bool) -> Fetch {
//!         Fetch::Value(Value::UInt(self.0))
//!     }
//! }
//!
//! let mut filter = Filter::new();
//! filter.compile("port == 443", &Schema).unwrap();
//! assert!(filter.evaluate(&mut Record(443)));
//! assert!(!filter.evaluate(&mut Record(80)));
//! ```
//!
//! Multi-valued fields have existential semantics: a predicate over such a
//! field holds when any of its values satisfies it, and `not` binds outside
//! that quantifier.

mod eval;

use thiserror::Error;
use tracing::debug;

use flowfilter_compile::{analyze, parse, tokenize};
use flowfilter_core::diag::{locate, Diagnostics};
use flowfilter_core::ops::OpTable;

pub use flowfilter_compile::{Ast, ExprKind, NodeId};
pub use flowfilter_core::{
    diag, ops, symbol, trie, types, value, BinaryOp, DataType, DiagCode, Diagnostic, Fetch,
    FieldId, IpAddr, IpTrie, IpVersion, Location, MacAddr, OpEntry, OpError, OpRef, Resolver,
    Span, Symbol, SymbolKind, TypeTag, UnaryOp, Value, ValueSource, TRIE_TYPE_ID,
};

/// Compilation failure; the full diagnostic list stays on the filter.
#[derive(Debug, Error)]
#[error("filter expression failed to compile with {errors} error(s)")]
pub struct CompileError {
    pub errors: usize,
}

/// A compiled (or compilable) filter instance.
#[derive(Debug)]
pub struct Filter {
    ops: OpTable,
    expr: String,
    program: Option<Ast>,
    diags: Diagnostics,
}

impl Filter {
    /// A fresh filter carrying the built-in operator table.
    pub fn new() -> Filter {
        Filter {
            ops: OpTable::with_builtins(),
            expr: String::new(),
            program: None,
            diags: Diagnostics::new(),
        }
    }

    /// Appends user operator entries (operators, casts, constructors).
    /// Extensions shadow built-ins with the same signature. Must be called
    /// before [`Filter::compile`]; already-compiled programs keep their
    /// existing bindings.
    pub fn extend_ops(&mut self, entries: impl IntoIterator<Item = OpEntry>) {
        self.ops.extend(entries);
    }

    /// Compiles `expr` against the caller's symbol table. On failure the
    /// ordered diagnostics are retained and any previous program is
    /// discarded.
    pub fn compile(&mut self, expr: &str, resolver: &dyn Resolver) -> Result<(), CompileError> {
        self.expr = expr.to_string();
        self.program = None;
        self.diags.clear();

        let tokens = match tokenize(expr, resolver) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.diags.report(DiagCode::Lex, e.to_string(), Some(e.span()));
                return Err(CompileError { errors: 1 });
            }
        };
        let mut ast = match parse(&tokens) {
            Ok(ast) => ast,
            Err(e) => {
                self.diags.report(DiagCode::Parse, e.to_string(), Some(e.span()));
                return Err(CompileError { errors: 1 });
            }
        };
        analyze(&mut ast, &self.ops, resolver, &mut self.diags);
        if !self.diags.is_empty() {
            return Err(CompileError {
                errors: self.diags.len(),
            });
        }
        debug!(expr, nodes = ast.len(), "filter compiled");
        self.program = Some(ast);
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.program.is_some()
    }

    /// Evaluates the compiled filter against one record, reading field
    /// values from `source`. Returns `false` (and records a diagnostic) on
    /// an uncompiled filter or a runtime error; it never panics on
    /// well-formed programs.
    pub fn evaluate(&mut self, source: &mut dyn ValueSource) -> bool {
        let Some(program) = &self.program else {
            self.diags.report(
                DiagCode::Internal,
                "evaluate called on a filter that was not compiled",
                None,
            );
            return false;
        };
        match eval::Evaluator::run(program, &self.ops, source) {
            Ok(matched) => matched,
            Err(eval::EvalError::Conversion) => false,
            Err(eval::EvalError::DivisionByZero { span }) => {
                self.diags
                    .report(DiagCode::DivisionByZero, "division by zero", Some(span));
                false
            }
            Err(eval::EvalError::Internal { message, span }) => {
                self.diags.report(DiagCode::Internal, message, Some(span));
                false
            }
        }
    }

    /// The compiled program, for inspection. `None` before a successful
    /// [`Filter::compile`].
    pub fn ast(&self) -> Option<&Ast> {
        self.program.as_ref()
    }

    /// All diagnostics recorded by the last compile and any evaluations
    /// since.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diags.as_slice()
    }

    pub fn error_count(&self) -> usize {
        self.diags.len()
    }

    pub fn error_message(&self, index: usize) -> Option<&str> {
        self.diags.get(index).map(|d| d.message.as_str())
    }

    /// Line/column location of the indexed diagnostic within the compiled
    /// expression text, if the diagnostic carries a span.
    pub fn error_location(&self, index: usize) -> Option<Location> {
        let span = self.diags.get(index)?.span?;
        Some(locate(&self.expr, span))
    }
}

impl Default for Filter {
    fn default() -> Filter {
        Filter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSymbols;

    impl Resolver for NoSymbols {
        fn resolve(&self, _name: &str) -> Option<Symbol> {
            None
        }
    }

    struct NoValues;

    impl ValueSource for NoValues {
        fn field(&mut self, _id: FieldId, _reset: bool) -> Fetch {
            Fetch::Absent
        }
    }

    #[test]
    fn evaluate_before_compile_is_false_with_internal_diagnostic() {
        let mut filter = Filter::new();
        assert!(!filter.evaluate(&mut NoValues));
        assert_eq!(filter.error_count(), 1);
        assert_eq!(filter.diagnostics()[0].code, DiagCode::Internal);
    }

    #[test]
    fn compile_failure_keeps_ordered_diagnostics() {
        let mut filter = Filter::new();
        let err = filter.compile("foo == bar", &NoSymbols).unwrap_err();
        assert_eq!(err.errors, 2);
        assert_eq!(filter.error_count(), 2);
        assert_eq!(
            filter.error_message(0),
            Some("unknown identifier 'foo'")
        );
        assert_eq!(
            filter.error_message(1),
            Some("unknown identifier 'bar'")
        );
        assert!(!filter.is_compiled());
    }

    #[test]
    fn error_location_is_one_based() {
        let mut filter = Filter::new();
        filter.compile("1 == foo", &NoSymbols).unwrap_err();
        let loc = filter.error_location(0).unwrap();
        assert_eq!(loc.first_line, 1);
        assert_eq!(loc.first_col, 6);
        assert_eq!(loc.last_col, 9);
    }

    #[test]
    fn diagnostic_rendering() {
        let mut filter = Filter::new();
        filter.compile("1 == foo", &NoSymbols).unwrap_err();
        insta::assert_snapshot!(
            filter.diagnostics()[0].to_string(),
            @"error[unknown-identifier]: unknown identifier 'foo' at 5..8"
        );
    }

    #[test]
    fn recompile_clears_previous_diagnostics() {
        let mut filter = Filter::new();
        filter.compile("foo", &NoSymbols).unwrap_err();
        assert!(filter.error_count() > 0);
        filter.compile("1 == 1", &NoSymbols).unwrap();
        assert_eq!(filter.error_count(), 0);
        assert!(filter.is_compiled());
        assert!(filter.evaluate(&mut NoValues));
    }

    #[test]
    fn runtime_division_by_zero_is_false_with_diagnostic() {
        struct Zero;
        impl Resolver for Zero {
            fn resolve(&self, name: &str) -> Option<Symbol> {
                (name == "n").then(|| Symbol::field(FieldId(0), DataType::UINT))
            }
        }
        struct ZeroSource;
        impl ValueSource for ZeroSource {
            fn field(&mut self, _id: FieldId, _reset: bool) -> Fetch {
                Fetch::Value(Value::UInt(0))
            }
        }
        let mut filter = Filter::new();
        filter.compile("10 / n == 5", &Zero).unwrap();
        assert!(!filter.evaluate(&mut ZeroSource));
        assert_eq!(filter.diagnostics()[0].code, DiagCode::DivisionByZero);
    }
}
