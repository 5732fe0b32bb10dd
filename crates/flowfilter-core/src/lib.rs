//! Core data model for the flowfilter expression engine: runtime values and
//! their types, the per-filter operator table, the IP prefix trie, ordered
//! diagnostics, and the resolver / value-source interfaces supplied by the
//! caller.

pub mod diag;
pub mod ops;
pub mod symbol;
pub mod trie;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use diag::{locate, DiagCode, Diagnostic, Diagnostics, Location, Span};
pub use ops::{
    BinaryFn, BinaryMatch, BinaryOp, OpEntry, OpError, OpRef, OpTable, ResolveError, UnaryFn,
    UnaryMatch, UnaryOp,
};
pub use symbol::{Fetch, FieldId, Resolver, Symbol, SymbolKind, ValueSource};
pub use trie::{IpTrie, TRIE_TYPE_ID};
pub use types::{DataType, TypeTag};
pub use value::{IpAddr, IpParseError, IpVersion, MacAddr, MacParseError, Opaque, Value};
