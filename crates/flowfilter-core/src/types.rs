//! The filter type system.
//!
//! A value's type is a [`DataType`]: a primary [`TypeTag`] plus an element
//! tag that is only meaningful for lists. The set of tags is closed except
//! for [`TypeTag::Custom`], which identifies caller-defined artifact types
//! produced by constructor operators (e.g. a compiled IP trie).
//!
//! Conversion legality and cost are *not* defined here -- implicit
//! coercions are cast entries in the operator table, which is the single
//! source of truth for operator and conversion semantics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag identifying the shape of a filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    /// Absent type. Only valid before semantic analysis and as the element
    /// tag of non-list types.
    None,
    Bool,
    UInt,
    Int,
    Float,
    Str,
    /// IPv4 or IPv6 address with a prefix length.
    Ip,
    Mac,
    /// Bit-set semantics over a 64-bit word.
    Flags,
    /// Homogeneous list; the element tag lives in [`DataType::elem`].
    List,
    /// Caller-defined artifact type, identified by a small integer.
    Custom(u16),
}

impl TypeTag {
    pub fn is_numeric(self) -> bool {
        matches!(self, TypeTag::UInt | TypeTag::Int | TypeTag::Float)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, TypeTag::UInt | TypeTag::Int | TypeTag::Flags)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::None => write!(f, "none"),
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::UInt => write!(f, "uint"),
            TypeTag::Int => write!(f, "int"),
            TypeTag::Float => write!(f, "float"),
            TypeTag::Str => write!(f, "str"),
            TypeTag::Ip => write!(f, "ip"),
            TypeTag::Mac => write!(f, "mac"),
            TypeTag::Flags => write!(f, "flags"),
            TypeTag::List => write!(f, "list"),
            TypeTag::Custom(id) => write!(f, "custom({id})"),
        }
    }
}

/// A complete data type: primary tag plus list element tag.
///
/// `elem` is [`TypeTag::None`] for everything except lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub tag: TypeTag,
    pub elem: TypeTag,
}

impl DataType {
    pub const NONE: DataType = DataType::of(TypeTag::None);
    pub const BOOL: DataType = DataType::of(TypeTag::Bool);
    pub const UINT: DataType = DataType::of(TypeTag::UInt);
    pub const INT: DataType = DataType::of(TypeTag::Int);
    pub const FLOAT: DataType = DataType::of(TypeTag::Float);
    pub const STR: DataType = DataType::of(TypeTag::Str);
    pub const IP: DataType = DataType::of(TypeTag::Ip);
    pub const MAC: DataType = DataType::of(TypeTag::Mac);
    pub const FLAGS: DataType = DataType::of(TypeTag::Flags);

    /// A non-list type.
    pub const fn of(tag: TypeTag) -> DataType {
        DataType {
            tag,
            elem: TypeTag::None,
        }
    }

    /// A homogeneous list type.
    pub const fn list(elem: TypeTag) -> DataType {
        DataType {
            tag: TypeTag::List,
            elem,
        }
    }

    pub const fn custom(id: u16) -> DataType {
        DataType::of(TypeTag::Custom(id))
    }

    pub fn is_list(self) -> bool {
        self.tag == TypeTag::List
    }

    pub fn is_none(self) -> bool {
        self.tag == TypeTag::None
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_list() {
            write!(f, "list<{}>", self.elem)
        } else {
            write!(f, "{}", self.tag)
        }
    }
}
