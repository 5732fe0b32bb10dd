//! Arena-backed abstract syntax tree.
//!
//! Nodes live in a flat `Vec` and reference each other by [`NodeId`]. The
//! parser builds raw nodes; semantic analysis types them, binds operator
//! table entries, rewrites subtrees in place (coercions, constructors,
//! constant folding) and may leave orphaned nodes behind in the arena --
//! only the tree reachable from [`Ast::root`] is meaningful afterwards.

use std::fmt;

use smallvec::SmallVec;

use flowfilter_core::diag::Span;
use flowfilter_core::ops::{BinaryOp, OpRef, UnaryOp};
use flowfilter_core::symbol::FieldId;
use flowfilter_core::types::DataType;
use flowfilter_core::value::Value;

/// Index of a node in its [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expression node shape.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal or folded constant.
    Const(Value),
    /// Identifier; `field` is filled by name resolution (constants are
    /// rewritten to [`ExprKind::Const`] instead).
    Ident {
        name: Box<str>,
        field: Option<FieldId>,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// List literal. Always folds to a constant during analysis.
    List {
        items: SmallVec<[NodeId; 4]>,
    },
    /// Inserted conversion; the entry is in the node's binding.
    Cast {
        operand: NodeId,
    },
    /// Inserted constructor call; the entry is in the node's binding.
    Construct {
        operand: NodeId,
    },
    /// Existential iteration over the record fields inside `operand`.
    /// `fields` lists the enclosed field identifier nodes in expression
    /// order.
    Any {
        operand: NodeId,
        fields: SmallVec<[NodeId; 2]>,
    },
}

/// One AST node: shape, resolved type, bound operator entry, source span.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: ExprKind,
    pub ty: DataType,
    pub binding: Option<OpRef>,
    pub span: Span,
}

/// The AST arena.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<AstNode>,
    root: u32,
}

impl Ast {
    pub fn new() -> Ast {
        Ast::default()
    }

    pub fn push(&mut self, kind: ExprKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(AstNode {
            kind,
            ty: DataType::NONE,
            binding: None,
            span,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn root(&self) -> NodeId {
        debug_assert!(!self.nodes.is_empty());
        NodeId(self.root)
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = id.0;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All arena nodes, including ones orphaned by analysis rewrites.
    pub fn nodes(&self) -> impl Iterator<Item = &AstNode> {
        self.nodes.iter()
    }

    /// Compact single-line rendering of the tree under `id`.
    pub fn display(&self, id: NodeId) -> DisplayNode<'_> {
        DisplayNode { ast: self, id }
    }
}

/// See [`Ast::display`].
pub struct DisplayNode<'a> {
    ast: &'a Ast,
    id: NodeId,
}

impl fmt::Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.ast.node(self.id);
        match &node.kind {
            ExprKind::Const(v) => write!(f, "{v}"),
            ExprKind::Ident { name, .. } => write!(f, "{name}"),
            ExprKind::Unary { op, operand } => {
                write!(f, "({op} {})", self.ast.display(*operand))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                write!(f, "({op} {} {})", self.ast.display(*lhs), self.ast.display(*rhs))
            }
            ExprKind::List { items } => {
                write!(f, "(list")?;
                for item in items {
                    write!(f, " {}", self.ast.display(*item))?;
                }
                write!(f, ")")
            }
            ExprKind::Cast { operand } => {
                write!(f, "(cast:{} {})", node.ty, self.ast.display(*operand))
            }
            ExprKind::Construct { operand } => {
                write!(f, "(make:{} {})", node.ty, self.ast.display(*operand))
            }
            ExprKind::Any { operand, .. } => {
                write!(f, "(any {})", self.ast.display(*operand))
            }
        }
    }
}
