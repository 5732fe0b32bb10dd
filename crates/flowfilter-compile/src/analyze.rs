//! Semantic analysis: name resolution, operator overload resolution with
//! coercion insertion, list typing, constructor insertion, constant folding
//! and any-lifting.
//!
//! Runs bottom-up over the parsed AST and rewrites it in place:
//!
//! 1. Identifiers are resolved through the caller's resolver; constants are
//!    materialised as `Const` nodes, record fields keep their id. Every
//!    unknown identifier is reported before the pass gives up.
//! 2. Each operator node is bound to the minimum-coercion-cost entry of the
//!    operator table; casts are inserted as explicit nodes.
//! 3. List literals unify their element type, must be fully constant, and
//!    fold into a single constant value. An empty list takes its element
//!    type from the opposite operand of `in`/`contains`.
//! 4. A literal IP list longer than [`TRIE_LIST_THRESHOLD`] on the right of
//!    `in` is rebuilt into a trie artifact via the registered constructor,
//!    switching the operator binding to the trie membership entry.
//! 5. Any fully-constant subtree is evaluated at compile time and replaced
//!    by its value.
//! 6. A non-boolean root is wrapped in the truthiness cast.
//! 7. Predicates containing record fields are wrapped in `Any` nodes; the
//!    evaluator iterates field values existentially underneath them.

use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

use flowfilter_core::diag::{DiagCode, Diagnostics, Span};
use flowfilter_core::ops::{BinaryOp, OpEntry, OpError, OpRef, OpTable, ResolveError, UnaryOp};
use flowfilter_core::symbol::{Resolver, SymbolKind};
use flowfilter_core::types::{DataType, TypeTag};
use flowfilter_core::value::Value;

use crate::ast::{Ast, ExprKind, NodeId};

/// Literal IP lists longer than this compile into a trie.
pub const TRIE_LIST_THRESHOLD: usize = 4;

#[derive(Debug, Error)]
enum SemaError {
    #[error("no operator '{op}' for {lhs} and {rhs}")]
    NoBinary {
        op: BinaryOp,
        lhs: DataType,
        rhs: DataType,
        span: Span,
    },

    #[error("no operator '{op}' for {operand}")]
    NoUnary {
        op: UnaryOp,
        operand: DataType,
        span: Span,
    },

    #[error("ambiguous operator '{op}' for {lhs} and {rhs}")]
    AmbiguousBinary {
        op: BinaryOp,
        lhs: DataType,
        rhs: DataType,
        span: Span,
    },

    #[error("ambiguous operator '{op}' for {operand}")]
    AmbiguousUnary {
        op: UnaryOp,
        operand: DataType,
        span: Span,
    },

    #[error("list items have no common type")]
    MixedList { span: Span },

    #[error("list items must be constant")]
    NonConstList { span: Span },

    #[error("cannot infer the element type of an empty list")]
    UntypedList { span: Span },

    #[error("division by zero in constant expression")]
    DivisionByZero { span: Span },

    #[error("constant {value} cannot be converted to {target}")]
    BadConstCast {
        value: String,
        target: DataType,
        span: Span,
    },

    #[error("expression has type {ty} and cannot be used as a condition")]
    NotBoolean { ty: DataType, span: Span },

    #[error("internal analysis error: {message}")]
    Internal { message: String, span: Span },
}

impl SemaError {
    fn code(&self) -> DiagCode {
        match self {
            SemaError::NoBinary { .. }
            | SemaError::NoUnary { .. }
            | SemaError::BadConstCast { .. }
            | SemaError::NotBoolean { .. } => DiagCode::Type,
            SemaError::AmbiguousBinary { .. } | SemaError::AmbiguousUnary { .. } => {
                DiagCode::Ambiguous
            }
            SemaError::MixedList { .. }
            | SemaError::NonConstList { .. }
            | SemaError::UntypedList { .. } => DiagCode::List,
            SemaError::DivisionByZero { .. } => DiagCode::DivisionByZero,
            SemaError::Internal { .. } => DiagCode::Internal,
        }
    }

    fn span(&self) -> Span {
        match self {
            SemaError::NoBinary { span, .. }
            | SemaError::NoUnary { span, .. }
            | SemaError::AmbiguousBinary { span, .. }
            | SemaError::AmbiguousUnary { span, .. }
            | SemaError::MixedList { span }
            | SemaError::NonConstList { span }
            | SemaError::UntypedList { span }
            | SemaError::DivisionByZero { span }
            | SemaError::BadConstCast { span, .. }
            | SemaError::NotBoolean { span, .. }
            | SemaError::Internal { span, .. } => *span,
        }
    }
}

/// Analyses `ast` in place. On failure the diagnostics list is non-empty
/// and the AST must not be evaluated.
pub fn analyze(
    ast: &mut Ast,
    table: &OpTable,
    resolver: &dyn Resolver,
    diags: &mut Diagnostics,
) {
    if !resolve_names(ast, resolver, diags) {
        return;
    }

    let mut analyzer = Analyzer { ast, table };
    match analyzer.run() {
        Ok(()) => {
            if let Err(e) = analyzer.audit(analyzer.ast.root()) {
                diags.report(e.code(), e.to_string(), Some(e.span()));
            }
        }
        Err(e) => {
            diags.report(e.code(), e.to_string(), Some(e.span()));
        }
    }
    debug!(
        nodes = ast.len(),
        ok = diags.is_empty(),
        "semantic analysis finished"
    );
}

/// Resolves every identifier, reporting all unknown names in one pass.
fn resolve_names(ast: &mut Ast, resolver: &dyn Resolver, diags: &mut Diagnostics) -> bool {
    let mut ok = true;
    for i in 0..ast.len() {
        let id = NodeId(i as u32);
        let ExprKind::Ident { name, .. } = &ast.node(id).kind else {
            continue;
        };
        let name = name.clone();
        match resolver.resolve(&name) {
            None => {
                ok = false;
                let span = ast.node(id).span;
                diags.report(
                    DiagCode::UnknownIdentifier,
                    format!("unknown identifier '{name}'"),
                    Some(span),
                );
            }
            Some(sym) => {
                let node = ast.node_mut(id);
                match sym.kind {
                    SymbolKind::Const(value) => {
                        node.kind = ExprKind::Const(value);
                    }
                    SymbolKind::Field => {
                        node.kind = ExprKind::Ident {
                            name,
                            field: Some(sym.id),
                        };
                        node.ty = sym.data_type;
                    }
                }
            }
        }
    }
    ok
}

struct Analyzer<'a> {
    ast: &'a mut Ast,
    table: &'a OpTable,
}

impl<'a> Analyzer<'a> {
    fn run(&mut self) -> Result<(), SemaError> {
        let root = self.visit(self.ast.root())?;
        let root = self.bool_root(root)?;
        let root = self.lift(root);
        self.ast.set_root(root);
        Ok(())
    }

    fn ty(&self, id: NodeId) -> DataType {
        self.ast.node(id).ty
    }

    fn span(&self, id: NodeId) -> Span {
        self.ast.node(id).span
    }

    fn internal(&self, id: NodeId, message: impl Into<String>) -> SemaError {
        SemaError::Internal {
            message: message.into(),
            span: self.span(id),
        }
    }

    // -- typing, binding and folding (bottom-up) ---------------------------

    fn visit(&mut self, id: NodeId) -> Result<NodeId, SemaError> {
        match self.ast.node(id).kind.clone() {
            ExprKind::Const(v) => {
                self.ast.node_mut(id).ty = v.data_type();
                Ok(id)
            }
            ExprKind::Ident { .. } => Ok(id),
            ExprKind::Unary { op, operand } => self.visit_unary(id, op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.visit_binary(id, op, lhs, rhs),
            ExprKind::List { items } => self.visit_list(id, &items),
            ExprKind::Cast { .. } | ExprKind::Construct { .. } | ExprKind::Any { .. } => {
                Err(self.internal(id, "unexpected analysis node in parser output"))
            }
        }
    }

    fn visit_unary(&mut self, id: NodeId, op: UnaryOp, operand: NodeId) -> Result<NodeId, SemaError> {
        let operand = self.visit(operand)?;
        let operand_ty = self.ty(operand);
        let m = self
            .table
            .resolve_unary(op, operand_ty)
            .map_err(|e| match e {
                ResolveError::NoMatch => SemaError::NoUnary {
                    op,
                    operand: operand_ty,
                    span: self.span(id),
                },
                ResolveError::Ambiguous => SemaError::AmbiguousUnary {
                    op,
                    operand: operand_ty,
                    span: self.span(id),
                },
            })?;
        let operand = self.insert_cast(operand, m.operand_cast)?;
        let node = self.ast.node_mut(id);
        node.kind = ExprKind::Unary { op, operand };
        node.ty = m.result;
        node.binding = Some(m.entry);
        self.fold(id, &[operand])
    }

    fn visit_binary(
        &mut self,
        id: NodeId,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<NodeId, SemaError> {
        let lhs = self.visit(lhs)?;
        let mut rhs = self.visit(rhs)?;

        // An empty list takes its element type from the opposite operand.
        if op == BinaryOp::In && self.ty(rhs) == DataType::list(TypeTag::None) {
            let elem = self.ty(lhs).tag;
            self.ast.node_mut(rhs).ty = DataType::list(elem);
        }
        if op == BinaryOp::Contains && self.ty(lhs) == DataType::list(TypeTag::None) {
            let elem = self.ty(rhs).tag;
            self.ast.node_mut(lhs).ty = DataType::list(elem);
        }
        self.reject_untyped_list(lhs)?;
        self.reject_untyped_list(rhs)?;

        // Large literal IP lists become a trie artifact.
        if op == BinaryOp::In && self.is_large_ip_list(rhs) {
            if let Some((entry, to)) = self.table.constructor(DataType::list(TypeTag::Ip)) {
                rhs = self.insert_construct(rhs, entry, to)?;
            }
        }

        let (lhs_ty, rhs_ty) = (self.ty(lhs), self.ty(rhs));
        let m = self.table.resolve_binary(op, lhs_ty, rhs_ty).map_err(|e| match e {
            ResolveError::NoMatch => SemaError::NoBinary {
                op,
                lhs: lhs_ty,
                rhs: rhs_ty,
                span: self.span(id),
            },
            ResolveError::Ambiguous => SemaError::AmbiguousBinary {
                op,
                lhs: lhs_ty,
                rhs: rhs_ty,
                span: self.span(id),
            },
        })?;
        let lhs = self.insert_cast(lhs, m.lhs_cast)?;
        let rhs = self.insert_cast(rhs, m.rhs_cast)?;
        let node = self.ast.node_mut(id);
        node.kind = ExprKind::Binary { op, lhs, rhs };
        node.ty = m.result;
        node.binding = Some(m.entry);
        self.fold(id, &[lhs, rhs])
    }

    fn visit_list(&mut self, id: NodeId, items: &[NodeId]) -> Result<NodeId, SemaError> {
        let mut visited = SmallVec::<[NodeId; 4]>::new();
        for &item in items {
            visited.push(self.visit(item)?);
        }

        if visited.is_empty() {
            let node = self.ast.node_mut(id);
            node.kind = ExprKind::Const(Value::list(Vec::new()));
            node.ty = DataType::list(TypeTag::None);
            return Ok(id);
        }

        let elem = self.unify_elements(&visited, self.span(id))?;
        let mut values = Vec::with_capacity(visited.len());
        for &item in &visited {
            let item = if self.ty(item) == elem {
                item
            } else {
                let cast = self
                    .table
                    .implicit_conversion(self.ty(item), elem)
                    .and_then(|(_, r)| r);
                self.insert_cast(item, cast)?
            };
            match &self.ast.node(item).kind {
                ExprKind::Const(v) => values.push(v.clone()),
                _ => {
                    return Err(SemaError::NonConstList {
                        span: self.span(item),
                    })
                }
            }
        }

        let node = self.ast.node_mut(id);
        node.kind = ExprKind::Const(Value::list(values));
        node.ty = DataType::list(elem.tag);
        Ok(id)
    }

    /// Minimum-total-cost unification of list element types.
    fn unify_elements(&self, items: &[NodeId], span: Span) -> Result<DataType, SemaError> {
        let mut candidates: SmallVec<[DataType; 4]> = SmallVec::new();
        for &item in items {
            let ty = self.ty(item);
            if !candidates.contains(&ty) {
                candidates.push(ty);
            }
        }
        let mut best: Option<(u32, DataType)> = None;
        let mut tied = false;
        for &candidate in &candidates {
            let mut total = 0u32;
            let mut feasible = true;
            for &item in items {
                match self.table.implicit_conversion(self.ty(item), candidate) {
                    Some((cost, _)) => total += cost,
                    None => {
                        feasible = false;
                        break;
                    }
                }
            }
            if !feasible {
                continue;
            }
            match best {
                Some((bc, _)) if total > bc => {}
                Some((bc, _)) if total == bc => tied = true,
                _ => {
                    best = Some((total, candidate));
                    tied = false;
                }
            }
        }
        match best {
            Some(_) if tied => Err(SemaError::MixedList { span }),
            Some((_, elem)) => Ok(elem),
            None => Err(SemaError::MixedList { span }),
        }
    }

    fn reject_untyped_list(&self, id: NodeId) -> Result<(), SemaError> {
        if self.ty(id) == DataType::list(TypeTag::None) {
            Err(SemaError::UntypedList { span: self.span(id) })
        } else {
            Ok(())
        }
    }

    fn is_large_ip_list(&self, id: NodeId) -> bool {
        if self.ty(id) != DataType::list(TypeTag::Ip) {
            return false;
        }
        match &self.ast.node(id).kind {
            ExprKind::Const(Value::List(items)) => items.len() > TRIE_LIST_THRESHOLD,
            _ => false,
        }
    }

    /// Wraps `child` in a cast node and folds it if the child is constant.
    fn insert_cast(&mut self, child: NodeId, cast: Option<OpRef>) -> Result<NodeId, SemaError> {
        let Some(entry) = cast else {
            return Ok(child);
        };
        let to = match self.table.entry(entry) {
            OpEntry::Cast { to, .. } => *to,
            _ => return Err(self.internal(child, "cast binding is not a cast entry")),
        };
        let span = self.span(child);
        let id = self.ast.push(ExprKind::Cast { operand: child }, span);
        let node = self.ast.node_mut(id);
        node.ty = to;
        node.binding = Some(entry);
        self.fold(id, &[child])
    }

    /// Wraps `child` in a constructor node and folds it if constant.
    fn insert_construct(
        &mut self,
        child: NodeId,
        entry: OpRef,
        to: DataType,
    ) -> Result<NodeId, SemaError> {
        let span = self.span(child);
        let id = self.ast.push(ExprKind::Construct { operand: child }, span);
        let node = self.ast.node_mut(id);
        node.ty = to;
        node.binding = Some(entry);
        self.fold(id, &[child])
    }

    /// Constant folding: if every child of `id` is constant, the bound
    /// entry is applied at compile time and the node becomes a constant.
    fn fold(&mut self, id: NodeId, children: &[NodeId]) -> Result<NodeId, SemaError> {
        let mut values: SmallVec<[Value; 2]> = SmallVec::new();
        for &child in children {
            match &self.ast.node(child).kind {
                ExprKind::Const(v) => values.push(v.clone()),
                _ => return Ok(id),
            }
        }
        let entry = self
            .ast
            .node(id)
            .binding
            .ok_or_else(|| self.internal(id, "folding an unbound node"))?;
        let result = match (self.table.entry(entry), values.as_slice()) {
            (OpEntry::Unary { apply, .. }, [v])
            | (OpEntry::Cast { apply, .. }, [v])
            | (OpEntry::Constructor { apply, .. }, [v]) => apply(v),
            (OpEntry::Binary { apply, .. }, [l, r]) => apply(l, r),
            _ => return Err(self.internal(id, "operand count does not match entry kind")),
        };
        let value = result.map_err(|e| match e {
            OpError::DivisionByZero => SemaError::DivisionByZero { span: self.span(id) },
            OpError::Conversion { value, target } => SemaError::BadConstCast {
                value,
                target,
                span: self.span(id),
            },
            OpError::TypeMismatch => self.internal(id, "operand shapes diverged from types"),
        })?;
        self.ast.node_mut(id).kind = ExprKind::Const(value);
        Ok(id)
    }

    /// Wraps a non-boolean root in its truthiness cast.
    fn bool_root(&mut self, root: NodeId) -> Result<NodeId, SemaError> {
        let ty = self.ty(root);
        if ty == DataType::BOOL {
            return Ok(root);
        }
        self.reject_untyped_list(root)?;
        match self.table.cast(ty, DataType::BOOL) {
            Some(entry) => self.insert_cast(root, Some(entry)),
            None => Err(SemaError::NotBoolean {
                ty,
                span: self.span(root),
            }),
        }
    }

    // -- any-lifting -------------------------------------------------------

    /// Recurses through the logical skeleton (and/or/not); wraps every
    /// maximal field-bearing predicate beneath it in an `Any` node.
    fn lift(&mut self, id: NodeId) -> NodeId {
        match self.ast.node(id).kind.clone() {
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                lhs,
                rhs,
            } => {
                let lhs = self.lift(lhs);
                let rhs = self.lift(rhs);
                self.ast.node_mut(id).kind = ExprKind::Binary { op, lhs, rhs };
                id
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                let operand = self.lift(operand);
                self.ast.node_mut(id).kind = ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand,
                };
                id
            }
            _ => {
                let mut fields = SmallVec::new();
                self.collect_fields(id, &mut fields);
                if fields.is_empty() {
                    return id;
                }
                let span = self.span(id);
                let any = self.ast.push(ExprKind::Any { operand: id, fields }, span);
                self.ast.node_mut(any).ty = DataType::BOOL;
                any
            }
        }
    }

    /// Field identifier nodes under `id`, in expression order.
    fn collect_fields(&self, id: NodeId, out: &mut SmallVec<[NodeId; 2]>) {
        match &self.ast.node(id).kind {
            ExprKind::Ident { field: Some(_), .. } => out.push(id),
            ExprKind::Ident { field: None, .. } | ExprKind::Const(_) => {}
            ExprKind::Unary { operand, .. }
            | ExprKind::Cast { operand }
            | ExprKind::Construct { operand }
            | ExprKind::Any { operand, .. } => self.collect_fields(*operand, out),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.collect_fields(*lhs, out);
                self.collect_fields(*rhs, out);
            }
            ExprKind::List { items } => {
                for item in items {
                    self.collect_fields(*item, out);
                }
            }
        }
    }

    // -- invariant audit ---------------------------------------------------

    /// Post-analysis sanity walk over the reachable tree: every node is
    /// typed and every operator node is bound.
    fn audit(&self, id: NodeId) -> Result<(), SemaError> {
        let node = self.ast.node(id);
        if node.ty.is_none() {
            return Err(self.internal(id, "untyped node survived analysis"));
        }
        match &node.kind {
            ExprKind::Const(_) | ExprKind::Ident { .. } => Ok(()),
            ExprKind::Unary { operand, .. }
            | ExprKind::Cast { operand }
            | ExprKind::Construct { operand } => {
                if node.binding.is_none() {
                    return Err(self.internal(id, "unbound operator node survived analysis"));
                }
                self.audit(*operand)
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                if node.binding.is_none() {
                    return Err(self.internal(id, "unbound operator node survived analysis"));
                }
                self.audit(*lhs)?;
                self.audit(*rhs)
            }
            ExprKind::List { .. } => Err(self.internal(id, "unfolded list survived analysis")),
            ExprKind::Any { operand, .. } => self.audit(*operand),
        }
    }
}
