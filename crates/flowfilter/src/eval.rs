//! Filter evaluator.
//!
//! Post-order walk over the compiled AST, producing one [`Value`] per node.
//! `and`/`or` short-circuit. Every `Any` node buffers the values of the
//! record fields it encloses (one reset-initiated fetch sequence per field
//! occurrence) and iterates their cartesian product, rightmost cursor
//! fastest, until an assignment satisfies the predicate; a field with no
//! values at all makes the predicate false immediately.
//!
//! Runtime conversion failures (e.g. a string field value that does not
//! parse as an address) only fail the current assignment. Division by zero
//! aborts the evaluation; type mismatches cannot occur after analysis and
//! surface as internal errors.

use indexmap::IndexMap;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::error;

use flowfilter_compile::ast::{Ast, ExprKind, NodeId};
use flowfilter_core::diag::Span;
use flowfilter_core::ops::{BinaryOp, OpEntry, OpError, OpTable};
use flowfilter_core::symbol::{Fetch, ValueSource};
use flowfilter_core::value::Value;

#[derive(Debug, Error)]
pub(crate) enum EvalError {
    #[error("division by zero")]
    DivisionByZero { span: Span },

    /// A value did not convert; the enclosing predicate attempt is false.
    #[error("value conversion failed")]
    Conversion,

    #[error("internal evaluation error: {message}")]
    Internal { message: String, span: Span },
}

pub(crate) struct Evaluator<'a> {
    ast: &'a Ast,
    table: &'a OpTable,
    source: &'a mut dyn ValueSource,
    /// Current value of each field identifier node inside the active `Any`.
    current: IndexMap<NodeId, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn run(
        ast: &'a Ast,
        table: &'a OpTable,
        source: &'a mut dyn ValueSource,
    ) -> Result<bool, EvalError> {
        let mut evaluator = Evaluator {
            ast,
            table,
            source,
            current: IndexMap::new(),
        };
        let root = ast.root();
        match evaluator.eval(root)? {
            Value::Bool(b) => Ok(b),
            other => Err(evaluator.internal(
                root,
                format!("filter produced {} instead of a boolean", other.data_type()),
            )),
        }
    }

    fn internal(&self, id: NodeId, message: impl Into<String>) -> EvalError {
        let message = message.into();
        error!(node = %id, message, "evaluator invariant violated");
        EvalError::Internal {
            message,
            span: self.ast.node(id).span,
        }
    }

    fn lift_op_error(&self, id: NodeId, e: OpError) -> EvalError {
        match e {
            OpError::DivisionByZero => EvalError::DivisionByZero {
                span: self.ast.node(id).span,
            },
            OpError::Conversion { .. } => EvalError::Conversion,
            OpError::TypeMismatch => self.internal(id, "operand shapes diverged from types"),
        }
    }

    fn eval(&mut self, id: NodeId) -> Result<Value, EvalError> {
        match &self.ast.node(id).kind {
            ExprKind::Const(v) => Ok(v.clone()),
            ExprKind::Ident { .. } => self
                .current
                .get(&id)
                .cloned()
                .ok_or_else(|| self.internal(id, "field read outside iteration")),
            ExprKind::Unary { operand, .. } => {
                let operand = *operand;
                let v = self.eval(operand)?;
                self.apply_unary(id, &v)
            }
            ExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                match self.eval(lhs)? {
                    Value::Bool(false) => Ok(Value::Bool(false)),
                    Value::Bool(true) => self.eval(rhs),
                    _ => Err(self.internal(id, "non-boolean operand of 'and'")),
                }
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                match self.eval(lhs)? {
                    Value::Bool(true) => Ok(Value::Bool(true)),
                    Value::Bool(false) => self.eval(rhs),
                    _ => Err(self.internal(id, "non-boolean operand of 'or'")),
                }
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                let (lhs, rhs) = (*lhs, *rhs);
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                self.apply_binary(id, &l, &r)
            }
            ExprKind::Cast { operand } | ExprKind::Construct { operand } => {
                let operand = *operand;
                let v = self.eval(operand)?;
                self.apply_unary(id, &v)
            }
            ExprKind::List { .. } => Err(self.internal(id, "unfolded list reached evaluation")),
            ExprKind::Any { operand, fields } => {
                let operand = *operand;
                let fields = fields.clone();
                self.eval_any(id, operand, &fields)
            }
        }
    }

    fn apply_unary(&self, id: NodeId, v: &Value) -> Result<Value, EvalError> {
        let apply = match self.binding(id)? {
            OpEntry::Unary { apply, .. }
            | OpEntry::Cast { apply, .. }
            | OpEntry::Constructor { apply, .. } => apply,
            OpEntry::Binary { .. } => {
                return Err(self.internal(id, "binary entry bound to a unary node"))
            }
        };
        apply(v).map_err(|e| self.lift_op_error(id, e))
    }

    fn apply_binary(&self, id: NodeId, l: &Value, r: &Value) -> Result<Value, EvalError> {
        let apply = match self.binding(id)? {
            OpEntry::Binary { apply, .. } => apply,
            _ => return Err(self.internal(id, "non-binary entry bound to a binary node")),
        };
        apply(l, r).map_err(|e| self.lift_op_error(id, e))
    }

    fn binding(&self, id: NodeId) -> Result<&OpEntry, EvalError> {
        let entry = self
            .ast
            .node(id)
            .binding
            .ok_or_else(|| self.internal(id, "unbound operator node"))?;
        Ok(self.table.entry(entry))
    }

    /// Existential iteration over the cartesian product of the enclosed
    /// fields' values.
    fn eval_any(
        &mut self,
        id: NodeId,
        operand: NodeId,
        fields: &[NodeId],
    ) -> Result<Value, EvalError> {
        let mut buffers: SmallVec<[SmallVec<[Value; 4]>; 2]> = SmallVec::new();
        for &field_node in fields {
            let field_id = match &self.ast.node(field_node).kind {
                ExprKind::Ident {
                    field: Some(field), ..
                } => *field,
                _ => return Err(self.internal(field_node, "iterated node is not a field")),
            };
            let mut values: SmallVec<[Value; 4]> = SmallVec::new();
            let mut reset = true;
            loop {
                match self.source.field(field_id, reset) {
                    Fetch::Value(v) => {
                        values.push(v);
                        break;
                    }
                    Fetch::More(v) => {
                        values.push(v);
                        reset = false;
                    }
                    Fetch::Absent => break,
                }
            }
            if values.is_empty() {
                return Ok(Value::Bool(false));
            }
            buffers.push(values);
        }

        let mut cursor: SmallVec<[usize; 2]> = SmallVec::from_elem(0, fields.len());
        loop {
            for (slot, &field_node) in fields.iter().enumerate() {
                self.current
                    .insert(field_node, buffers[slot][cursor[slot]].clone());
            }
            match self.eval(operand) {
                Ok(Value::Bool(true)) => return Ok(Value::Bool(true)),
                Ok(Value::Bool(false)) => {}
                Ok(_) => return Err(self.internal(id, "non-boolean predicate under iteration")),
                // This assignment cannot satisfy the predicate; try the next.
                Err(EvalError::Conversion) => {}
                Err(e) => return Err(e),
            }
            // Advance the odometer, rightmost cursor fastest.
            let mut slot = fields.len();
            loop {
                if slot == 0 {
                    return Ok(Value::Bool(false));
                }
                slot -= 1;
                cursor[slot] += 1;
                if cursor[slot] < buffers[slot].len() {
                    break;
                }
                cursor[slot] = 0;
            }
        }
    }
}
