// src/expr.rs
//! Expression evaluator
//!
//! Expressions resolve field paths, literals and a small operator set
//! against a document, plus an optional "current element" bound inside
//! `$map`. Evaluation returns `Ok(None)` for the absent outcome and
//! reserves `Err` for hard type conflicts.
//!
//! Relative dates (`$daysFromNow`) are computed from the clock held in
//! [`EvalContext`], which the runner fixes once per pipeline run. A
//! per-document wall-clock read would let the comparison window drift
//! during a long scan.

use crate::document::Document;
use crate::error::{PipeError, Result};
use crate::value::{compare_values, Value};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;

/// Per-run evaluation context
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Fixed once when the run starts; never re-read mid-run
    pub now: DateTime<Utc>,
    elem: Option<&'a Value>,
}

impl<'a> EvalContext<'a> {
    pub fn new(now: DateTime<Utc>) -> Self {
        EvalContext { now, elem: None }
    }

    /// Context with the current array element bound (inside `$map`)
    pub fn with_elem<'b>(&self, elem: &'b Value) -> EvalContext<'b> {
        EvalContext {
            now: self.now,
            elem: Some(elem),
        }
    }
}

/// A computable expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Dot path against the document (`"$price"`, `"$productConfig.enabled"`)
    Field(String),
    /// Dot path against the current element (`"$$elem.status"`); an empty
    /// path means the element itself
    ElemField(String),
    /// Literal value
    Literal(Value),
    /// Numeric product; absent operand propagates as absent
    Multiply(Box<Expr>, Box<Expr>),
    /// `now ± N days` against the per-run clock
    DaysFromNow(i64),
    /// Document constructor: each field evaluated independently, absent
    /// sub-results omitted (used by `$push` payloads and `$map` bodies)
    Doc(Vec<(String, Expr)>),
}

impl Expr {
    /// Evaluate against a document. `Ok(None)` is the absent outcome.
    pub fn eval(&self, doc: &Document, ctx: &EvalContext) -> Result<Option<Value>> {
        match self {
            Expr::Field(path) => Ok(doc.get(path).cloned()),
            Expr::ElemField(path) => match ctx.elem {
                None => Ok(None),
                Some(elem) if path.is_empty() => Ok(Some(elem.clone())),
                Some(Value::Document(elem_doc)) => Ok(elem_doc.get(path).cloned()),
                Some(_) => Ok(None),
            },
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Multiply(a, b) => {
                let left = a.eval(doc, ctx)?;
                let right = b.eval(doc, ctx)?;
                match (left, right) {
                    (None, _) | (_, None) => Ok(None),
                    (Some(Value::Int(x)), Some(Value::Int(y))) => {
                        Ok(Some(Value::Int(x.saturating_mul(y))))
                    }
                    (Some(x), Some(y)) => {
                        let fx = numeric_operand(&x, "$multiply")?;
                        let fy = numeric_operand(&y, "$multiply")?;
                        Ok(Some(Value::Float(fx * fy)))
                    }
                }
            }
            Expr::DaysFromNow(days) => {
                Ok(Some(Value::Timestamp(ctx.now + Duration::days(*days))))
            }
            Expr::Doc(fields) => {
                let mut out = Document::new();
                for (name, field_expr) in fields {
                    if let Some(value) = field_expr.eval(doc, ctx)? {
                        out.insert(name.clone(), value);
                    }
                }
                Ok(Some(Value::Document(out)))
            }
        }
    }
}

fn numeric_operand(value: &Value, context: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| PipeError::TypeMismatch {
        expected: "number",
        found: value.type_name(),
        context: context.to_string(),
    })
}

/// Comparison operator of a single match condition
#[derive(Debug, Clone, PartialEq)]
pub enum CondOp {
    /// Equality against a literal
    Eq(Value),
    /// Membership in a literal set
    In(Vec<Value>),
    Gt(Expr),
    Gte(Expr),
    Lt(Expr),
    Lte(Expr),
}

/// One field condition: a path plus an operator
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub op: CondOp,
}

/// Conjunction of field conditions (the `$match` predicate shape)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Predicate { conditions }
    }

    /// Builder-style helper
    pub fn and(mut self, path: impl Into<String>, op: CondOp) -> Self {
        self.conditions.push(Condition {
            path: path.into(),
            op,
        });
        self
    }

    /// A document passes iff every condition evaluates true.
    ///
    /// Absent document values make a condition false (soft outcome);
    /// comparing present values of incompatible types is a hard error.
    pub fn matches(&self, doc: &Document, ctx: &EvalContext) -> Result<bool> {
        for cond in &self.conditions {
            if !cond.matches(doc, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Condition {
    fn matches(&self, doc: &Document, ctx: &EvalContext) -> Result<bool> {
        let Some(actual) = doc.get(&self.path) else {
            return Ok(false);
        };
        match &self.op {
            CondOp::Eq(expected) => Ok(actual.loose_eq(expected)),
            CondOp::In(set) => Ok(set.iter().any(|v| actual.loose_eq(v))),
            CondOp::Gt(bound) => self.ordered(actual, bound, doc, ctx, |ord| {
                ord == Ordering::Greater
            }),
            CondOp::Gte(bound) => self.ordered(actual, bound, doc, ctx, |ord| {
                matches!(ord, Ordering::Greater | Ordering::Equal)
            }),
            CondOp::Lt(bound) => {
                self.ordered(actual, bound, doc, ctx, |ord| ord == Ordering::Less)
            }
            CondOp::Lte(bound) => self.ordered(actual, bound, doc, ctx, |ord| {
                matches!(ord, Ordering::Less | Ordering::Equal)
            }),
        }
    }

    fn ordered(
        &self,
        actual: &Value,
        bound: &Expr,
        doc: &Document,
        ctx: &EvalContext,
        pred: impl Fn(Ordering) -> bool,
    ) -> Result<bool> {
        let Some(bound_value) = bound.eval(doc, ctx)? else {
            return Ok(false);
        };
        match compare_values(actual, &bound_value) {
            Some(ord) => Ok(pred(ord)),
            None => Err(PipeError::TypeMismatch {
                expected: bound_value.type_name(),
                found: actual.type_name(),
                context: format!("comparison on '{}'", self.path),
            }),
        }
    }
}
