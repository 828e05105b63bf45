// src/accumulator.rs
//! Per-group running computations for the `$group` stage
//!
//! Each group owns one state per configured accumulator. State is
//! created when the group first sees a document and finalized once the
//! stage input is exhausted.
//!
//! Absent policy (applied consistently, see DESIGN.md): Sum and Avg skip
//! absent values entirely - Sum is unaffected, Avg excludes them from
//! the denominator, and an Avg that never saw a value finalizes to
//! absent. A present non-numeric value is a hard `TypeMismatch`.

use crate::document::Document;
use crate::error::{PipeError, Result};
use crate::expr::{EvalContext, Expr};
use crate::value::Value;

/// Accumulator specification, fixed before execution begins
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorSpec {
    /// Number of documents in the group
    Count,
    /// Running sum of a numeric expression
    Sum(Expr),
    /// Running average of a numeric expression
    Avg(Expr),
    /// Collect one entry per document, in arrival order
    Push(Expr),
}

/// Running state for one accumulator in one group
#[derive(Debug)]
pub enum AccState {
    Count(i64),
    Sum {
        int: i64,
        float: f64,
        saw_float: bool,
    },
    Avg {
        sum: f64,
        count: u64,
    },
    Push(Vec<Value>),
}

impl AccumulatorSpec {
    /// Stage-construction-time name, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            AccumulatorSpec::Count => "$count",
            AccumulatorSpec::Sum(_) => "$sum",
            AccumulatorSpec::Avg(_) => "$avg",
            AccumulatorSpec::Push(_) => "$push",
        }
    }

    /// Fresh state for a newly seen group
    pub fn init(&self) -> AccState {
        match self {
            AccumulatorSpec::Count => AccState::Count(0),
            AccumulatorSpec::Sum(_) => AccState::Sum {
                int: 0,
                float: 0.0,
                saw_float: false,
            },
            AccumulatorSpec::Avg(_) => AccState::Avg { sum: 0.0, count: 0 },
            AccumulatorSpec::Push(_) => AccState::Push(Vec::new()),
        }
    }

    /// Feed one document into the running state
    pub fn update(&self, state: &mut AccState, doc: &Document, ctx: &EvalContext) -> Result<()> {
        match (self, state) {
            (AccumulatorSpec::Count, AccState::Count(n)) => {
                *n += 1;
            }
            (AccumulatorSpec::Sum(expr), AccState::Sum { int, float, saw_float }) => {
                match expr.eval(doc, ctx)? {
                    None => {} // absent contributes nothing
                    Some(Value::Int(n)) => *int = int.saturating_add(n),
                    Some(Value::Float(f)) => {
                        *float += f;
                        *saw_float = true;
                    }
                    Some(other) => return Err(numeric_mismatch(&other, "$sum")),
                }
            }
            (AccumulatorSpec::Avg(expr), AccState::Avg { sum, count }) => {
                match expr.eval(doc, ctx)? {
                    None => {} // absent excluded from the denominator too
                    Some(value) => {
                        let f = value
                            .as_f64()
                            .ok_or_else(|| numeric_mismatch(&value, "$avg"))?;
                        *sum += f;
                        *count += 1;
                    }
                }
            }
            (AccumulatorSpec::Push(expr), AccState::Push(items)) => {
                if let Some(value) = expr.eval(doc, ctx)? {
                    items.push(value);
                }
            }
            _ => unreachable!("accumulator state paired with wrong spec"),
        }
        Ok(())
    }

    /// Consume the state into the finalized value. `None` means the
    /// output field is omitted (an Avg that saw no values).
    pub fn finalize(&self, state: AccState) -> Option<Value> {
        match state {
            AccState::Count(n) => Some(Value::Int(n)),
            AccState::Sum { int, float, saw_float } => {
                if saw_float {
                    Some(Value::Float(float + int as f64))
                } else {
                    Some(Value::Int(int))
                }
            }
            AccState::Avg { sum, count } => {
                (count > 0).then(|| Value::Float(sum / count as f64))
            }
            AccState::Push(items) => Some(Value::Array(items)),
        }
    }
}

fn numeric_mismatch(value: &Value, context: &str) -> PipeError {
    PipeError::TypeMismatch {
        expected: "number",
        found: value.type_name(),
        context: context.to_string(),
    }
}
