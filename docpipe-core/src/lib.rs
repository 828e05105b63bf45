// docpipe-core/src/lib.rs
// In-process document aggregation pipeline engine

pub mod accumulator;
pub mod bench;
pub mod document;
pub mod error;
pub mod expr;
pub mod fixtures;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod value;

#[cfg(test)]
mod pipeline_property_tests;

// Public exports
pub use accumulator::{AccState, AccumulatorSpec};
pub use bench::{run_benchmark, time_run, BenchmarkReport, Sample};
pub use document::Document;
pub use error::{PipeError, Result};
pub use expr::{CondOp, Condition, EvalContext, Expr, Predicate};
pub use fixtures::{load_fixtures, FixtureConfig, CONFIGS_COLLECTION, ORDERS_COLLECTION};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use pipeline::{
    GroupStage, LookupStage, MatchStage, Pipeline, ProjectField, ProjectStage, Stage, UnwindStage,
};
pub use store::DocumentStore;
pub use value::{compare_values, Value};
