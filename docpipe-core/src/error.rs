// src/error.rs
// Error taxonomy for the pipeline engine

use thiserror::Error;

/// Result type used throughout docpipe-core
pub type Result<T> = std::result::Result<T, PipeError>;

/// Errors surfaced by the pipeline engine
///
/// An absent field is NOT an error: field access yields `None` and each
/// stage decides how to handle it. Only genuine type conflicts and
/// malformed pipeline descriptions become `PipeError`.
#[derive(Error, Debug)]
pub enum PipeError {
    /// An operator received an operand of an incompatible type.
    /// Aborts the current pipeline run.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        context: String,
    },

    /// Pipeline description referenced a stage kind no executor exists for.
    /// Raised at construction time, before any document is processed.
    #[error("unknown pipeline stage: {0}")]
    UnknownStage(String),

    /// Malformed stage, accumulator or expression specification.
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A stage or run referenced a collection the store does not hold.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Wrapper added by the runner so a failed run names the stage that
    /// raised the underlying error.
    #[error("stage {index} (${kind}) failed: {source}")]
    StageFailed {
        index: usize,
        kind: &'static str,
        #[source]
        source: Box<PipeError>,
    },

    /// Benchmark harness misuse (e.g. zero iterations).
    #[error("benchmark error: {0}")]
    Benchmark(String),

    /// JSON (de)serialization failure while parsing a pipeline description.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
