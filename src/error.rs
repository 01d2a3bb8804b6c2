//! Failures the search reports to its caller.
//!
//! Unmeasurable candidates are not errors: they are recorded with an infinite
//! cost by [`crate::evaluation::Measurement`].

use thiserror::Error;

/// Inconsistent configuration or input.
#[allow(missing_docs)]
#[derive(Debug, Error, PartialEq)]
pub enum SearchError {
    #[error("exploration factor must be finite and non-negative, got {0}")]
    InvalidExplorationFactor(f64),

    #[error("maximum branching factor must be positive")]
    ZeroBranching,

    #[error("transformation pipeline has no stages")]
    EmptyPipeline,

    #[error("unknown transformation kind `{0}`")]
    UnknownTransformation(String),

    #[error("operation `{0}` has no classification entry")]
    MissingClassification(String),

    #[error("classification refers to unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("unknown operation label `{0}`")]
    UnknownLabel(String),
}
