//! Error types shared across the pipeline stages.

use thiserror::Error;

/// Model output could not be read as the requested schema.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StructuredOutputError {
    #[error("response is not valid JSON: {reason}")]
    NotJson { reason: String },

    #[error("response JSON is not an object")]
    NotAnObject,

    #[error("response violates schema '{schema}': {}", errors.join("; "))]
    SchemaViolation {
        schema: String,
        errors: Vec<String>,
    },
}

/// Failure at the model invocation boundary.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("model invocation failed: {0}")]
    Model(String),

    #[error(transparent)]
    StructuredOutput(#[from] StructuredOutputError),
}

/// Failure of a single critical-path step (classify or decompose).
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("timed out after {secs:.1}s")]
    Timeout { secs: f64 },

    #[error("unexpected output: {0}")]
    Malformed(String),
}

/// Terminal errors of a pipeline run. Role failures never show up here,
/// they are recorded inside the report instead.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("invalid task: {0}")]
    InvalidInput(String),

    #[error("classification failed: {0}")]
    Classification(#[source] StepError),

    #[error("decomposition failed: {0}")]
    Decomposition(#[source] StepError),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
