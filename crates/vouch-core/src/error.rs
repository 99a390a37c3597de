//! Error types for the Vouch runtime
//!
//! All fallible operations return `Result<T, Error>`.
//! Validation failures are *not* errors: they are reported as data in
//! [`crate::ValidationVerdict`] and [`crate::DecodeResult`].

use thiserror::Error;

/// Vouch runtime error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Syntax violation in an invariant expression
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The output schema is not a valid JSON Schema
    #[error("Invalid schema: {0}")]
    SchemaError(String),

    /// A schema locator could not be resolved to a document
    #[error("Schema '{locator}' could not be loaded: {reason}")]
    SchemaLoadError { locator: String, reason: String },

    /// The contract is missing required fields or is otherwise malformed
    #[error("Invalid contract: {0}")]
    ContractError(String),

    /// The generator failed on the final round of the budget
    #[error("Generation failed after {rounds} round(s): {message}")]
    GenerationError { rounds: u32, message: String },

    /// The caller-supplied deadline elapsed before a terminal state
    #[error("Decode deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    /// An invariant expression failed while being evaluated
    #[error("Evaluation error: {0}")]
    EvaluationError(String),
}

impl Error {
    /// Configuration errors are fatal and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::ParseError(_)
                | Error::SchemaError(_)
                | Error::SchemaLoadError { .. }
                | Error::ContractError(_)
        )
    }
}

/// Result type alias for Vouch operations
pub type Result<T> = std::result::Result<T, Error>;
