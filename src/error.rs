//! Error types and the strategy-driven error handler.

use crate::config::ErrorStrategy;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors raised while normalizing documents
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A record failed its validation constraints
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error(transparent)]
    TypeCast(#[from] TypeCastError),

    /// The document nests deeper than `max_nesting_depth`
    #[error("nesting depth {depth} exceeds maximum {max}")]
    NestingDepth { depth: usize, max: usize },

    /// Invalid option or unsupported output format
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A child row already carried a field named like the foreign key
    #[error("foreign key '{field}' collides with an existing field in '{table}'")]
    ForeignKeyCollision { table: String, field: String },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A value that could not be converted to its target type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot cast {value} to {target}: {reason}")]
pub struct TypeCastError {
    pub value: Value,
    pub target: String,
    pub reason: String,
}

impl TypeCastError {
    pub fn new(value: &Value, target: impl Into<String>, reason: impl Into<String>) -> Self {
        TypeCastError {
            value: value.clone(),
            target: target.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NormalizeError>;

/// Routes errors through the configured [`ErrorStrategy`].
///
/// `NestingDepth` is escalated whatever the strategy.
#[derive(Debug, Clone, Copy)]
pub struct ErrorHandler {
    strategy: ErrorStrategy,
}

impl ErrorHandler {
    pub fn new(strategy: ErrorStrategy) -> Self {
        ErrorHandler { strategy }
    }

    pub fn strategy(&self) -> ErrorStrategy {
        self.strategy
    }

    /// Returns `Err` when the error must propagate, `Ok` when the caller
    /// should skip the offending unit and carry on.
    pub fn handle(&self, err: NormalizeError, context: &str) -> Result<()> {
        if matches!(err, NormalizeError::NestingDepth { .. }) {
            error!(context, error = %err, "nesting depth exceeded");
            return Err(err);
        }

        match self.strategy {
            ErrorStrategy::Raise => {
                error!(context, error = %err, "normalization error");
                Err(err)
            }
            ErrorStrategy::Warn => {
                warn!(context, error = %err, "normalization error, continuing");
                Ok(())
            }
            ErrorStrategy::Skip => {
                debug!(context, error = %err, "skipping normalization error");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategies() {
        let err = || NormalizeError::Transform("boom".into());

        assert!(ErrorHandler::new(ErrorStrategy::Raise).handle(err(), "t").is_err());
        assert!(ErrorHandler::new(ErrorStrategy::Warn).handle(err(), "t").is_ok());
        assert!(ErrorHandler::new(ErrorStrategy::Skip).handle(err(), "t").is_ok());
    }

    #[test]
    fn test_nesting_depth_always_escalates() {
        for strategy in [ErrorStrategy::Raise, ErrorStrategy::Warn, ErrorStrategy::Skip] {
            let result = ErrorHandler::new(strategy)
                .handle(NormalizeError::NestingDepth { depth: 11, max: 10 }, "t");
            assert!(matches!(result, Err(NormalizeError::NestingDepth { depth: 11, max: 10 })));
        }
    }

    #[test]
    fn test_cast_error_message() {
        let err = TypeCastError::new(&Value::String("abc".into()), "int", "not a number");
        assert_eq!(err.to_string(), "cannot cast \"abc\" to int: not a number");
    }
}
