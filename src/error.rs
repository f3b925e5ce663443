use thiserror::Error;

/// Errors returned by the analytics engine.
///
/// Insufficient data is never an error: operations that need a minimum
/// sample count return `Ok(None)` or an empty collection instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("detector {0} has no trained model")]
    NotReady(String),

    #[error("{kind} {id} is inactive")]
    Inactive { kind: &'static str, id: String },

    #[error("invalid rule pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scoring worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound { kind, id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

impl From<regex::Error> for EngineError {
    fn from(e: regex::Error) -> Self {
        EngineError::InvalidPattern {
            pattern: String::new(),
            reason: e.to_string(),
        }
    }
}

/// Convenience type alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
