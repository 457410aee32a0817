//! Error types for the CRUD core.

use std::fmt;

/// Result type for CRUD and query operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the CRUD core.
///
/// A missing primary key is never an error: `find`, `update` and `delete`
/// report it as `Ok(None)`. Everything below is fatal for the single request
/// that raised it and is never retried by this crate.
#[derive(Debug, Clone)]
pub enum Error {
    /// A filter, sort or projection expression could not be parsed.
    ///
    /// Common causes:
    /// - Unbalanced parentheses or quotes
    /// - Unknown member or method name
    /// - Placeholder `@n` without a matching argument
    ///
    /// **Recovery:** the caller must correct the expression.
    QueryError(String),

    /// A well-formed expression failed while being evaluated against a row.
    ///
    /// Raised for type mismatches (`Title > 3`), non-boolean filter results
    /// and integer division by zero.
    EvaluationError(String),

    /// Converting an entity into a row failed.
    ///
    /// Entities must serialize into a JSON object.
    SerializationError(String),

    /// Converting a stored row back into an entity failed.
    DeserializationError(String),

    /// An entity or request was rejected before reaching the store.
    ///
    /// This is raised when:
    /// - `Entity::validate()` returns an error
    /// - An update tries to change the primary key
    /// - The same row is tracked twice in one unit of work
    ValidationError(String),

    /// The data store refused or failed a read or a commit.
    ///
    /// Common causes:
    /// - Duplicate primary key on insert
    /// - Row removed by a concurrent unit of work (concurrency conflict)
    /// - Connectivity failure in a remote store
    PersistenceError(String),

    /// Invalid service configuration.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::QueryError(msg) => write!(f, "Query error: {}", msg),
            Error::EvaluationError(msg) => write!(f, "Evaluation error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::PersistenceError(msg) => write!(f, "Persistence error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// True for errors caused by a malformed or ill-typed expression.
    pub fn is_query_error(&self) -> bool {
        matches!(self, Error::QueryError(_) | Error::EvaluationError(_))
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::QueryError("unexpected token".to_string());
        assert_eq!(err.to_string(), "Query error: unexpected token");

        let err = Error::PersistenceError("duplicate key".to_string());
        assert_eq!(err.to_string(), "Persistence error: duplicate key");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_is_query_error() {
        assert!(Error::QueryError("x".into()).is_query_error());
        assert!(Error::EvaluationError("x".into()).is_query_error());
        assert!(!Error::PersistenceError("x".into()).is_query_error());
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(Error::from(parse), Error::DeserializationError(_)));
    }
}
