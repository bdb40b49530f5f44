//! Error types for relset.
//!
//! Every fallible operation in the workspace reports one [`Error`]. The variants
//! follow the moment a problem is detected:
//!
//! - **Construction-time contract violations** (`Argument`, `InvalidState`) are
//!   raised by the call that violates the contract, never deferred.
//! - **Mapping failures** (`Mapping`) are raised when a column mapper is built.
//! - **Scope violations** (`Scope`) are raised when a statement is built.
//! - **Evaluation failures** (`Overflow`, `DivideByZero`, `Type`) are raised
//!   while computing values in memory.
//! - **Interchange failures** (`Format`) are raised while reading JSON.
//! - **Backend failures** (`Query`) are reported by a `Connection`.

use std::fmt;

/// Convenient result alias used throughout relset.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type.
#[derive(Debug)]
pub enum Error {
    /// A call violated an argument contract (empty key, mixed models, ...).
    Argument(String),
    /// An object was used in a state that does not allow the operation.
    InvalidState(String),
    /// A column mapping could not be resolved.
    Mapping(String),
    /// An expression referenced a model outside the statement's scope.
    Scope(String),
    /// Checked arithmetic overflowed.
    Overflow(String),
    /// Integer division or remainder by zero.
    DivideByZero,
    /// A value had the wrong type or could not be converted.
    Type(TypeError),
    /// Malformed interchange input.
    Format(String),
    /// The backend rejected or failed a statement.
    Query(QueryError),
    /// Anything else.
    Custom(String),
}

/// Details about a value type mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    /// The type that was required.
    pub expected: &'static str,
    /// The type (or value) that was found.
    pub actual: String,
    /// The column involved, when known.
    pub column: Option<String>,
}

/// Details about a failed backend statement.
#[derive(Debug)]
pub struct QueryError {
    /// Human readable message.
    pub message: String,
    /// The SQL text that failed, when available.
    pub sql: Option<String>,
    /// The underlying driver error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn argument(message: impl Into<String>) -> Self {
        Error::Argument(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Error::Mapping(message.into())
    }

    pub fn scope(message: impl Into<String>) -> Self {
        Error::Scope(message.into())
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Error::Overflow(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    /// Build a type mismatch error.
    pub fn type_mismatch(expected: &'static str, actual: impl Into<String>) -> Self {
        Error::Type(TypeError {
            expected,
            actual: actual.into(),
            column: None,
        })
    }

    /// Attach a column name to a type error; other variants pass through.
    #[must_use]
    pub fn with_column(self, column: &str) -> Self {
        match self {
            Error::Type(mut e) => {
                e.column = Some(column.to_string());
                Error::Type(e)
            }
            other => other,
        }
    }

    /// Build a backend error for the given SQL text.
    pub fn query(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Error::Query(QueryError {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        })
    }

    /// True for the construction-time contract violations.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Argument(_) | Error::InvalidState(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Argument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Mapping(msg) => write!(f, "Mapping error: {}", msg),
            Error::Scope(msg) => write!(f, "Scope error: {}", msg),
            Error::Overflow(msg) => write!(f, "Arithmetic overflow: {}", msg),
            Error::DivideByZero => write!(f, "Division by zero"),
            Error::Type(e) => write!(f, "{}", e),
            Error::Format(msg) => write!(f, "Format error: {}", msg),
            Error::Query(e) => write!(f, "{}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(col) => write!(
                f,
                "Type error in column '{}': expected {}, found {}",
                col, self.expected, self.actual
            ),
            None => write!(
                f,
                "Type error: expected {}, found {}",
                self.expected, self.actual
            ),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "Query error: {} (sql: {})", self.message, sql),
            None => write!(f, "Query error: {}", self.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Format(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_error_with_column() {
        let err = Error::type_mismatch("INTEGER", "TEXT").with_column("age");
        assert_eq!(
            err.to_string(),
            "Type error in column 'age': expected INTEGER, found TEXT"
        );
    }

    #[test]
    fn test_contract_violation_classification() {
        assert!(Error::argument("empty key").is_contract_violation());
        assert!(Error::invalid_state("built").is_contract_violation());
        assert!(!Error::DivideByZero.is_contract_violation());
    }

    #[test]
    fn test_query_error_display_includes_sql() {
        let err = Error::query("syntax error", "SELEC 1");
        assert_eq!(err.to_string(), "Query error: syntax error (sql: SELEC 1)");
    }
}
