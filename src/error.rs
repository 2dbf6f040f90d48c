//! Crate-wide error type
//!
//! Every failure a caller can observe carries a kind and a message.

use serde::Serialize;
use thiserror::Error;

use crate::catalog::SchemaError;
use crate::storage::StorageError;

/// Result type for schema and function operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the table manager and function interpreter
#[derive(Error, Debug)]
pub enum Error {
    /// Duplicate or missing table, catalog/schema mismatch
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Malformed or missing caller input
    #[error("validation error: {0}")]
    Validation(String),

    /// A `$` reference that does not resolve
    #[error("binding error: {0}")]
    Binding(String),

    /// Access to a redacted column without privilege
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Opaque storage engine failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Error classification, stable across messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Schema,
    Validation,
    Binding,
    Authorization,
    Storage,
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn binding(msg: impl Into<String>) -> Self {
        Error::Binding(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Error::Authorization(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Schema(_) => ErrorKind::Schema,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Binding(_) => ErrorKind::Binding,
            Error::Authorization(_) => ErrorKind::Authorization,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Structured `{kind, message}` form for callers
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Serialisable error report
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}
