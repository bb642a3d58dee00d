//! Error types for the migration core.

use thiserror::Error;

use crate::engine::{EngineError, ErrorCode};

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine-level failure surfaced through a handle. Transient; the caller
    /// retries on the next tick.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// A registry binding cycle failed. Cached bindings are left intact and
    /// the caller schedules a retry.
    #[error("Binding failed for table {table}: {message}")]
    Binding { table: String, message: String },

    /// API misuse (a precondition the caller is responsible for was violated).
    #[error("Misuse: {0}")]
    Misuse(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Binding error with the table it occurred for.
    pub fn binding(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Binding {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Misuse error.
    pub fn misuse(message: impl Into<String>) -> Self {
        MigrateError::Misuse(message.into())
    }

    /// Whether the underlying engine error was marked ignorable.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, MigrateError::Engine(e) if e.ignorable)
    }

    /// Whether this is the distinguished missing-column error used by the
    /// auto-add-column retry.
    pub fn is_no_such_column(&self) -> bool {
        matches!(self, MigrateError::Engine(e) if e.code == ErrorCode::NoSuchColumn)
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
