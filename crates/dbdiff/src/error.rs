//! Error types for the comparison library.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Main error type for comparison operations.
#[derive(Error, Debug)]
pub enum DiffError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection could not be acquired (pool exhausted, host unreachable).
    #[error("Connection error on {database}: {message}")]
    Connection { database: String, message: String },

    /// A statement failed to execute or its result could not be decoded.
    #[error("Query error on {database}: {message}")]
    Query { database: String, message: String },

    /// A statement exceeded the configured query timeout.
    #[error("Query on {database} timed out after {seconds}s")]
    Timeout { database: String, seconds: u64 },

    /// Chunk boundaries could not be computed for a large table.
    #[error("Chunk planning failed for table {table}: {message}")]
    ChunkPlanning { table: String, message: String },

    /// A run for this table is already queued or executing.
    #[error("Comparison already in progress for table {0}")]
    RunInProgress(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Comparison was cancelled (SIGINT, shutdown, etc.)
    #[error("Comparison cancelled")]
    Cancelled,
}

/// Failure classes reported through the `error_type` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    ConnectionError,
    QueryError,
    ChunkPlanningError,
    ConfigurationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::QueryError => "QueryError",
            ErrorKind::ChunkPlanningError => "ChunkPlanningError",
            ErrorKind::ConfigurationError => "ConfigurationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DiffError {
    /// Create a Connection error for the named data source.
    pub fn connection(database: impl Into<String>, message: impl fmt::Display) -> Self {
        DiffError::Connection {
            database: database.into(),
            message: message.to_string(),
        }
    }

    /// Create a Query error for the named data source.
    pub fn query(database: impl Into<String>, message: impl fmt::Display) -> Self {
        DiffError::Query {
            database: database.into(),
            message: message.to_string(),
        }
    }

    /// Create a ChunkPlanning error.
    pub fn chunk_planning(table: impl Into<String>, message: impl fmt::Display) -> Self {
        DiffError::ChunkPlanning {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Classify the error for metric labels.
    ///
    /// Returns `None` for cancellation, which is not a failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            DiffError::Connection { .. } => Some(ErrorKind::ConnectionError),
            DiffError::Query { .. } | DiffError::Timeout { .. } | DiffError::Json(_) => {
                Some(ErrorKind::QueryError)
            }
            DiffError::ChunkPlanning { .. } => Some(ErrorKind::ChunkPlanningError),
            DiffError::Config(_) | DiffError::Yaml(_) | DiffError::Io(_) => {
                Some(ErrorKind::ConfigurationError)
            }
            DiffError::RunInProgress(_) | DiffError::Cancelled => None,
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            DiffError::Config(_) | DiffError::Yaml(_) => 2,
            DiffError::Connection { .. } => 3,
            _ => 4,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for comparison operations.
pub type Result<T> = std::result::Result<T, DiffError>;
