//! Error types for the migration library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code for configuration errors (bad YAML, missing credentials).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when either database cannot be reached at startup.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for any other failure surfaced to the CLI.
pub const EXIT_OTHER_ERROR: u8 = 3;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection unavailable or dropped mid-call.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// A table or column the registry expects does not exist on one side.
    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    /// Duplicate key or foreign key violation on insert.
    #[error("Constraint violation in table {table}: {message}")]
    Constraint { table: String, message: String },

    /// A stored value could not be decoded into a [`crate::SqlValue`].
    #[error("Cannot decode {table}.{column}: {message}")]
    Decode {
        table: String,
        column: String,
        message: String,
    },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled before the table was started
    #[error("Migration cancelled")]
    Cancelled,
}

/// Coarse classification of a [`MigrateError`], recorded in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Connection,
    Schema,
    Constraint,
    Decode,
    Transfer,
    Io,
    Cancelled,
}

impl MigrateError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Schema error
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Constraint error
    pub fn constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Constraint {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                ErrorKind::Config
            }
            MigrateError::Connection { .. } => ErrorKind::Connection,
            MigrateError::Schema { .. } => ErrorKind::Schema,
            MigrateError::Constraint { .. } => ErrorKind::Constraint,
            MigrateError::Decode { .. } => ErrorKind::Decode,
            MigrateError::Transfer { .. } => ErrorKind::Transfer,
            MigrateError::Io(_) => ErrorKind::Io,
            MigrateError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Config => EXIT_CONFIG_ERROR,
            ErrorKind::Connection => EXIT_CONNECTION_ERROR,
            ErrorKind::Io => EXIT_IO_ERROR,
            _ => EXIT_OTHER_ERROR,
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

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_exit_code() {
        let err = MigrateError::connection("refused", "connecting to MySQL source");
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.exit_code(), EXIT_CONNECTION_ERROR);

        let err = MigrateError::Config("source.host is required".into());
        assert_eq!(err.exit_code(), EXIT_CONFIG_ERROR);

        let err = MigrateError::constraint("User", "duplicate key");
        assert_eq!(err.kind(), ErrorKind::Constraint);
        assert_eq!(err.exit_code(), EXIT_OTHER_ERROR);

        let err = MigrateError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(err.exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::schema("Lead", "table does not exist");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Schema error for table Lead"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Constraint).unwrap();
        assert_eq!(json, "\"constraint\"");
    }
}
