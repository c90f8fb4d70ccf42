/// Driver Error Module
///
/// This module defines the error types surfaced by every driver operation.
/// Errors always propagate to the immediate caller; the driver never retries.
use thiserror::Error;

/// Error type for the driver.
///
/// The variants follow the failure domains of a database session:
/// - Connection failures are fatal to the session, the caller must reconnect
/// - Query failures are local to one statement, the session stays usable
/// - Transaction failures are local too, but the caller must still resolve
///   the open transaction with a rollback or a commit
///
/// Running out of rows is not an error; cursor readers return `None`.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Connect, authentication or network failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed SQL, constraint violation or caller contract violation
    #[error("Query error: {message}")]
    Query {
        /// Statement that failed, after prefix substitution
        sql: String,
        /// Message reported by the server or the driver
        message: String,
    },

    /// Invalid transaction or savepoint operation
    #[error("Transaction error: {message}")]
    Transaction {
        /// Savepoint the failed operation referred to, if any
        savepoint: Option<String>,
        /// What went wrong
        message: String,
    },

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A row could not be projected onto the requested record type
    #[error("Decode error: {0}")]
    Decode(String),

    /// Operation not available for the selected driver
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON conversion errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriverError {
    /// Builds a query error for `sql`.
    pub fn query(sql: impl Into<String>, message: impl ToString) -> Self {
        DriverError::Query {
            sql: sql.into(),
            message: message.to_string(),
        }
    }

    /// Builds a transaction error, optionally naming the savepoint involved.
    pub fn transaction(savepoint: Option<&str>, message: impl Into<String>) -> Self {
        DriverError::Transaction {
            savepoint: savepoint.map(str::to_string),
            message: message.into(),
        }
    }

    /// Whether the session must be re-established after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Connection(_))
    }
}

/// Type alias for Result to use DriverError as the error type.
pub type Result<T> = std::result::Result<T, DriverError>;
