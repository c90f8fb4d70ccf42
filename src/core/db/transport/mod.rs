/// Transport Module
///
/// The client-library seam. A transport owns the live link to a server and
/// runs plain SQL text on it; everything above it (prefix rewriting, cursors,
/// transactions, introspection) is shared driver logic.
///
/// Two transports ship with the crate:
/// - **postgresql** (`postgres.rs`): a PostgreSQL server reached through sqlx
/// - **sqlite** (`sqlite.rs`): an embedded database file or `:memory:`
pub mod postgres;
pub mod sqlite;

pub use postgres::PgTransport;
pub use sqlite::SqliteTransport;

use crate::config::DatabaseConfig;
use crate::core::db::row::{ColumnInfo, Value};
use crate::core::{DriverError, Result};
use std::fmt;
use std::str::FromStr;

/// Everything a transport reports back for one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    /// Column metadata, empty for statements that return no rows
    pub columns: Vec<ColumnInfo>,
    /// All rows, buffered on the client
    pub rows: Vec<Vec<Value>>,
    /// Rows touched by a mutating statement
    pub affected_rows: u64,
}

impl RawResult {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<Value>>) -> Self {
        RawResult {
            columns,
            rows,
            affected_rows: 0,
        }
    }

    /// Result of a statement that only changed rows
    pub fn affected(affected_rows: u64) -> Self {
        RawResult {
            affected_rows,
            ..RawResult::default()
        }
    }

    /// First column of the first row, if any
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Server family a transport talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// PostgreSQL server
    Postgresql,
    /// Embedded SQLite engine
    Sqlite,
}

impl DriverKind {
    /// Canonical driver tag as used in configuration
    pub fn name(self) -> &'static str {
        match self {
            DriverKind::Postgresql => "postgresql",
            DriverKind::Sqlite => "sqlite",
        }
    }

    /// Whether this driver can be used in the current build.
    ///
    /// Both transports are compiled in, so this is a constant probe kept for
    /// callers that select drivers dynamically.
    pub fn is_supported(self) -> bool {
        match self {
            DriverKind::Postgresql | DriverKind::Sqlite => true,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" | "pgsql" => Ok(DriverKind::Postgresql),
            "sqlite" | "sqlite3" => Ok(DriverKind::Sqlite),
            other => Err(DriverError::Config(format!("unknown database driver '{}'", other))),
        }
    }
}

/// A live link to a database server.
///
/// Calls are strictly sequential; a transport never pipelines. Statements
/// are executed as plain text, never prepared.
pub trait Transport: Send + fmt::Debug {
    /// Server family behind this transport
    fn kind(&self) -> DriverKind;

    /// Runs one SQL statement and buffers its full result.
    ///
    /// # Errors
    ///
    /// `DriverError::Query` for statement failures, `DriverError::Connection`
    /// when the link itself is gone.
    fn execute(&mut self, sql: &str) -> Result<RawResult>;

    /// Most recent value generated for an auto-incrementing column in this session
    fn last_insert_id(&mut self) -> Result<i64>;

    /// Server version string, e.g. "16.2"
    fn server_version(&mut self) -> Result<String>;

    /// Collation of the connected database
    fn collation(&mut self) -> Result<String>;

    /// Encoding the session currently uses
    fn client_encoding(&mut self) -> Result<String>;

    /// Switches the session encoding
    fn set_client_encoding(&mut self, encoding: &str) -> Result<()>;

    /// Releases the link. Later calls fail with `DriverError::Connection`.
    fn close(&mut self) -> Result<()>;
}

/// Opens the transport selected by `config.driver`
pub fn open(config: &DatabaseConfig) -> Result<Box<dyn Transport>> {
    match config.driver_kind()? {
        DriverKind::Postgresql => Ok(Box::new(PgTransport::connect(config)?)),
        DriverKind::Sqlite => Ok(Box::new(SqliteTransport::open(&config.database)?)),
    }
}

/// Whether an encoding name denotes UTF-8 ("UTF8", "utf-8", "UNICODE")
pub(crate) fn is_utf8(encoding: &str) -> bool {
    let normalized = encoding.trim().replace(['-', '_'], "").to_uppercase();
    normalized == "UTF8" || normalized == "UNICODE"
}

pub(crate) fn closed_error() -> DriverError {
    DriverError::Connection("connection is closed".to_string())
}
