/// Connection Management Module
///
/// This module provides the [`Database`] session type: one owned link to a
/// server plus the per-session state every other driver module works on
/// (current query, current cursor, statement counters and transaction).

use super::cursor::ResultCursor;
use super::transaction::TransactionManager;
use super::transport::{self, closed_error, is_utf8, DriverKind, Transport};
use crate::config::DatabaseConfig;
use crate::core::Result;
use std::fmt;
use tracing::{info, warn};

/// One database session.
///
/// Owned exclusively by its creator. Every operation takes `&mut self`, so
/// statements on one session are strictly sequential. The link is closed
/// exactly once, by [`Database::disconnect`] or on drop.
///
/// The API is blocking. A PostgreSQL session must not be used, or dropped,
/// from inside an async runtime; its calls fail with
/// `DriverError::Connection` there.
pub struct Database {
    config: DatabaseConfig,
    kind: DriverKind,
    transport: Option<Box<dyn Transport>>,
    pub(crate) sql: String,
    pub(crate) cursor: Option<ResultCursor>,
    pub(crate) affected_rows: u64,
    pub(crate) insert_pending: bool,
    /// Table targeted by the most recent INSERT, when it could be read
    pub(crate) insert_table: Option<String>,
    pub(crate) last_insert_id: i64,
    pub(crate) transaction: TransactionManager,
}

impl Database {
    /// Connects to the database described by `config`
    ///
    /// # Errors
    ///
    /// `DriverError::Config` for an unknown driver tag and
    /// `DriverError::Connection` when the server cannot be reached.
    ///
    /// # Examples
    ///
    /// ```
    /// use pgdriver::{config::DatabaseConfig, Database};
    ///
    /// let mut db = Database::connect(DatabaseConfig::sqlite(":memory:"))?;
    /// assert!(db.connected());
    /// # Ok::<(), pgdriver::DriverError>(())
    /// ```
    pub fn connect(config: DatabaseConfig) -> Result<Self> {
        let transport = transport::open(&config)?;
        info!(driver = %transport.kind(), database = %config.database, "database connected");
        Ok(Self::with_transport(config, transport))
    }

    /// Wraps an already open transport
    pub fn with_transport(config: DatabaseConfig, transport: Box<dyn Transport>) -> Self {
        Database {
            kind: transport.kind(),
            config,
            transport: Some(transport),
            sql: String::new(),
            cursor: None,
            affected_rows: 0,
            insert_pending: false,
            insert_table: None,
            last_insert_id: 0,
            transaction: TransactionManager::default(),
        }
    }

    /// Whether the session still holds a link
    pub fn connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Closes the link. Calling it again does nothing.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };

        self.cursor = None;
        self.transaction.reset();
        info!(driver = %self.kind, "database disconnected");
        transport.close()
    }

    /// Selects a database on the open link.
    ///
    /// A PostgreSQL connection is bound to the database it was opened for,
    /// so this only reports success.
    pub fn select(&mut self, _database: &str) -> bool {
        true
    }

    /// Server version string
    pub fn version(&mut self) -> Result<String> {
        self.transport()?.server_version()
    }

    /// Whether the session already talks UTF-8. A closed session does not.
    pub fn has_utf(&mut self) -> bool {
        self.transport()
            .and_then(|transport| transport.client_encoding())
            .is_ok_and(|encoding| is_utf8(&encoding))
    }

    /// Switches the session to UTF-8.
    ///
    /// Returns 0 when the session already uses UTF-8 or was switched, -1
    /// when the switch failed.
    pub fn set_utf(&mut self) -> i32 {
        let switched = self.transport().and_then(|transport| {
            if is_utf8(&transport.client_encoding()?) {
                return Ok(());
            }
            transport.set_client_encoding("UTF8")
        });

        match switched {
            Ok(()) => 0,
            Err(e) => {
                warn!(error = %e, "could not switch client encoding");
                -1
            }
        }
    }

    /// Collation of the connected database
    pub fn collation(&mut self) -> Result<String> {
        self.transport()?.collation()
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    /// Driver tag, as used in configuration
    pub fn driver_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Live table prefix substituted for `#__`
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub(crate) fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport.as_mut().ok_or_else(closed_error)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.kind)
            .field("database", &self.config.database)
            .field("connected", &self.connected())
            .field("sql", &self.sql)
            .field("transaction", &self.transaction)
            .finish()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!(error = %e, "error while closing connection");
        }
    }
}
