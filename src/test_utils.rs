/// # Test Utilities Module
///
/// Shared testing infrastructure for the driver:
/// - `DatabaseFixture`: an embedded database loaded with the `jos_dbtest`
///   and `jos_assets` tables
/// - `ScriptedTransport`: a PostgreSQL stand-in that records every
///   statement and answers from a script, for paths that need a server
use crate::config::DatabaseConfig;
use crate::core::db::row::{ColumnInfo, Value};
use crate::core::db::transport::{closed_error, DriverKind, RawResult, SqliteTransport, Transport};
use crate::core::db::Database;
use crate::core::{DriverError, Result};
use std::sync::{Arc, Mutex};

/// Statements that build the fixture schema
const FIXTURE_SCHEMA: [&str; 5] = [
    "CREATE TABLE jos_dbtest (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title VARCHAR(50) NOT NULL,
        start_date TIMESTAMP NOT NULL,
        description TEXT NOT NULL
    )",
    "CREATE TABLE jos_assets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NOT NULL DEFAULT 0,
        lft INTEGER NOT NULL DEFAULT 0,
        rgt INTEGER NOT NULL DEFAULT 0,
        name VARCHAR(50) NOT NULL
    )",
    "CREATE INDEX jos_assets_idx_parent_id ON jos_assets (parent_id)",
    "CREATE INDEX jos_assets_idx_lft_rgt ON jos_assets (lft, rgt)",
    "CREATE UNIQUE INDEX idx_asset_name ON jos_assets (name)",
];

/// Rows of `jos_dbtest`: id, title, description
pub const DBTEST_ROWS: [(i64, &str, &str); 4] = [
    (1, "Testing", "one"),
    (2, "Testing2", "one"),
    (3, "Testing3", "three"),
    (4, "Testing4", "four"),
];

/// `start_date` shared by every fixture row
pub const DBTEST_START_DATE: &str = "1980-04-18 00:00:00";

/// Isolated database test fixture
pub struct DatabaseFixture {
    pub db: Database,
}

impl DatabaseFixture {
    /// Private in-memory database with the standard tables and rows
    pub fn new() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Same fixture in a database file, e.g. under a temporary directory
    pub fn open(path: &str) -> Result<Self> {
        let transport = SqliteTransport::open(path)?;
        let db = Database::with_transport(DatabaseConfig::sqlite(path), Box::new(transport));
        let mut fixture = DatabaseFixture { db };
        fixture.setup_standard_schema()?;
        fixture.populate_sample_data()?;
        Ok(fixture)
    }

    fn setup_standard_schema(&mut self) -> Result<()> {
        for statement in FIXTURE_SCHEMA {
            self.db.run(statement)?;
        }
        Ok(())
    }

    fn populate_sample_data(&mut self) -> Result<()> {
        for (id, title, description) in DBTEST_ROWS {
            self.db.run(&format!(
                "INSERT INTO jos_dbtest (id, title, start_date, description) VALUES ({}, '{}', '{}', '{}')",
                id, title, DBTEST_START_DATE, description
            ))?;
        }
        self.db.run(
            "INSERT INTO jos_assets (parent_id, lft, rgt, name) VALUES (0, 0, 1, 'root.1')",
        )?;
        Ok(())
    }
}

/// Shared record of the statements a [`ScriptedTransport`] received
#[derive(Debug, Clone, Default)]
pub struct StatementLog(Arc<Mutex<Vec<String>>>);

impl StatementLog {
    pub fn statements(&self) -> Vec<String> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn push(&self, sql: &str) {
        if let Ok(mut log) = self.0.lock() {
            log.push(sql.to_string());
        }
    }
}

/// PostgreSQL stand-in answering from a script.
///
/// Statements starting with a scripted prefix get the scripted result;
/// statements containing a failure fragment fail with a query error; all
/// others succeed with an empty result.
#[derive(Debug)]
pub struct ScriptedTransport {
    log: StatementLog,
    responses: Vec<(String, RawResult)>,
    failures: Vec<String>,
    encoding: String,
    collation: String,
    closed: bool,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        ScriptedTransport {
            log: StatementLog::default(),
            responses: Vec::new(),
            failures: Vec::new(),
            encoding: "UTF8".to_string(),
            collation: "en_US.UTF-8".to_string(),
            closed: false,
        }
    }

    /// Handle on the statement log, valid after the transport is moved
    pub fn log(&self) -> StatementLog {
        self.log.clone()
    }

    pub fn respond(mut self, prefix: &str, result: RawResult) -> Self {
        self.responses.push((prefix.to_string(), result));
        self
    }

    /// Single text column result
    pub fn respond_column(self, prefix: &str, column: &str, values: &[&str]) -> Self {
        let rows = values.iter().map(|v| vec![Value::from(*v)]).collect();
        self.respond(prefix, RawResult::new(vec![ColumnInfo::new(column, "text")], rows))
    }

    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.failures.push(fragment.to_string());
        self
    }

    pub fn with_encoding(mut self, encoding: &str) -> Self {
        self.encoding = encoding.to_string();
        self
    }

    pub fn with_collation(mut self, collation: &str) -> Self {
        self.collation = collation.to_string();
        self
    }
}

impl Transport for ScriptedTransport {
    fn kind(&self) -> DriverKind {
        DriverKind::Postgresql
    }

    fn execute(&mut self, sql: &str) -> Result<RawResult> {
        if self.closed {
            return Err(closed_error());
        }
        self.log.push(sql);

        if self.failures.iter().any(|fragment| sql.contains(fragment.as_str())) {
            return Err(DriverError::query(sql, "scripted failure"));
        }
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }

    /// Answers `SELECT lastval()` from the script like any other statement
    fn last_insert_id(&mut self) -> Result<i64> {
        let sql = "SELECT lastval()";
        self.execute(sql)?
            .scalar()
            .and_then(Value::as_i64)
            .ok_or_else(|| DriverError::query(sql, "lastval is not yet defined in this session"))
    }

    fn server_version(&mut self) -> Result<String> {
        Ok("16.2".to_string())
    }

    fn collation(&mut self) -> Result<String> {
        Ok(self.collation.clone())
    }

    fn client_encoding(&mut self) -> Result<String> {
        Ok(self.encoding.clone())
    }

    fn set_client_encoding(&mut self, encoding: &str) -> Result<()> {
        self.execute(&format!("SET client_encoding TO '{}'", encoding))?;
        self.encoding = encoding.to_string();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A [`Database`] over a [`ScriptedTransport`], plus its statement log
pub fn scripted_database(transport: ScriptedTransport) -> (Database, StatementLog) {
    let log = transport.log();
    let config = DatabaseConfig::postgresql("localhost", "joomla_ut", "utuser", "ut1234");
    (Database::with_transport(config, Box::new(transport)), log)
}
