/// Statement Execution Module
///
/// Runs opaque SQL text on a [`Database`], keeps the result cursor and the
/// per-statement bookkeeping (affected rows, generated ids), and exposes the
/// dialect helpers bound to the connection's table prefix.
use super::connection::Database;
use super::cursor::ResultCursor;
use super::dialect::{self, DEFAULT_PREFIX_TOKEN};
use super::row::{Assoc, Value};
use super::transport::{DriverKind, RawResult};
use crate::core::{DriverError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Savepoint used to fence the id lookup inside an open transaction
const INSERT_ID_SAVEPOINT: &str = "pgdriver_insert_id";

/// Last name segment of the target of `INSERT INTO`, quoted or bare
static INSERT_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*INSERT\s+INTO\s+(?:(?:"[^"]*"|[\w$]+)\s*\.\s*)*("[^"]*"|[\w$]+)"#)
        .expect("valid insert target pattern")
});

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementType {
    /// SELECT statement
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// CREATE statement
    Create,
    /// DROP statement
    Drop,
    /// ALTER statement
    Alter,
    /// BEGIN/COMMIT/ROLLBACK and savepoint commands
    Transaction,
    /// Other statement types
    Other,
}

impl StatementType {
    /// Determines the statement type from the leading keyword of a SQL string
    pub fn from_sql(sql: &str) -> Self {
        let keyword = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .next()
            .unwrap_or_default()
            .to_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" | "VALUES" | "SHOW" | "EXPLAIN" => StatementType::Select,
            "INSERT" => StatementType::Insert,
            "UPDATE" => StatementType::Update,
            "DELETE" => StatementType::Delete,
            "CREATE" => StatementType::Create,
            "DROP" => StatementType::Drop,
            "ALTER" => StatementType::Alter,
            "BEGIN" | "START" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
                StatementType::Transaction
            }
            _ => StatementType::Other,
        }
    }

    /// Whether the statement changes rows and reports an affected-row count
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            StatementType::Insert | StatementType::Update | StatementType::Delete
        )
    }
}

impl Database {
    /// Replaces the current query text and invalidates the current cursor.
    pub fn set_query(&mut self, sql: impl Into<String>) -> &mut Self {
        self.sql = sql.into();
        self.cursor = None;
        self
    }

    /// Current query text, before prefix substitution
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Runs the current query and installs a fresh cursor over its result.
    ///
    /// The `#__` token is replaced with the configured prefix first. Any
    /// previous cursor is dropped before the statement is sent, even when the
    /// statement then fails.
    ///
    /// # Errors
    ///
    /// `DriverError::Query` when the server rejects the statement; the
    /// connection stays usable. `DriverError::Connection` when it is closed.
    pub fn execute(&mut self) -> Result<&mut ResultCursor> {
        self.cursor = None;
        let sql = self.replace_prefix(&self.sql);
        let statement = StatementType::from_sql(&sql);

        let raw = self.run(&sql)?;
        self.affected_rows = raw.affected_rows;
        if statement == StatementType::Insert {
            self.insert_pending = true;
            self.insert_table = inserted_table(&sql);
        }

        Ok(self.cursor.insert(ResultCursor::new(raw)))
    }

    /// Shortcut for [`set_query`](Self::set_query) followed by [`execute`](Self::execute)
    pub fn query(&mut self, sql: impl Into<String>) -> Result<&mut ResultCursor> {
        self.set_query(sql);
        self.execute()
    }

    /// Runs several statements in order, stopping at the first failure.
    ///
    /// Each statement goes through [`execute`](Self::execute), so the cursor
    /// afterwards belongs to the last one.
    pub fn query_batch<I, S>(&mut self, statements: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut executed = 0;
        for sql in statements {
            self.query(sql)?;
            executed += 1;
        }
        Ok(executed)
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Rows in the current result, whether read or not
    pub fn num_rows(&self) -> usize {
        self.cursor.as_ref().map_or(0, ResultCursor::num_rows)
    }

    /// Value generated for an auto-incrementing column by the last INSERT.
    ///
    /// Returns 0 until an INSERT on this connection has advanced a sequence.
    /// The value is looked up once per INSERT, so repeated calls agree.
    /// On PostgreSQL it is the current value of the sequence owned by the
    /// inserted table, so sequences advanced by later statements do not
    /// leak in. When the lookup fails the last known value is returned.
    pub fn insert_id(&mut self) -> i64 {
        if !self.insert_pending {
            return self.last_insert_id;
        }

        match self.fetch_insert_id() {
            Ok(id) => {
                self.last_insert_id = id;
                self.insert_pending = false;
            }
            Err(e) => warn!(error = %e, "could not read the generated id"),
        }
        self.last_insert_id
    }

    fn fetch_insert_id(&mut self) -> Result<i64> {
        if self.kind() != DriverKind::Postgresql {
            return self.transport()?.last_insert_id();
        }
        // currval() raises when the sequence was not used yet, which would
        // abort an open PostgreSQL transaction
        if !self.transaction.is_active() {
            return self.inserted_sequence_value();
        }

        let savepoint = dialect::quote_name(INSERT_ID_SAVEPOINT, None);
        self.run(&format!("SAVEPOINT {}", savepoint))?;
        let id = self.inserted_sequence_value();
        if id.is_err() {
            self.run(&format!("ROLLBACK TO SAVEPOINT {}", savepoint))?;
        }
        self.run(&format!("RELEASE SAVEPOINT {}", savepoint))?;
        id
    }

    /// `currval` of the sequence owned by the table of the last INSERT
    fn inserted_sequence_value(&mut self) -> Result<i64> {
        let Some(table) = self.insert_table.clone() else {
            return self.transport()?.last_insert_id();
        };
        let Some(sequence) = self.table_sequences(&table)?.into_iter().next() else {
            return Ok(0);
        };

        let qualified = format!(
            "{}.{}",
            dialect::quote_name(&sequence.schema, None),
            dialect::quote_name(&sequence.sequence, None)
        );
        let sql = format!("SELECT currval({})", dialect::quote(&qualified, true));
        let raw = self.run(&sql)?;
        raw.scalar()
            .and_then(Value::as_i64)
            .ok_or_else(|| DriverError::query(sql, "sequence returned no value"))
    }

    /// Execution plan of the current query, one line per entry
    pub fn explain(&mut self) -> Result<Vec<String>> {
        let sql = self.replace_prefix(&self.sql);
        let plan = match self.kind() {
            DriverKind::Postgresql => self.run(&format!("EXPLAIN {}", sql))?,
            DriverKind::Sqlite => self.run(&format!("EXPLAIN QUERY PLAN {}", sql))?,
        };

        // the plan text is the last column for both servers
        Ok(plan
            .rows
            .iter()
            .filter_map(|row| row.last())
            .map(ToString::to_string)
            .collect())
    }

    /// Renames a table together with the sequences and indexes named after it.
    ///
    /// # Errors
    ///
    /// `DriverError::Query` when `old_name` is not a table of this database.
    pub fn rename_table(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if !self.table_list()?.iter().any(|t| t == old_name) {
            return Err(DriverError::query(
                format!("ALTER TABLE {} RENAME", old_name),
                format!("table '{}' does not exist", old_name),
            ));
        }

        if self.kind() == DriverKind::Postgresql {
            for sequence in self.table_sequences(old_name)? {
                let renamed = sequence.sequence.replace(old_name, new_name);
                self.run(&format!(
                    "ALTER SEQUENCE {} RENAME TO {}",
                    dialect::quote_name(&sequence.sequence, None),
                    dialect::quote_name(&renamed, None)
                ))?;
            }

            for index in self.index_names(old_name)? {
                if !index.contains(old_name) {
                    continue;
                }
                let renamed = index.replace(old_name, new_name);
                self.run(&format!(
                    "ALTER INDEX {} RENAME TO {}",
                    dialect::quote_name(&index, None),
                    dialect::quote_name(&renamed, None)
                ))?;
            }
        }

        self.run(&format!(
            "ALTER TABLE {} RENAME TO {}",
            dialect::quote_name(old_name, None),
            dialect::quote_name(new_name, None)
        ))?;
        debug!(old_name, new_name, "renamed table");
        Ok(())
    }

    /// Statement that creates a database owned by `owner`
    pub fn create_database_query(&self, database: &str, owner: &str, utf: bool) -> String {
        dialect::create_database_query(database, owner, utf)
    }

    /// Statement that makes UTF-8 the client encoding of `database`
    pub fn alter_db_character_set_query(&self, database: &str) -> String {
        dialect::alter_db_character_set_query(database)
    }

    /// Inserts the scalar fields of `object` as one row of `table`.
    ///
    /// NULL and binary fields are skipped. When `key` names a field, it is
    /// set to the generated id afterwards.
    pub fn insert_object(&mut self, table: &str, object: &mut Assoc, key: Option<&str>) -> Result<()> {
        let (columns, values): (Vec<String>, Vec<String>) = object
            .iter()
            .filter_map(|(name, value)| sql_literal(value).map(|v| (dialect::quote_name(name, None), v)))
            .unzip();

        self.query(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect::quote_name(table, None),
            columns.join(","),
            values.join(",")
        ))?;

        if let Some(key) = key {
            let id = self.insert_id();
            if id != 0 {
                object.insert(key, id);
            }
        }
        Ok(())
    }

    /// Updates the row of `table` whose `key` column matches `object[key]`.
    ///
    /// NULL fields are written only when `update_nulls` is set. Returns
    /// whether anything was left to update.
    pub fn update_object(&mut self, table: &str, object: &Assoc, key: &str, update_nulls: bool) -> Result<bool> {
        let key_value = object
            .get(key)
            .and_then(sql_literal)
            .ok_or_else(|| DriverError::query(table, format!("object has no usable '{}' field", key)))?;

        let assignments: Vec<String> = object
            .iter()
            .filter(|(name, _)| *name != key)
            .filter_map(|(name, value)| {
                let literal = match value {
                    Value::Null if update_nulls => Some("NULL".to_string()),
                    other => sql_literal(other),
                };
                literal.map(|v| format!("{} = {}", dialect::quote_name(name, None), v))
            })
            .collect();

        if assignments.is_empty() {
            return Ok(false);
        }

        self.query(format!(
            "UPDATE {} SET {} WHERE {} = {}",
            dialect::quote_name(table, None),
            assignments.join(", "),
            dialect::quote_name(key, None),
            key_value
        ))?;
        Ok(true)
    }

    /// See [`dialect::quote_name`]
    pub fn quote_name(&self, name: &str, alias: Option<&str>) -> String {
        dialect::quote_name(name, alias)
    }

    /// See [`dialect::quote_names`]
    pub fn quote_names(&self, names: &[&str], aliases: Option<&[Option<&str>]>) -> Result<Vec<String>> {
        dialect::quote_names(names, aliases)
    }

    /// See [`dialect::escape`]
    pub fn escape(&self, text: &str, extra: bool) -> String {
        dialect::escape(text, extra)
    }

    /// See [`dialect::quote`]
    pub fn quote(&self, text: &str, escape: bool) -> String {
        dialect::quote(text, escape)
    }

    /// Substitutes the configured prefix for the default `#__` token
    pub fn replace_prefix(&self, sql: &str) -> String {
        self.replace_prefix_token(sql, DEFAULT_PREFIX_TOKEN)
    }

    /// Substitutes the configured prefix for an arbitrary token
    pub fn replace_prefix_token(&self, sql: &str, token: &str) -> String {
        dialect::replace_prefix(sql, token, self.prefix())
    }

    /// Sends one statement to the transport without touching the cursor
    pub(crate) fn run(&mut self, sql: &str) -> Result<RawResult> {
        debug!(sql, "executing statement");
        self.transport()?.execute(sql)
    }

    /// Index names of a PostgreSQL table
    fn index_names(&mut self, table: &str) -> Result<Vec<String>> {
        let raw = self.run(&format!(
            "SELECT indexname FROM pg_catalog.pg_indexes WHERE tablename = {}",
            dialect::quote(table, true)
        ))?;
        Ok(raw
            .rows
            .iter()
            .filter_map(|row| row.first())
            .map(ToString::to_string)
            .collect())
    }
}

/// Unquoted name of the table an INSERT writes to
fn inserted_table(sql: &str) -> Option<String> {
    let target = INSERT_TARGET.captures(sql)?.get(1)?.as_str();
    Some(target.trim_matches('"').to_string())
}

/// SQL literal for a scalar value; `None` for values that are not written
fn sql_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bytes(_) => None,
        Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Text(_) | Value::Timestamp(_) => Some(dialect::quote(&value.to_string(), true)),
    }
}
