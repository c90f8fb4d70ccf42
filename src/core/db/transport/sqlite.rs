/// Embedded SQLite transport built on rusqlite.
///
/// SQLite understands the same double-quoted identifiers and savepoint
/// statements as PostgreSQL, so the driver runs unchanged on top of it.
use super::{closed_error, is_utf8, DriverKind, RawResult, Transport};
use crate::core::db::query::StatementType;
use crate::core::db::row::{ColumnInfo, Value};
use crate::core::{DriverError, Result};
use rusqlite::{types::ValueRef, Connection};
use tracing::debug;

#[derive(Debug)]
pub struct SqliteTransport {
    connection: Option<Connection>,
}

impl SqliteTransport {
    /// Opens a database file, or an in-memory database for `:memory:`
    pub fn open(path: &str) -> Result<Self> {
        let connection = Connection::open(path)
            .map_err(|e| DriverError::Connection(format!("cannot open '{}': {}", path, e)))?;

        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        debug!(path, "opened sqlite database");
        Ok(SqliteTransport {
            connection: Some(connection),
        })
    }

    /// Opens a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or_else(closed_error)
    }

    fn pragma_text(&self, pragma: &str) -> Result<String> {
        self.connection()?
            .query_row(&format!("PRAGMA {}", pragma), [], |row| row.get::<_, String>(0))
            .map_err(|e| DriverError::query(pragma, e))
    }
}

impl Transport for SqliteTransport {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn execute(&mut self, sql: &str) -> Result<RawResult> {
        let connection = self.connection()?;
        let mut stmt = connection
            .prepare(sql)
            .map_err(|e| DriverError::query(sql, e))?;

        let columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.decl_type().unwrap_or("")))
            .collect();
        let mutates = StatementType::from_sql(sql).is_mutation();

        if columns.is_empty() {
            let affected = stmt.execute([]).map_err(|e| DriverError::query(sql, e))?;
            return Ok(RawResult::affected(affected as u64));
        }

        let mut rows = Vec::new();
        let mut cursor = stmt.query([]).map_err(|e| DriverError::query(sql, e))?;
        while let Some(row) = cursor.next().map_err(|e| DriverError::query(sql, e))? {
            let mut values = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(|e| DriverError::query(sql, e))?;
                values.push(convert_value(value, &column.type_name));
            }
            rows.push(values);
        }
        drop(cursor);
        drop(stmt);

        let mut result = RawResult::new(columns, rows);
        // INSERT .. RETURNING and friends report both rows and changes
        if mutates {
            result.affected_rows = connection.changes() as u64;
        }
        Ok(result)
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        Ok(self.connection()?.last_insert_rowid())
    }

    fn server_version(&mut self) -> Result<String> {
        self.connection()?;
        Ok(rusqlite::version().to_string())
    }

    fn collation(&mut self) -> Result<String> {
        self.pragma_text("encoding")
    }

    fn client_encoding(&mut self) -> Result<String> {
        self.pragma_text("encoding")
    }

    fn set_client_encoding(&mut self, encoding: &str) -> Result<()> {
        let current = self.client_encoding()?;
        if is_utf8(encoding) && is_utf8(&current) {
            return Ok(());
        }
        Err(DriverError::Unsupported(format!(
            "sqlite database encoding is fixed to {}",
            current
        )))
    }

    fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => connection
                .close()
                .map_err(|(_, e)| DriverError::Connection(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Maps a SQLite value onto the driver's value union.
///
/// Text in columns declared as TIMESTAMP/DATETIME is parsed so that it
/// renders the same way a PostgreSQL timestamp does. DATE columns stay text,
/// as they do on PostgreSQL.
fn convert_value(value: ValueRef, declared_type: &str) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => {
            let text = String::from_utf8_lossy(t).to_string();
            if is_temporal(declared_type) {
                if let Some(ts) = Value::parse_timestamp(&text) {
                    return Value::Timestamp(ts);
                }
            }
            Value::Text(text)
        }
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn is_temporal(declared_type: &str) -> bool {
    declared_type.contains("TIMESTAMP") || declared_type.contains("DATETIME")
}
