/// PostgreSQL transport built on sqlx.
///
/// The driver API is synchronous, so the transport owns a current-thread
/// tokio runtime and blocks on each call. Statements go out as plain text
/// over the simple-query protocol: nothing is prepared and results arrive in
/// text format, which is decoded by column type.
///
/// Because every call blocks on the owned runtime, a `PgTransport` (and the
/// `Database` holding it) must not be used from inside an async context.
/// Calls made there fail with `DriverError::Connection` instead of blocking
/// the caller's executor.
use super::{closed_error, is_utf8, DriverKind, RawResult, Transport};
use crate::config::DatabaseConfig;
use crate::core::db::dialect;
use crate::core::db::row::{ColumnInfo, Value};
use crate::core::{DriverError, Result};
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Either, Executor, Row, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::{debug, info};

#[derive(Debug)]
pub struct PgTransport {
    runtime: Runtime,
    connection: Option<PgConnection>,
}

impl PgTransport {
    /// Connects using the host, credentials and database from `config`
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        ensure_blocking_allowed()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DriverError::Connection(format!("cannot start runtime: {}", e)))?;

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        if let Some(port) = config.port {
            options = options.port(port);
        }

        let connection = runtime
            .block_on(PgConnection::connect_with(&options))
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        info!(host = %config.host, database = %config.database, "connected to postgresql");
        Ok(PgTransport {
            runtime,
            connection: Some(connection),
        })
    }

    /// First column of the first row of `sql`, as text
    fn scalar_text(&mut self, sql: &str) -> Result<String> {
        let result = self.execute(sql)?;
        Ok(result
            .scalar()
            .map(ToString::to_string)
            .unwrap_or_default())
    }
}

impl Transport for PgTransport {
    fn kind(&self) -> DriverKind {
        DriverKind::Postgresql
    }

    fn execute(&mut self, sql: &str) -> Result<RawResult> {
        ensure_blocking_allowed()?;
        let connection = self.connection.as_mut().ok_or_else(closed_error)?;
        let items: Vec<Either<_, PgRow>> = self
            .runtime
            .block_on((&mut *connection).fetch_many(sql).try_collect())
            .map_err(|e| map_error(sql, e))?;

        let mut result = RawResult::default();
        for item in items {
            match item {
                Either::Left(done) => result.affected_rows += done.rows_affected(),
                Either::Right(row) => {
                    if result.columns.is_empty() {
                        result.columns = row
                            .columns()
                            .iter()
                            .map(|c| ColumnInfo::new(c.name(), c.type_info().name()))
                            .collect();
                    }
                    result.rows.push(decode_row(&row, &result.columns));
                }
            }
        }
        Ok(result)
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        let result = self.execute("SELECT lastval()")?;
        Ok(result.scalar().and_then(Value::as_i64).unwrap_or(0))
    }

    fn server_version(&mut self) -> Result<String> {
        // "16.2 (Debian 16.2-1.pgdg120+2)" -> "16.2"
        let version = self.scalar_text("SHOW server_version")?;
        Ok(version
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    fn collation(&mut self) -> Result<String> {
        self.scalar_text("SELECT datcollate FROM pg_catalog.pg_database WHERE datname = current_database()")
    }

    fn client_encoding(&mut self) -> Result<String> {
        self.scalar_text("SHOW client_encoding")
    }

    fn set_client_encoding(&mut self, encoding: &str) -> Result<()> {
        let encoding = if is_utf8(encoding) { "UTF8" } else { encoding };
        self.execute(&format!(
            "SET client_encoding TO {}",
            dialect::quote(encoding, true)
        ))
        .map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => {
                // inside a runtime the connection is dropped without a Terminate message
                ensure_blocking_allowed()?;
                debug!("closing postgresql connection");
                self.runtime
                    .block_on(connection.close())
                    .map_err(|e| DriverError::Connection(e.to_string()))
            }
            None => Ok(()),
        }
    }
}

/// Fails when called from a thread that is driving a tokio runtime
fn ensure_blocking_allowed() -> Result<()> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(DriverError::Connection(
            "the blocking postgresql driver cannot run inside an async runtime".to_string(),
        ));
    }
    Ok(())
}

/// Splits sqlx failures into statement errors and link errors
fn map_error(sql: &str, error: sqlx::Error) -> DriverError {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
            DriverError::Connection(error.to_string())
        }
        other => DriverError::query(sql, other),
    }
}

/// How a column is decoded, chosen by its PostgreSQL type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnDecoding {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Timestamp,
    /// `timestamptz`, normalised to UTC without an offset
    TimestampTz,
    Bytes,
    Text,
}

impl ColumnDecoding {
    fn for_type(type_name: &str) -> Self {
        match type_name {
            "BOOL" => ColumnDecoding::Bool,
            "INT2" => ColumnDecoding::Int2,
            "INT4" => ColumnDecoding::Int4,
            "INT8" => ColumnDecoding::Int8,
            "FLOAT4" => ColumnDecoding::Float4,
            "FLOAT8" => ColumnDecoding::Float8,
            "TIMESTAMP" => ColumnDecoding::Timestamp,
            "TIMESTAMPTZ" => ColumnDecoding::TimestampTz,
            "BYTEA" => ColumnDecoding::Bytes,
            // DATE stays text, "YYYY-MM-DD"
            _ => ColumnDecoding::Text,
        }
    }
}

fn decode_row(row: &PgRow, columns: &[ColumnInfo]) -> Vec<Value> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| decode_value(row, i, ColumnDecoding::for_type(&column.type_name)))
        .collect()
}

/// Decodes one column, falling back to text
fn decode_value(row: &PgRow, index: usize, decoding: ColumnDecoding) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let typed = match decoding {
        ColumnDecoding::Bool => row.try_get::<bool, _>(index).map(Value::Bool),
        ColumnDecoding::Int2 => row.try_get::<i16, _>(index).map(|v| Value::Integer(v.into())),
        ColumnDecoding::Int4 => row.try_get::<i32, _>(index).map(|v| Value::Integer(v.into())),
        ColumnDecoding::Int8 => row.try_get::<i64, _>(index).map(Value::Integer),
        ColumnDecoding::Float4 => row.try_get::<f32, _>(index).map(|v| Value::Float(v.into())),
        ColumnDecoding::Float8 => row.try_get::<f64, _>(index).map(Value::Float),
        ColumnDecoding::Timestamp => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(Value::Timestamp),
        ColumnDecoding::TimestampTz => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|ts| Value::Timestamp(ts.naive_utc())),
        ColumnDecoding::Bytes => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        ColumnDecoding::Text => row.try_get_unchecked::<String, _>(index).map(Value::Text),
    };

    typed
        .or_else(|_| row.try_get_unchecked::<String, _>(index).map(Value::Text))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_failures_are_fatal() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        let error = map_error("SELECT 1", io);
        assert!(matches!(error, DriverError::Connection(_)));
        assert!(error.is_fatal());

        assert!(map_error("SELECT 1", sqlx::Error::PoolClosed).is_fatal());
    }

    #[test]
    fn test_statement_failures_keep_the_session() {
        let protocol = map_error("SELEC 1", sqlx::Error::Protocol("unexpected message".to_string()));
        match &protocol {
            DriverError::Query { sql, message } => {
                assert_eq!(sql, "SELEC 1");
                assert!(message.contains("unexpected message"));
            }
            other => panic!("Expected Query error, got {:?}", other),
        }
        assert!(!protocol.is_fatal());

        let missing = map_error("SELECT 1 WHERE false", sqlx::Error::RowNotFound);
        assert!(matches!(missing, DriverError::Query { .. }));
        assert!(!missing.is_fatal());
    }

    #[test]
    fn test_column_decoding_by_type_name() {
        let cases = [
            ("BOOL", ColumnDecoding::Bool),
            ("INT2", ColumnDecoding::Int2),
            ("INT4", ColumnDecoding::Int4),
            ("INT8", ColumnDecoding::Int8),
            ("FLOAT4", ColumnDecoding::Float4),
            ("FLOAT8", ColumnDecoding::Float8),
            ("TIMESTAMP", ColumnDecoding::Timestamp),
            ("TIMESTAMPTZ", ColumnDecoding::TimestampTz),
            ("BYTEA", ColumnDecoding::Bytes),
            ("DATE", ColumnDecoding::Text),
            ("VARCHAR", ColumnDecoding::Text),
            ("NUMERIC", ColumnDecoding::Text),
        ];
        for (type_name, expected) in cases {
            assert_eq!(ColumnDecoding::for_type(type_name), expected, "decoding {type_name}");
        }

        // names reach the decoder upper-cased through ColumnInfo
        let column = ColumnInfo::new("created", "timestamptz");
        assert_eq!(ColumnDecoding::for_type(&column.type_name), ColumnDecoding::TimestampTz);
    }

    #[test]
    fn test_blocking_is_refused_inside_a_runtime() {
        assert!(ensure_blocking_allowed().is_ok());

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let inside = runtime.block_on(async { ensure_blocking_allowed() });
        assert!(matches!(inside, Err(DriverError::Connection(_))));
    }
}
