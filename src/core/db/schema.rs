/// Schema Introspection Module
///
/// Read-only catalog queries: tables, columns, keys, sequences and table
/// definitions. Nothing is cached; every call asks the server again.
/// PostgreSQL is read through `information_schema` and `pg_catalog`, the
/// embedded engine through `sqlite_master` and its pragmas.

use super::connection::Database;
use super::cursor::ResultCursor;
use super::dialect::{quote, quote_name};
use super::row::Value;
use super::transport::{DriverKind, RawResult};
use crate::core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Length, precision or scale modifier inside a type name, e.g. `(50)` or `(10,2)`
static TYPE_MODIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([0-9,\s]*\)").expect("valid type modifier pattern"));

/// Represents a table column with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    /// Column name
    pub column_name: String,
    /// Full type, e.g. `character varying(50)`
    #[serde(rename = "type")]
    pub type_name: String,
    /// `YES` when the column accepts NULL, `NO` otherwise
    pub null: String,
    /// Default expression, if any
    pub default: Option<String>,
    /// Column comment, empty when there is none
    pub comments: String,
}

/// Represents an index or key on a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableKey {
    pub idx_name: String,
    pub is_primary: bool,
    pub is_unique: bool,
    /// Statement that recreates the key
    pub query: String,
}

/// A sequence owned by a table column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSequence {
    pub sequence: String,
    pub schema: String,
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub start_value: String,
    pub minimum_value: String,
    pub maximum_value: String,
    pub increment: String,
    pub cycle_option: String,
}

impl Database {
    /// Names of all user tables, sorted
    pub fn table_list(&mut self) -> Result<Vec<String>> {
        let sql = match self.kind() {
            DriverKind::Postgresql => {
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' \
                 AND table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY table_name ASC"
            }
            DriverKind::Sqlite => {
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name ASC"
            }
        };
        Ok(first_column(self.run(sql)?))
    }

    /// Column name to type, without length or precision modifiers
    pub fn table_column_types(&mut self, table: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .table_columns(table)?
            .into_iter()
            .map(|column| {
                let base = TYPE_MODIFIER.replace_all(&column.type_name, "").into_owned();
                (column.column_name, base)
            })
            .collect())
    }

    /// Full column metadata, in column order
    pub fn table_columns(&mut self, table: &str) -> Result<Vec<TableColumn>> {
        match self.kind() {
            DriverKind::Postgresql => {
                let raw = self.run(&format!(
                    "SELECT a.attname::text AS column_name, \
                     pg_catalog.format_type(a.atttypid, a.atttypmod) AS type, \
                     CASE WHEN a.attnotnull THEN 'NO' ELSE 'YES' END AS \"null\", \
                     pg_catalog.pg_get_expr(adef.adbin, adef.adrelid, true) AS \"default\", \
                     COALESCE(pg_catalog.col_description(a.attrelid, a.attnum), '') AS comments \
                     FROM pg_catalog.pg_attribute a \
                     LEFT JOIN pg_catalog.pg_attrdef adef ON a.attrelid = adef.adrelid AND a.attnum = adef.adnum \
                     WHERE a.attrelid = (SELECT c.oid FROM pg_catalog.pg_class c \
                         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                         WHERE c.relname = {} AND n.nspname = 'public') \
                     AND a.attnum > 0 AND NOT a.attisdropped \
                     ORDER BY a.attnum",
                    quote(table, true)
                ))?;
                records(raw)
            }
            DriverKind::Sqlite => {
                let raw = self.run(&format!("PRAGMA table_info({})", quote_name(table, None)))?;
                // cid, name, type, notnull, dflt_value, pk
                Ok(raw
                    .rows
                    .iter()
                    .map(|row| TableColumn {
                        column_name: text(row, 1),
                        type_name: text(row, 2),
                        null: if int(row, 3) == 1 { "NO" } else { "YES" }.to_string(),
                        default: optional_text(row, 4),
                        comments: String::new(),
                    })
                    .collect())
            }
        }
    }

    /// Indexes and keys of a table
    pub fn table_keys(&mut self, table: &str) -> Result<Vec<TableKey>> {
        match self.kind() {
            DriverKind::Postgresql => {
                let raw = self.run(&format!(
                    "SELECT indexname::text AS idx_name, \
                     pg_index.indisprimary AS is_primary, \
                     pg_index.indisunique AS is_unique, \
                     CASE WHEN pg_index.indisprimary THEN \
                         (SELECT 'ALTER TABLE ' || tablename || ' ADD ' || pg_catalog.pg_get_constraintdef(con.oid, true) \
                          FROM pg_catalog.pg_constraint con WHERE con.conname = idx.relname) \
                     ELSE pg_catalog.pg_get_indexdef(pg_index.indexrelid, 0, true) END AS query \
                     FROM pg_catalog.pg_indexes \
                     LEFT JOIN pg_catalog.pg_class idx ON indexname = idx.relname \
                     LEFT JOIN pg_catalog.pg_index ON idx.oid = pg_index.indexrelid \
                     WHERE tablename = {} \
                     ORDER BY pg_index.indkey::text",
                    quote(table, true)
                ))?;
                records(raw)
            }
            DriverKind::Sqlite => {
                let raw = self.run(&format!("PRAGMA index_list({})", quote_name(table, None)))?;
                // seq, name, unique, origin, partial
                let mut keys = Vec::with_capacity(raw.rows.len());
                for row in &raw.rows {
                    let idx_name = text(row, 1);
                    let definition = self.run(&format!(
                        "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = {}",
                        quote(&idx_name, true)
                    ))?;
                    keys.push(TableKey {
                        is_primary: text(row, 3) == "pk",
                        is_unique: int(row, 2) == 1,
                        query: first_column(definition).into_iter().next().unwrap_or_default(),
                        idx_name,
                    });
                }
                Ok(keys)
            }
        }
    }

    /// Sequences that feed columns of a table
    pub fn table_sequences(&mut self, table: &str) -> Result<Vec<TableSequence>> {
        match self.kind() {
            DriverKind::Postgresql => {
                let raw = self.run(&format!(
                    "SELECT s.relname::text AS sequence, n.nspname::text AS schema, \
                     t.relname::text AS \"table\", a.attname::text AS \"column\", \
                     info.data_type::text AS data_type, info.start_value::text AS start_value, \
                     info.minimum_value::text AS minimum_value, info.maximum_value::text AS maximum_value, \
                     info.increment::text AS increment, info.cycle_option::text AS cycle_option \
                     FROM pg_catalog.pg_class s \
                     LEFT JOIN pg_catalog.pg_depend d ON d.objid = s.oid \
                         AND d.classid = 'pg_class'::regclass AND d.refclassid = 'pg_class'::regclass \
                     LEFT JOIN pg_catalog.pg_class t ON t.oid = d.refobjid \
                     LEFT JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
                     LEFT JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = d.refobjsubid \
                     LEFT JOIN information_schema.sequences info ON info.sequence_name = s.relname \
                     WHERE s.relkind = 'S' AND d.deptype IN ('a', 'i') AND t.relname = {}",
                    quote(table, true)
                ))?;
                records(raw)
            }
            DriverKind::Sqlite => self.sqlite_sequences(table),
        }
    }

    /// `CREATE TABLE` statements for the given tables, in the order asked
    pub fn table_create(&mut self, tables: &[&str]) -> Result<Vec<(String, String)>> {
        let mut statements = Vec::with_capacity(tables.len());
        for table in tables {
            let statement = match self.kind() {
                DriverKind::Postgresql => {
                    let columns = self.table_columns(table)?;
                    build_create_table(table, &columns)
                }
                DriverKind::Sqlite => {
                    let raw = self.run(&format!(
                        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = {}",
                        quote(table, true)
                    ))?;
                    first_column(raw).into_iter().next().unwrap_or_default()
                }
            };
            statements.push((table.to_string(), statement));
        }
        Ok(statements)
    }

    /// AUTOINCREMENT counters live in `sqlite_sequence`
    fn sqlite_sequences(&mut self, table: &str) -> Result<Vec<TableSequence>> {
        let has_counters = self.run(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
        )?;
        if has_counters.rows.is_empty() {
            return Ok(Vec::new());
        }

        let counter = self.run(&format!(
            "SELECT name FROM sqlite_sequence WHERE name = {}",
            quote(table, true)
        ))?;
        if counter.rows.is_empty() {
            return Ok(Vec::new());
        }

        let column = self
            .table_columns_pk(table)?
            .unwrap_or_else(|| "rowid".to_string());
        Ok(vec![TableSequence {
            sequence: "sqlite_sequence".to_string(),
            schema: "main".to_string(),
            table: table.to_string(),
            column,
            data_type: "integer".to_string(),
            start_value: "1".to_string(),
            minimum_value: "1".to_string(),
            maximum_value: i64::MAX.to_string(),
            increment: "1".to_string(),
            cycle_option: "NO".to_string(),
        }])
    }

    fn table_columns_pk(&mut self, table: &str) -> Result<Option<String>> {
        let raw = self.run(&format!("PRAGMA table_info({})", quote_name(table, None)))?;
        Ok(raw.rows.iter().find(|row| int(row, 5) == 1).map(|row| text(row, 1)))
    }
}

/// Projects every row of a catalog query onto a record type
fn records<T: serde::de::DeserializeOwned>(raw: RawResult) -> Result<Vec<T>> {
    ResultCursor::new(raw).map(|row| row.deserialize()).collect()
}

fn first_column(raw: RawResult) -> Vec<String> {
    raw.rows
        .iter()
        .filter_map(|row| row.first())
        .filter(|value| !value.is_null())
        .map(ToString::to_string)
        .collect()
}

fn text(row: &[Value], index: usize) -> String {
    row.get(index).map(ToString::to_string).unwrap_or_default()
}

fn optional_text(row: &[Value], index: usize) -> Option<String> {
    row.get(index).filter(|v| !v.is_null()).map(ToString::to_string)
}

fn int(row: &[Value], index: usize) -> i64 {
    row.get(index).and_then(Value::as_i64).unwrap_or(0)
}

fn build_create_table(table: &str, columns: &[TableColumn]) -> String {
    let definitions: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut definition = format!("{} {}", quote_name(&column.column_name, None), column.type_name);
            if column.null == "NO" {
                definition.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                definition.push_str(" DEFAULT ");
                definition.push_str(default);
            }
            definition
        })
        .collect();

    format!("CREATE TABLE {} ({})", quote_name(table, None), definitions.join(", "))
}
