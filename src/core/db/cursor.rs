/// Cursor Reader Module
///
/// A [`ResultCursor`] buffers one statement's rows on the client and hands
/// them out one at a time. Every accessor on [`Database`] reads through the
/// same cursor and advances the same position, so mixing row, associative
/// and object reads never skips or repeats a row.
use super::connection::Database;
use super::row::{Assoc, ColumnInfo, Row, Value};
use super::transport::RawResult;
use crate::core::Result;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;

/// Lifecycle of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No row has been read yet
    Unstarted,
    /// At least one row has been read and more remain
    Active,
    /// Every row has been read; terminal
    Exhausted,
}

/// Client-buffered result of one statement
#[derive(Debug, Clone)]
pub struct ResultCursor {
    columns: Arc<[ColumnInfo]>,
    rows: VecDeque<Vec<Value>>,
    num_rows: usize,
    position: usize,
    state: CursorState,
}

impl ResultCursor {
    pub(crate) fn new(raw: RawResult) -> Self {
        let num_rows = raw.rows.len();
        ResultCursor {
            columns: raw.columns.into(),
            rows: raw.rows.into(),
            num_rows,
            position: 0,
            state: CursorState::Unstarted,
        }
    }

    /// Column metadata of the result
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Total number of rows in the result
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of rows handed out so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Advances by one row. Returns `None` on every call once exhausted.
    pub fn next_row(&mut self) -> Option<Row> {
        if self.state == CursorState::Exhausted {
            return None;
        }

        match self.rows.pop_front() {
            Some(values) => {
                self.position += 1;
                self.state = if self.rows.is_empty() {
                    CursorState::Exhausted
                } else {
                    CursorState::Active
                };
                Some(Row::new(Arc::clone(&self.columns), values))
            }
            None => {
                self.state = CursorState::Exhausted;
                None
            }
        }
    }

    /// Takes every remaining row and leaves the cursor exhausted
    pub fn drain(&mut self) -> Vec<Row> {
        let rows: Vec<Row> = self.by_ref().collect();
        self.state = CursorState::Exhausted;
        rows
    }
}

impl Iterator for ResultCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.next_row()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.is_exhausted() { 0 } else { self.rows.len() };
        (remaining, Some(remaining))
    }
}

impl Database {
    /// The current cursor, running the current query first if there is none
    pub fn cursor(&mut self) -> Result<&mut ResultCursor> {
        match self.cursor {
            Some(ref mut cursor) => Ok(cursor),
            None => self.execute(),
        }
    }

    /// Next row as a dynamic record, `None` once exhausted
    pub fn load_next(&mut self) -> Result<Option<Row>> {
        Ok(self.cursor()?.next_row())
    }

    /// Next row as positional values
    pub fn load_next_row(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.load_next()?.map(Row::into_values))
    }

    /// Next row as a column-name mapping
    pub fn load_next_assoc(&mut self) -> Result<Option<Assoc>> {
        Ok(self.load_next()?.map(|row| row.to_assoc()))
    }

    /// Next row projected onto `T`
    pub fn load_next_object<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        self.load_next()?.map(|row| row.deserialize()).transpose()
    }

    /// One row as positional values.
    ///
    /// Consumes a row of the current cursor; following `load_next_*` calls
    /// continue after it.
    pub fn load_row(&mut self) -> Result<Option<Vec<Value>>> {
        self.load_next_row()
    }

    /// One row as a column-name mapping
    pub fn load_assoc(&mut self) -> Result<Option<Assoc>> {
        self.load_next_assoc()
    }

    /// One row projected onto `T`
    pub fn load_object<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        self.load_next_object()
    }

    /// First column of the next row
    pub fn load_result(&mut self) -> Result<Option<Value>> {
        Ok(self
            .load_next()?
            .and_then(|row| row.into_values().into_iter().next()))
    }

    /// Every remaining row as positional values
    pub fn load_row_list(&mut self) -> Result<Vec<Vec<Value>>> {
        Ok(self.cursor()?.drain().into_iter().map(Row::into_values).collect())
    }

    /// Every remaining row as a column-name mapping
    pub fn load_assoc_list(&mut self) -> Result<Vec<Assoc>> {
        Ok(self.cursor()?.drain().iter().map(Row::to_assoc).collect())
    }

    /// Every remaining row, keyed by the value of column `key`
    pub fn load_assoc_list_by(&mut self, key: &str) -> Result<Vec<(String, Assoc)>> {
        Ok(self
            .cursor()?
            .drain()
            .iter()
            .map(|row| {
                let id = row.get_by_name(key).map(ToString::to_string).unwrap_or_default();
                (id, row.to_assoc())
            })
            .collect())
    }

    /// Every remaining row projected onto `T`
    pub fn load_object_list<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        self.cursor()?.drain().iter().map(|row| row.deserialize()).collect()
    }

    /// First column of every remaining row
    pub fn load_column(&mut self) -> Result<Vec<Value>> {
        self.load_column_at(0)
    }

    /// Column `index` of every remaining row; rows without it yield NULL
    pub fn load_column_at(&mut self, index: usize) -> Result<Vec<Value>> {
        Ok(self
            .cursor()?
            .drain()
            .into_iter()
            .map(|row| row.get(index).cloned().unwrap_or(Value::Null))
            .collect())
    }
}
