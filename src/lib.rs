// Core infrastructure modules
pub mod config;
pub mod core;

#[doc(hidden)]
pub mod test_utils;

pub use crate::core::db::{
    Assoc, CursorState, Database, DriverKind, ResultCursor, Row, TransactionState, Value,
};
pub use crate::core::{DriverError, Result};
