/// Database Module
///
/// The driver proper, organized into focused submodules.
///
/// ## Architecture
///
/// - **Dialect** (`dialect.rs`): identifier quoting, literal escaping and table-prefix rewriting
/// - **Transport** (`transport/`): the live link to a server, one implementation per driver
/// - **Connection Management** (`connection.rs`): the `Database` session and its lifecycle
/// - **Query Execution** (`query.rs`): running statements and per-statement bookkeeping
/// - **Cursor Reading** (`cursor.rs`, `row.rs`): incremental reads and row projections
/// - **Transactions** (`transaction.rs`): transaction state and the savepoint stack
/// - **Schema Introspection** (`schema.rs`): catalog metadata
///
/// ## Error Handling
///
/// All operations return the crate-wide `Result` with a `DriverError`.
pub mod connection;
pub mod cursor;
pub mod dialect;
pub mod query;
pub mod row;
pub mod schema;
pub mod transaction;
pub mod transport;

pub use connection::Database;
pub use cursor::{CursorState, ResultCursor};
pub use query::StatementType;
pub use row::{Assoc, ColumnInfo, Row, Value};
pub use schema::{TableColumn, TableKey, TableSequence};
pub use transaction::TransactionState;
pub use transport::{DriverKind, RawResult, Transport};
