/// Transaction Module
///
/// Transaction state and the savepoint stack of a [`Database`]. Savepoints
/// form a strict stack: releasing or rolling back to one discards every
/// savepoint pushed after it.
use super::connection::Database;
use super::dialect::quote_name;
use crate::core::{DriverError, Result};
use tracing::{debug, warn};

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    #[default]
    Autocommit,
    /// Transaction in progress
    Active,
}

/// Client-side mirror of the server's transaction and savepoints
#[derive(Debug, Clone, Default)]
pub struct TransactionManager {
    state: TransactionState,
    savepoints: Vec<String>,
}

impl TransactionManager {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Savepoint names, oldest first
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    fn begin(&mut self) {
        self.state = TransactionState::Active;
        self.savepoints.clear();
    }

    fn end(&mut self) {
        self.state = TransactionState::Autocommit;
        self.savepoints.clear();
    }

    fn push(&mut self, name: &str) {
        self.savepoints.push(name.to_string());
    }

    /// Pops down to and including the most recent `name`
    fn pop_to(&mut self, name: &str) -> bool {
        match self.savepoints.iter().rposition(|s| s == name) {
            Some(index) => {
                self.savepoints.truncate(index);
                true
            }
            None => false,
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.savepoints.iter().any(|s| s == name)
    }

    pub(crate) fn reset(&mut self) {
        self.end();
    }
}

impl Database {
    /// Current transaction state
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.state()
    }

    /// Open savepoints, oldest first
    pub fn savepoints(&self) -> &[String] {
        self.transaction.savepoints()
    }

    /// Begins a server-side transaction.
    ///
    /// # Errors
    ///
    /// `DriverError::Transaction` when a transaction is already active.
    pub fn transaction_start(&mut self) -> Result<()> {
        if self.transaction.is_active() {
            return Err(DriverError::transaction(None, "transaction already in progress"));
        }

        self.run("BEGIN")?;
        self.transaction.begin();
        debug!("transaction started");
        Ok(())
    }

    /// Commits the active transaction.
    ///
    /// # Errors
    ///
    /// `DriverError::Transaction` when no transaction is active.
    pub fn transaction_commit(&mut self) -> Result<()> {
        if !self.transaction.is_active() {
            return Err(DriverError::transaction(None, "no transaction in progress"));
        }

        self.run("COMMIT")?;
        self.transaction.end();
        debug!("transaction committed");
        Ok(())
    }

    /// Rolls back the whole transaction, or only to `savepoint`.
    ///
    /// Rolling back to a savepoint keeps the transaction active and discards
    /// that savepoint and every later one. Without a transaction this is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// `DriverError::Transaction` when `savepoint` is not on the stack.
    pub fn transaction_rollback(&mut self, savepoint: Option<&str>) -> Result<()> {
        if !self.transaction.is_active() {
            warn!("rollback without an active transaction ignored");
            return Ok(());
        }

        match savepoint {
            None => {
                self.run("ROLLBACK")?;
                self.transaction.end();
                debug!("transaction rolled back");
            }
            Some(name) => {
                self.require_savepoint(name)?;
                let quoted = quote_name(name, None);
                self.run(&format!("ROLLBACK TO SAVEPOINT {}", quoted))?;
                self.run(&format!("RELEASE SAVEPOINT {}", quoted))?;
                self.transaction.pop_to(name);
                debug!(savepoint = name, "rolled back to savepoint");
            }
        }
        Ok(())
    }

    /// Sets a named savepoint inside the active transaction.
    ///
    /// Reusing a name shadows the earlier savepoint.
    ///
    /// # Errors
    ///
    /// `DriverError::Transaction` when no transaction is active.
    pub fn transaction_savepoint(&mut self, name: &str) -> Result<()> {
        if !self.transaction.is_active() {
            return Err(DriverError::transaction(
                Some(name),
                "savepoints need an active transaction",
            ));
        }

        self.run(&format!("SAVEPOINT {}", quote_name(name, None)))?;
        self.transaction.push(name);
        debug!(savepoint = name, "savepoint set");
        Ok(())
    }

    /// Releases `name` and every savepoint set after it, keeping their changes.
    ///
    /// # Errors
    ///
    /// `DriverError::Transaction` when `name` is not an open savepoint. The
    /// transaction stays active and must still be committed or rolled back.
    pub fn release_transaction_savepoint(&mut self, name: &str) -> Result<()> {
        self.require_savepoint(name)?;
        self.run(&format!("RELEASE SAVEPOINT {}", quote_name(name, None)))?;
        self.transaction.pop_to(name);
        debug!(savepoint = name, "savepoint released");
        Ok(())
    }

    fn require_savepoint(&self, name: &str) -> Result<()> {
        if self.transaction.contains(name) {
            return Ok(());
        }
        warn!(savepoint = name, "unknown savepoint");
        Err(DriverError::transaction(
            Some(name),
            format!("savepoint '{}' does not exist", name),
        ))
    }
}
