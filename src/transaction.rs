use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cursor::Cursor;
use crate::error::ExecutorError;
use crate::pool::{Connection, ConnectionLease, lock};
use crate::query::Statement;
use crate::sqlite::NativeRows;

const ROLLBACK_BUSY_RETRIES: &[Duration] = &[
    Duration::from_millis(10),
    Duration::from_millis(25),
    Duration::from_millis(50),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Created,
    Started,
    Committed,
    RolledBack,
    Closed,
}

impl TransactionState {
    /// Committed, rolled back or closed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack | TransactionState::Closed
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionState::Created => "created",
            TransactionState::Started => "started",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
            TransactionState::Closed => "closed",
        })
    }
}

/// Ids of an executor's started transactions.
#[derive(Debug, Default)]
pub(crate) struct TransactionRegistry {
    next_id: AtomicU64,
    active: Mutex<Vec<u64>>,
}

impl TransactionRegistry {
    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register(&self, id: u64) {
        lock(&self.active).push(id);
    }

    fn deregister(&self, id: u64) {
        lock(&self.active).retain(|active| *active != id);
    }

    pub(crate) fn active(&self) -> Vec<u64> {
        lock(&self.active).clone()
    }
}

/// A transaction bound to one leased connection.
///
/// Statements issued through the transaction, or by the same owner through the executor while the
/// transaction is open, run on the bound connection. A transaction dropped while started is
/// rolled back.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    state: TransactionState,
    connection: Connection,
    cursor: Cursor,
    registry: Arc<TransactionRegistry>,
}

impl Transaction {
    pub(crate) fn new(lease: ConnectionLease, registry: Arc<TransactionRegistry>) -> Self {
        Self {
            id: registry.allocate(),
            state: TransactionState::Created,
            connection: lease.connection().clone(),
            cursor: Cursor::new(lease),
            registry,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == TransactionState::Closed
    }

    /// Issue `BEGIN` on the bound connection.
    ///
    /// # Errors
    /// Returns [`ExecutorError::TransactionAlreadyActive`] if the connection already carries a
    /// transaction, [`ExecutorError::InvalidState`] unless the transaction is still `Created`, or
    /// the native error from `BEGIN`.
    pub fn start(&mut self) -> Result<(), ExecutorError> {
        if self.state != TransactionState::Created {
            return Err(ExecutorError::invalid_state("transaction", "start", self.state));
        }
        self.connection.mark_transaction(self.id)?;
        if let Err(err) = self.cursor.execute_batch("BEGIN") {
            self.connection.clear_transaction(self.id);
            return Err(err);
        }
        self.state = TransactionState::Started;
        self.registry.register(self.id);
        debug!(transaction = self.id, connection = self.connection.id(), "transaction started");
        Ok(())
    }

    fn ensure_started(&self, operation: &'static str) -> Result<(), ExecutorError> {
        if self.state == TransactionState::Started {
            Ok(())
        } else {
            Err(ExecutorError::invalid_state("transaction", operation, self.state))
        }
    }

    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] unless started, or the native error.
    pub fn execute(&mut self, statement: &Statement) -> Result<usize, ExecutorError> {
        self.ensure_started("execute")?;
        self.cursor.execute(statement)
    }

    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] unless started, or the native error.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), ExecutorError> {
        self.ensure_started("execute_batch")?;
        self.cursor.execute_batch(sql)
    }

    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] unless started, or the native error.
    pub fn query(&mut self, statement: &Statement) -> Result<NativeRows, ExecutorError> {
        self.ensure_started("query")?;
        self.cursor.query(statement)
    }

    /// Issue `COMMIT`. A no-op once the transaction is committed, rolled back or closed.
    ///
    /// When `COMMIT` fails the transaction is rolled back, its connection released, and the
    /// native error returned.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] if never started, or the native commit error.
    pub fn commit(&mut self) -> Result<(), ExecutorError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.ensure_started("commit")?;

        match self.cursor.execute_batch("COMMIT") {
            Ok(()) => {
                debug!(transaction = self.id, "transaction committed");
                self.finish(TransactionState::Committed)
            }
            Err(err) => {
                warn!(transaction = self.id, error = %err, "commit failed; rolling back");
                if let Err(rollback_err) = self.rollback_native() {
                    warn!(transaction = self.id, error = %rollback_err, "rollback after failed commit failed");
                }
                if let Err(release_err) = self.finish(TransactionState::RolledBack) {
                    warn!(transaction = self.id, error = %release_err, "failed to release connection");
                }
                Err(err)
            }
        }
    }

    /// Issue `ROLLBACK`. A no-op once the transaction is committed, rolled back or closed.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] if never started, or the native error once the
    /// busy retries are spent.
    pub fn rollback(&mut self) -> Result<(), ExecutorError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.ensure_started("rollback")?;

        let result = self.rollback_native();
        let released = self.finish(TransactionState::RolledBack);
        result?;
        debug!(transaction = self.id, "transaction rolled back");
        released
    }

    /// Roll back if still started, then release everything. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns the rollback or release error; the transaction is closed either way.
    pub fn close(&mut self) -> Result<(), ExecutorError> {
        let result = match self.state {
            TransactionState::Started => self.rollback(),
            TransactionState::Closed => return Ok(()),
            _ => self.cursor.close(),
        };
        self.state = TransactionState::Closed;
        result
    }

    fn rollback_native(&mut self) -> Result<(), ExecutorError> {
        let cursor = &mut self.cursor;
        retry_when_busy(ROLLBACK_BUSY_RETRIES, || cursor.execute_batch("ROLLBACK"))
    }

    fn finish(&mut self, state: TransactionState) -> Result<(), ExecutorError> {
        self.state = state;
        self.connection.clear_transaction(self.id);
        self.registry.deregister(self.id);
        self.cursor.close()
    }
}

/// Run `attempt`, sleeping through `delays` while it reports `SQLITE_BUSY`.
///
/// Makes one attempt per delay plus the first; the last busy error is returned as is.
fn retry_when_busy<F>(delays: &[Duration], mut attempt: F) -> Result<(), ExecutorError>
where
    F: FnMut() -> Result<(), ExecutorError>,
{
    let mut pending = delays.iter();
    loop {
        match attempt() {
            Err(err) if err.sqlite_error_code() == Some(rusqlite::ErrorCode::DatabaseBusy) => {
                let Some(delay) = pending.next() else {
                    return Err(err);
                };
                debug!(?delay, "database busy; retrying");
                thread::sleep(*delay);
            }
            result => return result,
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Started {
            warn!(transaction = self.id, "transaction dropped without commit; rolling back");
        }
        if let Err(err) = self.close() {
            warn!(transaction = self.id, error = %err, "failed to close transaction");
        }
    }
}
