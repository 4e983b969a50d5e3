use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::pool::{ConnectionPool, OwnerToken};
use crate::query::Statement;
use crate::transaction::{Transaction, TransactionRegistry};

use super::{Task, TaskCore, TaskState};

/// Result of an executed insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    /// Rows reported as inserted by the backend.
    pub rows: usize,
    /// Statements executed, one per row on backends without multi-row `VALUES`.
    pub statements: usize,
    /// Rowid of the last inserted row on the task's connection.
    pub last_insert_id: i64,
    /// Whether the statements were wrapped in a transaction opened by the task itself.
    pub implicit_transaction: bool,
}

/// Runs the compiled `INSERT` statements of one insert query.
///
/// Several statements run atomically: when the connection is not already inside a transaction the
/// task opens one around them and rolls it back on the first failure.
#[derive(Debug)]
pub struct InsertTask {
    core: TaskCore,
    statements: Vec<Statement>,
    registry: Arc<TransactionRegistry>,
}

impl InsertTask {
    pub(crate) fn new(
        pool: ConnectionPool,
        owner: OwnerToken,
        statements: Vec<Statement>,
        registry: Arc<TransactionRegistry>,
    ) -> Self {
        Self {
            core: TaskCore::new("insert", pool, owner),
            statements,
            registry,
        }
    }

    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Run every statement, then close the task.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] unless the task is open, or the first native error
    /// unmodified (a duplicate key surfaces as a `SQLite` constraint violation).
    pub fn execute(&mut self) -> Result<InsertOutcome, ExecutorError> {
        let result = self.run();
        let closed = self.core.close();
        let outcome = result?;
        closed?;
        Ok(outcome)
    }

    fn run(&mut self) -> Result<InsertOutcome, ExecutorError> {
        let owner = self.core.owner;
        let pool = self.core.pool.clone();
        let cursor = self.core.cursor("execute")?;

        let inside_transaction = cursor.connection()?.in_transaction() || !cursor.is_autocommit()?;
        let implicit_transaction = self.statements.len() > 1 && !inside_transaction;

        let mut rows = 0;
        if implicit_transaction {
            // Re-entrant acquire: the transaction binds to the cursor's connection.
            let mut tx = Transaction::new(pool.acquire(owner)?, Arc::clone(&self.registry));
            tx.start()?;
            for statement in &self.statements {
                match tx.execute(statement) {
                    Ok(affected) => rows += affected,
                    Err(err) => {
                        if let Err(rollback_err) = tx.rollback() {
                            warn!(error = %rollback_err, "rollback of implicit insert transaction failed");
                        }
                        return Err(err);
                    }
                }
            }
            tx.commit()?;
        } else {
            for statement in &self.statements {
                rows += cursor.execute(statement)?;
            }
        }

        let last_insert_id = self.core.cursor("execute")?.last_insert_rowid()?;
        debug!(
            rows,
            statements = self.statements.len(),
            implicit_transaction,
            "insert executed"
        );
        Ok(InsertOutcome {
            rows,
            statements: self.statements.len(),
            last_insert_id,
            implicit_transaction,
        })
    }
}

impl Task for InsertTask {
    fn state(&self) -> TaskState {
        self.core.state
    }

    fn open(&mut self) -> Result<(), ExecutorError> {
        self.core.open()
    }

    fn close(&mut self) -> Result<(), ExecutorError> {
        self.core.close()
    }
}

impl Drop for InsertTask {
    fn drop(&mut self) {
        if let Err(err) = self.core.close() {
            warn!(error = %err, "failed to close insert task");
        }
    }
}
