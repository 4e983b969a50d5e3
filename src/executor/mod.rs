mod dispatch;
mod sqlite;
mod targets;

use crate::compiler::Compiler;
use crate::cursor::Cursor;
use crate::error::ExecutorError;
use crate::pool::ConnectionLease;
use crate::query::Query;
use crate::task::{InsertOutcome, SelectTask};
use crate::transaction::Transaction;

pub use dispatch::execute_batch;
pub use sqlite::SqliteExecutor;
pub use targets::BatchTarget;

/// Backend plugin: compiles queries and runs them on pooled connections.
///
/// [`SqliteExecutor`] is the built-in implementation; the trait is the seam for other drivers.
pub trait Executor: Send + Sync {
    /// The executor's compiler, built on first use and cached for the executor's lifetime.
    fn compiler(&self) -> &dyn Compiler;

    /// Open and bootstrap a native connection. The pool calls this on demand.
    ///
    /// # Errors
    /// Returns the native error if the database cannot be opened.
    fn create_connection(&self) -> Result<rusqlite::Connection, ExecutorError>;

    /// New, not yet started transaction on `lease`, or on a connection acquired for the calling
    /// thread.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Closed`] after close, or the pool's acquire error.
    fn create_transaction(
        &self,
        lease: Option<ConnectionLease>,
    ) -> Result<Transaction, ExecutorError>;

    /// Cursor on `lease`, or on a connection acquired for the calling thread.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Closed`] after close, or the pool's acquire error.
    fn cursor(&self, lease: Option<ConnectionLease>) -> Result<Cursor, ExecutorError>;

    /// Compile `query` and dispatch it by kind.
    ///
    /// # Errors
    /// Returns [`ExecutorError::EmptyCompilation`] when the compiler yields nothing,
    /// [`ExecutorError::Unimplemented`] for update and delete queries, or the task's error.
    fn execute(&self, query: &Query) -> Result<Execution, ExecutorError>;

    /// Close the pool. Later acquisitions fail with [`ExecutorError::Closed`].
    fn close(&self);
}

/// What [`Executor::execute`] hands back, by query kind.
#[derive(Debug)]
pub enum Execution {
    /// An executed select, iterated for decoded records.
    Select(SelectTask),
    Insert(InsertOutcome),
}

impl Execution {
    #[must_use]
    pub fn into_select(self) -> Option<SelectTask> {
        match self {
            Execution::Select(task) => Some(task),
            Execution::Insert(_) => None,
        }
    }

    #[must_use]
    pub fn into_insert(self) -> Option<InsertOutcome> {
        match self {
            Execution::Insert(outcome) => Some(outcome),
            Execution::Select(_) => None,
        }
    }
}
