use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::model::{Property, Record};
use crate::pool::{ConnectionPool, OwnerToken};
use crate::query::Statement;
use crate::sqlite::{NativeRows, RowDecoder};

use super::{Task, TaskCore, TaskState};

/// Runs one compiled `SELECT` and yields decoded [`Record`]s.
///
/// The native statement is stepped to completion inside [`execute`](SelectTask::execute) while
/// the connection is locked; each row is decoded only when the iterator reaches it. Once the last
/// row is handed out the task is `Exhausted` and its connection already released. Iteration is
/// forward-only and cannot be restarted.
///
/// The whole native result set stays in memory until it is consumed, so page large tables with
/// [`SelectQuery::limit`](crate::query::SelectQuery::limit) and
/// [`offset`](crate::query::SelectQuery::offset).
#[derive(Debug)]
pub struct SelectTask {
    core: TaskCore,
    statement: Statement,
    decoder: RowDecoder,
    rows: Option<NativeRows>,
}

impl SelectTask {
    #[must_use]
    pub fn new(
        pool: ConnectionPool,
        owner: OwnerToken,
        statement: Statement,
        properties: Vec<Property>,
    ) -> Self {
        Self {
            core: TaskCore::new("select", pool, owner),
            statement,
            decoder: RowDecoder::new(properties),
            rows: None,
        }
    }

    #[must_use]
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Run the statement on the task's connection.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] unless the task is open and not yet executed, or
    /// the native error unmodified.
    pub fn execute(&mut self) -> Result<(), ExecutorError> {
        if self.rows.is_some() {
            return Err(ExecutorError::invalid_state("select", "execute", "already executed"));
        }
        let cursor = self.core.cursor("execute")?;
        let rows = cursor.query(&self.statement)?;
        debug!(rows = rows.len(), "select executed");
        let empty = rows.is_empty();
        self.rows = Some(rows);
        if empty {
            self.exhaust();
        }
        Ok(())
    }

    /// Rows stepped from the database and not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.as_ref().map_or(0, NativeRows::len)
    }

    /// Column names reported by the statement, once executed.
    #[must_use]
    pub fn columns(&self) -> Option<&[String]> {
        self.rows.as_ref().map(NativeRows::columns)
    }

    fn exhaust(&mut self) {
        self.core.state = TaskState::Exhausted;
        if let Err(err) = self.core.release() {
            warn!(error = %err, "failed to release select connection");
        }
    }
}

impl Task for SelectTask {
    fn state(&self) -> TaskState {
        self.core.state
    }

    fn open(&mut self) -> Result<(), ExecutorError> {
        self.core.open()
    }

    fn close(&mut self) -> Result<(), ExecutorError> {
        self.rows = None;
        self.core.close()
    }
}

impl Iterator for SelectTask {
    type Item = Result<Record, ExecutorError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.core.state {
            TaskState::Closed => None,
            TaskState::Exhausted => {
                self.core.state = TaskState::Closed;
                None
            }
            TaskState::Created => {
                self.core.state = TaskState::Closed;
                Some(Err(ExecutorError::invalid_state("select", "iterate", TaskState::Created)))
            }
            TaskState::Started => {
                let Some(rows) = self.rows.as_mut() else {
                    if let Err(err) = self.core.close() {
                        warn!(error = %err, "failed to close select task");
                    }
                    return Some(Err(ExecutorError::invalid_state(
                        "select",
                        "iterate",
                        "not executed",
                    )));
                };
                let row = rows.pop_front()?;
                if rows.is_empty() {
                    self.exhaust();
                }
                Some(self.decoder.decode(row))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl Drop for SelectTask {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close select task");
        }
    }
}
