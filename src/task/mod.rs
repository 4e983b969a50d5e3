//! Query tasks: lease a connection, run compiled statements, hand back results.

mod insert;
mod select;

use std::fmt;

use tracing::debug;

use crate::cursor::Cursor;
use crate::error::ExecutorError;
use crate::pool::{ConnectionPool, OwnerToken};

pub use insert::{InsertOutcome, InsertTask};
pub use select::SelectTask;

/// Task lifecycle. `Exhausted` is only reached by a select task that has yielded every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Started,
    Exhausted,
    Closed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Created => "created",
            TaskState::Started => "started",
            TaskState::Exhausted => "exhausted",
            TaskState::Closed => "closed",
        })
    }
}

/// Lifecycle shared by every task.
pub trait Task {
    fn state(&self) -> TaskState;

    /// Lease the connection and allocate the cursor.
    ///
    /// # Errors
    /// Returns [`ExecutorError::TaskAlreadyOpen`] on a second call, or the pool's error.
    fn open(&mut self) -> Result<(), ExecutorError>;

    /// Release everything the task holds. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConnectionState`] if the lease no longer matches its connection.
    fn close(&mut self) -> Result<(), ExecutorError>;
}

#[derive(Debug)]
struct TaskCore {
    name: &'static str,
    pool: ConnectionPool,
    owner: OwnerToken,
    state: TaskState,
    cursor: Option<Cursor>,
}

impl TaskCore {
    fn new(name: &'static str, pool: ConnectionPool, owner: OwnerToken) -> Self {
        Self {
            name,
            pool,
            owner,
            state: TaskState::Created,
            cursor: None,
        }
    }

    fn open(&mut self) -> Result<(), ExecutorError> {
        match self.state {
            TaskState::Created => {}
            TaskState::Started | TaskState::Exhausted => {
                return Err(ExecutorError::TaskAlreadyOpen { task: self.name });
            }
            TaskState::Closed => {
                return Err(ExecutorError::invalid_state(self.name, "open", self.state));
            }
        }
        let lease = self.pool.acquire(self.owner)?;
        debug!(task = self.name, connection = lease.connection().id(), "task opened");
        self.cursor = Some(Cursor::new(lease));
        self.state = TaskState::Started;
        Ok(())
    }

    fn cursor(&mut self, operation: &'static str) -> Result<&mut Cursor, ExecutorError> {
        if self.state != TaskState::Started {
            return Err(ExecutorError::invalid_state(self.name, operation, self.state));
        }
        self.cursor
            .as_mut()
            .ok_or_else(|| ExecutorError::invalid_state(self.name, operation, self.state))
    }

    /// Give the connection back without changing the state.
    fn release(&mut self) -> Result<(), ExecutorError> {
        match self.cursor.take() {
            Some(mut cursor) => cursor.close(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), ExecutorError> {
        if self.state == TaskState::Closed {
            return Ok(());
        }
        self.state = TaskState::Closed;
        self.release()
    }
}
