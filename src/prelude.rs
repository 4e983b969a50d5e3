//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and traits
//! to make it easier to get started with the library.

pub use crate::compiler::{Compiler, CompilerFactory, SqliteCompiler};
pub use crate::cursor::Cursor;
pub use crate::error::ExecutorError;
pub use crate::executor::{Execution, Executor, SqliteExecutor, execute_batch};
pub use crate::model::{Model, Property, Record};
pub use crate::pool::{ConnectionLease, OwnerToken};
pub use crate::query::{
    DeleteQuery, InsertQuery, Query, QueryKind, SelectQuery, Statement, UpdateQuery,
};
pub use crate::sqlite::{SqliteOptions, SqliteOptionsBuilder};
pub use crate::task::{InsertOutcome, SelectTask, Task, TaskState};
pub use crate::transaction::{Transaction, TransactionState};
pub use crate::types::{RowValues, ValueKind};
pub use crate::version::BackendVersion;
