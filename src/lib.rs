//! Synchronous `SQLite` executor.
//!
//! A query front-end hands a [`Query`] to an [`Executor`]. The executor compiles it into
//! [`Statement`]s with its cached [`Compiler`], then dispatches by query kind to a task that
//! leases a pooled connection, runs the statements and decodes the rows.
//!
//! ```rust,no_run
//! use sql_executor::prelude::*;
//!
//! # fn main() -> Result<(), ExecutorError> {
//! let executor = SqliteExecutor::builder(":memory:").max_connections(4).build()?;
//! executor.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")?;
//!
//! let users = Model::builder("users")
//!     .property(Property::new("id", ValueKind::Integer).primary_key())
//!     .property(Property::new("name", ValueKind::Text).not_null())
//!     .build()?;
//!
//! executor.insert(
//!     InsertQuery::new(users.clone())
//!         .item(Record::new().with("name", RowValues::Text("alice".into()))),
//! )?;
//!
//! for record in executor.select(SelectQuery::new(users).order_by("id"))? {
//!     println!("{:?}", record?.get("name"));
//! }
//! executor.close();
//! # Ok(())
//! # }
//! ```
//!
//! Connections are leased per [`OwnerToken`]. By default every call uses the calling thread's
//! token, so statements run while the thread holds a transaction reach the transaction's
//! connection.

pub mod compiler;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod model;
pub mod pool;
pub mod prelude;
pub mod query;
pub mod sqlite;
pub mod task;
pub mod transaction;
pub mod types;
pub mod version;

pub use compiler::{Compiler, CompilerFactory, SqliteCompiler, sqlite_compiler_factory};
pub use cursor::Cursor;
pub use error::ExecutorError;
pub use executor::{BatchTarget, Execution, Executor, SqliteExecutor, execute_batch};
pub use model::{Model, ModelBuilder, Property, Record};
pub use pool::{
    Connection, ConnectionLease, ConnectionPool, DEFAULT_MAX_SIZE, OwnerToken, PoolOptions,
    SqliteConnectionManager,
};
pub use query::{
    DeleteQuery, InsertQuery, OrderBy, Query, QueryKind, SelectQuery, Statement, UpdateQuery,
};
pub use sqlite::{DatabaseLocation, SqliteOptions, SqliteOptionsBuilder};
pub use task::{InsertOutcome, InsertTask, SelectTask, Task, TaskState};
pub use transaction::{Transaction, TransactionState};
pub use types::{RowValues, ValueKind};
pub use version::BackendVersion;
