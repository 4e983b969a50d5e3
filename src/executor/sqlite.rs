use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::compiler::{Compiler, CompilerFactory, sqlite_compiler_factory};
use crate::cursor::Cursor;
use crate::error::ExecutorError;
use crate::pool::{ConnectionLease, ConnectionPool, OwnerToken, PoolOptions};
use crate::query::{InsertQuery, Query, SelectQuery};
use crate::sqlite::{
    DatabaseLocation, SqliteOptions, SqliteOptionsBuilder, connection_manager, open_connection,
};
use crate::task::{InsertOutcome, SelectTask};
use crate::transaction::{Transaction, TransactionRegistry};
use crate::version::BackendVersion;

use super::dispatch::{DispatchContext, dispatch};
use super::{Execution, Executor};

struct ExecutorInner {
    options: SqliteOptions,
    location: DatabaseLocation,
    version: BackendVersion,
    compiler_factory: CompilerFactory,
    compiler: OnceLock<Box<dyn Compiler>>,
    pool: ConnectionPool,
    registry: Arc<TransactionRegistry>,
    closed: AtomicBool,
}

/// Executor backed by `rusqlite`.
///
/// Cheap to clone; clones share the pool, the compiler and the transaction list. Work is leased
/// to [`OwnerToken::current`] unless an `_as` variant names another owner, so everything a thread
/// runs while it holds a transaction lands on the transaction's connection.
#[derive(Clone)]
pub struct SqliteExecutor {
    inner: Arc<ExecutorInner>,
}

impl SqliteExecutor {
    /// Resolve the database location and set up the (still empty) pool.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigError`] for an empty path, a zero connection cap, or an
    /// unparseable `version_override`.
    pub fn new(options: SqliteOptions) -> Result<Self, ExecutorError> {
        let location = DatabaseLocation::resolve(&options.db_path)?;
        if options.max_connections == Some(0) {
            return Err(ExecutorError::ConfigError(
                "max_connections must be at least 1".into(),
            ));
        }
        let version = match options.version_override.as_deref() {
            Some(pinned) => BackendVersion::parse(pinned)?,
            None => BackendVersion::linked(),
        };

        // Shared-cache locks never wait, so one connection serializes `:memory:` work instead.
        let max_size = if location.is_memory() {
            Some(1)
        } else {
            options.max_connections
        };
        let pool = ConnectionPool::new(
            connection_manager(&location, options.busy_timeout),
            PoolOptions {
                max_size,
                acquire_timeout: options.acquire_timeout,
            },
        )?;

        debug!(
            database = %location,
            %version,
            max_connections = pool.max_size(),
            "sqlite executor created"
        );
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                compiler_factory: options
                    .compiler
                    .clone()
                    .unwrap_or_else(sqlite_compiler_factory),
                options,
                location,
                version,
                compiler: OnceLock::new(),
                pool,
                registry: Arc::new(TransactionRegistry::default()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    #[must_use]
    pub fn builder(db_path: impl Into<String>) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.inner.options
    }

    /// Version the compiler gates features on.
    #[must_use]
    pub fn version(&self) -> BackendVersion {
        self.inner.version
    }

    #[must_use]
    pub fn location(&self) -> &DatabaseLocation {
        &self.inner.location
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        self.inner.options.busy_timeout
    }

    /// The connection pool, for statistics.
    #[must_use]
    pub fn connections(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Ids of the transactions currently started on this executor.
    #[must_use]
    pub fn transactions(&self) -> Vec<u64> {
        self.inner.registry.active()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ExecutorError> {
        if self.is_closed() {
            Err(ExecutorError::Closed)
        } else {
            Ok(())
        }
    }

    /// Lease a connection for the calling thread.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Closed`] after close, or the pool's acquire error.
    pub fn acquire(&self) -> Result<ConnectionLease, ExecutorError> {
        self.acquire_as(OwnerToken::current())
    }

    /// Lease a connection for `owner`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Closed`] after close, or the pool's acquire error.
    pub fn acquire_as(&self, owner: OwnerToken) -> Result<ConnectionLease, ExecutorError> {
        self.ensure_open()?;
        self.inner.pool.acquire(owner)
    }

    /// Start a transaction for the calling thread. Dropping it uncommitted rolls it back.
    ///
    /// # Errors
    /// Returns [`ExecutorError::TransactionAlreadyActive`] when the thread's connection already
    /// carries one, or the acquire/`BEGIN` error.
    pub fn begin(&self) -> Result<Transaction, ExecutorError> {
        self.begin_as(OwnerToken::current())
    }

    /// Start a transaction for `owner`.
    ///
    /// # Errors
    /// See [`begin`](Self::begin).
    pub fn begin_as(&self, owner: OwnerToken) -> Result<Transaction, ExecutorError> {
        let mut tx = self.create_transaction(Some(self.acquire_as(owner)?))?;
        tx.start()?;
        Ok(tx)
    }

    /// Run `body` inside a transaction: commit on `Ok`, roll back on `Err`, release either way.
    ///
    /// # Errors
    /// Returns the body's error after rolling back, or the begin/commit error.
    pub fn transaction<T, F>(&self, body: F) -> Result<T, ExecutorError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, ExecutorError>,
    {
        let mut tx = self.begin()?;
        match body(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                tx.close()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(transaction = tx.id(), error = %rollback_err, "rollback after failed body failed");
                }
                if let Err(close_err) = tx.close() {
                    warn!(transaction = tx.id(), error = %close_err, "failed to close transaction");
                }
                Err(err)
            }
        }
    }

    /// Run parameterless SQL on a connection leased for the calling thread.
    ///
    /// # Errors
    /// Returns the native error unmodified.
    pub fn execute_batch(&self, sql: &str) -> Result<(), ExecutorError> {
        let mut cursor = self.cursor(None)?;
        cursor.execute_batch(sql)?;
        cursor.close()
    }

    /// [`Executor::execute`] on behalf of `owner`.
    ///
    /// # Errors
    /// See [`Executor::execute`].
    pub fn execute_with(&self, query: &Query, owner: OwnerToken) -> Result<Execution, ExecutorError> {
        self.ensure_open()?;
        let ctx = DispatchContext {
            pool: &self.inner.pool,
            registry: &self.inner.registry,
            owner,
        };
        dispatch(self.compiler(), query, &ctx)
    }

    /// Run a select and return its task, ready to iterate.
    ///
    /// # Errors
    /// See [`Executor::execute`].
    pub fn select(&self, query: SelectQuery) -> Result<SelectTask, ExecutorError> {
        let execution = self.execute(&Query::Select(query))?;
        execution.into_select().ok_or_else(|| {
            ExecutorError::invalid_state("executor", "select", "dispatched to another task")
        })
    }

    /// Run an insert.
    ///
    /// # Errors
    /// See [`Executor::execute`].
    pub fn insert(&self, query: InsertQuery) -> Result<InsertOutcome, ExecutorError> {
        let execution = self.execute(&Query::Insert(query))?;
        execution.into_insert().ok_or_else(|| {
            ExecutorError::invalid_state("executor", "insert", "dispatched to another task")
        })
    }
}

impl Executor for SqliteExecutor {
    fn compiler(&self) -> &dyn Compiler {
        self.inner
            .compiler
            .get_or_init(|| {
                debug!(version = %self.inner.version, "building compiler");
                (self.inner.compiler_factory)(self.inner.version)
            })
            .as_ref()
    }

    fn create_connection(&self) -> Result<rusqlite::Connection, ExecutorError> {
        open_connection(&self.inner.location, self.inner.options.busy_timeout)
    }

    fn create_transaction(
        &self,
        lease: Option<ConnectionLease>,
    ) -> Result<Transaction, ExecutorError> {
        let lease = match lease {
            Some(lease) => lease,
            None => self.acquire()?,
        };
        self.ensure_open()?;
        Ok(Transaction::new(lease, Arc::clone(&self.inner.registry)))
    }

    fn cursor(&self, lease: Option<ConnectionLease>) -> Result<Cursor, ExecutorError> {
        let lease = match lease {
            Some(lease) => lease,
            None => self.acquire()?,
        };
        self.ensure_open()?;
        Ok(Cursor::new(lease))
    }

    fn execute(&self, query: &Query) -> Result<Execution, ExecutorError> {
        self.execute_with(query, OwnerToken::current())
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.pool.close();
        debug!(database = %self.inner.location, "sqlite executor closed");
    }
}

impl fmt::Debug for SqliteExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteExecutor")
            .field("location", &self.inner.location)
            .field("version", &self.inner.version)
            .field("pool", &self.inner.pool)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
