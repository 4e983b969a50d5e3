mod connection;
mod manager;
mod owner;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::error::ExecutorError;

pub use connection::{Connection, ConnectionLease};
pub use owner::OwnerToken;
pub use r2d2_sqlite::SqliteConnectionManager;

use manager::{NativeManager, TracingErrorHandler};

type NativePool = r2d2::Pool<NativeManager>;
pub(crate) type PooledNative = r2d2::PooledConnection<NativeManager>;

/// Connection cap used when [`PoolOptions::max_size`] is left unset.
pub const DEFAULT_MAX_SIZE: usize = 10;

/// Sizing and waiting policy for a [`ConnectionPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOptions {
    /// Hard cap on open connections; `None` means [`DEFAULT_MAX_SIZE`].
    pub max_size: Option<usize>,
    /// How long `acquire` waits for a connection when the cap is reached; `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl PoolOptions {
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size.max(1));
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        // Clear the poison and continue with the recovered data
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct PoolState {
    /// `None` once the pool is closed.
    pool: Option<NativePool>,
    leased: HashMap<OwnerToken, Connection>,
}

pub(crate) struct PoolShared {
    state: Mutex<PoolState>,
    options: PoolOptions,
    max_size: usize,
}

/// Pool of native connections leased per [`OwnerToken`].
///
/// Sizing, waiting and connection health are r2d2's job. On top of it the pool keeps one
/// connection per owner: an owner that already holds a connection gets the same connection back
/// with its operation counter raised, so work issued inside a transaction runs on the
/// transaction's connection. The native connection returns to r2d2 when the counter reaches zero.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Build a pool over `manager`. No connection is opened until the first acquire.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigError`] for a zero cap or a zero acquire timeout.
    pub fn new(manager: SqliteConnectionManager, options: PoolOptions) -> Result<Self, ExecutorError> {
        let max_size = options.max_size.unwrap_or(DEFAULT_MAX_SIZE);
        let cap = u32::try_from(max_size)
            .ok()
            .filter(|cap| *cap > 0)
            .ok_or_else(|| ExecutorError::ConfigError(format!("invalid pool size {max_size}")))?;

        let mut builder = r2d2::Pool::builder()
            .max_size(cap)
            .min_idle(Some(0))
            .idle_timeout(None)
            .max_lifetime(None)
            .error_handler(Box::new(TracingErrorHandler));
        if let Some(timeout) = options.acquire_timeout {
            if timeout.is_zero() {
                return Err(ExecutorError::ConfigError(
                    "acquire timeout must be greater than zero".into(),
                ));
            }
            builder = builder.connection_timeout(timeout);
        }
        let pool = builder.build(NativeManager::new(manager))?;

        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    pool: Some(pool),
                    leased: HashMap::new(),
                }),
                options,
                max_size,
            }),
        })
    }

    /// Lease a connection for `owner`, waiting for one when the pool is at its cap.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Closed`] after [`close`](Self::close),
    /// [`ExecutorError::PoolExhausted`] when the acquire timeout elapses, or
    /// [`ExecutorError::Pool`] when no connection could be opened in time.
    pub fn acquire(&self, owner: OwnerToken) -> Result<ConnectionLease, ExecutorError> {
        self.shared.checkout(owner, true)
    }

    /// Lease a connection without waiting.
    ///
    /// # Errors
    /// Returns [`ExecutorError::PoolExhausted`] when the cap is reached and nothing is idle.
    pub fn try_acquire(&self, owner: OwnerToken) -> Result<ConnectionLease, ExecutorError> {
        self.shared.checkout(owner, false)
    }

    /// Drop one operation from `connection` on behalf of `owner`.
    ///
    /// Prefer dropping the [`ConnectionLease`]; calling this while the lease is still alive makes
    /// the lease's own release fail later.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConnectionState`] if `owner` does not hold the connection.
    pub fn release(&self, connection: &Connection, owner: OwnerToken) -> Result<(), ExecutorError> {
        self.shared.release(connection, owner)
    }

    /// Connections currently leased.
    #[must_use]
    pub fn active(&self) -> usize {
        lock(&self.shared.state).leased.len()
    }

    #[must_use]
    pub fn idle(&self) -> usize {
        let state = lock(&self.shared.state);
        state
            .pool
            .as_ref()
            .map_or(0, |pool| pool.state().idle_connections as usize)
    }

    /// Open connections, leased or idle.
    #[must_use]
    pub fn size(&self) -> usize {
        let state = lock(&self.shared.state);
        match &state.pool {
            Some(pool) => pool.state().connections as usize,
            None => state.leased.len(),
        }
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).pool.is_none()
    }

    /// Refuse new leases and drop the pool's handle. Idle connections close now, leased ones
    /// when they are released.
    pub fn close(&self) {
        let pool = lock(&self.shared.state).pool.take();
        if let Some(pool) = pool {
            debug!(idle = pool.state().idle_connections, "connection pool closed");
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        let native = state.pool.as_ref().map(r2d2::Pool::state);
        f.debug_struct("ConnectionPool")
            .field("native", &native)
            .field("active", &state.leased.len())
            .field("closed", &state.pool.is_none())
            .field("options", &self.shared.options)
            .finish()
    }
}

impl PoolShared {
    fn checkout(
        self: &Arc<Self>,
        owner: OwnerToken,
        wait: bool,
    ) -> Result<ConnectionLease, ExecutorError> {
        let pool = {
            let state = lock(&self.state);
            let Some(pool) = state.pool.clone() else {
                return Err(ExecutorError::Closed);
            };
            if let Some(held) = state.leased.get(&owner).cloned() {
                held.lease_state().operations += 1;
                return Ok(ConnectionLease::new(held, owner));
            }
            pool
        };

        // Wait for r2d2 without holding the state lock so releases can proceed.
        let native = if wait {
            self.get_native(&pool)?
        } else {
            self.try_get_native(&pool)?
        };
        drop(pool);

        let mut state = lock(&self.state);
        if state.pool.is_none() {
            return Err(ExecutorError::Closed);
        }
        if let Some(held) = state.leased.get(&owner).cloned() {
            // The owner raced itself through r2d2; keep its existing connection.
            held.lease_state().operations += 1;
            return Ok(ConnectionLease::new(held, owner));
        }
        let conn = Connection::new(native, Arc::downgrade(self));
        {
            let mut lease = conn.lease_state();
            lease.owner = Some(owner);
            lease.operations = 1;
        }
        state.leased.insert(owner, conn.clone());
        debug!(connection = conn.id(), %owner, "leased connection");
        Ok(ConnectionLease::new(conn, owner))
    }

    fn get_native(&self, pool: &NativePool) -> Result<PooledNative, ExecutorError> {
        loop {
            match pool.get() {
                Ok(native) => return Ok(native),
                Err(err) => {
                    if !self.at_capacity(pool) {
                        return Err(err.into());
                    }
                    if self.options.acquire_timeout.is_some() {
                        return Err(ExecutorError::PoolExhausted {
                            max_size: self.max_size,
                        });
                    }
                    if lock(&self.state).pool.is_none() {
                        return Err(ExecutorError::Closed);
                    }
                    debug!(max_size = self.max_size, "pool at capacity; still waiting");
                }
            }
        }
    }

    fn try_get_native(&self, pool: &NativePool) -> Result<PooledNative, ExecutorError> {
        if let Some(native) = pool.try_get() {
            return Ok(native);
        }
        if self.at_capacity(pool) {
            return Err(ExecutorError::PoolExhausted {
                max_size: self.max_size,
            });
        }
        // Nothing idle but room to grow: open one.
        pool.get().map_err(Into::into)
    }

    fn at_capacity(&self, pool: &NativePool) -> bool {
        pool.state().connections as usize >= self.max_size
    }

    fn release(&self, connection: &Connection, owner: OwnerToken) -> Result<(), ExecutorError> {
        let closed = {
            let mut state = lock(&self.state);
            let mut lease = connection.lease_state();
            match lease.owner {
                Some(current) if current == owner => {}
                Some(current) => {
                    return Err(ExecutorError::ConnectionState {
                        operation: "release",
                        connection: connection.id(),
                        reason: format!("leased by {current}, released by {owner}"),
                    });
                }
                None => {
                    return Err(ExecutorError::ConnectionState {
                        operation: "release",
                        connection: connection.id(),
                        reason: "connection is not leased".into(),
                    });
                }
            }

            lease.operations = lease.operations.saturating_sub(1);
            if lease.operations > 0 {
                return Ok(());
            }
            lease.owner = None;
            drop(lease);
            state.leased.remove(&owner);
            state.pool.is_none()
        };

        // Dropping the handle hands the native connection back to r2d2.
        drop(connection.detach());
        if closed {
            debug!(connection = connection.id(), "closing connection released after shutdown");
        } else {
            debug!(connection = connection.id(), %owner, "connection returned to pool");
        }
        Ok(())
    }
}
