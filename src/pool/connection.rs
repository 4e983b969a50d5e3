use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::error::ExecutorError;

use super::owner::OwnerToken;
use super::{PoolShared, PooledNative, lock};

#[derive(Debug, Default)]
pub(super) struct LeaseState {
    pub(super) owner: Option<OwnerToken>,
    pub(super) operations: usize,
}

struct ConnectionInner {
    id: u64,
    /// Emptied when the last operation releases; the handle then goes back to r2d2.
    native: Mutex<Option<PooledNative>>,
    lease: Mutex<LeaseState>,
    transaction: Mutex<Option<u64>>,
    pool: Weak<PoolShared>,
}

/// Shared handle to one checkout of a pooled native connection.
///
/// Clones refer to the same checkout. The native handle is only reachable through the owner
/// that currently leases it. [`id`](Self::id) names the native connection, so it repeats when
/// the pool hands the same connection out again.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(super) fn new(native: PooledNative, pool: Weak<PoolShared>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: native.id,
                native: Mutex::new(Some(native)),
                lease: Mutex::new(LeaseState::default()),
                transaction: Mutex::new(None),
                pool,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Operations currently holding this connection; zero while idle.
    #[must_use]
    pub fn operations(&self) -> usize {
        lock(&self.inner.lease).operations
    }

    #[must_use]
    pub fn owner(&self) -> Option<OwnerToken> {
        lock(&self.inner.lease).owner
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction_id().is_some()
    }

    #[must_use]
    pub fn transaction_id(&self) -> Option<u64> {
        *lock(&self.inner.transaction)
    }

    /// `true` when both handles refer to the same native connection.
    #[must_use]
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(super) fn lease_state(&self) -> std::sync::MutexGuard<'_, LeaseState> {
        lock(&self.inner.lease)
    }

    pub(crate) fn check_owner(
        &self,
        owner: OwnerToken,
        operation: &'static str,
    ) -> Result<(), ExecutorError> {
        match self.owner() {
            Some(current) if current == owner => Ok(()),
            Some(current) => Err(ExecutorError::ConnectionState {
                operation,
                connection: self.id(),
                reason: format!("leased by {current}, used by {owner}"),
            }),
            None => Err(ExecutorError::ConnectionState {
                operation,
                connection: self.id(),
                reason: "connection is not leased".into(),
            }),
        }
    }

    /// Run `func` against the native handle after checking that `owner` holds the lease.
    pub(crate) fn with_native<F, R>(
        &self,
        owner: OwnerToken,
        operation: &'static str,
        func: F,
    ) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, ExecutorError>,
    {
        self.check_owner(owner, operation)?;
        let mut native = lock(&self.inner.native);
        match native.as_mut() {
            Some(pooled) => func(&mut pooled.conn),
            None => Err(ExecutorError::ConnectionState {
                operation,
                connection: self.id(),
                reason: "connection already returned to the pool".into(),
            }),
        }
    }

    pub(super) fn detach(&self) -> Option<PooledNative> {
        lock(&self.inner.native).take()
    }

    pub(crate) fn mark_transaction(&self, transaction: u64) -> Result<(), ExecutorError> {
        let mut slot = lock(&self.inner.transaction);
        if slot.is_some() {
            return Err(ExecutorError::TransactionAlreadyActive {
                connection: self.id(),
            });
        }
        *slot = Some(transaction);
        Ok(())
    }

    pub(crate) fn clear_transaction(&self, transaction: u64) {
        let mut slot = lock(&self.inner.transaction);
        if *slot == Some(transaction) {
            *slot = None;
        }
    }

    fn pool(&self) -> Option<Arc<PoolShared>> {
        self.inner.pool.upgrade()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lease = lock(&self.inner.lease);
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("owner", &lease.owner)
            .field("operations", &lease.operations)
            .finish_non_exhaustive()
    }
}

/// One operation's hold on a pooled connection.
///
/// Dropping the lease releases it; the connection goes back to the idle set once every lease
/// taken by its owner is gone.
pub struct ConnectionLease {
    connection: Connection,
    owner: OwnerToken,
    released: bool,
}

impl ConnectionLease {
    pub(super) fn new(connection: Connection, owner: OwnerToken) -> Self {
        Self {
            connection,
            owner,
            released: false,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn owner(&self) -> OwnerToken {
        self.owner
    }

    /// Release explicitly, surfacing errors that `Drop` can only log.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConnectionState`] if the lease no longer matches the connection.
    pub fn release(mut self) -> Result<(), ExecutorError> {
        self.released = true;
        release_to_pool(&self.connection, self.owner)
    }

    pub(crate) fn with_native<F, R>(&self, operation: &'static str, func: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, ExecutorError>,
    {
        self.connection.with_native(self.owner, operation, func)
    }
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("connection", &self.connection.id())
            .field("owner", &self.owner)
            .finish()
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = release_to_pool(&self.connection, self.owner) {
            warn!(connection = self.connection.id(), error = %err, "failed to release connection lease");
        }
    }
}

fn release_to_pool(connection: &Connection, owner: OwnerToken) -> Result<(), ExecutorError> {
    match connection.pool() {
        Some(pool) => pool.release(connection, owner),
        None => Ok(()),
    }
}
