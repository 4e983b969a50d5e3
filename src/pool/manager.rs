use std::sync::atomic::{AtomicU64, Ordering};

use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, warn};

/// Native handle tagged with the id it keeps for its whole life in the pool.
#[derive(Debug)]
pub(crate) struct NativeConnection {
    pub(crate) id: u64,
    pub(crate) conn: rusqlite::Connection,
}

/// Wraps [`SqliteConnectionManager`] so every connection it opens carries a stable id.
pub(crate) struct NativeManager {
    manager: SqliteConnectionManager,
    next_id: AtomicU64,
}

impl NativeManager {
    pub(crate) fn new(manager: SqliteConnectionManager) -> Self {
        Self {
            manager,
            next_id: AtomicU64::new(1),
        }
    }
}

impl ManageConnection for NativeManager {
    type Connection = NativeConnection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<NativeConnection, rusqlite::Error> {
        let conn = self.manager.connect()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "opened pooled connection");
        Ok(NativeConnection { id, conn })
    }

    fn is_valid(&self, native: &mut NativeConnection) -> Result<(), rusqlite::Error> {
        self.manager.is_valid(&mut native.conn)
    }

    fn has_broken(&self, native: &mut NativeConnection) -> bool {
        self.manager.has_broken(&mut native.conn)
    }
}

/// Routes r2d2's background connection failures into `tracing`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TracingErrorHandler;

impl r2d2::HandleError<rusqlite::Error> for TracingErrorHandler {
    fn handle_error(&self, error: rusqlite::Error) {
        warn!(%error, "failed to open pooled connection");
    }
}
