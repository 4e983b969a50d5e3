use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use tracing::debug;

use crate::compiler::CompilerFactory;
use crate::error::ExecutorError;
use crate::executor::SqliteExecutor;

/// Lock wait applied to every pooled connection unless configured otherwise.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(1);

/// Options for configuring a `SQLite` executor.
#[derive(Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    /// Hard cap on pooled connections; `None` opens connections on demand.
    pub max_connections: Option<usize>,
    pub acquire_timeout: Option<Duration>,
    pub busy_timeout: Duration,
    /// Version used for compiler feature gating instead of the linked library's.
    pub version_override: Option<String>,
    pub compiler: Option<CompilerFactory>,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            max_connections: None,
            acquire_timeout: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            version_override: None,
            compiler: None,
        }
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    #[must_use]
    pub fn with_compiler(mut self, factory: CompilerFactory) -> Self {
        self.compiler = Some(factory);
        self
    }
}

impl fmt::Debug for SqliteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteOptions")
            .field("db_path", &self.db_path)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("busy_timeout", &self.busy_timeout)
            .field("version_override", &self.version_override)
            .field("compiler", &self.compiler.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.opts.max_connections = Some(max_connections);
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.opts.acquire_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn version_override(mut self, version: impl Into<String>) -> Self {
        self.opts.version_override = Some(version.into());
        self
    }

    #[must_use]
    pub fn compiler(mut self, factory: CompilerFactory) -> Self {
        self.opts.compiler = Some(factory);
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build the executor and open one connection to prove the database is reachable.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigError`] for invalid options, or the native error if the smoke
    /// connection cannot be opened.
    pub fn build(self) -> Result<SqliteExecutor, ExecutorError> {
        let executor = SqliteExecutor::new(self.finish())?;
        executor.acquire()?.release()?;
        Ok(executor)
    }
}

/// Where an executor's connections point, resolved once at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// `:memory:`, opened through a shared-cache URI private to one executor. The executor keeps a
    /// single pooled connection to it, since shared-cache table locks fail with `SQLITE_LOCKED`
    /// instead of honouring the busy timeout.
    Memory { uri: String },
    File(PathBuf),
    /// A `file:` URI passed through untouched.
    Uri(String),
}

impl DatabaseLocation {
    /// # Errors
    /// Returns [`ExecutorError::ConfigError`] for an empty path or one that cannot be made
    /// absolute.
    pub fn resolve(db_path: &str) -> Result<Self, ExecutorError> {
        if db_path.is_empty() {
            return Err(ExecutorError::ConfigError("database path is empty".into()));
        }
        if db_path == ":memory:" {
            let n = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
            return Ok(DatabaseLocation::Memory {
                uri: format!("file:sql-executor-mem-{n}?mode=memory&cache=shared"),
            });
        }
        if db_path.starts_with("file:") {
            return Ok(DatabaseLocation::Uri(db_path.to_string()));
        }
        let absolute = std::path::absolute(Path::new(db_path)).map_err(|e| {
            ExecutorError::ConfigError(format!("cannot resolve database path {db_path:?}: {e}"))
        })?;
        Ok(DatabaseLocation::File(absolute))
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, DatabaseLocation::Memory { .. })
    }

    /// Path of a file database.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            DatabaseLocation::File(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseLocation::Memory { .. } => f.write_str(":memory:"),
            DatabaseLocation::File(path) => write!(f, "{}", path.display()),
            DatabaseLocation::Uri(uri) => f.write_str(uri),
        }
    }
}

/// r2d2 manager for `location` whose init hook applies the per-connection bootstrap: busy
/// timeout, then `journal_mode=WAL`.
///
/// In-memory databases report `memory` for the journal mode; that is accepted.
#[must_use]
pub fn connection_manager(
    location: &DatabaseLocation,
    busy_timeout: Duration,
) -> SqliteConnectionManager {
    let manager = match location {
        DatabaseLocation::Memory { uri } | DatabaseLocation::Uri(uri) => {
            SqliteConnectionManager::file(uri).with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )
        }
        DatabaseLocation::File(path) => SqliteConnectionManager::file(path),
    };
    let database = location.to_string();
    manager.with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(%database, %journal_mode, "opened sqlite connection");
        Ok(())
    })
}

/// Open one bootstrapped connection outside any pool.
///
/// # Errors
/// Returns [`ExecutorError::Sqlite`] if opening or configuring the connection fails.
pub fn open_connection(
    location: &DatabaseLocation,
    busy_timeout: Duration,
) -> Result<rusqlite::Connection, ExecutorError> {
    Ok(connection_manager(location, busy_timeout).connect()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_locations_are_private_per_resolve() {
        let a = DatabaseLocation::resolve(":memory:").unwrap();
        let b = DatabaseLocation::resolve(":memory:").unwrap();
        assert!(a.is_memory());
        assert_ne!(a, b);
        assert_eq!(a.to_string(), ":memory:");
    }

    #[test]
    fn relative_paths_become_absolute() {
        let location = DatabaseLocation::resolve("data/app.db").unwrap();
        let path = location.path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("data/app.db"));
    }

    #[test]
    fn uris_pass_through() {
        let location = DatabaseLocation::resolve("file:x.db?mode=ro").unwrap();
        assert_eq!(location, DatabaseLocation::Uri("file:x.db?mode=ro".into()));
        assert!(DatabaseLocation::resolve("").is_err());
    }

    #[test]
    fn file_connections_switch_to_wal() {
        let dir = tempfile::tempdir().unwrap();
        let location = DatabaseLocation::File(dir.path().join("wal.db"));
        let conn = open_connection(&location, DEFAULT_BUSY_TIMEOUT).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
