use thiserror::Error;

/// Errors surfaced by the executor layer.
///
/// Native driver failures are carried unmodified in [`ExecutorError::Sqlite`] so callers can
/// still match on the `rusqlite` error (for example a constraint violation). Every other variant
/// is raised by this crate when a caller breaks a resource invariant or a contract at the
/// executor boundary.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error("illegal connection access ({operation} on connection {connection}): {reason}")]
    ConnectionState {
        operation: &'static str,
        connection: u64,
        reason: String,
    },

    #[error("connection pool exhausted ({max_size} connections in use)")]
    PoolExhausted { max_size: usize },

    #[error("transaction already active on connection {connection}")]
    TransactionAlreadyActive { connection: u64 },

    #[error("{task} task already open")]
    TaskAlreadyOpen { task: &'static str },

    #[error("{resource} cannot {operation} while {state}")]
    InvalidState {
        resource: &'static str,
        operation: &'static str,
        state: String,
    },

    #[error("No statements returned from compiler")]
    EmptyCompilation,

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("executor closed")]
    Closed,
}

impl ExecutorError {
    /// Native error code, when the failure came from `SQLite` itself.
    #[must_use]
    pub fn sqlite_error_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            ExecutorError::Sqlite(err) => err.sqlite_error_code(),
            _ => None,
        }
    }

    /// `true` for primary key, unique, not-null and check constraint failures.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
    }

    pub(crate) fn invalid_state(
        resource: &'static str,
        operation: &'static str,
        state: impl std::fmt::Display,
    ) -> Self {
        ExecutorError::InvalidState {
            resource,
            operation,
            state: state.to_string(),
        }
    }
}
