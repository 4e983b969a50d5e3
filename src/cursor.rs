use tracing::debug;

use crate::error::ExecutorError;
use crate::pool::{Connection, ConnectionLease};
use crate::query::Statement;
use crate::sqlite::{NativeRows, Params, fetch_rows};

/// Executes compiled statements on one leased connection.
///
/// The cursor holds its lease until [`close`](Cursor::close) or drop, so the connection stays
/// with the cursor's owner while it is open.
#[derive(Debug)]
pub struct Cursor {
    lease: Option<ConnectionLease>,
    statements: usize,
}

impl Cursor {
    #[must_use]
    pub fn new(lease: ConnectionLease) -> Self {
        Self {
            lease: Some(lease),
            statements: 0,
        }
    }

    fn lease(&self, operation: &'static str) -> Result<&ConnectionLease, ExecutorError> {
        self.lease
            .as_ref()
            .ok_or_else(|| ExecutorError::invalid_state("cursor", operation, "closed"))
    }

    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] once the cursor is closed.
    pub fn connection(&self) -> Result<&Connection, ExecutorError> {
        Ok(self.lease("inspect")?.connection())
    }

    /// Run one statement and return the number of rows it changed.
    ///
    /// # Errors
    /// Returns the native error unmodified, or [`ExecutorError::InvalidState`] when closed.
    pub fn execute(&mut self, statement: &Statement) -> Result<usize, ExecutorError> {
        let lease = self.lease("execute")?;
        let params = Params::convert(&statement.params);
        debug!(connection = lease.connection().id(), sql = %statement.sql, "execute statement");
        let affected = lease.with_native("execute", |conn| {
            let mut stmt = conn.prepare_cached(&statement.sql)?;
            Ok(stmt.execute(&params.as_refs()[..])?)
        })?;
        self.statements += 1;
        Ok(affected)
    }

    /// Run parameterless SQL, possibly several `;`-separated statements.
    ///
    /// # Errors
    /// Returns the native error unmodified, or [`ExecutorError::InvalidState`] when closed.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), ExecutorError> {
        let lease = self.lease("execute_batch")?;
        debug!(connection = lease.connection().id(), sql, "execute batch");
        lease.with_native("execute_batch", |conn| Ok(conn.execute_batch(sql)?))?;
        self.statements += 1;
        Ok(())
    }

    /// Run a row-returning statement and step every row out of it.
    ///
    /// # Errors
    /// Returns the native error unmodified, or [`ExecutorError::InvalidState`] when closed.
    pub fn query(&mut self, statement: &Statement) -> Result<NativeRows, ExecutorError> {
        let lease = self.lease("query")?;
        let params = Params::convert(&statement.params);
        debug!(connection = lease.connection().id(), sql = %statement.sql, "query statement");
        let rows = lease.with_native("query", |conn| fetch_rows(conn, &statement.sql, &params))?;
        self.statements += 1;
        Ok(rows)
    }

    /// Rowid of the most recent successful insert on this connection.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] once the cursor is closed.
    pub fn last_insert_rowid(&self) -> Result<i64, ExecutorError> {
        self.lease("last_insert_rowid")?
            .with_native("last_insert_rowid", |conn| Ok(conn.last_insert_rowid()))
    }

    /// `false` while the connection has an open native transaction.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidState`] once the cursor is closed.
    pub fn is_autocommit(&self) -> Result<bool, ExecutorError> {
        self.lease("is_autocommit")?
            .with_native("is_autocommit", |conn| Ok(conn.is_autocommit()))
    }

    #[must_use]
    pub fn statements_executed(&self) -> usize {
        self.statements
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lease.is_none()
    }

    /// Release the connection. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConnectionState`] if the lease no longer matches its connection.
    pub fn close(&mut self) -> Result<(), ExecutorError> {
        match self.lease.take() {
            Some(lease) => lease.release(),
            None => Ok(()),
        }
    }
}
