use std::sync::Arc;

use tracing::debug;

use crate::compiler::Compiler;
use crate::error::ExecutorError;
use crate::pool::{ConnectionPool, OwnerToken};
use crate::query::{Query, QueryKind};
use crate::task::{InsertTask, SelectTask, Task};
use crate::transaction::TransactionRegistry;

use super::Execution;
use super::targets::BatchTarget;

/// Execute a batch against either a cursor or a transaction.
///
/// # Errors
/// Returns the native error, or [`ExecutorError::InvalidState`] if the target is finished.
pub fn execute_batch<'a>(target: impl Into<BatchTarget<'a>>, sql: &str) -> Result<(), ExecutorError> {
    match target.into() {
        BatchTarget::Cursor(cursor) => cursor.execute_batch(sql),
        BatchTarget::Transaction(tx) => tx.execute_batch(sql),
    }
}

/// Resources a dispatched task runs against.
pub(crate) struct DispatchContext<'a> {
    pub(crate) pool: &'a ConnectionPool,
    pub(crate) registry: &'a Arc<TransactionRegistry>,
    pub(crate) owner: OwnerToken,
}

/// Compile `query`, then route the statements to the task for its kind.
pub(crate) fn dispatch(
    compiler: &dyn Compiler,
    query: &Query,
    ctx: &DispatchContext<'_>,
) -> Result<Execution, ExecutorError> {
    let kind = query.kind();
    let mut statements = compiler.compile(query)?;
    if statements.is_empty() {
        return Err(ExecutorError::EmptyCompilation);
    }
    debug!(%kind, statements = statements.len(), owner = %ctx.owner, "dispatching query");

    match query {
        Query::Select(select) => {
            if statements.len() > 1 {
                return Err(ExecutorError::Unimplemented(format!(
                    "{kind} compiled to {} statements",
                    statements.len()
                )));
            }
            let statement = statements.remove(0);
            let mut task = SelectTask::new(
                ctx.pool.clone(),
                ctx.owner,
                statement,
                select.properties()?,
            );
            task.open()?;
            task.execute()?;
            Ok(Execution::Select(task))
        }
        Query::Insert(_) => {
            let mut task = InsertTask::new(
                ctx.pool.clone(),
                ctx.owner,
                statements,
                Arc::clone(ctx.registry),
            );
            task.open()?;
            Ok(Execution::Insert(task.execute()?))
        }
        Query::Update(_) | Query::Delete(_) => Err(unimplemented(kind)),
    }
}

fn unimplemented(kind: QueryKind) -> ExecutorError {
    ExecutorError::Unimplemented(kind.to_string())
}
