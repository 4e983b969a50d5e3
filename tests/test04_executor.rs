use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use sql_executor::prelude::*;
use sql_executor::{DatabaseLocation, UpdateQuery};

struct EmptyCompiler(BackendVersion);

impl Compiler for EmptyCompiler {
    fn version(&self) -> BackendVersion {
        self.0
    }

    fn compile(&self, _query: &Query) -> Result<Vec<Statement>, ExecutorError> {
        Ok(Vec::new())
    }
}

fn items_model() -> Result<Arc<Model>, ExecutorError> {
    Model::builder("items")
        .property(Property::new("id", ValueKind::Integer).primary_key())
        .property(Property::new("label", ValueKind::Text))
        .build()
}

fn items_executor(builder: SqliteOptionsBuilder) -> Result<SqliteExecutor, ExecutorError> {
    let executor = builder.build()?;
    executor.execute_batch("CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, label TEXT)")?;
    Ok(executor)
}

#[test]
fn empty_compilation_is_rejected() -> Result<(), ExecutorError> {
    let factory: CompilerFactory = Arc::new(|version| Box::new(EmptyCompiler(version)) as Box<dyn Compiler>);
    let executor = SqliteExecutor::builder(":memory:").compiler(factory).build()?;

    let err = executor
        .execute(&Query::Select(SelectQuery::new(items_model()?)))
        .unwrap_err();
    assert!(matches!(err, ExecutorError::EmptyCompilation));
    assert!(err.to_string().contains("No statements returned from compiler"));
    assert_eq!(executor.connections().active(), 0);
    Ok(())
}

#[test]
fn unsupported_query_kinds_name_themselves() -> Result<(), ExecutorError> {
    let executor = items_executor(SqliteExecutor::builder(":memory:"))?;
    let items = items_model()?;

    let update = UpdateQuery::new(
        Arc::clone(&items),
        Record::new().with("label", RowValues::Text("x".into())),
    )
    .filter("id", RowValues::Int(1));
    let err = executor.execute(&update.into()).unwrap_err();
    assert!(matches!(err, ExecutorError::Unimplemented(_)));
    assert!(err.to_string().contains("UpdateQuery"));

    let err = executor
        .execute(&Query::Delete(DeleteQuery::new(items)))
        .unwrap_err();
    assert!(err.to_string().contains("DeleteQuery"));
    Ok(())
}

#[test]
fn compiler_is_built_once_per_executor() -> Result<(), ExecutorError> {
    let built = Arc::new(AtomicUsize::new(0));
    let factory: CompilerFactory = {
        let built = Arc::clone(&built);
        Arc::new(move |version| {
            built.fetch_add(1, Ordering::SeqCst);
            Box::new(SqliteCompiler::new(version)) as Box<dyn Compiler>
        })
    };
    let executor = items_executor(
        SqliteExecutor::builder(":memory:")
            .compiler(factory)
            .version_override("3.30.1"),
    )?;
    let items = items_model()?;

    assert_eq!(built.load(Ordering::SeqCst), 0);
    executor.insert(
        InsertQuery::new(Arc::clone(&items))
            .item(Record::new().with("label", RowValues::Text("first".into()))),
    )?;
    let rows = executor.select(SelectQuery::new(items))?.count();
    assert_eq!(rows, 1);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(executor.compiler().version(), BackendVersion::new(3, 30, 1));

    let clone = executor.clone();
    let _ = clone.compiler();
    assert_eq!(built.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn paths_are_normalized_at_configuration() -> Result<(), ExecutorError> {
    let executor = SqliteExecutor::new(SqliteOptions::new("relative_items.db"))?;
    let path = executor.location().path().expect("file location");
    assert!(path.is_absolute());
    assert!(path.ends_with("relative_items.db"));
    assert_eq!(executor.connections().size(), 0);

    let memory = SqliteExecutor::new(SqliteOptions::new(":memory:"))?;
    assert!(memory.location().is_memory());
    assert_eq!(memory.location().to_string(), ":memory:");

    let uri = SqliteExecutor::new(SqliteOptions::new("file:shared_items?mode=memory&cache=shared"))?;
    assert!(matches!(uri.location(), DatabaseLocation::Uri(_)));
    Ok(())
}

#[test]
fn invalid_options_are_config_errors() {
    assert!(matches!(
        SqliteExecutor::new(SqliteOptions::new("")),
        Err(ExecutorError::ConfigError(_))
    ));
    assert!(matches!(
        SqliteExecutor::new(SqliteOptions::new(":memory:").with_max_connections(0)),
        Err(ExecutorError::ConfigError(_))
    ));
    assert!(matches!(
        SqliteExecutor::builder(":memory:").version_override("latest").build(),
        Err(ExecutorError::ConfigError(_))
    ));
}

#[test]
fn memory_executors_are_isolated() -> Result<(), ExecutorError> {
    let first = items_executor(SqliteExecutor::builder(":memory:"))?;
    let second = SqliteExecutor::builder(":memory:").build()?;

    first.execute_batch("INSERT INTO items (label) VALUES ('only here')")?;
    assert!(second.execute_batch("SELECT * FROM items").is_err());
    Ok(())
}

#[test]
fn memory_executor_serves_concurrent_threads() -> Result<(), ExecutorError> {
    let executor = items_executor(SqliteExecutor::builder(":memory:").max_connections(3))?;
    let items = items_model()?;
    assert_eq!(executor.connections().max_size(), 1);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let executor = executor.clone();
            let items = Arc::clone(&items);
            thread::spawn(move || -> Result<(), ExecutorError> {
                for n in 0..10_usize {
                    executor.insert(
                        InsertQuery::new(Arc::clone(&items)).item(
                            Record::new().with("label", RowValues::Text(format!("{worker}-{n}"))),
                        ),
                    )?;
                    let seen = executor.select(SelectQuery::new(Arc::clone(&items)))?.count();
                    assert!(seen > n);
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    assert_eq!(executor.select(SelectQuery::new(items))?.count(), 40);
    assert_eq!(executor.connections().active(), 0);
    Ok(())
}

#[test]
fn memory_reader_waits_for_an_open_transaction() -> Result<(), ExecutorError> {
    let executor = items_executor(SqliteExecutor::builder(":memory:"))?;
    let items = items_model()?;

    let mut tx = executor.begin()?;
    tx.execute(&Statement::new(
        "INSERT INTO items (label) VALUES (?1)",
        vec![RowValues::Text("pending".into())],
    ))?;

    let (sent, received) = mpsc::channel();
    let reader = {
        let executor = executor.clone();
        thread::spawn(move || {
            let rows = executor.select(SelectQuery::new(items)).map(Iterator::count);
            sent.send(rows).expect("send row count");
        })
    };

    assert!(received.recv_timeout(Duration::from_millis(100)).is_err());
    tx.commit()?;
    let rows = received
        .recv_timeout(Duration::from_secs(5))
        .expect("reader finished")?;
    assert_eq!(rows, 1);
    reader.join().expect("reader panicked");
    Ok(())
}

#[test]
fn unsupported_kinds_win_over_compile_errors() -> Result<(), ExecutorError> {
    let executor = items_executor(SqliteExecutor::builder(":memory:"))?;
    let items = items_model()?;

    let err = executor
        .execute(&UpdateQuery::new(Arc::clone(&items), Record::new()).into())
        .unwrap_err();
    assert!(matches!(&err, ExecutorError::Unimplemented(kind) if kind == "UpdateQuery"));

    let err = executor
        .execute(&DeleteQuery::new(items).filter("nope", RowValues::Int(1)).into())
        .unwrap_err();
    assert!(matches!(&err, ExecutorError::Unimplemented(kind) if kind == "DeleteQuery"));
    Ok(())
}

#[test]
fn close_is_idempotent_and_final() -> Result<(), ExecutorError> {
    let executor = items_executor(SqliteExecutor::builder(":memory:"))?;
    let items = items_model()?;

    executor.close();
    executor.close();
    assert!(executor.is_closed());
    assert!(executor.connections().is_closed());
    assert!(matches!(executor.acquire(), Err(ExecutorError::Closed)));
    assert!(matches!(executor.begin(), Err(ExecutorError::Closed)));
    assert!(matches!(
        executor.select(SelectQuery::new(items)),
        Err(ExecutorError::Closed)
    ));
    Ok(())
}

#[test]
fn release_from_another_thread_is_illegal() -> Result<(), ExecutorError> {
    let executor = items_executor(SqliteExecutor::builder(":memory:"))?;
    let lease = executor.acquire()?;
    let conn = lease.connection().clone();

    let pool = executor.connections().clone();
    let result = thread::spawn(move || pool.release(&conn, OwnerToken::current()))
        .join()
        .expect("release thread panicked");
    assert!(matches!(
        result,
        Err(ExecutorError::ConnectionState { .. })
    ));
    assert_eq!(lease.connection().operations(), 1);
    lease.release()?;
    Ok(())
}

#[test]
fn batches_run_on_cursors_and_transactions() -> Result<(), ExecutorError> {
    let executor = items_executor(SqliteExecutor::builder(":memory:"))?;

    let mut cursor = executor.cursor(None)?;
    execute_batch(&mut cursor, "INSERT INTO items (label) VALUES ('a'); INSERT INTO items (label) VALUES ('b')")?;
    cursor.execute(&Statement::new(
        "INSERT INTO items (label) VALUES (?1)",
        vec![RowValues::Text("c".into())],
    ))?;
    assert_eq!(cursor.statements_executed(), 2);
    assert_eq!(cursor.last_insert_rowid()?, 3);
    cursor.close()?;
    cursor.close()?;
    assert!(cursor.is_closed());
    assert!(matches!(
        cursor.execute_batch("SELECT 1"),
        Err(ExecutorError::InvalidState { .. })
    ));

    let mut tx = executor.begin()?;
    execute_batch(&mut tx, "DELETE FROM items")?;
    tx.rollback()?;

    let execution = executor.execute(&Query::Select(SelectQuery::new(items_model()?)))?;
    let task = execution.into_select().expect("select task");
    assert_eq!(task.count(), 3);
    Ok(())
}

#[test]
fn concurrent_writers_share_a_file_database() -> Result<(), ExecutorError> {
    let dir = tempfile::tempdir().map_err(|e| ExecutorError::ConfigError(e.to_string()))?;
    let path = dir.path().join("writers.db");
    let executor = items_executor(SqliteExecutor::builder(path.to_string_lossy()).max_connections(3))?;
    let items = items_model()?;

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let executor = executor.clone();
            let items = Arc::clone(&items);
            thread::spawn(move || -> Result<(), ExecutorError> {
                for n in 0..25 {
                    executor.insert(
                        InsertQuery::new(Arc::clone(&items)).item(
                            Record::new().with("label", RowValues::Text(format!("{worker}-{n}"))),
                        ),
                    )?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer panicked")?;
    }

    assert_eq!(executor.select(SelectQuery::new(items))?.count(), 100);
    assert!(executor.connections().size() <= 3);
    assert_eq!(executor.connections().active(), 0);
    executor.close();
    Ok(())
}
