use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::json;
use sql_executor::prelude::*;

fn events_model() -> Result<Arc<Model>, ExecutorError> {
    Model::builder("events")
        .property(Property::new("id", ValueKind::Integer).primary_key())
        .property(Property::new("name", ValueKind::Text).not_null())
        .property(Property::new("done", ValueKind::Boolean))
        .property(Property::new("at", ValueKind::Timestamp))
        .property(Property::new("meta", ValueKind::Json))
        .build()
}

fn events_executor(version: &str) -> Result<(SqliteExecutor, Arc<Model>), ExecutorError> {
    let executor = SqliteExecutor::builder(":memory:")
        .max_connections(2)
        .version_override(version)
        .build()?;
    executor.execute_batch(
        "CREATE TABLE events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            done INTEGER,
            at TEXT,
            meta TEXT
        )",
    )?;
    Ok((executor, events_model()?))
}

fn event(name: &str) -> Record {
    Record::new().with("name", RowValues::Text(name.into()))
}

fn count(executor: &SqliteExecutor) -> Result<i64, ExecutorError> {
    let mut cursor = executor.cursor(None)?;
    let mut rows = cursor.query(&Statement::new("SELECT count(*) FROM events", Vec::new()))?;
    match rows.pop_front().and_then(|row| row.into_iter().next()) {
        Some(RowValues::Int(n)) => Ok(n),
        other => Err(ExecutorError::Model(format!("unexpected count {other:?}"))),
    }
}

#[test]
fn select_decodes_rows_lazily_and_walks_states() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.45.0")?;
    let at = NaiveDateTime::parse_from_str("2024-05-01 08:30:00", "%Y-%m-%d %H:%M:%S")
        .map_err(|e| ExecutorError::ParameterError(e.to_string()))?;

    executor.insert(
        InsertQuery::new(Arc::clone(&events))
            .item(
                event("deploy")
                    .with("done", RowValues::Bool(true))
                    .with("at", RowValues::Timestamp(at))
                    .with("meta", RowValues::JSON(json!({"region": "eu"}))),
            )
            .item(event("rollback").with("done", RowValues::Bool(false)))
            .item(event("audit")),
    )?;

    let mut task = executor.select(
        SelectQuery::new(Arc::clone(&events))
            .filter("name", RowValues::Text("deploy".into()))
            .order_by("id"),
    )?;
    assert_eq!(task.state(), TaskState::Started);
    assert_eq!(task.remaining(), 1);

    let record = task.next().expect("one row")?;
    assert_eq!(record.get("done"), Some(&RowValues::Bool(true)));
    assert_eq!(record.get("at"), Some(&RowValues::Timestamp(at)));
    assert_eq!(record.get("meta"), Some(&RowValues::JSON(json!({"region": "eu"}))));
    assert_eq!(task.state(), TaskState::Exhausted);
    assert_eq!(executor.connections().active(), 0);

    assert!(task.next().is_none());
    assert_eq!(task.state(), TaskState::Closed);
    assert!(task.next().is_none());

    let names: Vec<RowValues> = executor
        .select(
            SelectQuery::new(Arc::clone(&events))
                .only(["name"])
                .order_by_desc("id")
                .limit(2),
        )?
        .map(|record| record.map(|r| r.get("name").cloned().unwrap_or(RowValues::Null)))
        .collect::<Result<_, _>>()?;
    assert_eq!(
        names,
        vec![
            RowValues::Text("audit".into()),
            RowValues::Text("rollback".into())
        ]
    );
    Ok(())
}

#[test]
fn empty_select_is_exhausted_immediately() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.45.0")?;
    let mut task = executor.select(SelectQuery::new(events))?;
    assert_eq!(task.state(), TaskState::Exhausted);
    assert_eq!(executor.connections().active(), 0);
    assert!(task.next().is_none());
    assert_eq!(task.state(), TaskState::Closed);
    task.close()?;
    task.close()?;
    Ok(())
}

#[test]
fn abandoned_select_releases_its_connection() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.45.0")?;
    executor.insert(
        InsertQuery::new(Arc::clone(&events)).items([event("a"), event("b"), event("c")]),
    )?;

    let outer = executor.acquire()?;
    let before = outer.connection().operations();
    let mut task = executor.select(SelectQuery::new(Arc::clone(&events)))?;
    assert_eq!(outer.connection().operations(), before + 1);
    assert!(task.next().is_some());
    assert_eq!(task.remaining(), 2);
    assert_eq!(task.state(), TaskState::Started);

    drop(task);
    assert_eq!(outer.connection().operations(), before);
    outer.release()?;
    assert_eq!(executor.connections().active(), 0);

    let mut task = executor.select(SelectQuery::new(events))?;
    assert!(task.next().is_some());
    assert_eq!(executor.connections().active(), 1);
    task.close()?;
    assert_eq!(task.state(), TaskState::Closed);
    assert_eq!(executor.connections().active(), 0);
    assert!(task.next().is_none());
    Ok(())
}

#[test]
fn task_cannot_be_opened_twice_or_reused() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.45.0")?;
    let statement = executor.compiler().compile(&Query::Select(SelectQuery::new(Arc::clone(&events))))?;

    let mut task = SelectTask::new(
        executor.connections().clone(),
        OwnerToken::current(),
        statement[0].clone(),
        events.properties().to_vec(),
    );
    assert_eq!(task.state(), TaskState::Created);
    task.open()?;
    assert!(matches!(
        task.open(),
        Err(ExecutorError::TaskAlreadyOpen { task: "select" })
    ));
    assert_eq!(executor.connections().active(), 1);

    task.close()?;
    task.close()?;
    assert_eq!(task.state(), TaskState::Closed);
    assert_eq!(executor.connections().active(), 0);
    assert!(matches!(
        task.open(),
        Err(ExecutorError::InvalidState { .. })
    ));
    assert!(matches!(
        task.execute(),
        Err(ExecutorError::InvalidState { .. })
    ));
    Ok(())
}

#[test]
fn modern_backend_inserts_in_one_statement() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.7.11")?;
    let outcome = executor.insert(
        InsertQuery::new(events).items([event("a"), event("b"), event("c")]),
    )?;
    assert_eq!(outcome.statements, 1);
    assert_eq!(outcome.rows, 3);
    assert!(!outcome.implicit_transaction);
    assert_eq!(outcome.last_insert_id, 3);
    assert_eq!(count(&executor)?, 3);
    Ok(())
}

#[test]
fn legacy_backend_inserts_row_by_row_in_a_transaction() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.7.10")?;
    let outcome = executor.insert(
        InsertQuery::new(Arc::clone(&events)).items([event("a"), event("b"), event("c")]),
    )?;
    assert_eq!(outcome.statements, 3);
    assert_eq!(outcome.rows, 3);
    assert!(outcome.implicit_transaction);
    assert_eq!(outcome.last_insert_id, 3);
    assert!(executor.transactions().is_empty());

    let single = executor.insert(InsertQuery::new(Arc::clone(&events)).item(event("d")))?;
    assert_eq!(single.statements, 1);
    assert!(!single.implicit_transaction);

    executor.transaction(|_| {
        let nested = executor.insert(
            InsertQuery::new(Arc::clone(&events)).items([event("e"), event("f")]),
        )?;
        assert!(!nested.implicit_transaction);
        Ok(())
    })?;
    assert_eq!(count(&executor)?, 6);
    Ok(())
}

#[test]
fn legacy_insert_failure_leaves_no_rows() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.7.10")?;
    let err = executor
        .insert(InsertQuery::new(events).items([
            event("a").with("id", RowValues::Int(1)),
            event("b").with("id", RowValues::Int(2)),
            event("c").with("id", RowValues::Int(1)),
        ]))
        .unwrap_err();

    assert!(matches!(
        &err,
        ExecutorError::Sqlite(rusqlite::Error::SqliteFailure(native, _))
            if native.code == rusqlite::ErrorCode::ConstraintViolation
    ));
    assert_eq!(count(&executor)?, 0);
    assert!(executor.transactions().is_empty());
    assert_eq!(executor.connections().active(), 0);
    Ok(())
}

#[test]
fn null_primary_key_is_assigned_by_the_database() -> Result<(), ExecutorError> {
    let (executor, events) = events_executor("3.45.0")?;
    let outcome = executor.insert(
        InsertQuery::new(Arc::clone(&events)).item(event("a").with("id", RowValues::Null)),
    )?;
    assert_eq!(outcome.last_insert_id, 1);

    let ids: Vec<Record> = executor
        .select(SelectQuery::new(events).only(["id"]))?
        .collect::<Result<_, _>>()?;
    assert_eq!(ids, vec![Record::new().with("id", RowValues::Int(1))]);
    Ok(())
}
