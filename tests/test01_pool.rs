use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use sql_executor::prelude::*;
use sql_executor::{ConnectionPool, PoolOptions, SqliteConnectionManager};

fn capped(max_size: usize) -> ConnectionPool {
    ConnectionPool::new(
        SqliteConnectionManager::memory(),
        PoolOptions::default().with_max_size(max_size),
    )
    .unwrap()
}

#[test]
fn same_owner_reuses_its_connection() -> Result<(), ExecutorError> {
    let pool = capped(4);
    let owner = OwnerToken::new();

    let outer = pool.acquire(owner)?;
    let inner = pool.acquire(owner)?;
    assert!(outer.connection().same_as(inner.connection()));
    assert_eq!(outer.connection().operations(), 2);
    assert_eq!(pool.size(), 1);

    drop(inner);
    assert_eq!(outer.connection().operations(), 1);
    assert_eq!(pool.active(), 1);

    let conn = outer.connection().clone();
    outer.release()?;
    assert_eq!(conn.operations(), 0);
    assert_eq!(conn.owner(), None);
    assert_eq!(pool.active(), 0);
    assert_eq!(pool.idle(), 1);
    Ok(())
}

#[test]
fn different_owners_get_different_connections() -> Result<(), ExecutorError> {
    let pool = capped(2);
    let a = pool.acquire(OwnerToken::new())?;
    let b = pool.acquire(OwnerToken::new())?;
    assert!(!a.connection().same_as(b.connection()));
    assert_eq!(pool.active(), 2);
    Ok(())
}

#[test]
fn leased_connection_is_never_shared_across_threads() {
    let pool = capped(2);
    let in_use = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let pool = pool.clone();
            let in_use = Arc::clone(&in_use);
            thread::spawn(move || {
                let me = OwnerToken::new();
                for _ in 0..50 {
                    let lease = pool.acquire(me).unwrap();
                    let id = lease.connection().id();
                    assert!(in_use.lock().unwrap().insert(id), "connection {id} leased twice");
                    assert_eq!(lease.connection().owner(), Some(me));
                    assert_eq!(lease.connection().operations(), 1);
                    thread::yield_now();
                    in_use.lock().unwrap().remove(&id);
                    lease.release().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(pool.size() <= 2);
    assert_eq!(pool.active(), 0);
}

#[test]
fn release_by_wrong_owner_is_rejected() -> Result<(), ExecutorError> {
    let pool = capped(2);
    let owner = OwnerToken::new();
    let lease = pool.acquire(owner)?;

    let err = pool
        .release(lease.connection(), OwnerToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::ConnectionState {
            operation: "release",
            ..
        }
    ));
    assert!(err.to_string().contains("illegal connection access"));
    assert_eq!(lease.connection().operations(), 1);

    let conn = lease.connection().clone();
    lease.release()?;
    let err = pool.release(&conn, owner).unwrap_err();
    assert!(matches!(err, ExecutorError::ConnectionState { .. }));
    Ok(())
}

#[test]
fn capped_pool_blocks_until_release() -> Result<(), ExecutorError> {
    let pool = capped(1);
    let held = pool.acquire(OwnerToken::new())?;
    let held_id = held.connection().id();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let lease = pool.acquire(OwnerToken::new()).unwrap();
            tx.send(lease.connection().id()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(held);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), held_id);
    waiter.join().unwrap();
    assert_eq!(pool.size(), 1);
    Ok(())
}

#[test]
fn exhausted_pool_fails_fast_or_after_timeout() -> Result<(), ExecutorError> {
    let pool = capped(1);
    let _held = pool.acquire(OwnerToken::new())?;
    assert!(matches!(
        pool.try_acquire(OwnerToken::new()),
        Err(ExecutorError::PoolExhausted { max_size: 1 })
    ));

    let timed = ConnectionPool::new(
        SqliteConnectionManager::memory(),
        PoolOptions::default()
            .with_max_size(1)
            .with_acquire_timeout(Duration::from_millis(50)),
    )?;
    let _held = timed.acquire(OwnerToken::new())?;
    assert!(matches!(
        timed.acquire(OwnerToken::new()),
        Err(ExecutorError::PoolExhausted { .. })
    ));
    Ok(())
}

#[test]
fn closed_pool_refuses_leases() -> Result<(), ExecutorError> {
    let pool = capped(2);
    let held = pool.acquire(OwnerToken::new())?;
    drop(pool.acquire(OwnerToken::new())?);
    assert_eq!(pool.size(), 2);

    pool.close();
    pool.close();
    assert!(pool.is_closed());
    assert_eq!(pool.size(), 1);
    assert!(matches!(
        pool.acquire(OwnerToken::new()),
        Err(ExecutorError::Closed)
    ));

    held.release()?;
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.idle(), 0);
    Ok(())
}

#[test]
fn unreachable_database_does_not_consume_a_slot() -> Result<(), ExecutorError> {
    let dir = tempfile::tempdir().map_err(|e| ExecutorError::ConfigError(e.to_string()))?;
    let manager = SqliteConnectionManager::file(dir.path().join("missing").join("pool.db"));
    let pool = ConnectionPool::new(
        manager,
        PoolOptions::default()
            .with_max_size(1)
            .with_acquire_timeout(Duration::from_millis(300)),
    )?;

    let err = pool.acquire(OwnerToken::new()).unwrap_err();
    assert!(matches!(err, ExecutorError::Pool(_)), "unexpected error: {err}");
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.active(), 0);
    Ok(())
}

#[test]
fn failed_connection_attempt_is_retried() -> Result<(), ExecutorError> {
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = {
        let calls = Arc::clone(&calls);
        SqliteConnectionManager::memory().with_init(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(rusqlite::Error::InvalidQuery);
            }
            Ok(())
        })
    };
    let pool = ConnectionPool::new(manager, PoolOptions::default().with_max_size(1))?;

    let lease = pool.acquire(OwnerToken::new())?;
    assert!(calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(pool.size(), 1);
    lease.release()?;
    Ok(())
}

#[test]
fn unset_cap_uses_the_default() -> Result<(), ExecutorError> {
    let pool = ConnectionPool::new(SqliteConnectionManager::memory(), PoolOptions::default())?;
    assert_eq!(pool.max_size(), sql_executor::DEFAULT_MAX_SIZE);
    assert_eq!(pool.size(), 0);
    assert!(matches!(
        ConnectionPool::new(
            SqliteConnectionManager::memory(),
            PoolOptions {
                max_size: Some(0),
                acquire_timeout: None,
            },
        ),
        Err(ExecutorError::ConfigError(_))
    ));
    Ok(())
}

#[test]
fn file_connections_open_in_wal_mode() -> Result<(), ExecutorError> {
    let dir = tempfile::tempdir().map_err(|e| ExecutorError::ConfigError(e.to_string()))?;
    let path = dir.path().join("pool_wal.db");
    let executor = SqliteExecutor::builder(path.to_string_lossy()).build()?;

    let mut cursor = executor.cursor(None)?;
    let mut rows = cursor.query(&Statement::new("PRAGMA journal_mode", Vec::new()))?;
    let mode = rows.pop_front().and_then(|row| row.into_iter().next());
    assert_eq!(mode, Some(RowValues::Text("wal".into())));
    cursor.close()?;
    executor.close();
    Ok(())
}
