//! `SQLite` plumbing shared by the executor, cursors and tasks: configuration, connection
//! bootstrap, parameter binding and row extraction.

pub mod config;
pub mod params;
pub mod query;

pub use config::{
    DEFAULT_BUSY_TIMEOUT, DatabaseLocation, SqliteOptions, SqliteOptionsBuilder,
    connection_manager, open_connection,
};
pub use params::{Params, row_value_to_sqlite_value};
pub use query::{NativeRows, RowDecoder, fetch_rows, sqlite_extract_value_sync};
