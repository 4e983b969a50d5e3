use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::types::Value;

use crate::error::ExecutorError;
use crate::model::{Property, Record};
use crate::types::RowValues;

use super::params::Params;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns [`ExecutorError::Sqlite`] if the column cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<RowValues, ExecutorError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Rows stepped out of a native statement, not yet decoded against a model.
#[derive(Debug, Clone, Default)]
pub struct NativeRows {
    columns: Arc<Vec<String>>,
    rows: VecDeque<Vec<RowValues>>,
}

impl NativeRows {
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Take the next raw row, front to back.
    pub fn pop_front(&mut self) -> Option<Vec<RowValues>> {
        self.rows.pop_front()
    }
}

/// Run `sql` and collect every row.
///
/// # Errors
/// Returns [`ExecutorError::Sqlite`] if preparing or stepping the statement fails.
pub fn fetch_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
) -> Result<NativeRows, ExecutorError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = columns.len();

    let mut rows_iter = stmt.query(&params.as_refs()[..])?;
    let mut rows = VecDeque::new();
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        rows.push_back(row_values);
    }

    Ok(NativeRows {
        columns: Arc::new(columns),
        rows,
    })
}

/// Decodes raw rows into [`Record`]s, one property per column in select order.
#[derive(Debug, Clone)]
pub struct RowDecoder {
    properties: Arc<[Property]>,
}

impl RowDecoder {
    #[must_use]
    pub fn new(properties: Vec<Property>) -> Self {
        Self {
            properties: properties.into(),
        }
    }

    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// # Errors
    /// Returns [`ExecutorError::Model`] when the column count differs from the property list or a
    /// value does not fit its property.
    pub fn decode(&self, row: Vec<RowValues>) -> Result<Record, ExecutorError> {
        if row.len() != self.properties.len() {
            return Err(ExecutorError::Model(format!(
                "row has {} columns, expected {}",
                row.len(),
                self.properties.len()
            )));
        }
        let mut record = Record::new();
        for (property, value) in self.properties.iter().zip(row) {
            record.set(property.name(), property.decode(value)?);
        }
        Ok(record)
    }
}
