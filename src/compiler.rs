use std::fmt::Write;
use std::sync::Arc;

use crate::error::ExecutorError;
use crate::model::{Model, Property};
use crate::query::{InsertQuery, Query, SelectQuery, Statement};
use crate::types::RowValues;
use crate::version::BackendVersion;

/// Highest parameter index accepted by every `SQLite` build (`SQLITE_MAX_VARIABLE_NUMBER`
/// before 3.32).
const MAX_VARIABLES: usize = 999;

/// Row cap for one multi-row `VALUES` list (`SQLITE_MAX_COMPOUND_SELECT` before 3.8.8).
const MAX_ROWS_PER_INSERT: usize = 500;

/// Turns a [`Query`] into backend statements.
///
/// Implementations must return at least one statement per call; the executor rejects an empty
/// compilation with [`ExecutorError::EmptyCompilation`].
pub trait Compiler: Send + Sync {
    /// Backend version this compiler gates features on.
    fn version(&self) -> BackendVersion;

    /// # Errors
    /// Returns an error when the query references unknown properties or cannot be expressed.
    fn compile(&self, query: &Query) -> Result<Vec<Statement>, ExecutorError>;
}

/// Builds the executor's compiler once the backend version is known.
pub type CompilerFactory = Arc<dyn Fn(BackendVersion) -> Box<dyn Compiler> + Send + Sync>;

/// Factory producing [`SqliteCompiler`].
#[must_use]
pub fn sqlite_compiler_factory() -> CompilerFactory {
    Arc::new(|version| Box::new(SqliteCompiler::new(version)) as Box<dyn Compiler>)
}

/// `SQLite` dialect compiler using `?N` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct SqliteCompiler {
    version: BackendVersion,
}

impl SqliteCompiler {
    #[must_use]
    pub fn new(version: BackendVersion) -> Self {
        Self { version }
    }

    fn compile_select(&self, query: &SelectQuery) -> Result<Vec<Statement>, ExecutorError> {
        let model = query.model();
        let properties = query.properties()?;
        if properties.is_empty() {
            return Err(ExecutorError::Model("select query has no properties".into()));
        }

        let mut params = Placeholders::default();
        let mut sql = format!(
            "SELECT {} FROM {}",
            column_list(&properties),
            quote_ident(model.table())
        );
        sql.push_str(&where_clause(model, query.filters(), &mut params)?);

        if let Some(order) = query.ordering() {
            require_property(model, &order.property)?;
            let direction = if order.descending { "DESC" } else { "ASC" };
            let _ = write!(sql, " ORDER BY {} {direction}", quote_ident(&order.property));
        }

        match (query.limit_value(), query.offset_value()) {
            (None, None) => {}
            (limit, offset) => {
                let limit = match limit {
                    Some(limit) => params.push(RowValues::Int(to_sql_int(limit, "limit")?)),
                    None => "-1".to_string(),
                };
                let _ = write!(sql, " LIMIT {limit}");
                if let Some(offset) = offset {
                    let offset = params.push(RowValues::Int(to_sql_int(offset, "offset")?));
                    let _ = write!(sql, " OFFSET {offset}");
                }
            }
        }

        Ok(vec![Statement::new(sql, params.into_values())])
    }

    fn compile_insert(&self, query: &InsertQuery) -> Result<Vec<Statement>, ExecutorError> {
        let model = query.model();
        let items = query.plain_items();
        if items.is_empty() {
            return Err(ExecutorError::Model(format!(
                "insert into '{}' has no items",
                model.table()
            )));
        }

        let properties = query.properties();
        let table = quote_ident(model.table());
        if properties.is_empty() {
            return Ok(items
                .iter()
                .map(|_| Statement::new(format!("INSERT INTO {table} DEFAULT VALUES"), Vec::new()))
                .collect());
        }

        let rows_per_statement = if self.version.supports_multi_row_insert() {
            (MAX_VARIABLES / properties.len()).clamp(1, MAX_ROWS_PER_INSERT)
        } else {
            1
        };
        let head = format!("INSERT INTO {table} ({}) VALUES ", column_list(&properties));

        let statements = items
            .chunks(rows_per_statement)
            .map(|chunk| {
                let mut params = Placeholders::default();
                let tuples: Vec<String> = chunk
                    .iter()
                    .map(|item| {
                        let slots: Vec<String> = properties
                            .iter()
                            .map(|p| {
                                params.push(item.get(p.name()).cloned().unwrap_or(RowValues::Null))
                            })
                            .collect();
                        format!("({})", slots.join(", "))
                    })
                    .collect();
                Statement::new(format!("{head}{}", tuples.join(", ")), params.into_values())
            })
            .collect();
        Ok(statements)
    }
}

impl Compiler for SqliteCompiler {
    fn version(&self) -> BackendVersion {
        self.version
    }

    fn compile(&self, query: &Query) -> Result<Vec<Statement>, ExecutorError> {
        match query {
            Query::Select(q) => self.compile_select(q),
            Query::Insert(q) => self.compile_insert(q),
            Query::Update(_) | Query::Delete(_) => {
                Err(ExecutorError::Unimplemented(query.kind().to_string()))
            }
        }
    }
}

#[derive(Default)]
struct Placeholders {
    values: Vec<RowValues>,
}

impl Placeholders {
    fn push(&mut self, value: RowValues) -> String {
        self.values.push(value);
        format!("?{}", self.values.len())
    }

    fn into_values(self) -> Vec<RowValues> {
        self.values
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(properties: &[Property]) -> String {
    properties
        .iter()
        .map(|p| quote_ident(p.name()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn require_property(model: &Model, name: &str) -> Result<(), ExecutorError> {
    if model.property(name).is_some() {
        Ok(())
    } else {
        Err(ExecutorError::Model(format!(
            "unknown property '{name}' on '{}'",
            model.table()
        )))
    }
}

fn where_clause(
    model: &Model,
    filters: &[(String, RowValues)],
    params: &mut Placeholders,
) -> Result<String, ExecutorError> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut terms = Vec::with_capacity(filters.len());
    for (name, value) in filters {
        require_property(model, name)?;
        if value.is_null() {
            terms.push(format!("{} IS NULL", quote_ident(name)));
        } else {
            let slot = params.push(value.clone());
            terms.push(format!("{} = {slot}", quote_ident(name)));
        }
    }
    Ok(format!(" WHERE {}", terms.join(" AND ")))
}

fn to_sql_int(value: u64, what: &str) -> Result<i64, ExecutorError> {
    i64::try_from(value)
        .map_err(|_| ExecutorError::ParameterError(format!("{what} {value} exceeds i64 range")))
}
