use std::fmt;
use std::sync::Arc;

use crate::error::ExecutorError;
use crate::model::{Model, Property, Record};
use crate::types::RowValues;

/// SQL text plus its positional parameters, ready for native execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<RowValues>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Query kinds known to the query model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Select => "SelectQuery",
            QueryKind::Insert => "InsertQuery",
            QueryKind::Update => "UpdateQuery",
            QueryKind::Delete => "DeleteQuery",
        };
        f.write_str(name)
    }
}

/// A query against one model, as produced by a query builder.
#[derive(Debug, Clone)]
pub enum Query {
    Select(SelectQuery),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
}

impl Query {
    #[must_use]
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::Select(_) => QueryKind::Select,
            Query::Insert(_) => QueryKind::Insert,
            Query::Update(_) => QueryKind::Update,
            Query::Delete(_) => QueryKind::Delete,
        }
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        match self {
            Query::Select(q) => &q.model,
            Query::Insert(q) => &q.model,
            Query::Update(q) => &q.model,
            Query::Delete(q) => &q.model,
        }
    }
}

impl From<SelectQuery> for Query {
    fn from(query: SelectQuery) -> Self {
        Query::Select(query)
    }
}

impl From<InsertQuery> for Query {
    fn from(query: InsertQuery) -> Self {
        Query::Insert(query)
    }
}

impl From<UpdateQuery> for Query {
    fn from(query: UpdateQuery) -> Self {
        Query::Update(query)
    }
}

impl From<DeleteQuery> for Query {
    fn from(query: DeleteQuery) -> Self {
        Query::Delete(query)
    }
}

/// Equality filters joined with `AND`. A NULL value compiles to `IS NULL`.
pub type Filters = Vec<(String, RowValues)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub property: String,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct SelectQuery {
    model: Arc<Model>,
    columns: Option<Vec<String>>,
    filters: Filters,
    order_by: Option<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectQuery {
    /// Select every property of `model`.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            columns: None,
            filters: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    /// Restrict the selected properties, in the given order.
    #[must_use]
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, value: RowValues) -> Self {
        self.filters.push((property.into(), value));
        self
    }

    #[must_use]
    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            property: property.into(),
            descending: false,
        });
        self
    }

    #[must_use]
    pub fn order_by_desc(mut self, property: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            property: property.into(),
            descending: true,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Selected properties in column order.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Model`] if a restricted name is not defined on the model.
    pub fn properties(&self) -> Result<Vec<Property>, ExecutorError> {
        match &self.columns {
            Some(names) => self.model.resolve(names),
            None => Ok(self.model.properties().to_vec()),
        }
    }

    #[must_use]
    pub fn filters(&self) -> &[(String, RowValues)] {
        &self.filters
    }

    #[must_use]
    pub fn ordering(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    #[must_use]
    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }
}

#[derive(Debug, Clone)]
pub struct InsertQuery {
    model: Arc<Model>,
    items: Vec<Record>,
}

impl InsertQuery {
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn item(mut self, record: Record) -> Self {
        self.items.push(record);
        self
    }

    #[must_use]
    pub fn items(mut self, records: impl IntoIterator<Item = Record>) -> Self {
        self.items.extend(records);
        self
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Rows to insert, reduced to the model's columns.
    #[must_use]
    pub fn plain_items(&self) -> Vec<Record> {
        self.items.iter().map(|item| self.model.to_plain(item)).collect()
    }

    /// Properties written by this insert: model order, limited to those present in any item.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        let plain = self.plain_items();
        self.model
            .properties()
            .iter()
            .filter(|p| plain.iter().any(|item| item.get(p.name()).is_some()))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct UpdateQuery {
    model: Arc<Model>,
    values: Record,
    filters: Filters,
}

impl UpdateQuery {
    #[must_use]
    pub fn new(model: Arc<Model>, values: Record) -> Self {
        Self {
            model,
            values,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, value: RowValues) -> Self {
        self.filters.push((property.into(), value));
        self
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    #[must_use]
    pub fn values(&self) -> &Record {
        &self.values
    }

    #[must_use]
    pub fn filters(&self) -> &[(String, RowValues)] {
        &self.filters
    }
}

#[derive(Debug, Clone)]
pub struct DeleteQuery {
    model: Arc<Model>,
    filters: Filters,
}

impl DeleteQuery {
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, value: RowValues) -> Self {
        self.filters.push((property.into(), value));
        self
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    #[must_use]
    pub fn filters(&self) -> &[(String, RowValues)] {
        &self.filters
    }
}
