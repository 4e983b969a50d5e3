use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::ExecutorError;
use crate::types::{RowValues, ValueKind};

/// Column descriptor: name, declared kind, and key/nullability flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    kind: ValueKind,
    primary_key: bool,
    nullable: bool,
}

impl Property {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            primary_key: false,
            nullable: true,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Coerce a value into this property's kind.
    ///
    /// `SQLite` stores booleans as integers and timestamps/JSON as text, so those storage forms
    /// are accepted and converted back.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Model`] when the value cannot represent this property.
    pub fn decode(&self, value: RowValues) -> Result<RowValues, ExecutorError> {
        let decoded = match (self.kind, value) {
            (_, RowValues::Null) => {
                // Primary keys may be NULL before insert; SQLite assigns the rowid.
                if self.nullable || self.primary_key {
                    return Ok(RowValues::Null);
                }
                return Err(self.mismatch("NULL"));
            }
            (ValueKind::Integer, RowValues::Int(i)) => RowValues::Int(i),
            (ValueKind::Integer, RowValues::Bool(b)) => RowValues::Int(i64::from(b)),
            (ValueKind::Real, RowValues::Float(f)) => RowValues::Float(f),
            #[allow(clippy::cast_precision_loss)]
            (ValueKind::Real, RowValues::Int(i)) => RowValues::Float(i as f64),
            (ValueKind::Text, RowValues::Text(s)) => RowValues::Text(s),
            (ValueKind::Boolean, RowValues::Bool(b)) => RowValues::Bool(b),
            (ValueKind::Boolean, RowValues::Int(0)) => RowValues::Bool(false),
            (ValueKind::Boolean, RowValues::Int(1)) => RowValues::Bool(true),
            (ValueKind::Blob, RowValues::Blob(bytes)) => RowValues::Blob(bytes),
            (ValueKind::Timestamp, RowValues::Timestamp(ts)) => RowValues::Timestamp(ts),
            (ValueKind::Timestamp, text @ RowValues::Text(_)) => match text.as_timestamp() {
                Some(ts) => RowValues::Timestamp(ts),
                None => return Err(self.mismatch("unparseable timestamp text")),
            },
            (ValueKind::Json, RowValues::JSON(json)) => RowValues::JSON(json),
            (ValueKind::Json, RowValues::Text(s)) => match serde_json::from_str::<JsonValue>(&s) {
                Ok(json) => RowValues::JSON(json),
                Err(e) => return Err(self.mismatch(&format!("invalid JSON text ({e})"))),
            },
            (_, other) => {
                let found = other.kind().map_or_else(|| "NULL".to_string(), |k| k.to_string());
                return Err(self.mismatch(&found));
            }
        };
        Ok(decoded)
    }

    fn mismatch(&self, found: &str) -> ExecutorError {
        ExecutorError::Model(format!(
            "invalid value for property '{}': expected {}, found {found}",
            self.name, self.kind
        ))
    }
}

/// A table and its ordered properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    table: String,
    properties: Vec<Property>,
    primary_key: Option<usize>,
}

impl Model {
    #[must_use]
    pub fn builder(table: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            table: table.into(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&Property> {
        self.primary_key.and_then(|idx| self.properties.get(idx))
    }

    /// Resolve property names against this model, keeping the requested order.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Model`] for names the model does not define.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Property>, ExecutorError> {
        names
            .iter()
            .map(|name| {
                self.property(name).cloned().ok_or_else(|| {
                    ExecutorError::Model(format!("unknown property '{name}' on '{}'", self.table))
                })
            })
            .collect()
    }

    /// Parse a plain name/value map into a [`Record`].
    ///
    /// With `strict` set, unknown names and values that do not fit their property fail the whole
    /// parse; otherwise they are skipped.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Model`] on the first rejected entry in strict mode.
    pub fn from_plain<I, K>(&self, data: I, strict: bool) -> Result<Record, ExecutorError>
    where
        I: IntoIterator<Item = (K, RowValues)>,
        K: Into<String>,
    {
        let mut record = Record::new();
        for (name, value) in data {
            let name = name.into();
            let Some(property) = self.property(&name) else {
                if strict {
                    return Err(ExecutorError::Model(format!("unknown property: {name}")));
                }
                continue;
            };
            match property.decode(value) {
                Ok(decoded) => record.set(name, decoded),
                Err(err) if strict => return Err(err),
                Err(_) => {}
            }
        }
        Ok(record)
    }

    /// Column map used for inserts: known properties only, and a NULL primary key is dropped so
    /// the database assigns it.
    #[must_use]
    pub fn to_plain(&self, record: &Record) -> Record {
        let mut plain = Record::new();
        for property in &self.properties {
            let Some(value) = record.get(&property.name) else {
                continue;
            };
            if property.primary_key && value.is_null() {
                continue;
            }
            plain.set(property.name.clone(), value.clone());
        }
        plain
    }
}

/// Builder validating a [`Model`] definition.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    table: String,
    properties: Vec<Property>,
}

impl ModelBuilder {
    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// # Errors
    /// Returns [`ExecutorError::Model`] for an empty table name, no properties, duplicate
    /// property names, or more than one primary key.
    pub fn build(self) -> Result<Arc<Model>, ExecutorError> {
        if self.table.is_empty() {
            return Err(ExecutorError::Model("model table name is empty".into()));
        }
        if self.properties.is_empty() {
            return Err(ExecutorError::Model(format!(
                "no properties defined on '{}'",
                self.table
            )));
        }

        let mut seen = HashSet::new();
        let mut primary_key = None;
        for (idx, property) in self.properties.iter().enumerate() {
            if !seen.insert(property.name.as_str()) {
                return Err(ExecutorError::Model(format!(
                    "duplicate property '{}' defined on '{}'",
                    property.name, self.table
                )));
            }
            if property.primary_key {
                if primary_key.is_some() {
                    return Err(ExecutorError::Model(
                        "multiple primary key properties are not permitted".into(),
                    ));
                }
                primary_key = Some(idx);
            }
        }

        Ok(Arc::new(Model {
            table: self.table,
            properties: self.properties,
            primary_key,
        }))
    }
}

/// One row of property values keyed by property name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    values: BTreeMap<String, RowValues>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: RowValues) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: RowValues) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RowValues> {
        self.values.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// # Errors
    /// Returns [`ExecutorError::ParameterError`] if a value cannot be serialized.
    pub fn to_json(&self) -> Result<JsonValue, ExecutorError> {
        serde_json::to_value(self).map_err(|e| ExecutorError::ParameterError(e.to_string()))
    }
}

impl<K: Into<String>> FromIterator<(K, RowValues)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, RowValues)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.set(name, value);
        }
        record
    }
}
