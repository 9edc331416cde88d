//! Result records.

use crate::backend::StorageBackend;
use crate::compiler::{PointLookup, Zone};
use crate::error::{QueryError, QueryResult};
use crate::materialize::layout::RowLayout;
use crate::value::Value;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One row of a query result.
///
/// Deferred fields are fetched from storage the first time they are read and
/// kept afterwards, so each one costs at most one extra statement.
pub struct Record {
    layout: Arc<RowLayout>,
    values: Vec<Value>,
    storage: Arc<dyn StorageBackend>,
    loaded: Mutex<HashMap<String, Value>>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.layout.entity())
            .field("values", &self.values)
            .finish()
    }
}

impl Record {
    pub(crate) fn new(
        layout: Arc<RowLayout>,
        values: Vec<Value>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            layout,
            values,
            storage,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Read an attribute: a field, an annotation or an extra column
    pub fn get(&self, name: &str) -> QueryResult<Value> {
        if let Some(idx) = self.layout.index_of(name) {
            return Ok(self.values[idx].clone());
        }
        let Some(field) = self.layout.deferred(name) else {
            return Err(QueryError::UnknownField {
                entity: self.layout.entity().to_string(),
                field: name.to_string(),
            });
        };
        if let Some(value) = self.loaded.lock().get(name) {
            return Ok(value.clone());
        }

        let key = self.pk().cloned().ok_or_else(|| {
            QueryError::InvalidQuery(format!("cannot load '{}' without a primary key", name))
        })?;
        debug!("loading deferred field {}.{}", self.layout.entity(), name);
        let lookup = PointLookup {
            table: field.table.clone(),
            key_column: field.key_column.clone(),
            key,
            column: field.column.clone(),
        };
        let value = self
            .storage
            .fetch_value(&lookup)?
            .ok_or_else(|| QueryError::DoesNotExist(self.layout.entity().to_string()))?;
        self.loaded.lock().insert(name.to_string(), value.clone());
        Ok(value)
    }

    pub fn pk(&self) -> Option<&Value> {
        self.layout.key_index().map(|idx| &self.values[idx])
    }

    /// Whether `name` is a deferred field not loaded yet
    pub fn is_deferred(&self, name: &str) -> bool {
        self.layout.deferred(name).is_some() && !self.loaded.lock().contains_key(name)
    }

    /// Raw output tuple in plan column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Top-level attributes in output order, without related entities
    pub fn to_pairs(&self) -> Vec<(String, Value)> {
        self.layout
            .columns()
            .iter()
            .zip(&self.values)
            .filter(|(c, _)| !matches!(c.zone, Zone::Related { .. }))
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect()
    }

    /// Entity loaded through `select_related`. None when the relation is
    /// empty for this row.
    pub fn related(&self, path: &str) -> QueryResult<Option<RelatedRecord>> {
        let range = self.layout.related(path).ok_or_else(|| {
            QueryError::InvalidQuery(format!("'{}' was not selected as related", path))
        })?;
        let values = &self.values[range.clone()];
        if values.iter().all(Value::is_null) {
            return Ok(None);
        }
        let fields = self.layout.columns()[range]
            .iter()
            .zip(values)
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect();
        Ok(Some(RelatedRecord {
            path: path.to_string(),
            fields,
        }))
    }
}

/// Fields of an entity reached through a to-one relation
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedRecord {
    pub path: String,
    pub fields: Vec<(String, Value)>,
}

impl RelatedRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}
