//! Immutable query builder and its terminal operations.

use crate::compiler::compile::{compile_aggregate, compile_select, compile_update};
use crate::compiler::CompiledQuery;
use crate::engine::EngineContext;
use crate::error::{QueryError, QueryResult};
use crate::expression::{Expression, Q};
use crate::materialize::{Record, Rows};
use crate::query::annotation::AnnotationSet;
use crate::schema::EntityDef;
use crate::value::Value;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Fields left out of the initial fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Deferral {
    pub defer: BTreeSet<String>,
    /// When set, every field outside it (except the key) is deferred
    pub only: Option<BTreeSet<String>>,
}

/// Field projection installed by [`Query::values`]
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Projection {
    pub fields: Vec<String>,
    /// Annotations defined before the projection that it did not name
    pub hidden: BTreeSet<String>,
}

/// Snapshot of everything a chain of builder calls has accumulated.
/// Filters and ordering are stored with annotation references expanded.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct QueryState {
    pub filters: Vec<Q>,
    pub annotations: AnnotationSet,
    pub extra: Vec<(String, Arc<Expression>)>,
    pub deferral: Deferral,
    pub related: Vec<String>,
    pub projection: Option<Projection>,
    pub ordering: Vec<String>,
    pub distinct: bool,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    /// A filter arrived after `limit` or `offset`; compiling then fails
    pub filtered_after_slice: bool,
}

impl QueryState {
    pub fn is_hidden(&self, annotation: &str) -> bool {
        self.projection
            .as_ref()
            .is_some_and(|p| p.hidden.contains(annotation))
    }
}

/// A lazily evaluated query over one entity.
///
/// Every builder call returns a new `Query` and leaves the receiver as it
/// was. Nothing touches storage until a terminal operation runs.
#[derive(Clone)]
pub struct Query {
    context: Arc<EngineContext>,
    entity: Arc<EntityDef>,
    state: Arc<QueryState>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &self.entity.name)
            .field("state", &self.state)
            .finish()
    }
}

impl Query {
    pub(crate) fn new(context: Arc<EngineContext>, entity: Arc<EntityDef>) -> Self {
        Self {
            context,
            entity,
            state: Arc::new(QueryState::default()),
        }
    }

    fn with(&self, change: impl FnOnce(&mut QueryState)) -> Query {
        let mut query = self.clone();
        change(Arc::make_mut(&mut query.state));
        query
    }

    pub fn entity(&self) -> &EntityDef {
        &self.entity
    }

    /// Expression currently bound to an annotation name
    pub fn annotation(&self, name: &str) -> Option<&Expression> {
        self.state.annotations.get(name)
    }

    pub fn annotation_names(&self) -> Vec<&str> {
        self.state.annotations.names().collect()
    }

    /// Keep rows matching `q`. A sliced query cannot be filtered; the
    /// returned query fails when it is compiled.
    pub fn filter(&self, q: Q) -> Query {
        self.with(|state| {
            if state.limit.is_some() || state.offset.is_some() {
                state.filtered_after_slice = true;
            }
            let q = state.annotations.inline_q(&q);
            state.filters.push(q);
        })
    }

    pub fn exclude(&self, q: Q) -> Query {
        self.filter(!q)
    }

    /// Attach a computed value to every row. Reusing a name replaces the
    /// earlier definition for this query and everything derived from it.
    pub fn annotate(&self, name: &str, expression: impl Into<Expression>) -> Query {
        let expression = expression.into();
        self.with(|state| {
            state.annotations.add(name, &expression);
            if let Some(projection) = &mut state.projection {
                projection.hidden.remove(name);
            }
        })
    }

    /// Add an opaque computed column, emitted ahead of the entity's fields
    pub fn extra_select(&self, name: &str, expression: impl Into<Expression>) -> Query {
        let expression = Arc::new(expression.into());
        self.with(|state| {
            match state.extra.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = expression,
                None => state.extra.push((name.to_string(), expression)),
            }
        })
    }

    pub fn defer(&self, fields: &[&str]) -> Query {
        self.with(|state| {
            for field in fields {
                state.deferral.defer.insert(field.to_string());
                if let Some(only) = &mut state.deferral.only {
                    only.remove(*field);
                }
            }
        })
    }

    pub fn only(&self, fields: &[&str]) -> Query {
        self.with(|state| {
            state.deferral.only = Some(fields.iter().map(|f| f.to_string()).collect());
        })
    }

    /// Load a to-one related entity alongside each row
    pub fn select_related(&self, path: &str) -> Query {
        self.with(|state| {
            if !state.related.iter().any(|p| p == path) {
                state.related.push(path.to_string());
            }
        })
    }

    /// Restrict output to the named fields and annotations. Annotations
    /// defined later are still included.
    pub fn values(&self, names: &[&str]) -> Query {
        let concrete: Vec<String> = self
            .context
            .schema
            .concrete_fields(&self.entity)
            .into_iter()
            .map(|f| f.name)
            .collect();
        self.with(|state| {
            let mut projection = Projection::default();
            if names.is_empty() {
                projection.fields = concrete;
            } else {
                for name in names {
                    let is_output = state.annotations.contains(name)
                        || state.extra.iter().any(|(n, _)| n == name);
                    if !is_output {
                        projection.fields.push(name.to_string());
                    }
                }
                projection.hidden = state
                    .annotations
                    .names()
                    .filter(|a| !names.contains(a))
                    .map(str::to_string)
                    .collect();
            }
            state.projection = Some(projection);
        })
    }

    /// Replace the ordering. A leading `-` sorts descending.
    pub fn order_by(&self, terms: &[&str]) -> Query {
        self.with(|state| {
            state.ordering = terms.iter().map(|t| t.to_string()).collect();
        })
    }

    pub fn distinct(&self) -> Query {
        self.with(|state| state.distinct = true)
    }

    pub fn limit(&self, count: usize) -> Query {
        self.with(|state| {
            state.limit = Some(state.limit.map_or(count, |limit| limit.min(count)));
        })
    }

    /// Skip rows. Composes with an earlier limit the way nested slices do.
    pub fn offset(&self, count: usize) -> Query {
        self.with(|state| {
            state.offset = Some(state.offset.unwrap_or(0) + count);
            state.limit = state.limit.map(|limit| limit.saturating_sub(count));
        })
    }

    pub fn compile(&self) -> QueryResult<CompiledQuery> {
        compile_select(&self.context, &self.entity, &self.state)
    }

    /// The compiled plan as pretty-printed JSON
    pub fn explain(&self) -> QueryResult<String> {
        let compiled = self.compile()?;
        Ok(serde_json::to_string_pretty(&compiled.plan)?)
    }

    /// Compile now and stream records once iteration starts
    pub fn iter(&self) -> QueryResult<Rows> {
        let compiled = self.compile()?;
        Ok(Rows::new(compiled, self.context.storage.clone()))
    }

    pub fn all(&self) -> QueryResult<Vec<Record>> {
        self.iter()?.collect()
    }

    /// The single record matching `q`
    pub fn get(&self, q: Q) -> QueryResult<Record> {
        let mut rows = self.filter(q).iter()?;
        let record = rows
            .next()
            .transpose()?
            .ok_or_else(|| QueryError::DoesNotExist(self.entity.name.clone()))?;
        let mut count = 1;
        for row in rows {
            row?;
            count += 1;
        }
        if count > 1 {
            return Err(QueryError::MultipleObjectsReturned {
                entity: self.entity.name.clone(),
                count,
            });
        }
        Ok(record)
    }

    /// First record, ordered by primary key unless an ordering is set
    pub fn first(&self) -> QueryResult<Option<Record>> {
        let query = if self.state.ordering.is_empty() {
            self.order_by(&["pk"])
        } else {
            self.clone()
        };
        query.limit(1).iter()?.next().transpose()
    }

    pub fn count(&self) -> QueryResult<usize> {
        let compiled = self.compile()?;
        let mut cursor = self.context.storage.execute(&compiled.plan)?;
        let mut count = 0;
        while cursor.next_row()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub fn exists(&self) -> QueryResult<bool> {
        let compiled = self.limit(1).compile()?;
        let mut cursor = self.context.storage.execute(&compiled.plan)?;
        Ok(cursor.next_row()?.is_some())
    }

    /// Compute aggregates over every matching row. References to
    /// annotations resolve to their expressions.
    pub fn aggregate(
        &self,
        aggregates: &[(&str, Expression)],
    ) -> QueryResult<BTreeMap<String, Value>> {
        let aggregates: Vec<(String, Expression)> = aggregates
            .iter()
            .map(|(name, expr)| (name.to_string(), self.state.annotations.inline(expr)))
            .collect();
        let plan = compile_aggregate(&self.context, &self.entity, &self.state, &aggregates)?;
        let mut cursor = self.context.storage.execute(&plan)?;
        let row = cursor.next_row()?.unwrap_or_default();

        Ok(aggregates
            .into_iter()
            .enumerate()
            .map(|(idx, (name, _))| (name, row.get(idx).cloned().unwrap_or(Value::Null)))
            .collect())
    }

    /// Write computed values into every matching row, returning how many
    /// rows were matched
    pub fn update(&self, assignments: &[(&str, Expression)]) -> QueryResult<usize> {
        let assignments: Vec<(String, Expression)> = assignments
            .iter()
            .map(|(name, expr)| (name.to_string(), self.state.annotations.inline(expr)))
            .collect();
        let plan = compile_update(&self.context, &self.entity, &self.state, &assignments)?;
        let updated = self.context.storage.execute_update(&plan)?;
        debug!("updated {} {} rows", updated, self.entity.name);
        Ok(updated)
    }
}
