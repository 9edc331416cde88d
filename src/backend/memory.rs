//! In-memory storage backend.
//!
//! Tables are vectors of rows behind a single reader-writer lock. A plan is
//! executed as a pipeline: scan, joins, filter, grouping, having, sort,
//! projection, distinct, then offset and limit. Every statement bumps a
//! counter so callers can see how many round trips a query took.

use crate::backend::aggregate;
use crate::backend::eval::{Evaluator, Scope};
use crate::backend::join::{self, ScopeLayout, ScopeRow};
use crate::backend::sort::{sort_by_keys, SortOrder};
use crate::backend::{Cursor, StorageBackend, VecCursor};
use crate::compiler::{ExecutablePlan, PlanExpr, PointLookup, UpdatePlan};
use crate::expression::{ExpressionResult, FunctionRegistry};
use crate::schema::Schema;
use crate::value::{DataType, Value};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Column of a stored table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    /// None accepts any value unchanged
    pub data_type: Option<DataType>,
    pub nullable: bool,
    pub primary_key: bool,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type),
            nullable: false,
            primary_key: false,
        }
    }

    /// Integer primary key, filled in on insert when omitted
    pub fn key(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Int32).primary_key()
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: false,
            primary_key: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<TableColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| anyhow!("Column {} does not exist", name))
    }

    fn key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    fn next_key(&self, key_idx: usize) -> i64 {
        self.rows
            .iter()
            .filter_map(|r| r[key_idx].as_i64())
            .max()
            .unwrap_or(0)
            + 1
    }
}

pub(crate) fn table<'a>(tables: &'a HashMap<String, Table>, name: &str) -> Result<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| anyhow!("Table {} does not exist", name))
}

/// Convert a value to the column's type, rejecting NULLs in non-nullable columns
fn coerce(value: Value, column: &TableColumn) -> Result<Value> {
    if value.is_null() {
        if !column.nullable {
            bail!("NULL value in non-nullable column {}", column.name);
        }
        return Ok(Value::Null);
    }
    let Some(data_type) = column.data_type else {
        return Ok(value);
    };
    let converted = match (data_type, &value) {
        (DataType::Int64, Value::Int32(n)) => Some(Value::Int64(i64::from(*n))),
        (DataType::Int32, Value::Int64(n)) => i32::try_from(*n).ok().map(Value::Int32),
        (DataType::Decimal, Value::Int32(_) | Value::Int64(_)) => {
            value.as_decimal().map(Value::Decimal)
        }
        (DataType::Int32 | DataType::Int64, Value::Decimal(_)) => None,
        (data_type, value) if value.data_type() == Some(data_type) => Some(value.clone()),
        _ => None,
    };
    converted.ok_or_else(|| {
        anyhow!(
            "Value {} does not fit column {} of type {:?}",
            value,
            column.name,
            data_type
        )
    })
}

/// Output unit between grouping and projection
enum Unit {
    Row(ScopeRow),
    Group(Vec<ScopeRow>),
}

impl Unit {
    fn scope(&self) -> Scope<'_> {
        match self {
            Unit::Row(row) => Scope::Row(row),
            Unit::Group(rows) => Scope::Group(rows),
        }
    }
}

fn retain_true<T>(
    items: Vec<T>,
    predicate: &PlanExpr,
    evaluator: &Evaluator<'_>,
    scope: impl Fn(&T) -> Scope<'_>,
) -> ExpressionResult<Vec<T>> {
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        if evaluator.is_true(predicate, &scope(&item))? {
            kept.push(item);
        }
    }
    Ok(kept)
}

fn run_select(
    plan: &ExecutablePlan,
    tables: &HashMap<String, Table>,
    functions: &FunctionRegistry,
) -> Result<Vec<Vec<Value>>> {
    let layout = ScopeLayout::for_plan(plan, tables)?;
    let evaluator = Evaluator::new(&layout, functions);

    let mut rows = join::scan(&plan.base, &layout, tables)?;
    for spec in &plan.joins {
        rows = join::apply(rows, spec, &layout, tables, &evaluator)?;
    }
    if let Some(filter) = &plan.filter {
        rows = retain_true(rows, filter, &evaluator, |row| Scope::Row(row))?;
    }

    let mut units: Vec<Unit> = match &plan.group_by {
        Some(keys) => aggregate::group(rows, keys, &evaluator)?
            .into_iter()
            .map(Unit::Group)
            .collect(),
        None => rows.into_iter().map(Unit::Row).collect(),
    };
    if let Some(having) = &plan.having {
        units = retain_true(units, having, &evaluator, Unit::scope)?;
    }

    if !plan.order_by.is_empty() {
        let orders: Vec<SortOrder> = plan
            .order_by
            .iter()
            .map(|t| SortOrder::from_descending(t.descending))
            .collect();
        let mut keyed = Vec::with_capacity(units.len());
        for unit in units {
            let key = plan
                .order_by
                .iter()
                .map(|t| evaluator.evaluate(&t.expr, &unit.scope()))
                .collect::<ExpressionResult<Vec<_>>>()?;
            keyed.push((key, unit));
        }
        units = sort_by_keys(keyed, &orders);
    }

    let mut output = Vec::with_capacity(units.len());
    for unit in &units {
        let scope = unit.scope();
        let tuple = plan
            .columns
            .iter()
            .map(|c| evaluator.evaluate(&c.expr, &scope))
            .collect::<ExpressionResult<Vec<_>>>()?;
        output.push(tuple);
    }

    if plan.distinct {
        let mut seen = HashSet::new();
        output.retain(|tuple| seen.insert(tuple.clone()));
    }

    let offset = plan.offset.unwrap_or(0);
    let limit = plan.limit.unwrap_or(usize::MAX);
    Ok(output.into_iter().skip(offset).take(limit).collect())
}

/// Storage backend keeping every table in memory
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    functions: RwLock<FunctionRegistry>,
    statements: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            functions: RwLock::new(FunctionRegistry::with_builtins()),
            statements: AtomicUsize::new(0),
        }
    }

    /// A store with one table per entity plus the many-to-many link tables
    pub fn for_schema(schema: &Schema) -> Result<Self> {
        let store = Self::new();
        for entity in schema.entities() {
            let columns = entity
                .fields()
                .iter()
                .map(|f| TableColumn {
                    name: f.column.clone(),
                    data_type: Some(f.data_type),
                    nullable: f.nullable,
                    primary_key: f.primary_key,
                })
                .collect();
            store
                .create_table(&entity.table, columns)
                .with_context(|| format!("Failed to create table for {}", entity.name))?;
        }
        for through in schema.through_tables() {
            let mut columns = vec![TableColumn::key("id")];
            columns.extend(through.columns.iter().skip(1).map(TableColumn::untyped));
            store.create_table(&through.table, columns)?;
        }
        Ok(store)
    }

    pub fn create_table(&self, name: &str, columns: Vec<TableColumn>) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            bail!("Table {} already exists", name);
        }
        if columns.iter().filter(|c| c.primary_key).count() > 1 {
            bail!("Table {} declares more than one primary key", name);
        }
        tables.insert(name.to_string(), Table::new(columns));
        Ok(())
    }

    /// Insert a row and return its key. Omitted columns are NULL, except an
    /// omitted integer key which takes the next free value.
    pub fn insert(&self, table_name: &str, values: &[(&str, Value)]) -> Result<Value> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| anyhow!("Table {} does not exist", table_name))?;

        let mut row = vec![Value::Null; table.columns.len()];
        for (name, value) in values {
            let idx = table.column_index(name)?;
            row[idx] = value.clone();
        }

        let key_idx = table.key_index();
        if let Some(idx) = key_idx {
            if row[idx].is_null() {
                let next = table.next_key(idx);
                row[idx] = match table.columns[idx].data_type {
                    Some(DataType::Int64) => Value::Int64(next),
                    _ => Value::Int32(i32::try_from(next).context("Key space exhausted")?),
                };
            }
        }

        let row = row
            .into_iter()
            .zip(&table.columns)
            .map(|(value, column)| coerce(value, column))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to insert into {}", table_name))?;

        let key = match key_idx {
            Some(idx) => {
                if table.rows.iter().any(|r| r[idx].sql_eq(&row[idx])) {
                    bail!("Duplicate key {} in {}", row[idx], table_name);
                }
                row[idx].clone()
            }
            None => Value::Null,
        };
        table.rows.push(row);
        Ok(key)
    }

    /// Make a scalar function available to plans by name
    pub fn register_function<F>(&self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> ExpressionResult<Value> + Send + Sync + 'static,
    {
        self.functions.write().register(name, function);
    }

    /// Number of statements executed so far
    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    /// Snapshot of a table's rows in insertion order
    pub fn rows(&self, table_name: &str) -> Result<Vec<Vec<Value>>> {
        let tables = self.tables.read();
        Ok(table(&tables, table_name)?.rows.clone())
    }
}

impl StorageBackend for MemoryStore {
    fn execute(&self, plan: &ExecutablePlan) -> Result<Box<dyn Cursor>> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read();
        let functions = self.functions.read();
        let rows = run_select(plan, &tables, &functions)?;
        debug!("{} query produced {} rows", plan.entity, rows.len());
        Ok(Box::new(VecCursor::new(rows)))
    }

    fn execute_update(&self, plan: &UpdatePlan) -> Result<usize> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.write();
        let functions = self.functions.read();
        let source = run_select(&plan.source, &tables, &functions)?;

        // Every value is computed and coerced before the first write
        let mut staged = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let table = table(&tables, &target.table)?;
            let key_idx = table.column_index(&target.key_column)?;
            let column_idx = table.column_index(&target.column)?;
            let column = &table.columns[column_idx];
            let mut values = Vec::with_capacity(source.len());
            for tuple in &source {
                let key = tuple
                    .first()
                    .cloned()
                    .ok_or_else(|| anyhow!("Update source row has no key"))?;
                let value = tuple
                    .get(target.source_index)
                    .cloned()
                    .ok_or_else(|| anyhow!("Update source has no column {}", target.source_index))?;
                values.push((key, coerce(value, column)?));
            }
            staged.push((target.table.as_str(), key_idx, column_idx, values));
        }

        for (table_name, key_idx, column_idx, values) in staged {
            let table = tables
                .get_mut(table_name)
                .ok_or_else(|| anyhow!("Table {} does not exist", table_name))?;
            for (key, value) in values {
                for row in table.rows.iter_mut().filter(|r| r[key_idx].sql_eq(&key)) {
                    row[column_idx] = value.clone();
                }
            }
        }
        debug!("{} update matched {} rows", plan.entity, source.len());
        Ok(source.len())
    }

    fn fetch_value(&self, lookup: &PointLookup) -> Result<Option<Value>> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read();
        let table = table(&tables, &lookup.table)?;
        let key_idx = table.column_index(&lookup.key_column)?;
        let column_idx = table.column_index(&lookup.column)?;
        Ok(table
            .rows
            .iter()
            .find(|r| r[key_idx].sql_eq(&lookup.key))
            .map(|r| r[column_idx].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{OrderTerm, PlanColumn, TableRef, UpdateTarget, Zone};
    use crate::expression::{AggregateFunction, BinaryOperator};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn store() -> Result<MemoryStore> {
        let store = MemoryStore::new();
        store.create_table(
            "books",
            vec![
                TableColumn::key("id"),
                TableColumn::new("rating", DataType::Decimal),
                TableColumn::new("publisher_id", DataType::Int32).nullable(),
            ],
        )?;
        for (rating, publisher) in [("4.5", 1), ("3.0", 2), ("4.0", 1)] {
            store.insert(
                "books",
                &[
                    ("rating", Value::Decimal(Decimal::from_str(rating)?)),
                    ("publisher_id", Value::Int32(publisher)),
                ],
            )?;
        }
        Ok(store)
    }

    fn column(name: &str, expr: PlanExpr) -> PlanColumn {
        PlanColumn {
            name: name.to_string(),
            expr,
            data_type: None,
            zone: Zone::Base,
        }
    }

    fn plan(columns: Vec<PlanColumn>) -> ExecutablePlan {
        ExecutablePlan {
            entity: "Book".to_string(),
            base: TableRef {
                table: "books".to_string(),
                alias: "books".to_string(),
            },
            columns,
            joins: Vec::new(),
            filter: None,
            group_by: None,
            having: None,
            order_by: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
        }
    }

    fn collect(mut cursor: Box<dyn Cursor>) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = cursor.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    #[test]
    fn test_insert_assigns_keys_and_coerces() -> Result<()> {
        let store = store()?;
        let rows = store.rows("books")?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0], Value::Int32(3));

        // Integers widen into decimal columns
        store.insert("books", &[("rating", Value::Int32(5))])?;
        assert_eq!(store.rows("books")?[3][1], Value::Decimal(Decimal::from(5)));

        assert!(store.insert("books", &[("rating", Value::Null)]).is_err());
        assert!(store.insert("books", &[("rating", Value::from("x"))]).is_err());
        assert!(store
            .insert("books", &[("id", Value::Int32(1)), ("rating", Value::Int32(1))])
            .is_err());
        Ok(())
    }

    #[test]
    fn test_group_filter_sort_limit() -> Result<()> {
        let store = store()?;
        let publisher = PlanExpr::column("books", "publisher_id");
        let mut plan = plan(vec![
            column("publisher_id", publisher.clone()),
            column(
                "books",
                PlanExpr::Aggregate {
                    function: AggregateFunction::Count,
                    argument: None,
                    distinct: false,
                },
            ),
        ]);
        plan.group_by = Some(vec![publisher.clone()]);
        plan.order_by = vec![OrderTerm {
            expr: publisher,
            descending: true,
        }];

        let rows = collect(store.execute(&plan)?)?;
        assert_eq!(
            rows,
            vec![
                vec![Value::Int32(2), Value::Int64(1)],
                vec![Value::Int32(1), Value::Int64(2)],
            ]
        );

        plan.limit = Some(1);
        plan.offset = Some(1);
        let rows = collect(store.execute(&plan)?)?;
        assert_eq!(rows, vec![vec![Value::Int32(1), Value::Int64(2)]]);
        assert_eq!(store.statement_count(), 2);
        Ok(())
    }

    #[test]
    fn test_aggregate_over_empty_input_yields_one_row() -> Result<()> {
        let store = store()?;
        let mut plan = plan(vec![column(
            "total",
            PlanExpr::Aggregate {
                function: AggregateFunction::Sum,
                argument: Some(Box::new(PlanExpr::column("books", "rating"))),
                distinct: false,
            },
        )]);
        plan.filter = Some(PlanExpr::Literal(Value::Boolean(false)));
        plan.group_by = Some(Vec::new());
        let rows = collect(store.execute(&plan)?)?;
        assert_eq!(rows, vec![vec![Value::Null]]);
        Ok(())
    }

    #[test]
    fn test_update_and_point_lookup() -> Result<()> {
        let store = store()?;
        let rating = PlanExpr::column("books", "rating");
        let mut source = plan(vec![
            column("pk", PlanExpr::column("books", "id")),
            column(
                "rating",
                PlanExpr::binary(
                    BinaryOperator::Sub,
                    rating.clone(),
                    PlanExpr::Literal(Value::Int32(1)),
                ),
            ),
        ]);
        source.filter = Some(PlanExpr::binary(
            BinaryOperator::Eq,
            PlanExpr::column("books", "id"),
            PlanExpr::Literal(Value::Int32(2)),
        ));
        source.distinct = true;
        let update = UpdatePlan {
            entity: "Book".to_string(),
            source,
            targets: vec![UpdateTarget {
                table: "books".to_string(),
                key_column: "id".to_string(),
                column: "rating".to_string(),
                source_index: 1,
            }],
        };
        assert_eq!(store.execute_update(&update)?, 1);

        let lookup = PointLookup {
            table: "books".to_string(),
            key_column: "id".to_string(),
            key: Value::Int32(2),
            column: "rating".to_string(),
        };
        assert_eq!(
            store.fetch_value(&lookup)?,
            Some(Value::Decimal(Decimal::from(2)))
        );
        let missing = PointLookup {
            key: Value::Int32(99),
            ..lookup
        };
        assert_eq!(store.fetch_value(&missing)?, None);
        Ok(())
    }

    #[test]
    fn test_custom_function() -> Result<()> {
        let store = store()?;
        let call = PlanExpr::function("DOUBLE", vec![PlanExpr::column("books", "id")]);
        let plan = plan(vec![column("doubled", call)]);
        assert!(store.execute(&plan).is_err());

        store.register_function("double", |args| match args {
            [Value::Int32(n)] => Ok(Value::Int32(n * 2)),
            _ => Ok(Value::Null),
        });
        let rows = collect(store.execute(&plan)?)?;
        assert_eq!(rows[2], vec![Value::Int32(6)]);
        Ok(())
    }
}
