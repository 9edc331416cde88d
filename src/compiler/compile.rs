//! Assembly of executable plans from query state.
//!
//! Columns are emitted zone by zone (extra, base, annotation, related), so the
//! output order never depends on the order builder calls were made in.

use crate::compiler::joins::pk_column;
use crate::compiler::plan::{
    ExecutablePlan, JoinKind, OrderTerm, PlanColumn, PlanExpr, TableRef, UpdatePlan, UpdateTarget,
    Zone,
};
use crate::compiler::resolve::{Resolved, Resolver};
use crate::engine::EngineContext;
use crate::error::{QueryError, QueryResult};
use crate::expression::expr::LOOKUP_SEP;
use crate::expression::{Expression, FieldPath};
use crate::query::builder::{Deferral, QueryState};
use crate::schema::{EntityDef, FieldDef, Schema};
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A base field left out of the initial fetch
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredField {
    pub name: String,
    pub table: String,
    pub key_column: String,
    pub column: String,
}

/// A read plan plus what the materializer needs to interpret its rows
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub plan: ExecutablePlan,
    pub deferred: Vec<DeferredField>,
    /// Output position of the entity's primary key, when it is selected
    pub key_index: Option<usize>,
}

pub(crate) fn compile_select(
    context: &EngineContext,
    entity: &Arc<EntityDef>,
    state: &QueryState,
) -> QueryResult<CompiledQuery> {
    if state.filtered_after_slice {
        return Err(QueryError::InvalidQuery(
            "cannot filter a query once a slice has been taken".to_string(),
        ));
    }
    check_annotation_names(context, entity, state)?;
    let mut resolver = new_resolver(context, entity, state);
    let mut columns = Vec::new();
    let mut grouped = false;

    for (name, expression) in &state.extra {
        let resolved = resolver.resolve(expression)?;
        if resolved.aggregate {
            return Err(QueryError::InvalidQuery(format!(
                "extra column '{}' cannot aggregate",
                name
            )));
        }
        columns.push(column(name, resolved, Zone::Extra));
    }

    let mut deferred = Vec::new();
    let mut key_index = None;
    match &state.projection {
        Some(projection) => {
            for name in &projection.fields {
                let field = resolver.resolve_path(&FieldPath::parse(name))?;
                columns.push(PlanColumn {
                    name: name.clone(),
                    expr: PlanExpr::Column(field.column),
                    data_type: Some(field.field.data_type),
                    zone: Zone::Base,
                });
            }
        }
        None => {
            let pk = pk_column(entity)?;
            for (field, is_deferred) in base_fields(&context.schema, entity, &state.deferral)? {
                if is_deferred {
                    deferred.push(deferred_field(&context.schema, entity, &field)?);
                    continue;
                }
                let resolved = resolver.resolve_path(&FieldPath::parse(&field.name))?;
                if field.column == pk && resolved.column.alias == entity.table {
                    key_index = Some(columns.len());
                }
                columns.push(PlanColumn {
                    name: field.name.clone(),
                    expr: PlanExpr::Column(resolved.column),
                    data_type: Some(field.data_type),
                    zone: Zone::Base,
                });
            }
        }
    }

    for annotation in state.annotations.iter() {
        if state.is_hidden(&annotation.name) {
            continue;
        }
        let resolved = resolver.resolve(&annotation.expression)?;
        grouped |= resolved.aggregate;
        columns.push(column(&annotation.name, resolved, Zone::Annotation));
    }

    for path in related_paths(&state.related) {
        let segments = FieldPath::parse(&path);
        let walk = resolver.walk(segments.segments())?;
        if walk.to_many {
            return Err(QueryError::InvalidQuery(format!(
                "select_related cannot follow the to-many relation '{}'",
                path
            )));
        }
        for field in context.schema.concrete_fields(&walk.entity) {
            let full = format!("{}{}{}", path, LOOKUP_SEP, field.name);
            let resolved = resolver.resolve_path(&FieldPath::parse(&full))?;
            columns.push(PlanColumn {
                name: field.name.clone(),
                expr: PlanExpr::Column(resolved.column),
                data_type: Some(field.data_type),
                zone: Zone::Related { path: path.clone() },
            });
        }
    }

    let (filter, having) = resolve_filters(&mut resolver, state)?;

    let mut order_by = Vec::new();
    for term in &state.ordering {
        let term = order_term(&mut resolver, state, term)?;
        grouped |= term.expr.is_aggregate();
        order_by.push(term);
    }

    let group_by = (grouped || having.is_some()).then(|| {
        columns
            .iter()
            .filter(|c| !c.expr.is_aggregate())
            .map(|c| c.expr.clone())
            .collect()
    });

    let plan = ExecutablePlan {
        entity: entity.name.clone(),
        base: base_table(entity),
        columns,
        joins: resolver.joins.into_joins(),
        filter,
        group_by,
        having,
        order_by,
        distinct: state.distinct,
        limit: state.limit,
        offset: state.offset,
    };
    log_plan(context, "select", &plan);

    Ok(CompiledQuery {
        plan,
        deferred,
        key_index,
    })
}

/// Plan computing `aggregates` over every row the query matches
pub(crate) fn compile_aggregate(
    context: &EngineContext,
    entity: &Arc<EntityDef>,
    state: &QueryState,
    aggregates: &[(String, Expression)],
) -> QueryResult<ExecutablePlan> {
    if state.annotations.has_aggregate() {
        return Err(QueryError::InvalidQuery(
            "cannot aggregate over a query with aggregate annotations".to_string(),
        ));
    }
    if state.limit.is_some() || state.offset.is_some() || state.distinct {
        return Err(QueryError::InvalidQuery(
            "cannot aggregate a sliced or distinct query".to_string(),
        ));
    }
    check_annotation_names(context, entity, state)?;
    let mut resolver = new_resolver(context, entity, state);

    // Annotations are not output but their joins still shape the row set
    for annotation in state.annotations.iter() {
        resolver.resolve(&annotation.expression)?;
    }

    let mut columns = Vec::new();
    for (name, expression) in aggregates {
        let resolved = resolver.resolve(expression)?;
        if !resolved.aggregate {
            return Err(QueryError::InvalidQuery(format!(
                "'{}' is not an aggregate expression",
                name
            )));
        }
        columns.push(column(name, resolved, Zone::Annotation));
    }
    let (filter, having) = resolve_filters(&mut resolver, state)?;

    let plan = ExecutablePlan {
        entity: entity.name.clone(),
        base: base_table(entity),
        columns,
        joins: resolver.joins.into_joins(),
        filter,
        group_by: Some(Vec::new()),
        having,
        order_by: Vec::new(),
        distinct: false,
        limit: None,
        offset: None,
    };
    log_plan(context, "aggregate", &plan);
    Ok(plan)
}

/// Plan writing `assignments` into every row the query matches
pub(crate) fn compile_update(
    context: &EngineContext,
    entity: &Arc<EntityDef>,
    state: &QueryState,
    assignments: &[(String, Expression)],
) -> QueryResult<UpdatePlan> {
    if state.limit.is_some() || state.offset.is_some() {
        return Err(QueryError::InvalidQuery(
            "cannot update a query once a slice has been taken".to_string(),
        ));
    }
    if assignments.is_empty() {
        return Err(QueryError::InvalidQuery(
            "update requires at least one assignment".to_string(),
        ));
    }
    check_annotation_names(context, entity, state)?;
    let mut resolver = new_resolver(context, entity, state);

    let key = resolver.resolve_path(&FieldPath::parse("pk"))?;
    let mut columns = vec![PlanColumn {
        name: "pk".to_string(),
        expr: PlanExpr::Column(key.column),
        data_type: Some(key.field.data_type),
        zone: Zone::Base,
    }];
    let mut targets = Vec::new();

    for (name, expression) in assignments {
        let (chain, field) = context
            .schema
            .field_chain(entity, name)
            .ok_or_else(|| QueryError::UnknownField {
                entity: entity.name.clone(),
                field: name.clone(),
            })?;
        if field.primary_key {
            return Err(QueryError::InvalidQuery(format!(
                "cannot update the primary key '{}'",
                name
            )));
        }
        let resolved = resolver.resolve(expression)?;
        if resolved.aggregate {
            return Err(QueryError::InvalidQuery(format!(
                "aggregate value for '{}' is not allowed in an update",
                name
            )));
        }
        if let Some(value_type) = resolved.data_type {
            if !value_type.comparable_with(field.data_type) {
                return Err(QueryError::InvalidQuery(format!(
                    "cannot assign {:?} to {:?} field '{}'",
                    value_type, field.data_type, name
                )));
            }
        }
        let owner = chain.last().unwrap_or(entity);
        targets.push(UpdateTarget {
            table: owner.table.clone(),
            key_column: pk_column(owner)?,
            column: field.column.clone(),
            source_index: columns.len(),
        });
        columns.push(column(name, resolved, Zone::Annotation));
    }

    let (filter, having) = resolve_filters(&mut resolver, state)?;
    if having.is_some() {
        return Err(QueryError::InvalidQuery(
            "aggregate filters cannot be used in an update".to_string(),
        ));
    }

    let joins = resolver.joins.into_joins();
    let mut readable: BTreeSet<&str> = BTreeSet::new();
    readable.insert(entity.table.as_str());
    for join in joins.iter().filter(|j| j.kind == JoinKind::Inner) {
        readable.extend(join.steps.iter().map(|s| s.alias.as_str()));
    }
    for column in &columns[1..] {
        if column
            .expr
            .columns()
            .iter()
            .any(|c| !readable.contains(c.alias.as_str()))
        {
            return Err(QueryError::InvalidQuery(format!(
                "joined field references are not permitted in the update of '{}'",
                column.name
            )));
        }
    }

    let source = ExecutablePlan {
        entity: entity.name.clone(),
        base: base_table(entity),
        columns,
        joins,
        filter,
        group_by: None,
        having: None,
        order_by: Vec::new(),
        distinct: true,
        limit: None,
        offset: None,
    };
    log_plan(context, "update", &source);

    Ok(UpdatePlan {
        entity: entity.name.clone(),
        source,
        targets,
    })
}

fn new_resolver<'a>(
    context: &'a EngineContext,
    entity: &Arc<EntityDef>,
    state: &QueryState,
) -> Resolver<'a> {
    Resolver::new(
        &context.schema,
        entity.clone(),
        context.config.conditional_tie_break,
        state.annotations.names().map(str::to_string).collect(),
    )
}

fn column(name: &str, resolved: Resolved, zone: Zone) -> PlanColumn {
    PlanColumn {
        name: name.to_string(),
        expr: resolved.expr,
        data_type: resolved.data_type,
        zone,
    }
}

fn base_table(entity: &EntityDef) -> TableRef {
    TableRef {
        table: entity.table.clone(),
        alias: entity.table.clone(),
    }
}

fn check_annotation_names(
    context: &EngineContext,
    entity: &EntityDef,
    state: &QueryState,
) -> QueryResult<()> {
    if context.config.allow_annotation_shadowing {
        return Ok(());
    }
    let taken = context.schema.choices(entity);
    match state.annotations.names().find(|name| taken.iter().any(|t| t == name)) {
        Some(name) => Err(QueryError::AnnotationConflict(name.to_string())),
        None => Ok(()),
    }
}

/// Split filters into WHERE and HAVING by top-level conjunct
fn resolve_filters(
    resolver: &mut Resolver<'_>,
    state: &QueryState,
) -> QueryResult<(Option<PlanExpr>, Option<PlanExpr>)> {
    let mut filter = Vec::new();
    let mut having = Vec::new();
    for q in &state.filters {
        for part in q.clone().conjuncts() {
            let resolved = resolver.resolve_q(&part)?;
            if resolved.aggregate {
                having.push(resolved.expr);
            } else {
                filter.push(resolved.expr);
            }
        }
    }
    Ok((PlanExpr::conjunction(filter), PlanExpr::conjunction(having)))
}

/// Concrete fields with whether each one is deferred
fn base_fields(
    schema: &Schema,
    entity: &Arc<EntityDef>,
    deferral: &Deferral,
) -> QueryResult<Vec<(FieldDef, bool)>> {
    let canonical = |name: &String| -> QueryResult<String> {
        schema
            .field_chain(entity, name)
            .map(|(_, field)| field.name)
            .ok_or_else(|| QueryError::UnknownField {
                entity: entity.name.clone(),
                field: name.clone(),
            })
    };
    let defer = deferral
        .defer
        .iter()
        .map(canonical)
        .collect::<QueryResult<BTreeSet<_>>>()?;
    let only = match &deferral.only {
        Some(names) => Some(names.iter().map(canonical).collect::<QueryResult<BTreeSet<_>>>()?),
        None => None,
    };

    let pk = entity
        .pk()
        .map(|f| f.name.clone())
        .ok_or_else(|| QueryError::InvalidSchema(format!("{} has no primary key", entity.name)))?;
    if defer.contains(&pk) {
        return Err(QueryError::InvalidQuery(
            "the primary key cannot be deferred".to_string(),
        ));
    }

    Ok(schema
        .concrete_fields(entity)
        .into_iter()
        .map(|field| {
            let excluded = only
                .as_ref()
                .is_some_and(|only| !only.contains(&field.name) && field.name != pk);
            let is_deferred = excluded || defer.contains(&field.name);
            (field, is_deferred)
        })
        .collect())
}

fn deferred_field(
    schema: &Schema,
    entity: &Arc<EntityDef>,
    field: &FieldDef,
) -> QueryResult<DeferredField> {
    let (chain, _) = schema
        .field_chain(entity, &field.name)
        .ok_or_else(|| QueryError::UnknownField {
            entity: entity.name.clone(),
            field: field.name.clone(),
        })?;
    let owner = chain.last().unwrap_or(entity);
    Ok(DeferredField {
        name: field.name.clone(),
        table: owner.table.clone(),
        key_column: pk_column(owner)?,
        column: field.column.clone(),
    })
}

/// Every prefix of the selected paths, each once, in first-seen order
fn related_paths(paths: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut expanded = Vec::new();
    for path in paths {
        let segments = FieldPath::parse(path);
        for end in 1..=segments.len() {
            let prefix = segments.segments()[..end].join(LOOKUP_SEP);
            if seen.insert(prefix.clone()) {
                expanded.push(prefix);
            }
        }
    }
    expanded
}

fn order_term(
    resolver: &mut Resolver<'_>,
    state: &QueryState,
    term: &str,
) -> QueryResult<OrderTerm> {
    let (name, descending) = match term.strip_prefix('-') {
        Some(name) => (name, true),
        None => (term.strip_prefix('+').unwrap_or(term), false),
    };
    if name == "?" {
        return Err(QueryError::InvalidQuery(
            "random ordering is not supported".to_string(),
        ));
    }
    let expr = if let Some(expression) = state.annotations.get(name) {
        resolver.resolve(expression)?.expr
    } else if let Some((_, expression)) = state.extra.iter().find(|(n, _)| n == name) {
        resolver.resolve(expression)?.expr
    } else {
        PlanExpr::Column(resolver.resolve_path(&FieldPath::parse(name))?.column)
    };
    Ok(OrderTerm { expr, descending })
}

fn log_plan(context: &EngineContext, kind: &str, plan: &ExecutablePlan) {
    if context.config.log_plans {
        info!(
            "compiled {} plan for {}: {}",
            kind,
            plan.entity,
            serde_json::to_string(plan).unwrap_or_default()
        );
    } else {
        debug!(
            "compiled {} plan for {}: {} columns, {} joins, grouped={}",
            kind,
            plan.entity,
            plan.columns.len(),
            plan.joins.len(),
            plan.is_grouped()
        );
    }
}
