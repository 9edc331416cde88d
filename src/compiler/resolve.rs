//! Resolution of caller expressions and predicates into plan expressions.
//!
//! Every field path is walked against the schema graph here; the joins it
//! needs are allocated on the way through [`JoinBuilder`].

use crate::compiler::joins::{placeholder, JoinBuilder};
use crate::compiler::plan::{ColumnRef, PlanExpr, TieBreak};
use crate::error::{QueryError, QueryResult};
use crate::expression::expr::LOOKUP_SEP;
use crate::expression::function::escape_like;
use crate::expression::{
    BinaryOperator, Condition, ConditionalValue, Expression, FieldPath, FunctionName, Lookup,
    Operand, Target, UnaryOperator, Q,
};
use crate::schema::{Cardinality, EntityDef, FieldDef, Schema};
use crate::value::{DataType, Value};
use std::sync::Arc;

/// A resolved expression with its inferred type
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub expr: PlanExpr,
    pub data_type: Option<DataType>,
    pub aggregate: bool,
}

impl Resolved {
    fn boolean(expr: PlanExpr, aggregate: bool) -> Self {
        Self {
            expr,
            data_type: Some(DataType::Boolean),
            aggregate,
        }
    }
}

/// A storage-backed field reached through a path
#[derive(Debug, Clone)]
pub(crate) struct ResolvedField {
    pub column: ColumnRef,
    pub field: FieldDef,
}

/// Position reached while walking relations
#[derive(Debug, Clone)]
pub(crate) struct Walk {
    pub entity: Arc<EntityDef>,
    pub alias: String,
    /// Join key of the hops taken so far
    pub key: String,
    pub nullable: bool,
    /// Whether a to-many hop was taken
    pub to_many: bool,
}

pub(crate) struct Resolver<'a> {
    schema: &'a Schema,
    root: Arc<EntityDef>,
    tie_break: TieBreak,
    /// Names offered alongside fields when a root-level keyword is unknown
    annotation_names: Vec<String>,
    /// Deepest ancestor chain read by the join restriction being resolved
    lineage: Vec<Arc<EntityDef>>,
    pub joins: JoinBuilder,
}

impl<'a> Resolver<'a> {
    pub fn new(
        schema: &'a Schema,
        root: Arc<EntityDef>,
        tie_break: TieBreak,
        annotation_names: Vec<String>,
    ) -> Self {
        let joins = JoinBuilder::new(&root.table);
        Self {
            schema,
            root,
            tie_break,
            annotation_names,
            lineage: Vec::new(),
            joins,
        }
    }

    pub fn root_walk(&self) -> Walk {
        Walk {
            entity: self.root.clone(),
            alias: self.joins.base_alias().to_string(),
            key: String::new(),
            nullable: false,
            to_many: false,
        }
    }

    /// Follow `segments` as relations starting at the root entity
    pub fn walk(&mut self, segments: &[String]) -> QueryResult<Walk> {
        let mut state = self.root_walk();
        for segment in segments {
            state = self.hop(state, segment)?;
        }
        Ok(state)
    }

    fn hop(&mut self, state: Walk, name: &str) -> QueryResult<Walk> {
        let (chain, relation) = self
            .schema
            .relation_chain(&state.entity, name)
            .ok_or_else(|| self.unresolvable(name, &state))?;
        let state = self.climb(state, &chain)?;
        let target = self.entity(&relation.target)?;
        let key = join_key(&state.key, &relation.name);
        let hop = self.joins.join(
            &key,
            &state.entity,
            &state.alias,
            &relation,
            &target,
            state.nullable,
        )?;
        Ok(Walk {
            entity: target,
            alias: hop.alias,
            key,
            nullable: state.nullable || hop.nullable,
            to_many: state.to_many || relation.cardinality() == Cardinality::ToMany,
        })
    }

    /// Join the parent links of an inheritance chain. `chain[0]` is the
    /// entity `state` is positioned on.
    fn climb(&mut self, mut state: Walk, chain: &[Arc<EntityDef>]) -> QueryResult<Walk> {
        for pair in chain.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            let link = child.parent_link().cloned().ok_or_else(|| {
                QueryError::InvalidSchema(format!("{} has no parent link", child.name))
            })?;
            let key = join_key(&state.key, &link.name);
            let hop = self
                .joins
                .join(&key, child, &state.alias, &link, parent, state.nullable)?;
            state = Walk {
                entity: parent.clone(),
                alias: hop.alias,
                key,
                nullable: state.nullable || hop.nullable,
                to_many: state.to_many,
            };
        }
        Ok(state)
    }

    /// Resolve a path ending in a field. A trailing relation name stands for
    /// the related entity's primary key.
    pub fn resolve_path(&mut self, path: &FieldPath) -> QueryResult<ResolvedField> {
        let (last, init) = path
            .segments()
            .split_last()
            .ok_or_else(|| QueryError::InvalidQuery("empty field path".to_string()))?;
        let state = self.walk(init)?;

        if let Some((chain, field)) = self.schema.field_chain(&state.entity, last) {
            let state = self.climb(state, &chain)?;
            return Ok(ResolvedField {
                column: ColumnRef::new(state.alias, field.column.as_str()),
                field,
            });
        }
        if self.schema.relation_chain(&state.entity, last).is_some() {
            let state = self.hop(state, last)?;
            let field = state.entity.pk().cloned().ok_or_else(|| {
                QueryError::InvalidSchema(format!("{} has no primary key", state.entity.name))
            })?;
            return Ok(ResolvedField {
                column: ColumnRef::new(state.alias, field.column.as_str()),
                field,
            });
        }
        Err(self.unresolvable(last, &state))
    }

    pub fn resolve(&mut self, expr: &Expression) -> QueryResult<Resolved> {
        match expr {
            Expression::Value(lit) => {
                let data_type = lit.data_type();
                Ok(Resolved {
                    expr: PlanExpr::Literal(coerce_literal(&lit.value, lit.output_type)),
                    data_type,
                    aggregate: false,
                })
            }

            Expression::Field(path) => {
                let resolved = self.resolve_path(path)?;
                Ok(Resolved {
                    expr: PlanExpr::Column(resolved.column),
                    data_type: Some(resolved.field.data_type),
                    aggregate: false,
                })
            }

            Expression::Conditional(conditional) => self.resolve_conditional(conditional),

            Expression::Function(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.resolve(arg))
                    .collect::<QueryResult<Vec<_>>>()?;
                let arg_types: Vec<Option<DataType>> = args.iter().map(|a| a.data_type).collect();
                Ok(Resolved {
                    data_type: call
                        .output_type
                        .or_else(|| call.function.output_type(&arg_types)),
                    aggregate: args.iter().any(|a| a.aggregate),
                    expr: PlanExpr::Function {
                        name: call.function.as_str().to_string(),
                        args: args.into_iter().map(|a| a.expr).collect(),
                    },
                })
            }

            Expression::Aggregate(call) => {
                let argument = match &call.argument {
                    Some(arg) => Some(self.resolve(arg)?),
                    None => None,
                };
                if argument.as_ref().is_some_and(|a| a.aggregate) {
                    return Err(QueryError::InvalidQuery(format!(
                        "cannot compute {}() over another aggregate",
                        call.function.name()
                    )));
                }
                let input_type = argument.as_ref().and_then(|a| a.data_type);
                Ok(Resolved {
                    data_type: call.function.output_type(input_type),
                    aggregate: true,
                    expr: PlanExpr::Aggregate {
                        function: call.function,
                        argument: argument.map(|a| Box::new(a.expr)),
                        distinct: call.distinct,
                    },
                })
            }

            Expression::BinaryOp { op, left, right } => {
                let left = self.resolve(left)?;
                let right = self.resolve(right)?;
                let data_type = match (left.data_type, right.data_type) {
                    (Some(l), Some(r)) => Some(op.output_type(l, r).ok_or_else(|| {
                        QueryError::InvalidQuery(format!(
                            "unsupported operand types for {}: {:?} and {:?}",
                            op.as_str(),
                            l,
                            r
                        ))
                    })?),
                    (l, r) => l.or(r),
                };
                Ok(Resolved {
                    data_type,
                    aggregate: left.aggregate || right.aggregate,
                    expr: PlanExpr::binary(*op, left.expr, right.expr),
                })
            }
        }
    }

    fn resolve_conditional(&mut self, conditional: &ConditionalValue) -> QueryResult<Resolved> {
        let segments = conditional.path.segments();
        let Some((field_name, relations)) = segments.split_last() else {
            return Err(QueryError::InvalidQuery("empty field path".to_string()));
        };
        let Some((hop_name, approach)) = relations.split_last() else {
            return Err(QueryError::InvalidQuery(format!(
                "conditional value '{}' must traverse a relation",
                conditional.path
            )));
        };

        let state = self.walk(approach)?;
        let (chain, relation) = self
            .schema
            .relation_chain(&state.entity, hop_name)
            .ok_or_else(|| self.unresolvable(hop_name, &state))?;
        let state = self.climb(state, &chain)?;
        let target = self.entity(&relation.target)?;

        let outer = std::mem::replace(&mut self.lineage, vec![target.clone()]);
        let restriction = self.resolve_q_within(&conditional.condition, relations, &target);
        let restricted = std::mem::replace(&mut self.lineage, outer);
        let restriction = restriction?;
        if restriction.aggregate {
            return Err(QueryError::InvalidQuery(
                "aggregates are not allowed in a join condition".to_string(),
            ));
        }
        let (chain, field) = self
            .schema
            .field_chain(&target, field_name)
            .ok_or_else(|| QueryError::UnresolvableField {
                keyword: field_name.clone(),
                choices: self.schema.choices(&target),
            })?;
        let lineage = if chain.len() > restricted.len() {
            chain.clone()
        } else {
            restricted
        };

        let key = join_key(&state.key, &relation.name);
        let hop = self.joins.join_restricted(
            &key,
            &state.entity,
            &state.alias,
            &relation,
            &target,
            &lineage,
            restriction.expr,
            self.tie_break,
        )?;

        let alias = match chain.len() {
            0 | 1 => hop.alias.clone(),
            levels => hop.ancestors.get(levels - 2).cloned().ok_or_else(|| {
                QueryError::InvalidSchema(format!("{} ancestors were not joined", target.name))
            })?,
        };
        Ok(Resolved {
            expr: PlanExpr::column(&alias, &field.column),
            data_type: Some(field.data_type),
            aggregate: false,
        })
    }

    /// Resolve a predicate tree whose paths are relative to the root entity
    pub fn resolve_q(&mut self, q: &Q) -> QueryResult<Resolved> {
        self.resolve_tree(q, None)
    }

    /// Resolve a join restriction: every path must start with `prefix` and
    /// name a field of `target` or one of its ancestors, bound through
    /// [`placeholder`]
    fn resolve_q_within(
        &mut self,
        q: &Q,
        prefix: &[String],
        target: &Arc<EntityDef>,
    ) -> QueryResult<Resolved> {
        self.resolve_tree(q, Some((prefix, target)))
    }

    fn resolve_tree(
        &mut self,
        q: &Q,
        within: Option<(&[String], &Arc<EntityDef>)>,
    ) -> QueryResult<Resolved> {
        match q {
            Q::Condition(condition) => self.resolve_condition(condition, within),
            Q::And(children) | Q::Or(children) => {
                let (op, empty) = match q {
                    Q::And(_) => (BinaryOperator::And, true),
                    _ => (BinaryOperator::Or, false),
                };
                let mut aggregate = false;
                let mut combined: Option<PlanExpr> = None;
                for child in children {
                    let resolved = self.resolve_tree(child, within)?;
                    aggregate |= resolved.aggregate;
                    combined = Some(match combined {
                        None => resolved.expr,
                        Some(acc) => PlanExpr::binary(op, acc, resolved.expr),
                    });
                }
                let expr = combined.unwrap_or(PlanExpr::Literal(Value::Boolean(empty)));
                Ok(Resolved::boolean(expr, aggregate))
            }
            Q::Not(child) => {
                let resolved = self.resolve_tree(child, within)?;
                Ok(Resolved::boolean(
                    PlanExpr::unary(UnaryOperator::Not, resolved.expr),
                    resolved.aggregate,
                ))
            }
        }
    }

    fn resolve_condition(
        &mut self,
        condition: &Condition,
        within: Option<(&[String], &Arc<EntityDef>)>,
    ) -> QueryResult<Resolved> {
        let left = match (&condition.target, within) {
            (Target::Path(path), None) => self.resolve(&Expression::Field(path.clone()))?,
            (Target::Expression(expr), None) => self.resolve(expr)?,
            (Target::Path(path), Some((prefix, target))) => {
                self.restricted_field(path, prefix, target)?
            }
            (Target::Expression(_), Some(_)) => {
                return Err(QueryError::InvalidQuery(
                    "join conditions must name fields of the related entity".to_string(),
                ))
            }
        };
        self.lookup(left, condition.lookup, &condition.operand)
    }

    fn lookup(
        &mut self,
        left: Resolved,
        lookup: Lookup,
        operand: &Operand,
    ) -> QueryResult<Resolved> {
        match (lookup, operand) {
            (Lookup::In, Operand::List(items)) => {
                let items = items
                    .iter()
                    .map(|item| self.resolve(item))
                    .collect::<QueryResult<Vec<_>>>()?;
                let aggregate = left.aggregate || items.iter().any(|i| i.aggregate);
                Ok(Resolved::boolean(
                    PlanExpr::InList {
                        expr: Box::new(left.expr),
                        list: items.into_iter().map(|i| i.expr).collect(),
                    },
                    aggregate,
                ))
            }

            (Lookup::Range, Operand::List(items)) => {
                let [low, high] = items.as_slice() else {
                    return Err(QueryError::InvalidQuery(format!(
                        "range lookup takes two bounds, got {}",
                        items.len()
                    )));
                };
                let low = self.resolve(low)?;
                let high = self.resolve(high)?;
                let lower = compare(BinaryOperator::Ge, left.clone(), low)?;
                let upper = compare(BinaryOperator::Le, left, high)?;
                Ok(Resolved::boolean(
                    PlanExpr::binary(BinaryOperator::And, lower.expr, upper.expr),
                    lower.aggregate || upper.aggregate,
                ))
            }

            (Lookup::IsNull, Operand::Expr(Expression::Value(lit))) => {
                let op = match lit.value {
                    Value::Boolean(true) => UnaryOperator::IsNull,
                    Value::Boolean(false) => UnaryOperator::IsNotNull,
                    _ => {
                        return Err(QueryError::InvalidQuery(
                            "isnull lookup takes a boolean".to_string(),
                        ))
                    }
                };
                Ok(Resolved::boolean(
                    PlanExpr::unary(op, left.expr),
                    left.aggregate,
                ))
            }

            (lookup, Operand::Expr(expr)) => {
                let right = self.resolve(expr)?;
                match lookup {
                    Lookup::Exact if right.expr == PlanExpr::Literal(Value::Null) => {
                        let is_null = PlanExpr::unary(UnaryOperator::IsNull, left.expr);
                        Ok(Resolved::boolean(is_null, left.aggregate))
                    }
                    Lookup::Exact => compare(BinaryOperator::Eq, left, right),
                    Lookup::Gt => compare(BinaryOperator::Gt, left, right),
                    Lookup::Gte => compare(BinaryOperator::Ge, left, right),
                    Lookup::Lt => compare(BinaryOperator::Lt, left, right),
                    Lookup::Lte => compare(BinaryOperator::Le, left, right),
                    Lookup::IExact => {
                        let lower = |r: Resolved| Resolved {
                            expr: PlanExpr::function("LOWER", vec![r.expr]),
                            data_type: Some(DataType::Varchar),
                            aggregate: r.aggregate,
                        };
                        compare(BinaryOperator::Eq, lower(left), lower(right))
                    }
                    Lookup::Contains | Lookup::IContains => {
                        pattern(lookup, left, right, true, true)
                    }
                    Lookup::StartsWith => pattern(lookup, left, right, false, true),
                    Lookup::EndsWith => pattern(lookup, left, right, true, false),
                    Lookup::In | Lookup::Range | Lookup::IsNull => Err(invalid_operand(lookup)),
                }
            }

            (lookup, Operand::List(_)) => Err(invalid_operand(lookup)),
        }
    }

    /// A restriction field on the joined target. Inherited fields widen
    /// the lineage joined along with the target.
    fn restricted_field(
        &mut self,
        path: &FieldPath,
        prefix: &[String],
        target: &Arc<EntityDef>,
    ) -> QueryResult<Resolved> {
        let segments = path.segments();
        let rest = segments
            .strip_prefix(prefix)
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| {
                QueryError::InvalidQuery(format!(
                    "join condition '{}' must start with '{}'",
                    path,
                    prefix.join(LOOKUP_SEP)
                ))
            })?;
        let (chain, field) = match rest {
            [name] => self.schema.field_chain(target, name),
            _ => None,
        }
        .ok_or_else(|| QueryError::UnresolvableField {
            keyword: rest.join(LOOKUP_SEP),
            choices: self.schema.choices(target),
        })?;
        let depth = chain.len() - 1;
        if chain.len() > self.lineage.len() {
            self.lineage = chain;
        }
        Ok(Resolved {
            expr: PlanExpr::column(&placeholder(depth), &field.column),
            data_type: Some(field.data_type),
            aggregate: false,
        })
    }

    fn entity(&self, name: &str) -> QueryResult<Arc<EntityDef>> {
        self.schema
            .entity(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    fn unresolvable(&self, keyword: &str, state: &Walk) -> QueryError {
        let mut choices = self.schema.choices(&state.entity);
        if state.key.is_empty() && Arc::ptr_eq(&state.entity, &self.root) {
            choices.extend(self.annotation_names.iter().cloned());
            choices.sort();
            choices.dedup();
        }
        QueryError::UnresolvableField {
            keyword: keyword.to_string(),
            choices,
        }
    }
}

fn invalid_operand(lookup: Lookup) -> QueryError {
    QueryError::InvalidQuery(format!(
        "invalid operand for the '{}' lookup",
        lookup.as_str()
    ))
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", prefix, LOOKUP_SEP, name)
    }
}

fn compare(op: BinaryOperator, left: Resolved, right: Resolved) -> QueryResult<Resolved> {
    if let (Some(l), Some(r)) = (left.data_type, right.data_type) {
        if !l.comparable_with(r) {
            return Err(QueryError::InvalidQuery(format!(
                "cannot compare {:?} with {:?} using {}",
                l,
                r,
                op.as_str()
            )));
        }
    }
    Ok(Resolved::boolean(
        PlanExpr::binary(op, left.expr, right.expr),
        left.aggregate || right.aggregate,
    ))
}

/// LIKE match against the operand wrapped in `%` wildcards. Wildcards inside
/// the operand itself are escaped so they only match themselves.
fn pattern(
    lookup: Lookup,
    left: Resolved,
    right: Resolved,
    leading: bool,
    trailing: bool,
) -> QueryResult<Resolved> {
    let wrap = |body: String| {
        format!(
            "{}{}{}",
            if leading { "%" } else { "" },
            body,
            if trailing { "%" } else { "" }
        )
    };
    let pattern = match right.expr {
        PlanExpr::Literal(Value::Null) => PlanExpr::Literal(Value::Null),
        PlanExpr::Literal(value) => PlanExpr::Literal(Value::String(wrap(escape_like(
            &value.to_string(),
        )))),
        expr => {
            let mut pattern = PlanExpr::function(FunctionName::EscapeLike.as_str(), vec![expr]);
            if leading {
                pattern = PlanExpr::binary(
                    BinaryOperator::Concat,
                    PlanExpr::Literal(Value::from("%")),
                    pattern,
                );
            }
            if trailing {
                pattern = PlanExpr::binary(
                    BinaryOperator::Concat,
                    pattern,
                    PlanExpr::Literal(Value::from("%")),
                );
            }
            pattern
        }
    };
    let op = match lookup {
        Lookup::IContains => BinaryOperator::ILike,
        _ => BinaryOperator::Like,
    };
    Ok(Resolved::boolean(
        PlanExpr::binary(op, left.expr, pattern),
        left.aggregate || right.aggregate,
    ))
}

/// Apply an explicit output type to a literal where the conversion is lossless
fn coerce_literal(value: &Value, output_type: Option<DataType>) -> Value {
    match (value, output_type) {
        (Value::Int32(n), Some(DataType::Int64)) => Value::Int64(i64::from(*n)),
        (Value::Int32(_) | Value::Int64(_), Some(DataType::Decimal)) => {
            value.as_decimal().map(Value::Decimal).unwrap_or(Value::Null)
        }
        _ => value.clone(),
    }
}
