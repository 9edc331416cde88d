//! Compiled plan shapes handed to the storage collaborator.
//!
//! Everything here is plain data: column references are `(alias, column)`
//! pairs, and the output tuple of an [`ExecutablePlan`] follows `columns`
//! position by position.

use crate::expression::{AggregateFunction, BinaryOperator, UnaryOperator};
use crate::schema::Cardinality;
use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};

/// Column of a table bound under an alias
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

/// Schema-free expression evaluated by storage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanExpr {
    Literal(Value),
    Column(ColumnRef),
    Binary {
        op: BinaryOperator,
        left: Box<PlanExpr>,
        right: Box<PlanExpr>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<PlanExpr>,
    },
    Function {
        name: String,
        args: Vec<PlanExpr>,
    },
    Aggregate {
        function: AggregateFunction,
        argument: Option<Box<PlanExpr>>,
        distinct: bool,
    },
    InList {
        expr: Box<PlanExpr>,
        list: Vec<PlanExpr>,
    },
}

impl PlanExpr {
    pub fn column(alias: &str, column: &str) -> Self {
        PlanExpr::Column(ColumnRef::new(alias, column))
    }

    pub fn binary(op: BinaryOperator, left: PlanExpr, right: PlanExpr) -> Self {
        PlanExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, operand: PlanExpr) -> Self {
        PlanExpr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn function(name: &str, args: Vec<PlanExpr>) -> Self {
        PlanExpr::Function {
            name: name.to_string(),
            args,
        }
    }

    /// Conjunction of all parts, None when there are none
    pub fn conjunction(parts: Vec<PlanExpr>) -> Option<PlanExpr> {
        parts
            .into_iter()
            .reduce(|acc, part| PlanExpr::binary(BinaryOperator::And, acc, part))
    }

    pub fn is_aggregate(&self) -> bool {
        match self {
            PlanExpr::Aggregate { .. } => true,
            PlanExpr::Literal(_) | PlanExpr::Column(_) => false,
            PlanExpr::Binary { left, right, .. } => left.is_aggregate() || right.is_aggregate(),
            PlanExpr::Unary { operand, .. } => operand.is_aggregate(),
            PlanExpr::Function { args, .. } => args.iter().any(PlanExpr::is_aggregate),
            PlanExpr::InList { expr, list } => {
                expr.is_aggregate() || list.iter().any(PlanExpr::is_aggregate)
            }
        }
    }

    /// Every column referenced anywhere in the expression
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut found = Vec::new();
        self.collect_columns(&mut found);
        found
    }

    fn collect_columns<'a>(&'a self, found: &mut Vec<&'a ColumnRef>) {
        match self {
            PlanExpr::Literal(_) => {}
            PlanExpr::Column(col) => found.push(col),
            PlanExpr::Binary { left, right, .. } => {
                left.collect_columns(found);
                right.collect_columns(found);
            }
            PlanExpr::Unary { operand, .. } => operand.collect_columns(found),
            PlanExpr::Function { args, .. } => {
                for arg in args {
                    arg.collect_columns(found);
                }
            }
            PlanExpr::Aggregate { argument, .. } => {
                if let Some(argument) = argument {
                    argument.collect_columns(found);
                }
            }
            PlanExpr::InList { expr, list } => {
                expr.collect_columns(found);
                for item in list {
                    item.collect_columns(found);
                }
            }
        }
    }

    /// Rebind every column of `from` to `to`
    pub fn rename_alias(&self, from: &str, to: &str) -> PlanExpr {
        let rename = |e: &PlanExpr| Box::new(e.rename_alias(from, to));
        match self {
            PlanExpr::Column(col) if col.alias == from => PlanExpr::column(to, &col.column),
            PlanExpr::Literal(_) | PlanExpr::Column(_) => self.clone(),
            PlanExpr::Binary { op, left, right } => PlanExpr::Binary {
                op: *op,
                left: rename(left),
                right: rename(right),
            },
            PlanExpr::Unary { op, operand } => PlanExpr::Unary {
                op: *op,
                operand: rename(operand),
            },
            PlanExpr::Function { name, args } => PlanExpr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.rename_alias(from, to)).collect(),
            },
            PlanExpr::Aggregate {
                function,
                argument,
                distinct,
            } => PlanExpr::Aggregate {
                function: *function,
                argument: argument.as_deref().map(rename),
                distinct: *distinct,
            },
            PlanExpr::InList { expr, list } => PlanExpr::InList {
                expr: rename(expr),
                list: list.iter().map(|e| e.rename_alias(from, to)).collect(),
            },
        }
    }
}

/// Output zone of a column. Zones appear in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Extra,
    Base,
    Annotation,
    Related { path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanColumn {
    pub name: String,
    pub expr: PlanExpr,
    pub data_type: Option<DataType>,
    pub zone: Zone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

/// Which related row a restricted join keeps when several match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    LowestKey,
    HighestKey,
}

/// One table reached by a join: `table AS alias ON left = alias.right_column`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinStep {
    pub table: String,
    pub alias: String,
    pub left: ColumnRef,
    pub right_column: String,
}

/// Keep at most one match per left row, picked by `key`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleMatch {
    pub key: ColumnRef,
    pub tie_break: TieBreak,
}

/// A relation hop. Many-to-many hops go through their link table in two steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinSpec {
    pub path: String,
    pub cardinality: Cardinality,
    pub kind: JoinKind,
    pub steps: Vec<JoinStep>,
    /// Index of the step reaching the hop's entity. Later steps join that
    /// entity's ancestors.
    pub target_step: usize,
    /// Extra ON condition over the aliases of `steps`
    pub restriction: Option<PlanExpr>,
    pub single_match: Option<SingleMatch>,
}

impl JoinSpec {
    /// Alias of the entity this hop arrives at
    pub fn target_alias(&self) -> &str {
        self.steps
            .get(self.target_step)
            .map(|s| s.alias.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTerm {
    pub expr: PlanExpr,
    pub descending: bool,
}

/// A complete read plan. Output tuples follow `columns`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutablePlan {
    pub entity: String,
    pub base: TableRef,
    pub columns: Vec<PlanColumn>,
    pub joins: Vec<JoinSpec>,
    pub filter: Option<PlanExpr>,
    /// Some(empty) aggregates every row into a single group
    pub group_by: Option<Vec<PlanExpr>>,
    pub having: Option<PlanExpr>,
    pub order_by: Vec<OrderTerm>,
    pub distinct: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ExecutablePlan {
    pub fn is_grouped(&self) -> bool {
        self.group_by.is_some()
    }
}

/// Write of one source column into the owning table of a field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateTarget {
    pub table: String,
    pub key_column: String,
    pub column: String,
    pub source_index: usize,
}

/// Update plan. `source` yields `[key, value...]`; every value is computed
/// before any row is written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatePlan {
    pub entity: String,
    pub source: ExecutablePlan,
    pub targets: Vec<UpdateTarget>,
}

/// Single-column fetch used to load a deferred field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointLookup {
    pub table: String,
    pub key_column: String,
    pub key: Value,
    pub column: String,
}
