//! Filter predicates: lookups on field paths combined into `Q` trees.

use crate::expression::expr::{Expression, FieldPath, LOOKUP_SEP};
use std::ops::{BitAnd, BitOr, Not};

/// Comparison applied between a target and its operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    IExact,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    Range,
}

impl Lookup {
    pub fn parse(name: &str) -> Option<Self> {
        let lookup = match name {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "in" => Lookup::In,
            "isnull" => Lookup::IsNull,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "endswith" => Lookup::EndsWith,
            "range" => Lookup::Range,
            _ => return None,
        };
        Some(lookup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::In => "in",
            Lookup::IsNull => "isnull",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::StartsWith => "startswith",
            Lookup::EndsWith => "endswith",
            Lookup::Range => "range",
        }
    }

    /// Lookups whose operand is a list of expressions
    pub fn takes_list(&self) -> bool {
        matches!(self, Lookup::In | Lookup::Range)
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Expr(Expression),
    List(Vec<Expression>),
}

impl Operand {
    fn inline_fields<'a, F>(&self, lookup: &F) -> Operand
    where
        F: Fn(&str) -> Option<&'a Expression>,
    {
        match self {
            Operand::Expr(expr) => Operand::Expr(expr.inline_fields(lookup)),
            Operand::List(items) => {
                Operand::List(items.iter().map(|e| e.inline_fields(lookup)).collect())
            }
        }
    }

    fn contains_aggregate(&self) -> bool {
        match self {
            Operand::Expr(expr) => expr.contains_aggregate(),
            Operand::List(items) => items.iter().any(Expression::contains_aggregate),
        }
    }
}

/// Left-hand side of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A field path as written by the caller
    Path(FieldPath),
    /// An annotation's expression substituted for its name
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub target: Target,
    pub lookup: Lookup,
    pub operand: Operand,
}

/// Boolean combination of conditions
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    Condition(Condition),
    And(Vec<Q>),
    Or(Vec<Q>),
    Not(Box<Q>),
}

impl Q {
    /// Condition from a `path__lookup` key. Without a recognised lookup suffix
    /// the comparison is `exact`.
    pub fn new(key: &str, value: impl Into<Expression>) -> Self {
        let (path, lookup) = split_key(key);
        Q::Condition(Condition {
            target: Target::Path(path),
            lookup,
            operand: Operand::Expr(value.into()),
        })
    }

    /// Condition taking a list operand, e.g. `id__in` or `age__range`.
    /// A key without a lookup suffix means `in`.
    pub fn list<I, E>(key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Expression>,
    {
        let (path, lookup) = match split_key(key) {
            (path, Lookup::Exact) if !key.ends_with("__exact") => (path, Lookup::In),
            other => other,
        };
        Q::Condition(Condition {
            target: Target::Path(path),
            lookup,
            operand: Operand::List(values.into_iter().map(Into::into).collect()),
        })
    }

    /// Condition whose left side is an arbitrary expression
    pub fn expr(target: Expression, lookup: Lookup, value: impl Into<Expression>) -> Self {
        Q::Condition(Condition {
            target: Target::Expression(Box::new(target)),
            lookup,
            operand: Operand::Expr(value.into()),
        })
    }

    /// Whether any target or operand aggregates
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Q::Condition(cond) => {
                let target = match &cond.target {
                    Target::Path(_) => false,
                    Target::Expression(expr) => expr.contains_aggregate(),
                };
                target || cond.operand.contains_aggregate()
            }
            Q::And(children) | Q::Or(children) => children.iter().any(Q::contains_aggregate),
            Q::Not(child) => child.contains_aggregate(),
        }
    }

    /// Top-level conjuncts of this tree
    pub fn conjuncts(self) -> Vec<Q> {
        match self {
            Q::And(children) => children.into_iter().flat_map(Q::conjuncts).collect(),
            other => vec![other],
        }
    }

    /// Expand annotation references on both sides of every condition
    pub fn inline<'a, F>(&self, lookup: &F) -> Q
    where
        F: Fn(&str) -> Option<&'a Expression>,
    {
        self.rewrite(lookup, true)
    }

    /// Expand annotation references in operands only
    pub fn inline_operands<'a, F>(&self, lookup: &F) -> Q
    where
        F: Fn(&str) -> Option<&'a Expression>,
    {
        self.rewrite(lookup, false)
    }

    fn rewrite<'a, F>(&self, lookup: &F, targets: bool) -> Q
    where
        F: Fn(&str) -> Option<&'a Expression>,
    {
        match self {
            Q::Condition(cond) => {
                let target = match &cond.target {
                    Target::Path(path) if targets && path.is_simple() => {
                        match lookup(path.first()) {
                            Some(expr) => Target::Expression(Box::new(expr.clone())),
                            None => cond.target.clone(),
                        }
                    }
                    Target::Path(_) => cond.target.clone(),
                    Target::Expression(expr) => {
                        Target::Expression(Box::new(expr.inline_fields(lookup)))
                    }
                };
                Q::Condition(Condition {
                    target,
                    lookup: cond.lookup,
                    operand: cond.operand.inline_fields(lookup),
                })
            }
            Q::And(children) => {
                Q::And(children.iter().map(|c| c.rewrite(lookup, targets)).collect())
            }
            Q::Or(children) => {
                Q::Or(children.iter().map(|c| c.rewrite(lookup, targets)).collect())
            }
            Q::Not(child) => Q::Not(Box::new(child.rewrite(lookup, targets))),
        }
    }
}

fn split_key(key: &str) -> (FieldPath, Lookup) {
    let mut segments: Vec<String> = key.split(LOOKUP_SEP).map(str::to_string).collect();
    if segments.len() > 1 {
        if let Some(lookup) = segments.last().and_then(|s| Lookup::parse(s)) {
            segments.pop();
            return (FieldPath::from_segments(segments), lookup);
        }
    }
    (FieldPath::from_segments(segments), Lookup::Exact)
}

impl BitAnd for Q {
    type Output = Q;

    fn bitand(self, rhs: Q) -> Q {
        let mut children = match self {
            Q::And(children) => children,
            other => vec![other],
        };
        match rhs {
            Q::And(more) => children.extend(more),
            other => children.push(other),
        }
        Q::And(children)
    }
}

impl BitOr for Q {
    type Output = Q;

    fn bitor(self, rhs: Q) -> Q {
        let mut children = match self {
            Q::Or(children) => children,
            other => vec![other],
        };
        match rhs {
            Q::Or(more) => children.extend(more),
            other => children.push(other),
        }
        Q::Or(children)
    }
}

impl Not for Q {
    type Output = Q;

    fn not(self) -> Q {
        match self {
            Q::Not(inner) => *inner,
            other => Q::Not(Box::new(other)),
        }
    }
}
