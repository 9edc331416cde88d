//! Expression AST definitions.
//!
//! These are the caller-facing, schema-independent expressions passed to
//! `annotate`, `filter`, `aggregate` and `update`. The compiler resolves them
//! into plan expressions against a schema.

use crate::expression::aggregate::AggregateFunction;
use crate::expression::function::FunctionName;
use crate::expression::operator::BinaryOperator;
use crate::expression::predicate::Q;
use crate::value::{DataType, Value};
use rust_decimal::Decimal;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Separator between the segments of a field path
pub const LOOKUP_SEP: &str = "__";

/// A `__`-separated traversal from a root entity to a terminal field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split(LOOKUP_SEP).map(str::to_string).collect(),
        }
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn first(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether this path names a single attribute with no traversal
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(LOOKUP_SEP))
    }
}

/// Literal constant with an optional explicit output type
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub value: Value,
    pub output_type: Option<DataType>,
}

impl Literal {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            output_type: None,
        }
    }

    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.output_type.or_else(|| self.value.data_type())
    }
}

/// Value of a related field, taken only from related rows matching `condition`
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalValue {
    pub path: FieldPath,
    pub condition: Q,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub function: FunctionName,
    pub args: Vec<Expression>,
    pub output_type: Option<DataType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    /// None means COUNT(*)
    pub argument: Option<Box<Expression>>,
    pub distinct: bool,
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal constant value
    Value(Literal),

    /// Reference to a field path or an earlier annotation
    Field(FieldPath),

    /// Conditionally joined related value
    Conditional(Box<ConditionalValue>),

    /// Scalar function call
    Function(FunctionCall),

    /// Aggregate over the rows of a group
    Aggregate(AggregateCall),

    /// Arithmetic between two expressions
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn value(value: impl Into<Value>) -> Self {
        Expression::Value(Literal::new(value.into()))
    }

    pub fn typed_value(value: impl Into<Value>, output_type: DataType) -> Self {
        Expression::Value(Literal {
            value: value.into(),
            output_type: Some(output_type),
        })
    }

    pub fn field(path: &str) -> Self {
        Expression::Field(FieldPath::parse(path))
    }

    pub fn conditional(path: &str, condition: Q) -> Self {
        Expression::Conditional(Box::new(ConditionalValue {
            path: FieldPath::parse(path),
            condition,
        }))
    }

    pub fn func(function: FunctionName, args: Vec<Expression>) -> Self {
        Expression::Function(FunctionCall {
            function,
            args,
            output_type: None,
        })
    }

    /// Set an explicit output type on a literal or function call
    pub fn with_output_type(self, output_type: DataType) -> Self {
        match self {
            Expression::Value(lit) => Expression::Value(Literal {
                output_type: Some(output_type),
                ..lit
            }),
            Expression::Function(call) => Expression::Function(FunctionCall {
                output_type: Some(output_type),
                ..call
            }),
            other => other,
        }
    }

    pub fn aggregate(function: AggregateFunction, argument: Expression) -> Self {
        Expression::Aggregate(AggregateCall {
            function,
            argument: Some(Box::new(argument)),
            distinct: false,
        })
    }

    pub fn count(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Count, argument)
    }

    pub fn count_distinct(argument: Expression) -> Self {
        Expression::Aggregate(AggregateCall {
            function: AggregateFunction::Count,
            argument: Some(Box::new(argument)),
            distinct: true,
        })
    }

    pub fn count_all() -> Self {
        Expression::Aggregate(AggregateCall {
            function: AggregateFunction::Count,
            argument: None,
            distinct: false,
        })
    }

    pub fn sum(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Sum, argument)
    }

    pub fn avg(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Avg, argument)
    }

    pub fn min(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Min, argument)
    }

    pub fn max(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Max, argument)
    }

    pub fn binary_op(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Whether any node of this tree is an aggregate call
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expression::Value(_) | Expression::Field(_) | Expression::Conditional(_) => false,
            Expression::Aggregate(_) => true,
            Expression::Function(call) => call.args.iter().any(|a| a.contains_aggregate()),
            Expression::BinaryOp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
        }
    }

    /// Replace single-segment field references for which `lookup` returns an
    /// expression. Used to expand references to annotations in place.
    pub fn inline_fields<'a, F>(&self, lookup: &F) -> Expression
    where
        F: Fn(&str) -> Option<&'a Expression>,
    {
        match self {
            Expression::Field(path) if path.is_simple() => match lookup(path.first()) {
                Some(expr) => expr.clone(),
                None => self.clone(),
            },
            Expression::Value(_) | Expression::Field(_) => self.clone(),
            Expression::Conditional(cond) => Expression::Conditional(Box::new(ConditionalValue {
                path: cond.path.clone(),
                condition: cond.condition.inline_operands(lookup),
            })),
            Expression::Function(call) => Expression::Function(FunctionCall {
                function: call.function.clone(),
                args: call.args.iter().map(|a| a.inline_fields(lookup)).collect(),
                output_type: call.output_type,
            }),
            Expression::Aggregate(call) => Expression::Aggregate(AggregateCall {
                function: call.function,
                argument: call
                    .argument
                    .as_ref()
                    .map(|a| Box::new(a.inline_fields(lookup))),
                distinct: call.distinct,
            }),
            Expression::BinaryOp { op, left, right } => Expression::BinaryOp {
                op: *op,
                left: Box::new(left.inline_fields(lookup)),
                right: Box::new(right.inline_fields(lookup)),
            },
        }
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Value(Literal::new(value))
    }
}

macro_rules! literal_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expression {
                fn from(value: $ty) -> Self {
                    Expression::value(value)
                }
            }
        )*
    };
}

literal_from!(bool, i32, i64, Decimal, &str, String, chrono::NaiveDateTime);

macro_rules! arithmetic_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expression>> $trait<R> for Expression {
            type Output = Expression;

            fn $method(self, rhs: R) -> Expression {
                Expression::binary_op($op, self, rhs.into())
            }
        }
    };
}

arithmetic_op!(Add, add, BinaryOperator::Add);
arithmetic_op!(Sub, sub, BinaryOperator::Sub);
arithmetic_op!(Mul, mul, BinaryOperator::Mul);
arithmetic_op!(Div, div, BinaryOperator::Div);
