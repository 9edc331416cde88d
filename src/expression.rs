//! Expression trees built by callers of the query API.
//!
//! This module provides:
//! - Field paths, literals, function and aggregate calls
//! - Conditional values restricted by a predicate
//! - `Q` predicate trees with field lookups
//! - The scalar function registry shared with the storage collaborator

pub mod aggregate;
pub mod error;
pub mod expr;
pub mod function;
pub mod operator;
pub mod predicate;

pub use aggregate::AggregateFunction;
pub use error::{ExpressionError, ExpressionResult};
pub use expr::{AggregateCall, ConditionalValue, Expression, FieldPath, FunctionCall, Literal};
pub use function::{FunctionName, FunctionRegistry, ScalarFunction};
pub use operator::{BinaryOperator, UnaryOperator};
pub use predicate::{Condition, Lookup, Operand, Target, Q};

/// Reference to a field or annotation, `F("rating")`
#[allow(non_snake_case)]
pub fn F(path: &str) -> Expression {
    Expression::field(path)
}

/// Function call by name, resolved to a built-in tag when one matches
pub fn func(name: &str, args: Vec<Expression>) -> Expression {
    Expression::func(FunctionName::parse(name), args)
}
