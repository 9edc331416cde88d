//! Plan expression evaluation against scope rows.

use crate::backend::aggregate::accumulate;
use crate::backend::join::{ScopeLayout, ScopeRow};
use crate::compiler::PlanExpr;
use crate::expression::{
    AggregateFunction, BinaryOperator, ExpressionError, ExpressionResult, FunctionRegistry,
    UnaryOperator,
};
use crate::value::Value;
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// What column references and aggregates are evaluated against
pub(crate) enum Scope<'a> {
    Row(&'a ScopeRow),
    /// Columns read the first row of the group, NULL for an empty group
    Group(&'a [ScopeRow]),
}

/// Evaluator for plan expressions
pub(crate) struct Evaluator<'a> {
    layout: &'a ScopeLayout,
    functions: &'a FunctionRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(layout: &'a ScopeLayout, functions: &'a FunctionRegistry) -> Self {
        Self { layout, functions }
    }

    /// Whether a predicate holds. NULL counts as false.
    pub fn is_true(&self, expr: &PlanExpr, scope: &Scope<'_>) -> ExpressionResult<bool> {
        match self.evaluate(expr, scope)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(ExpressionError::EvaluationError {
                message: format!("predicate produced non-boolean value {}", other),
            }),
        }
    }

    pub fn evaluate(&self, expr: &PlanExpr, scope: &Scope<'_>) -> ExpressionResult<Value> {
        match expr {
            PlanExpr::Literal(value) => Ok(value.clone()),

            PlanExpr::Column(col) => match scope {
                Scope::Row(row) => self.layout.value(row, col),
                Scope::Group(rows) => match rows.first() {
                    Some(row) => self.layout.value(row, col),
                    None => Ok(Value::Null),
                },
            },

            PlanExpr::Binary { op, left, right } => {
                let left = self.evaluate(left, scope)?;
                let right = self.evaluate(right, scope)?;
                binary(*op, left, right)
            }

            PlanExpr::Unary { op, operand } => {
                let operand = self.evaluate(operand, scope)?;
                unary(*op, operand)
            }

            PlanExpr::Function { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg, scope))
                    .collect::<ExpressionResult<Vec<_>>>()?;
                self.functions.call(name, &args)
            }

            PlanExpr::Aggregate {
                function,
                argument,
                distinct,
            } => {
                let Scope::Group(rows) = scope else {
                    return Err(ExpressionError::AggregateOutsideGroup {
                        function: function.name().to_string(),
                    });
                };
                let values = match argument {
                    Some(argument) => rows
                        .iter()
                        .map(|row| self.evaluate(argument, &Scope::Row(row)))
                        .collect::<ExpressionResult<Vec<_>>>()?,
                    // COUNT(*) counts rows, NULL-extended or not
                    None if *function == AggregateFunction::Count => {
                        vec![Value::Boolean(true); rows.len()]
                    }
                    None => {
                        return Err(ExpressionError::EvaluationError {
                            message: format!("{} requires an argument", function.name()),
                        })
                    }
                };
                accumulate(*function, *distinct, values)
            }

            PlanExpr::InList { expr, list } => {
                let needle = self.evaluate(expr, scope)?;
                if needle.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let item = self.evaluate(item, scope)?;
                    if item.is_null() {
                        saw_null = true;
                    } else if needle.sql_eq(&item) {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(if saw_null {
                    Value::Null
                } else {
                    Value::Boolean(false)
                })
            }
        }
    }
}

fn invalid(op: &str, left: &Value, right: Option<&Value>) -> ExpressionError {
    ExpressionError::InvalidOperandTypes {
        operator: op.to_string(),
        left_type: left.data_type(),
        right_type: right.and_then(|r| r.data_type()),
    }
}

fn binary(op: BinaryOperator, left: Value, right: Value) -> ExpressionResult<Value> {
    match op {
        BinaryOperator::And => Ok(match (truth(&left, op)?, truth(&right, op)?) {
            (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
            (Some(true), Some(true)) => Value::Boolean(true),
            _ => Value::Null,
        }),
        BinaryOperator::Or => Ok(match (truth(&left, op)?, truth(&right, op)?) {
            (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
            (Some(false), Some(false)) => Value::Boolean(false),
            _ => Value::Null,
        }),
        _ if left.is_null() || right.is_null() => Ok(Value::Null),

        BinaryOperator::Add
        | BinaryOperator::Sub
        | BinaryOperator::Mul
        | BinaryOperator::Div => arithmetic(op, &left, &right),

        BinaryOperator::Eq
        | BinaryOperator::Ne
        | BinaryOperator::Lt
        | BinaryOperator::Le
        | BinaryOperator::Gt
        | BinaryOperator::Ge => {
            let ordering = left
                .compare(&right)
                .ok_or_else(|| invalid(op.as_str(), &left, Some(&right)))?;
            let result = match op {
                BinaryOperator::Eq => ordering == Ordering::Equal,
                BinaryOperator::Ne => ordering != Ordering::Equal,
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::Le => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Boolean(result))
        }

        BinaryOperator::Concat => Ok(Value::String(format!("{}{}", left, right))),

        BinaryOperator::Like | BinaryOperator::ILike => match (&left, &right) {
            (Value::String(text), Value::String(pattern)) => {
                let matched = if op == BinaryOperator::ILike {
                    like(&text.to_lowercase(), &pattern.to_lowercase())
                } else {
                    like(text, pattern)
                };
                Ok(Value::Boolean(matched))
            }
            _ => Err(invalid(op.as_str(), &left, Some(&right))),
        },
    }
}

/// Boolean view of an operand for three-valued logic
fn truth(value: &Value, op: BinaryOperator) -> ExpressionResult<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(invalid(op.as_str(), other, None)),
    }
}

fn unary(op: UnaryOperator, operand: Value) -> ExpressionResult<Value> {
    match op {
        UnaryOperator::IsNull => Ok(Value::Boolean(operand.is_null())),
        UnaryOperator::IsNotNull => Ok(Value::Boolean(!operand.is_null())),
        UnaryOperator::Not => match operand {
            Value::Null => Ok(Value::Null),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(invalid(op.as_str(), &other, None)),
        },
        UnaryOperator::Minus => match operand {
            Value::Null => Ok(Value::Null),
            Value::Int32(n) => n
                .checked_neg()
                .map(Value::Int32)
                .ok_or_else(|| overflow(op.as_str())),
            Value::Int64(n) => n
                .checked_neg()
                .map(Value::Int64)
                .ok_or_else(|| overflow(op.as_str())),
            Value::Decimal(d) => Ok(Value::Decimal(-d)),
            other => Err(invalid(op.as_str(), &other, None)),
        },
    }
}

fn overflow(context: &str) -> ExpressionError {
    ExpressionError::Overflow {
        context: context.to_string(),
    }
}

/// Numeric arithmetic on the widest type of the two operands
fn arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> ExpressionResult<Value> {
    let symbol = op.as_str();
    match (left, right) {
        (Value::Int32(a), Value::Int32(b)) => {
            let result = match op {
                BinaryOperator::Add => a.checked_add(*b),
                BinaryOperator::Sub => a.checked_sub(*b),
                BinaryOperator::Mul => a.checked_mul(*b),
                _ if *b == 0 => return Err(ExpressionError::DivisionByZero),
                _ => a.checked_div(*b),
            };
            result.map(Value::Int32).ok_or_else(|| overflow(symbol))
        }
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            let (a, b) = match (left.as_i64(), right.as_i64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(invalid(symbol, left, Some(right))),
            };
            let result = match op {
                BinaryOperator::Add => a.checked_add(b),
                BinaryOperator::Sub => a.checked_sub(b),
                BinaryOperator::Mul => a.checked_mul(b),
                _ if b == 0 => return Err(ExpressionError::DivisionByZero),
                _ => a.checked_div(b),
            };
            result.map(Value::Int64).ok_or_else(|| overflow(symbol))
        }
        _ => {
            let (a, b): (Decimal, Decimal) = match (left.as_decimal(), right.as_decimal()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(invalid(symbol, left, Some(right))),
            };
            let result = match op {
                BinaryOperator::Add => a.checked_add(b),
                BinaryOperator::Sub => a.checked_sub(b),
                BinaryOperator::Mul => a.checked_mul(b),
                _ if b.is_zero() => return Err(ExpressionError::DivisionByZero),
                _ => a.checked_div(b),
            };
            result.map(Value::Decimal).ok_or_else(|| overflow(symbol))
        }
    }
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one, and a
/// backslash makes the next pattern character literal
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        let step = match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('_') => Some(1),
            Some('\\') => match pattern.get(p + 1) {
                Some(c) if *c == text[t] => Some(2),
                Some(_) => None,
                None if text[t] == '\\' => Some(1),
                None => None,
            },
            Some(c) if *c == text[t] => Some(1),
            _ => None,
        };
        match (step, backtrack) {
            (Some(width), _) => {
                t += 1;
                p += width;
            }
            (None, Some((star, matched))) => {
                p = star + 1;
                t = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            (None, None) => return false,
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
