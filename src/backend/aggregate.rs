//! Grouping and aggregate accumulation.
//!
//! NULL inputs are ignored by every aggregate. COUNT of nothing is 0, every
//! other aggregate of nothing is NULL.

use crate::backend::eval::{Evaluator, Scope};
use crate::backend::join::ScopeRow;
use crate::compiler::PlanExpr;
use crate::expression::{AggregateFunction, ExpressionError, ExpressionResult};
use crate::value::Value;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Fold the values of one group
pub(crate) fn accumulate(
    function: AggregateFunction,
    distinct: bool,
    values: Vec<Value>,
) -> ExpressionResult<Value> {
    let mut inputs: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if distinct {
        let mut unique: Vec<Value> = Vec::with_capacity(inputs.len());
        for value in inputs {
            if !unique.iter().any(|seen| seen.sql_eq(&value)) {
                unique.push(value);
            }
        }
        inputs = unique;
    }

    match function {
        AggregateFunction::Count => Ok(Value::Int64(inputs.len() as i64)),
        AggregateFunction::Sum => sum(&inputs),
        AggregateFunction::Avg => {
            if inputs.is_empty() {
                return Ok(Value::Null);
            }
            let total = match sum(&inputs)? {
                Value::Null => return Ok(Value::Null),
                total => total.as_decimal().ok_or_else(|| not_numeric("AVG", &total))?,
            };
            total
                .checked_div(Decimal::from(inputs.len() as i64))
                .map(Value::Decimal)
                .ok_or_else(|| ExpressionError::Overflow {
                    context: "AVG".to_string(),
                })
        }
        AggregateFunction::Min => extremum("MIN", inputs, Ordering::Less),
        AggregateFunction::Max => extremum("MAX", inputs, Ordering::Greater),
    }
}

fn not_numeric(function: &str, value: &Value) -> ExpressionError {
    ExpressionError::InvalidOperandTypes {
        operator: function.to_string(),
        left_type: value.data_type(),
        right_type: None,
    }
}

/// Integer inputs sum to Int64, anything else numeric sums to Decimal
fn sum(inputs: &[Value]) -> ExpressionResult<Value> {
    if inputs.is_empty() {
        return Ok(Value::Null);
    }
    let overflow = || ExpressionError::Overflow {
        context: "SUM".to_string(),
    };
    if inputs
        .iter()
        .all(|v| matches!(v, Value::Int32(_) | Value::Int64(_)))
    {
        let mut total: i64 = 0;
        for value in inputs {
            let n = value.as_i64().ok_or_else(|| not_numeric("SUM", value))?;
            total = total.checked_add(n).ok_or_else(overflow)?;
        }
        return Ok(Value::Int64(total));
    }
    let mut total = Decimal::ZERO;
    for value in inputs {
        let n = value.as_decimal().ok_or_else(|| not_numeric("SUM", value))?;
        total = total.checked_add(n).ok_or_else(overflow)?;
    }
    Ok(Value::Decimal(total))
}

fn extremum(function: &str, inputs: Vec<Value>, wanted: Ordering) -> ExpressionResult<Value> {
    let mut best: Option<Value> = None;
    for value in inputs {
        best = match best {
            None => Some(value),
            Some(current) => match value.compare(&current) {
                Some(ord) if ord == wanted => Some(value),
                Some(_) => Some(current),
                None => {
                    return Err(ExpressionError::InvalidOperandTypes {
                        operator: function.to_string(),
                        left_type: current.data_type(),
                        right_type: value.data_type(),
                    })
                }
            },
        };
    }
    Ok(best.unwrap_or(Value::Null))
}

/// Partition rows by the values of `keys`, groups in first-seen order.
/// No keys means one group holding every row, even when there are none.
pub(crate) fn group(
    rows: Vec<ScopeRow>,
    keys: &[PlanExpr],
    evaluator: &Evaluator<'_>,
) -> ExpressionResult<Vec<Vec<ScopeRow>>> {
    if keys.is_empty() {
        return Ok(vec![rows]);
    }
    let mut groups: Vec<Vec<ScopeRow>> = Vec::new();
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    for row in rows {
        let key = keys
            .iter()
            .map(|k| evaluator.evaluate(k, &Scope::Row(&row)))
            .collect::<ExpressionResult<Vec<_>>>()?;
        match index.get(&key) {
            Some(&idx) => groups[idx].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }
    Ok(groups)
}
