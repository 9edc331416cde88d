//! Aggregate function identifiers.

use crate::value::DataType;
use serde::Serialize;

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggregateFunction {
    /// COUNT(*) or COUNT(expr) - counts non-NULL values
    Count,
    /// SUM(expr) - sums numeric values, ignoring NULLs
    Sum,
    /// AVG(expr) - average of numeric values, ignoring NULLs
    Avg,
    /// MIN(expr) - minimum value, ignoring NULLs
    Min,
    /// MAX(expr) - maximum value, ignoring NULLs
    Max,
}

impl AggregateFunction {
    /// Returns the name of the aggregate function
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    /// Returns the output data type for this aggregate function given the input type
    pub fn output_type(&self, input_type: Option<DataType>) -> Option<DataType> {
        match self {
            AggregateFunction::Count => Some(DataType::Int64),
            AggregateFunction::Avg => Some(DataType::Decimal),
            // Integer sums are computed in 64 bits
            AggregateFunction::Sum => input_type.and_then(|t| t.widen(DataType::Int64)),
            AggregateFunction::Min | AggregateFunction::Max => input_type,
        }
    }
}
