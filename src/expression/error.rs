//! Error types for expression evaluation.

use crate::value::DataType;
use std::fmt;

/// Errors that can occur while a plan expression is evaluated against a row
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// Invalid operand types for operator
    InvalidOperandTypes {
        operator: String,
        left_type: Option<DataType>,
        right_type: Option<DataType>,
    },

    /// Column reference that the current row scope cannot satisfy
    UnboundColumn { alias: String, column: String },

    /// Division by zero
    DivisionByZero,

    /// Arithmetic result does not fit the output type
    Overflow { context: String },

    /// Invalid function name
    UnknownFunction { name: String },

    /// Wrong number of function arguments
    FunctionArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },

    /// Aggregate evaluated outside of a grouped scope
    AggregateOutsideGroup { function: String },

    /// Generic evaluation error
    EvaluationError { message: String },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionError::InvalidOperandTypes {
                operator,
                left_type,
                right_type,
            } => {
                write!(
                    f,
                    "Invalid operand types for operator {}: left={:?}, right={:?}",
                    operator, left_type, right_type
                )
            }

            ExpressionError::UnboundColumn { alias, column } => {
                write!(f, "Column {}.{} is not bound in this scope", alias, column)
            }

            ExpressionError::DivisionByZero => write!(f, "Division by zero"),

            ExpressionError::Overflow { context } => {
                write!(f, "Numeric overflow in {}", context)
            }

            ExpressionError::UnknownFunction { name } => {
                write!(f, "Unknown function: {}", name)
            }

            ExpressionError::FunctionArgumentCount {
                function,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Function {} expects {} arguments, got {}",
                    function, expected, actual
                )
            }

            ExpressionError::AggregateOutsideGroup { function } => {
                write!(f, "Aggregate {} used outside of a grouped query", function)
            }

            ExpressionError::EvaluationError { message } => {
                write!(f, "Expression evaluation error: {}", message)
            }
        }
    }
}

impl std::error::Error for ExpressionError {}

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExpressionError::InvalidOperandTypes {
            operator: "+".to_string(),
            left_type: Some(DataType::Int32),
            right_type: Some(DataType::Varchar),
        };
        assert_eq!(
            err.to_string(),
            "Invalid operand types for operator +: left=Some(Int32), right=Some(Varchar)"
        );

        let err = ExpressionError::UnboundColumn {
            alias: "books".to_string(),
            column: "rating".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Column books.rating is not bound in this scope"
        );

        assert_eq!(ExpressionError::DivisionByZero.to_string(), "Division by zero");

        let err = ExpressionError::UnknownFunction {
            name: "SOUNDEX".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown function: SOUNDEX");

        let err = ExpressionError::FunctionArgumentCount {
            function: "LOWER".to_string(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Function LOWER expects 1 arguments, got 2");
    }
}
