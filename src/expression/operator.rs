//! Operator definitions for expressions.

use crate::value::DataType;
use serde::Serialize;

/// Binary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,

    // String operators
    Concat,
    Like,
    ILike,
}

impl BinaryOperator {
    /// Get the output type of this operator given input types
    pub fn output_type(&self, left: DataType, right: DataType) -> Option<DataType> {
        match self {
            BinaryOperator::Add
            | BinaryOperator::Sub
            | BinaryOperator::Mul
            | BinaryOperator::Div => left.widen(right),

            BinaryOperator::Eq
            | BinaryOperator::Ne
            | BinaryOperator::Lt
            | BinaryOperator::Le
            | BinaryOperator::Gt
            | BinaryOperator::Ge => {
                if left.comparable_with(right) {
                    Some(DataType::Boolean)
                } else {
                    None
                }
            }

            BinaryOperator::And | BinaryOperator::Or => match (left, right) {
                (DataType::Boolean, DataType::Boolean) => Some(DataType::Boolean),
                _ => None,
            },

            BinaryOperator::Concat => Some(DataType::Varchar),

            BinaryOperator::Like | BinaryOperator::ILike => match (left, right) {
                (DataType::Varchar, DataType::Varchar) => Some(DataType::Boolean),
                _ => None,
            },
        }
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Eq => "=",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Concat => "||",
            BinaryOperator::Like => "LIKE",
            BinaryOperator::ILike => "ILIKE",
        }
    }
}

/// Unary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOperator {
    Not,
    IsNull,
    IsNotNull,
    Minus,
}

impl UnaryOperator {
    /// Get the output type of this operator given input type
    pub fn output_type(&self, operand: DataType) -> Option<DataType> {
        match self {
            UnaryOperator::Not => match operand {
                DataType::Boolean => Some(DataType::Boolean),
                _ => None,
            },

            // NULL checks always return boolean regardless of input type
            UnaryOperator::IsNull | UnaryOperator::IsNotNull => Some(DataType::Boolean),

            UnaryOperator::Minus => operand.is_numeric().then_some(operand),
        }
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "NOT",
            UnaryOperator::IsNull => "IS NULL",
            UnaryOperator::IsNotNull => "IS NOT NULL",
            UnaryOperator::Minus => "-",
        }
    }
}
