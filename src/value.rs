//! Scalar values and data types shared by expressions, plans and storage.

use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Data types a field or expression can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Decimal,
    Varchar,
    Timestamp,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64 | DataType::Decimal)
    }

    /// Widest numeric type able to hold both operands
    pub fn widen(self, other: DataType) -> Option<DataType> {
        match (self, other) {
            (DataType::Int32, DataType::Int32) => Some(DataType::Int32),
            (DataType::Int32 | DataType::Int64, DataType::Int32 | DataType::Int64) => {
                Some(DataType::Int64)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => Some(DataType::Decimal),
            _ => None,
        }
    }

    /// Whether values of the two types can be ordered against each other
    pub fn comparable_with(self, other: DataType) -> bool {
        self == other || (self.is_numeric() && other.is_numeric())
    }
}

/// Values flowing through plans and result rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    String(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Get the data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Decimal(_) => Some(DataType::Decimal),
            Value::String(_) => Some(DataType::Varchar),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int32(n) => Some(Decimal::from(*n)),
            Value::Int64(n) => Some(Decimal::from(*n)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// SQL-style comparison. NULLs and values of unrelated types are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
                Some(self.as_i64()?.cmp(&other.as_i64()?))
            }
            _ => Some(self.as_decimal()?.cmp(&other.as_decimal()?)),
        }
    }

    /// Equality used by joins and filters: numeric types compare by value
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}", n),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_data_type() {
        assert_eq!(Value::Null.data_type(), None);
        assert_eq!(Value::Int32(1).data_type(), Some(DataType::Int32));
        assert_eq!(
            Value::String("x".to_string()).data_type(),
            Some(DataType::Varchar)
        );
        assert_eq!(
            Value::Decimal(Decimal::new(999, 2)).data_type(),
            Some(DataType::Decimal)
        );
    }

    #[test]
    fn test_widen() {
        assert_eq!(
            DataType::Int32.widen(DataType::Int32),
            Some(DataType::Int32)
        );
        assert_eq!(
            DataType::Int32.widen(DataType::Int64),
            Some(DataType::Int64)
        );
        assert_eq!(
            DataType::Int64.widen(DataType::Decimal),
            Some(DataType::Decimal)
        );
        assert_eq!(DataType::Varchar.widen(DataType::Int32), None);
    }

    #[test]
    fn test_compare_across_numeric_types() {
        let price = Value::Decimal(Decimal::from_str("8.00").unwrap());
        assert_eq!(price.compare(&Value::Int32(8)), Some(Ordering::Equal));
        assert_eq!(Value::Int32(3).compare(&Value::Int64(4)), Some(Ordering::Less));
        assert!(Value::Int32(8).sql_eq(&price));
    }

    #[test]
    fn test_compare_null_and_mismatched() {
        assert_eq!(Value::Null.compare(&Value::Int32(1)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(
            Value::String("a".to_string()).compare(&Value::Int32(1)),
            None
        );
        assert!(!Value::Null.sql_eq(&Value::Null));
    }

    #[test]
    fn test_from_option() {
        let missing: Option<&str> = None;
        assert_eq!(Value::from(missing), Value::Null);
        assert_eq!(Value::from(Some(5)), Value::Int32(5));
    }
}
