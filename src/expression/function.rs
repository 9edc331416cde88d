//! Scalar functions: the closed set of built-in tags plus a registration
//! table for custom implementations.

use crate::expression::{ExpressionError, ExpressionResult};
use crate::value::{DataType, Value};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Function identifiers known to the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FunctionName {
    Coalesce,
    Lower,
    Upper,
    Least,
    Greatest,
    Length,
    Concat,
    Abs,
    /// Escapes LIKE wildcards so the argument matches literally
    EscapeLike,
    /// Resolved by name against the storage collaborator's registry
    Custom(String),
}

impl FunctionName {
    /// Parse a function name case-insensitively, falling back to a custom tag
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "COALESCE" => FunctionName::Coalesce,
            "LOWER" => FunctionName::Lower,
            "UPPER" => FunctionName::Upper,
            "LEAST" => FunctionName::Least,
            "GREATEST" => FunctionName::Greatest,
            "LENGTH" => FunctionName::Length,
            "CONCAT" => FunctionName::Concat,
            "ABS" => FunctionName::Abs,
            "ESCAPE_LIKE" => FunctionName::EscapeLike,
            other => FunctionName::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FunctionName::Coalesce => "COALESCE",
            FunctionName::Lower => "LOWER",
            FunctionName::Upper => "UPPER",
            FunctionName::Least => "LEAST",
            FunctionName::Greatest => "GREATEST",
            FunctionName::Length => "LENGTH",
            FunctionName::Concat => "CONCAT",
            FunctionName::Abs => "ABS",
            FunctionName::EscapeLike => "ESCAPE_LIKE",
            FunctionName::Custom(name) => name,
        }
    }

    /// Output type when the caller did not give one explicitly
    pub fn output_type(&self, args: &[Option<DataType>]) -> Option<DataType> {
        match self {
            FunctionName::Lower
            | FunctionName::Upper
            | FunctionName::Concat
            | FunctionName::EscapeLike => {
                Some(DataType::Varchar)
            }
            FunctionName::Length => Some(DataType::Int32),
            _ => args.iter().flatten().next().copied(),
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implementation of a scalar function over already evaluated arguments
pub type ScalarFunction = Arc<dyn Fn(&[Value]) -> ExpressionResult<Value> + Send + Sync>;

/// Name -> implementation table consulted when a plan is executed
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, ScalarFunction>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("COALESCE", coalesce);
        registry.register("LOWER", |args| map_string("LOWER", args, |s| s.to_lowercase()));
        registry.register("UPPER", |args| map_string("UPPER", args, |s| s.to_uppercase()));
        registry.register("LEAST", |args| extremum("LEAST", args, Ordering::Less));
        registry.register("GREATEST", |args| extremum("GREATEST", args, Ordering::Greater));
        registry.register("LENGTH", length);
        registry.register("CONCAT", concat);
        registry.register("ABS", abs);
        registry.register("ESCAPE_LIKE", |args| {
            expect_args("ESCAPE_LIKE", args, 1)?;
            Ok(match &args[0] {
                Value::Null => Value::Null,
                other => Value::String(escape_like(&other.to_string())),
            })
        });
        registry
    }

    /// Register or replace a function. Names are case-insensitive.
    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> ExpressionResult<Value> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.to_ascii_uppercase(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_uppercase())
    }

    pub fn call(&self, name: &str, args: &[Value]) -> ExpressionResult<Value> {
        let function = self
            .functions
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| ExpressionError::UnknownFunction {
                name: name.to_string(),
            })?;
        function(args)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

fn expect_args(function: &str, args: &[Value], expected: usize) -> ExpressionResult<()> {
    if args.len() != expected {
        return Err(ExpressionError::FunctionArgumentCount {
            function: function.to_string(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn coalesce(args: &[Value]) -> ExpressionResult<Value> {
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

fn map_string(
    function: &str,
    args: &[Value],
    f: impl Fn(&str) -> String,
) -> ExpressionResult<Value> {
    expect_args(function, args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(f(s))),
        other => Err(ExpressionError::InvalidOperandTypes {
            operator: function.to_string(),
            left_type: other.data_type(),
            right_type: None,
        }),
    }
}

/// LEAST/GREATEST skip NULLs and only return NULL when every argument is NULL
fn extremum(function: &str, args: &[Value], wanted: Ordering) -> ExpressionResult<Value> {
    let mut best: Option<&Value> = None;
    for value in args.iter().filter(|v| !v.is_null()) {
        best = match best {
            None => Some(value),
            Some(current) => match value.compare(current) {
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
    Ok(best.cloned().unwrap_or(Value::Null))
}

fn length(args: &[Value]) -> ExpressionResult<Value> {
    expect_args("LENGTH", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => i32::try_from(s.chars().count())
            .map(Value::Int32)
            .map_err(|_| ExpressionError::Overflow {
                context: "LENGTH".to_string(),
            }),
        other => Err(ExpressionError::InvalidOperandTypes {
            operator: "LENGTH".to_string(),
            left_type: other.data_type(),
            right_type: None,
        }),
    }
}

fn concat(args: &[Value]) -> ExpressionResult<Value> {
    let text: String = args
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .collect();
    Ok(Value::String(text))
}

/// Prefix backslashes and the `%`/`_` wildcards with a backslash
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn abs(args: &[Value]) -> ExpressionResult<Value> {
    expect_args("ABS", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int32(n) => n.checked_abs().map(Value::Int32).ok_or(ExpressionError::Overflow {
            context: "ABS".to_string(),
        }),
        Value::Int64(n) => n.checked_abs().map(Value::Int64).ok_or(ExpressionError::Overflow {
            context: "ABS".to_string(),
        }),
        Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
        other => Err(ExpressionError::InvalidOperandTypes {
            operator: "ABS".to_string(),
            left_type: other.data_type(),
            right_type: None,
        }),
    }
}
