// src/lang/value.rs

//! Script types and runtime values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::run::RuntimeError;

/// Declared type of a variable, parameter or function result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Void,
    Bool,
    Int,
    Real,
    String,
    List(Box<Type>),
}

impl Type {
    pub fn list_of(elem: Type) -> Self {
        Type::List(Box::new(elem))
    }

    /// Value a variable of this type holds before its first assignment.
    pub fn default_value(&self) -> Value {
        match self {
            Type::Void => Value::Void,
            Type::Bool => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Real => Value::Real(0.0),
            Type::String => Value::Str(String::new()),
            Type::List(_) => Value::List(Vec::new()),
        }
    }

    /// Convert `value` so it can be stored in a variable of this type.
    ///
    /// Ints widen to reals, and any scalar can be stored in a string.
    /// Lists are converted element by element.
    pub fn coerce(&self, value: Value) -> Result<Value, RuntimeError> {
        match (self, value) {
            (Type::Void, _) => Ok(Value::Void),
            (Type::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Type::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (Type::Real, Value::Real(r)) => Ok(Value::Real(r)),
            (Type::Real, Value::Int(i)) => Ok(Value::Real(i as f64)),
            (Type::String, Value::List(_)) => Err(RuntimeError::type_mismatch(self, "list")),
            (Type::String, v) => Ok(Value::Str(v.to_string())),
            (Type::List(elem), Value::List(items)) => items
                .into_iter()
                .map(|v| elem.coerce(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (ty, v) => Err(RuntimeError::type_mismatch(ty, v.type_name())),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("int"),
            Type::Real => f.write_str("real"),
            Type::String => f.write_str("string"),
            Type::List(elem) => write!(f, "{elem}[]"),
        }
    }
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(RuntimeError::type_mismatch("bool", other.type_name())),
        }
    }

    pub fn as_int(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(RuntimeError::type_mismatch("int", other.type_name())),
        }
    }

    pub fn as_real(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Real(r) => Ok(*r),
            Value::Int(i) => Ok(*i as f64),
            other => Err(RuntimeError::type_mismatch("real", other.type_name())),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], RuntimeError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(RuntimeError::type_mismatch("list", other.type_name())),
        }
    }

    /// Equality used by `==` and by `switch`: ints and reals compare by
    /// numeric value, everything else structurally.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Real(b)) | (Value::Real(b), Value::Int(a)) => *a as f64 == *b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ints_widen_to_reals() {
        assert_eq!(Type::Real.coerce(Value::Int(3)), Ok(Value::Real(3.0)));
        assert!(Type::Int.coerce(Value::Real(3.0)).is_err());
    }

    #[test]
    fn scalars_coerce_to_string() {
        assert_eq!(Type::String.coerce(Value::Int(7)), Ok(Value::from("7")));
        assert!(Type::String.coerce(Value::List(vec![])).is_err());
    }

    #[test]
    fn lists_display_with_brackets() {
        let v = Value::List(vec![Value::Int(1), Value::from("a"), Value::Bool(true)]);
        assert_eq!(v.to_string(), "[1, a, true]");
        assert_eq!(Type::list_of(Type::String).to_string(), "string[]");
    }

    #[test]
    fn numeric_values_compare_across_types() {
        assert!(Value::Int(2).loose_eq(&Value::Real(2.0)));
        assert!(!Value::Int(2).loose_eq(&Value::from("2")));
    }

    #[test]
    fn values_serialize_with_type_tag() {
        let json = serde_json::to_string(&Value::Int(5)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Int(5));
    }
}
