//! Scalar values and column type tags

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use grizzly_common::error::SchemaError;

/// Column type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int64,
    Float64,
    Utf8,
    /// Days since Unix epoch
    Date32,
    /// Milliseconds since Unix epoch
    Timestamp,
    ListInt64,
}

impl DataType {
    /// Canonical tag name
    pub fn name(self) -> &'static str {
        match self {
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "string",
            DataType::Date32 => "date32",
            DataType::Timestamp => "timestamp",
            DataType::ListInt64 => "list<int64>",
        }
    }

    /// Types that compare and aggregate as numbers
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int64 | DataType::Float64 | DataType::Date32 | DataType::Timestamp
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int64" | "int" | "bigint" => Ok(DataType::Int64),
            "float64" | "float" | "double" => Ok(DataType::Float64),
            "string" | "utf8" | "text" => Ok(DataType::Utf8),
            "date32" | "date" => Ok(DataType::Date32),
            "timestamp" => Ok(DataType::Timestamp),
            "list<int64>" => Ok(DataType::ListInt64),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }
}

/// A single, possibly null, cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date32(i32),
    Timestamp(i64),
    ListInt64(Vec<i64>),
}

impl Value {
    /// Type of the value, `None` for null
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Utf8(_) => Some(DataType::Utf8),
            Value::Date32(_) => Some(DataType::Date32),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::ListInt64(_) => Some(DataType::ListInt64),
        }
    }

    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        self.data_type().map_or("null", DataType::name)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The zero value stored behind a null slot
    pub fn zero(data_type: DataType) -> Value {
        match data_type {
            DataType::Int64 => Value::Int64(0),
            DataType::Float64 => Value::Float64(0.0),
            DataType::Utf8 => Value::Utf8(String::new()),
            DataType::Date32 => Value::Date32(0),
            DataType::Timestamp => Value::Timestamp(0),
            DataType::ListInt64 => Value::ListInt64(Vec::new()),
        }
    }

    /// Numeric view of the value
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) | Value::Timestamp(v) => Some(*v as f64),
            Value::Date32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of the value (no float truncation)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) | Value::Timestamp(v) => Some(*v),
            Value::Date32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to `target`, widening integers where that loses nothing
    pub fn coerce_to(self, target: DataType) -> Option<Value> {
        match (self, target) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Int64(v), DataType::Float64) => {
                #[allow(clippy::cast_precision_loss)]
                let widened = v as f64;
                Some(Value::Float64(widened))
            }
            (Value::Int64(v), DataType::Timestamp) => Some(Value::Timestamp(v)),
            (Value::Int64(v), DataType::Date32) => i32::try_from(v).ok().map(Value::Date32),
            (value, target) if value.data_type() == Some(target) => Some(value),
            _ => None,
        }
    }

    /// Compare two non-null values; numbers compare across numeric types
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            (Value::ListInt64(a), Value::ListInt64(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            },
        }
    }

    /// Equality used by joins and grouping: exact for strings, numeric otherwise
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// JSON rendering for results
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int64(v) | Value::Timestamp(v) => serde_json::Value::from(*v),
            Value::Date32(v) => serde_json::Value::from(*v),
            Value::Float64(v) => serde_json::Value::from(*v),
            Value::Utf8(s) => serde_json::Value::from(s.as_str()),
            Value::ListInt64(items) => serde_json::Value::from(items.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int64(v) | Value::Timestamp(v) => write!(f, "{}", v),
            Value::Date32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Utf8(s) => f.write_str(s),
            Value::ListInt64(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::ListInt64(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
