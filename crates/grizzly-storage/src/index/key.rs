//! Comparable index keys extracted from values

use std::cmp::Ordering;

use crate::value::Value;

/// A totally ordered, hashable key derived from a non-null value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// int64, date32 and timestamp values
    Int(i64),
    /// Float stored as bits so the key can be hashed
    Float(u64),
    Str(String),
    List(Vec<i64>),
}

impl IndexKey {
    /// Key for a value; nulls are never indexed
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Int64(v) | Value::Timestamp(v) => Some(IndexKey::Int(*v)),
            Value::Date32(v) => Some(IndexKey::Int(i64::from(*v))),
            Value::Float64(f) => {
                // -0.0 and 0.0 must land on the same key
                let f = if *f == 0.0 { 0.0 } else { *f };
                Some(IndexKey::Float(f.to_bits()))
            }
            Value::Utf8(s) => Some(IndexKey::Str(s.clone())),
            Value::ListInt64(items) => Some(IndexKey::List(items.clone())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IndexKey::Int(_) => 0,
            IndexKey::Float(_) => 1,
            IndexKey::Str(_) => 2,
            IndexKey::List(_) => 3,
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Int(a), IndexKey::Int(b)) => a.cmp(b),
            (IndexKey::Float(a), IndexKey::Float(b)) => {
                f64::from_bits(*a).total_cmp(&f64::from_bits(*b))
            }
            (IndexKey::Str(a), IndexKey::Str(b)) => a.cmp(b),
            (IndexKey::List(a), IndexKey::List(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        IndexKey::Int(v)
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        IndexKey::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_keys_order_and_signed_zero() {
        let neg = IndexKey::from_value(&Value::Float64(-1.5)).unwrap();
        let zero = IndexKey::from_value(&Value::Float64(0.0)).unwrap();
        let neg_zero = IndexKey::from_value(&Value::Float64(-0.0)).unwrap();
        assert!(neg < zero);
        assert_eq!(zero, neg_zero);
    }

    #[test]
    fn test_null_not_indexed() {
        assert!(IndexKey::from_value(&Value::Null).is_none());
    }
}
