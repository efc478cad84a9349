//! Typed column storage with validity bitmaps

mod bitmap;

pub use bitmap::ValidityBitmap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{DataType, Value};

/// Column-level failures; the table layer attaches the field name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColumnError {
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: DataType,
        actual: &'static str,
    },

    #[error("slot {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },
}

/// Physical storage for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Date32(Vec<i32>),
    Timestamp(Vec<i64>),
    ListInt64(Vec<Vec<i64>>),
}

impl ColumnData {
    fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::Int64 => ColumnData::Int64(Vec::new()),
            DataType::Float64 => ColumnData::Float64(Vec::new()),
            DataType::Utf8 => ColumnData::Utf8(Vec::new()),
            DataType::Date32 => ColumnData::Date32(Vec::new()),
            DataType::Timestamp => ColumnData::Timestamp(Vec::new()),
            DataType::ListInt64 => ColumnData::ListInt64(Vec::new()),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Float64(_) => DataType::Float64,
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Date32(_) => DataType::Date32,
            ColumnData::Timestamp(_) => DataType::Timestamp,
            ColumnData::ListInt64(_) => DataType::ListInt64,
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) | ColumnData::Timestamp(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Date32(v) => v.len(),
            ColumnData::ListInt64(v) => v.len(),
        }
    }

    fn value(&self, i: usize) -> Value {
        match self {
            ColumnData::Int64(v) => Value::Int64(v[i]),
            ColumnData::Float64(v) => Value::Float64(v[i]),
            ColumnData::Utf8(v) => Value::Utf8(v[i].clone()),
            ColumnData::Date32(v) => Value::Date32(v[i]),
            ColumnData::Timestamp(v) => Value::Timestamp(v[i]),
            ColumnData::ListInt64(v) => Value::ListInt64(v[i].clone()),
        }
    }

    /// Push a value already coerced to this column's type (null pushes zero)
    fn push(&mut self, value: Value) {
        match (self, value) {
            (ColumnData::Int64(v), Value::Int64(x)) => v.push(x),
            (ColumnData::Float64(v), Value::Float64(x)) => v.push(x),
            (ColumnData::Utf8(v), Value::Utf8(x)) => v.push(x),
            (ColumnData::Date32(v), Value::Date32(x)) => v.push(x),
            (ColumnData::Timestamp(v), Value::Timestamp(x)) => v.push(x),
            (ColumnData::ListInt64(v), Value::ListInt64(x)) => v.push(x),
            (data, _) => {
                let zero = Value::zero(data.data_type());
                data.push(zero);
            }
        }
    }

    fn set(&mut self, i: usize, value: Value) {
        match (self, value) {
            (ColumnData::Int64(v), Value::Int64(x)) => v[i] = x,
            (ColumnData::Float64(v), Value::Float64(x)) => v[i] = x,
            (ColumnData::Utf8(v), Value::Utf8(x)) => v[i] = x,
            (ColumnData::Date32(v), Value::Date32(x)) => v[i] = x,
            (ColumnData::Timestamp(v), Value::Timestamp(x)) => v[i] = x,
            (ColumnData::ListInt64(v), Value::ListInt64(x)) => v[i] = x,
            (data, _) => {
                let zero = Value::zero(data.data_type());
                data.set(i, zero);
            }
        }
    }

    fn remove(&mut self, i: usize) {
        match self {
            ColumnData::Int64(v) | ColumnData::Timestamp(v) => {
                v.remove(i);
            }
            ColumnData::Float64(v) => {
                v.remove(i);
            }
            ColumnData::Utf8(v) => {
                v.remove(i);
            }
            ColumnData::Date32(v) => {
                v.remove(i);
            }
            ColumnData::ListInt64(v) => {
                v.remove(i);
            }
        }
    }
}

/// A typed, nullable, fixed-length array.
///
/// Null slots hold the type's zero value; `validity == None` means every slot is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    data: ColumnData,
    validity: Option<ValidityBitmap>,
    null_count: usize,
}

impl Column {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data: ColumnData::new(data_type),
            validity: None,
            null_count: 0,
        }
    }

    /// A column of `len` nulls
    pub fn nulls(data_type: DataType, len: usize) -> Self {
        let mut column = Column::new(data_type);
        for _ in 0..len {
            column.data.push(Value::Null);
        }
        column.validity = Some((0..len).map(|_| false).collect());
        column.null_count = len;
        column
    }

    /// Build a column from values, coercing each to `data_type`
    pub fn from_values(
        data_type: DataType,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Self, ColumnError> {
        let mut column = Column::new(data_type);
        for value in values {
            column.push(value)?;
        }
        Ok(column)
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn validity(&self) -> Option<&ValidityBitmap> {
        self.validity.as_ref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn is_valid(&self, i: usize) -> bool {
        i < self.len() && self.validity.as_ref().map_or(true, |b| b.get(i))
    }

    /// Coerce a value to this column's type, or report the mismatch
    pub fn accept(&self, value: Value) -> Result<Value, ColumnError> {
        let actual = value.type_name();
        let expected = self.data_type();
        value
            .coerce_to(expected)
            .ok_or(ColumnError::TypeMismatch { expected, actual })
    }

    /// Append a value; `Value::Null` appends an invalid slot
    pub fn push(&mut self, value: Value) -> Result<(), ColumnError> {
        let value = self.accept(value)?;
        let valid = !value.is_null();
        self.data.push(value);
        self.mark(self.len() - 1, valid, true);
        Ok(())
    }

    /// Logical value at `i`: `None` out of bounds, `Some(Null)` for invalid slots
    pub fn get(&self, i: usize) -> Option<Value> {
        if i >= self.len() {
            return None;
        }
        if self.is_valid(i) {
            Some(self.data.value(i))
        } else {
            Some(Value::Null)
        }
    }

    /// Stored value at `i` ignoring validity (zero for null slots)
    pub fn raw(&self, i: usize) -> Option<Value> {
        (i < self.len()).then(|| self.data.value(i))
    }

    /// Overwrite slot `i`, returning the previous logical value
    pub fn set(&mut self, i: usize, value: Value) -> Result<Value, ColumnError> {
        let len = self.len();
        if i >= len {
            return Err(ColumnError::OutOfBounds { index: i, len });
        }
        let value = self.accept(value)?;
        let previous = self.get(i).unwrap_or(Value::Null);
        let valid = !value.is_null();
        self.data.set(i, value);
        self.mark(i, valid, false);
        Ok(previous)
    }

    /// Remove slot `i`, returning its logical value
    pub fn remove(&mut self, i: usize) -> Result<Value, ColumnError> {
        let len = self.len();
        if i >= len {
            return Err(ColumnError::OutOfBounds { index: i, len });
        }
        let previous = self.get(i).unwrap_or(Value::Null);
        if previous.is_null() {
            self.null_count -= 1;
        }
        self.data.remove(i);
        if let Some(bitmap) = &mut self.validity {
            bitmap.remove(i);
        }
        Ok(previous)
    }

    /// Logical values in slot order
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).map(move |i| self.get(i).unwrap_or(Value::Null))
    }

    /// New column holding the slots at `rows`, in that order
    pub fn take(&self, rows: &[usize]) -> Result<Column, ColumnError> {
        let mut column = Column::new(self.data_type());
        for &row in rows {
            let value = self.get(row).ok_or(ColumnError::OutOfBounds {
                index: row,
                len: self.len(),
            })?;
            column.push(value)?;
        }
        Ok(column)
    }

    /// Append every slot of `other`, which must have the same type
    pub fn extend(&mut self, other: &Column) -> Result<(), ColumnError> {
        for value in other.iter() {
            self.push(value)?;
        }
        Ok(())
    }

    /// Record validity for slot `i`; `appended` means the slot is new
    fn mark(&mut self, i: usize, valid: bool, appended: bool) {
        let was_valid = !appended && self.is_valid_before_mark(i);
        let len = self.data.len();
        if let Some(bitmap) = self.validity.as_mut() {
            if appended {
                bitmap.push(valid);
            } else {
                bitmap.set(i, valid);
            }
        } else if !valid {
            let mut bitmap = ValidityBitmap::all_valid(len);
            bitmap.set(i, false);
            self.validity = Some(bitmap);
        }
        match (appended, was_valid, valid) {
            (true, _, false) | (false, true, false) => self.null_count += 1,
            (false, false, true) => self.null_count -= 1,
            _ => {}
        }
    }

    fn is_valid_before_mark(&self, i: usize) -> bool {
        self.validity.as_ref().map_or(true, |b| b.get(i))
    }
}
