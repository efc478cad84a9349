//! Conversion between tables and Arrow record batches

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Date32Array, Float64Array, Int64Array, Int64Builder, ListArray, ListBuilder,
    StringArray, TimestampMillisecondArray,
};
use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;

use grizzly_common::error::{Error, Result, SchemaError, StorageError};

use crate::columnar::Column;
use crate::schema::{Field, Schema};
use crate::table::Table;
use crate::value::{DataType, Value};

fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::Int64 => ArrowType::Int64,
        DataType::Float64 => ArrowType::Float64,
        DataType::Utf8 => ArrowType::Utf8,
        DataType::Date32 => ArrowType::Date32,
        DataType::Timestamp => ArrowType::Timestamp(TimeUnit::Millisecond, None),
        DataType::ListInt64 => {
            ArrowType::List(Arc::new(ArrowField::new("item", ArrowType::Int64, true)))
        }
    }
}

fn from_arrow_type(arrow: &ArrowType) -> Result<DataType> {
    match arrow {
        ArrowType::Int64 => Ok(DataType::Int64),
        ArrowType::Float64 => Ok(DataType::Float64),
        ArrowType::Utf8 => Ok(DataType::Utf8),
        ArrowType::Date32 => Ok(DataType::Date32),
        ArrowType::Timestamp(TimeUnit::Millisecond, _) => Ok(DataType::Timestamp),
        ArrowType::List(item) if item.data_type() == &ArrowType::Int64 => Ok(DataType::ListInt64),
        other => Err(SchemaError::UnknownType(other.to_string()).into()),
    }
}

fn arrow_error(e: arrow::error::ArrowError) -> Error {
    StorageError::Codec(format!("arrow: {}", e)).into()
}

fn to_array(column: &Column) -> ArrayRef {
    match column.data_type() {
        DataType::Int64 => Arc::new(Int64Array::from(
            column.iter().map(|v| v.as_i64()).collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            column.iter().map(|v| v.as_f64()).collect::<Vec<_>>(),
        )),
        DataType::Utf8 => Arc::new(StringArray::from(
            column
                .iter()
                .map(|v| match v {
                    Value::Utf8(s) => Some(s),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Date32 => Arc::new(Date32Array::from(
            column
                .iter()
                .map(|v| match v {
                    Value::Date32(d) => Some(d),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Timestamp => Arc::new(TimestampMillisecondArray::from(
            column.iter().map(|v| v.as_i64()).collect::<Vec<_>>(),
        )),
        DataType::ListInt64 => {
            let mut builder = ListBuilder::new(Int64Builder::new());
            for value in column.iter() {
                match value {
                    Value::ListInt64(items) => {
                        builder.values().append_slice(&items);
                        builder.append(true);
                    }
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| StorageError::Codec(format!("unexpected array type for {}", name)).into())
}

fn from_array(array: &ArrayRef, data_type: DataType, name: &str) -> Result<Column> {
    let len = array.len();
    let values: Vec<Value> = match data_type {
        DataType::Int64 => {
            let a = downcast::<Int64Array>(array, name)?;
            (0..len)
                .map(|i| Value::from((!a.is_null(i)).then(|| a.value(i))))
                .collect()
        }
        DataType::Float64 => {
            let a = downcast::<Float64Array>(array, name)?;
            (0..len)
                .map(|i| Value::from((!a.is_null(i)).then(|| a.value(i))))
                .collect()
        }
        DataType::Utf8 => {
            let a = downcast::<StringArray>(array, name)?;
            (0..len)
                .map(|i| Value::from((!a.is_null(i)).then(|| a.value(i))))
                .collect()
        }
        DataType::Date32 => {
            let a = downcast::<Date32Array>(array, name)?;
            (0..len)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Date32(a.value(i))
                    }
                })
                .collect()
        }
        DataType::Timestamp => {
            let a = downcast::<TimestampMillisecondArray>(array, name)?;
            (0..len)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Timestamp(a.value(i))
                    }
                })
                .collect()
        }
        DataType::ListInt64 => {
            let a = downcast::<ListArray>(array, name)?;
            let mut values = Vec::with_capacity(len);
            for i in 0..len {
                if a.is_null(i) {
                    values.push(Value::Null);
                    continue;
                }
                let inner = a.value(i);
                let items = downcast::<Int64Array>(&inner, name)?;
                values.push(Value::ListInt64(items.iter().flatten().collect()));
            }
            values
        }
    };
    Column::from_values(data_type, values).map_err(|e| {
        SchemaError::TypeMismatch {
            field: name.to_string(),
            expected: data_type.to_string(),
            actual: e.to_string(),
        }
        .into()
    })
}

/// Export a table as one record batch
pub fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let fields: Vec<ArrowField> = table
        .schema()
        .fields()
        .iter()
        .map(|f| ArrowField::new(&f.name, arrow_type(f.data_type), true))
        .collect();
    let arrays: Vec<ArrayRef> = table.columns().iter().map(to_array).collect();
    RecordBatch::try_new(Arc::new(ArrowSchema::new(fields)), arrays).map_err(arrow_error)
}

/// Import a record batch; unsupported Arrow types are a schema error
pub fn from_record_batch(batch: &RecordBatch) -> Result<Table> {
    let arrow_schema = batch.schema();
    let mut fields = Vec::with_capacity(arrow_schema.fields().len());
    let mut columns = Vec::with_capacity(arrow_schema.fields().len());
    for (field, array) in arrow_schema.fields().iter().zip(batch.columns()) {
        let data_type = from_arrow_type(field.data_type())?;
        columns.push(from_array(array, data_type, field.name())?);
        fields.push(Field::new(field.name().clone(), data_type));
    }
    Table::from_columns(Schema::new(fields)?, columns)
}
