//! Tables: a schema plus one column per field, with optional per-field indexes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use grizzly_common::error::{Result, SchemaError};
use grizzly_common::metrics;
use grizzly_common::types::RowId;

use crate::columnar::{Column, ColumnError};
use crate::index::{FieldIndex, IndexKey, IndexKind, DEFAULT_DEGREE};
use crate::schema::{Field, Schema};
use crate::value::Value;

fn default_degree() -> usize {
    DEFAULT_DEGREE
}

/// A columnar table.
///
/// `columns[i]` always holds field `schema.fields()[i]` and every column has
/// exactly `num_rows()` slots. Indexes are not serialized; they are rebuilt by
/// whoever restores the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    schema: Schema,
    columns: Vec<Column>,
    #[serde(skip)]
    indexes: HashMap<String, FieldIndex>,
    #[serde(default = "default_degree")]
    btree_degree: usize,
}

impl Table {
    /// Create an empty table
    pub fn new(schema: Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Column::new(f.data_type))
            .collect();
        Self {
            schema,
            columns,
            indexes: HashMap::new(),
            btree_degree: DEFAULT_DEGREE,
        }
    }

    /// Assemble a table from ready-made columns
    pub fn from_columns(schema: Schema, columns: Vec<Column>) -> Result<Self> {
        if columns.len() != schema.len() {
            return Err(SchemaError::ArityMismatch {
                expected: schema.len(),
                actual: columns.len(),
            }
            .into());
        }
        for (field, column) in schema.fields().iter().zip(&columns) {
            if column.data_type() != field.data_type {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.data_type.to_string(),
                    actual: column.data_type().to_string(),
                }
                .into());
            }
        }
        let rows = columns.first().map_or(0, Column::len);
        if let Some(column) = columns.iter().find(|c| c.len() != rows) {
            return Err(SchemaError::RowOutOfBounds {
                row: column.len(),
                len: rows,
            }
            .into());
        }
        Ok(Self {
            schema,
            columns,
            indexes: HashMap::new(),
            btree_degree: DEFAULT_DEGREE,
        })
    }

    /// Minimum degree used for B-tree indexes built on this table
    #[must_use]
    pub fn with_btree_degree(mut self, degree: usize) -> Self {
        self.btree_degree = degree.max(2);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column for a field
    pub fn column(&self, field: &str) -> Result<&Column> {
        let i = self.schema.index_of(field)?;
        Ok(&self.columns[i])
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Add a field; existing rows read null for it
    pub fn add_field(&mut self, field: Field) -> Result<()> {
        let column = Column::nulls(field.data_type, self.num_rows());
        self.schema.add_field(field)?;
        self.columns.push(column);
        Ok(())
    }

    /// Append one row, returning its position.
    ///
    /// Every value is checked before any column changes, so a rejected row
    /// leaves the table untouched.
    pub fn append_row(&mut self, values: Vec<Value>) -> Result<RowId> {
        if values.len() != self.schema.len() {
            return Err(SchemaError::ArityMismatch {
                expected: self.schema.len(),
                actual: values.len(),
            }
            .into());
        }

        let mut accepted = Vec::with_capacity(values.len());
        for ((field, column), value) in self.schema.fields().iter().zip(&self.columns).zip(values) {
            accepted.push(
                column
                    .accept(value)
                    .map_err(|e| column_error(&field.name, e))?,
            );
        }

        let row = self.num_rows();
        for ((field, column), value) in self
            .schema
            .fields()
            .iter()
            .zip(self.columns.iter_mut())
            .zip(accepted)
        {
            if let Some(index) = self.indexes.get_mut(&field.name) {
                if let Some(key) = IndexKey::from_value(&value) {
                    index.insert(key, row);
                }
            }
            column
                .push(value)
                .map_err(|e| column_error(&field.name, e))?;
        }
        Ok(row)
    }

    /// Validate a row as `append_row` would, without appending it
    pub fn check_row(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.schema.len() {
            return Err(SchemaError::ArityMismatch {
                expected: self.schema.len(),
                actual: values.len(),
            }
            .into());
        }
        for ((field, column), value) in self.schema.fields().iter().zip(&self.columns).zip(values) {
            column
                .accept(value.clone())
                .map_err(|e| column_error(&field.name, e))?;
        }
        Ok(())
    }

    /// Validate a cell write as `set` would, without performing it
    pub fn check_set(&self, field: &str, row: RowId, value: &Value) -> Result<()> {
        let column = self.column(field)?;
        if row >= column.len() {
            return Err(SchemaError::RowOutOfBounds {
                row,
                len: column.len(),
            }
            .into());
        }
        column
            .accept(value.clone())
            .map_err(|e| column_error(field, e))?;
        Ok(())
    }

    /// Logical value of `field` at `row`
    pub fn get(&self, field: &str, row: RowId) -> Result<Value> {
        let column = self.column(field)?;
        column.get(row).ok_or_else(|| {
            SchemaError::RowOutOfBounds {
                row,
                len: column.len(),
            }
            .into()
        })
    }

    /// Overwrite one cell, keeping any index on the field current
    pub fn set(&mut self, field: &str, row: RowId, value: Value) -> Result<()> {
        let i = self.schema.index_of(field)?;
        let previous = self.columns[i]
            .set(row, value)
            .map_err(|e| column_error(field, e))?;

        if let Some(index) = self.indexes.get_mut(field) {
            if let Some(old) = IndexKey::from_value(&previous) {
                index.remove(&old, row);
            }
            let current = self.columns[i].get(row).unwrap_or(Value::Null);
            if let Some(new) = IndexKey::from_value(&current) {
                index.insert(new, row);
            }
        }
        Ok(())
    }

    /// Remove one row from every column.
    ///
    /// Later rows shift down by one, so every index is marked stale until
    /// `refresh_indexes` runs.
    pub fn delete_row(&mut self, row: RowId) -> Result<Vec<Value>> {
        let len = self.num_rows();
        if row >= len {
            return Err(SchemaError::RowOutOfBounds { row, len }.into());
        }
        let mut removed = Vec::with_capacity(self.columns.len());
        for (field, column) in self.schema.fields().iter().zip(self.columns.iter_mut()) {
            removed.push(
                column
                    .remove(row)
                    .map_err(|e| column_error(&field.name, e))?,
            );
        }
        for index in self.indexes.values_mut() {
            index.mark_stale();
        }
        Ok(removed)
    }

    /// Deep copy. Indexes are copied as they are, stale ones included.
    pub fn snapshot(&self) -> Table {
        self.clone()
    }

    /// Full (re)build of the index on `field`
    pub fn build_index(&mut self, field: &str, kind: IndexKind) -> Result<()> {
        let column = self.column(field)?;
        let index = FieldIndex::build(kind, column, self.btree_degree);
        debug!(field, %kind, entries = index.len(), "Built index");
        metrics::record_index_build(self.num_rows() as u64);
        self.indexes.insert(field.to_string(), index);
        Ok(())
    }

    /// Rebuild every stale index; returns how many were rebuilt
    pub fn refresh_indexes(&mut self) -> Result<usize> {
        let stale: Vec<(String, IndexKind)> = self
            .indexes
            .iter()
            .filter(|(_, index)| index.is_stale())
            .map(|(field, index)| (field.clone(), index.kind()))
            .collect();
        for (field, kind) in &stale {
            self.build_index(field, *kind)?;
        }
        Ok(stale.len())
    }

    /// Index on `field`, stale or not
    pub fn index(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.get(field)
    }

    /// Index on `field` only if it matches the column
    pub fn fresh_index(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.get(field).filter(|index| !index.is_stale())
    }

    pub fn drop_index(&mut self, field: &str) -> Option<FieldIndex> {
        self.indexes.remove(field)
    }

    /// Fields that carry an index, with its kind
    pub fn indexed_fields(&self) -> Vec<(String, IndexKind)> {
        let mut fields: Vec<_> = self
            .indexes
            .iter()
            .map(|(field, index)| (field.clone(), index.kind()))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields
    }

    /// One row in field order
    pub fn row(&self, row: RowId) -> Option<Vec<Value>> {
        (row < self.num_rows()).then(|| {
            self.columns
                .iter()
                .map(|c| c.get(row).unwrap_or(Value::Null))
                .collect()
        })
    }

    /// All rows in order
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows()).filter_map(move |i| self.row(i))
    }

    /// New table holding `rows` in the given order; indexes are not carried
    pub fn take(&self, rows: &[RowId]) -> Result<Table> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for (field, column) in self.schema.fields().iter().zip(&self.columns) {
            columns.push(column.take(rows).map_err(|e| column_error(&field.name, e))?);
        }
        Ok(Table::from_columns(self.schema.clone(), columns)?.with_btree_degree(self.btree_degree))
    }

    /// New table holding only `fields`, in that order
    pub fn select(&self, fields: &[&str]) -> Result<Table> {
        let mut schema_fields = Vec::with_capacity(fields.len());
        let mut columns = Vec::with_capacity(fields.len());
        for name in fields {
            let i = self.schema.index_of(name)?;
            schema_fields.push(self.schema.fields()[i].clone());
            columns.push(self.columns[i].clone());
        }
        Table::from_columns(Schema::new(schema_fields)?, columns)
    }
}

impl PartialEq for Table {
    /// Tables are equal when their schemas and logical cell values match.
    /// Like [`Schema`], field order does not matter; columns pair up by name.
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema
            && self.num_rows() == other.num_rows()
            && self
                .schema
                .fields()
                .iter()
                .zip(&self.columns)
                .all(|(field, column)| match other.schema.index_of(&field.name) {
                    Ok(i) => column.iter().eq(other.columns[i].iter()),
                    Err(_) => false,
                })
    }
}

/// Attach the field name to a column failure
fn column_error(field: &str, err: ColumnError) -> SchemaError {
    match err {
        ColumnError::TypeMismatch { expected, actual } => SchemaError::TypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        },
        ColumnError::OutOfBounds { index, len } => SchemaError::RowOutOfBounds { row: index, len },
    }
}
