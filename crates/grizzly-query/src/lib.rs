//! Grizzly Query Engine
//!
//! Provides:
//! - A small SQL-like query language (pest grammar)
//! - A fixed-pipeline executor: join, filter, group, aggregate, order, limit
//! - Index-assisted WHERE evaluation for int64 columns
//! - `QueryResult`, which carries either rows or the error that stopped the query

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod executor;
pub mod parser;

mod engine;

pub use engine::{Catalog, QueryEngine};

use grizzly_common::error::QueryError;
use grizzly_storage::{rows, Schema, Table, Value};

/// Query result
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Result rows as a table
    table: Table,
    /// Set when the query failed; the table is then empty
    error: Option<QueryError>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a successful result
    pub fn new(table: Table) -> Self {
        Self {
            table,
            error: None,
            execution_time_ms: 0,
        }
    }

    /// Create a failed result
    pub fn failed(error: QueryError) -> Self {
        Self {
            table: Table::new(Schema::default()),
            error: Some(error),
            execution_time_ms: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    /// Result rows as a table
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> Result<Table, QueryError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.table),
        }
    }

    /// Get column names
    pub fn columns(&self) -> Vec<&str> {
        self.table.schema().field_names()
    }

    /// Get rows
    pub fn rows(&self) -> Vec<Vec<Value>> {
        rows::export_rows(&self.table)
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    /// Value at (`row`, `col`)
    pub fn value(&self, row: usize, col: usize) -> Option<Value> {
        self.table.columns().get(col)?.get(row)
    }

    /// Convert to JSON
    pub fn to_json(&self) -> serde_json::Value {
        match &self.error {
            Some(e) => serde_json::json!({ "error": e.to_string() }),
            None => serde_json::Value::Array(rows::export_json(&self.table)),
        }
    }

    /// Convert to table string
    pub fn to_table(&self) -> String {
        if let Some(e) = &self.error {
            return format!("error: {}", e);
        }
        if self.table.num_rows() == 0 {
            return "(empty result set)".to_string();
        }

        let columns = self.columns();
        let mut output = String::new();

        // Header
        output.push_str(&columns.join(" | "));
        output.push('\n');
        output.push_str(&"-".repeat(columns.len() * 15));
        output.push('\n');

        // Rows
        for row in self.table.rows() {
            let values: Vec<String> = row.iter().map(ToString::to_string).collect();
            output.push_str(&values.join(" | "));
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grizzly_storage::{DataType, Field};

    fn result() -> QueryResult {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ])
        .unwrap();
        let mut table = Table::new(schema);
        table.append_row(vec![Value::Int64(1), Value::from("ann")]).unwrap();
        table.append_row(vec![Value::Int64(2), Value::Null]).unwrap();
        QueryResult::new(table)
    }

    #[test]
    fn test_to_table_format() {
        let text = result().to_table();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id | name");
        assert_eq!(lines[1], "-".repeat(30));
        assert_eq!(lines[2], "1 | ann");
        assert_eq!(lines[3], "2 | NULL");

        let empty = QueryResult::new(Table::new(Schema::default()));
        assert_eq!(empty.to_table(), "(empty result set)");
    }

    #[test]
    fn test_to_json_and_errors() {
        assert_eq!(
            result().to_json(),
            serde_json::json!([{ "id": 1, "name": "ann" }, { "id": 2, "name": null }])
        );

        let failed = QueryResult::failed(QueryError::ColumnNotFound("x".to_string()));
        assert!(!failed.is_ok());
        assert_eq!(failed.to_json()["error"], "Column not found: x");
        assert!(failed.into_result().is_err());
    }
}
