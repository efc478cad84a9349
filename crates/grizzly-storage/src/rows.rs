//! Row-oriented boundary for format adapters

use grizzly_common::error::Result;

use crate::schema::Schema;
use crate::table::Table;
use crate::value::Value;

/// Build a table from rows in schema field order
pub fn load_rows<I>(schema: Schema, rows: I) -> Result<Table>
where
    I: IntoIterator<Item = Vec<Value>>,
{
    let mut table = Table::new(schema);
    for row in rows {
        table.append_row(row)?;
    }
    Ok(table)
}

/// Drain a table into rows in schema field order
pub fn export_rows(table: &Table) -> Vec<Vec<Value>> {
    table.rows().collect()
}

/// Rows as JSON objects keyed by field name
pub fn export_json(table: &Table) -> Vec<serde_json::Value> {
    let names = table.schema().field_names();
    table
        .rows()
        .map(|row| {
            let object = names
                .iter()
                .zip(row)
                .map(|(name, value)| ((*name).to_string(), value.to_json()))
                .collect();
            serde_json::Value::Object(object)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::value::DataType;

    #[test]
    fn test_load_then_export() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("score", DataType::Float64),
        ])
        .unwrap();
        let rows = vec![
            vec![Value::Int64(1), Value::Int64(3)],
            vec![Value::Int64(2), Value::Null],
        ];
        let table = load_rows(schema, rows).unwrap();

        assert_eq!(
            export_rows(&table),
            vec![
                vec![Value::Int64(1), Value::Float64(3.0)],
                vec![Value::Int64(2), Value::Null],
            ]
        );
        assert_eq!(
            export_json(&table)[1],
            serde_json::json!({"id": 2, "score": null})
        );
    }

    #[test]
    fn test_bad_row_fails_load() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64)]).unwrap();
        assert!(load_rows(schema, vec![vec![Value::from("x")]]).is_err());
    }
}
