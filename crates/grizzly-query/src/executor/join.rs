//! Nested-loop equality join

use grizzly_common::error::QueryError;
use grizzly_storage::Table;

use super::{Relation, Slot, Source};
use crate::parser::Join;

/// Pair every left tuple with every right row whose join columns are equal.
///
/// `ON` sides may be written in either order. Nulls never join.
pub(super) fn nested_loop<'a>(
    left: Relation<'a>,
    join: &Join,
    right: &'a Table,
) -> Result<Relation<'a>, QueryError> {
    let qualifier = join.table.qualifier();
    if left.sources.iter().any(|s| s.qualifier == qualifier) {
        return Err(QueryError::AmbiguousColumn(format!(
            "table {} appears twice; give it an alias",
            qualifier
        )));
    }
    let right_rel = Relation::scan(qualifier, right);

    let (left_slot, right_slot) = match resolve_pair(&left, &right_rel, join, false) {
        Ok(pair) => pair,
        Err(first) => resolve_pair(&left, &right_rel, join, true).map_err(|_| first)?,
    };

    let left_type = left.data_type(left_slot);
    let right_type = right_rel.data_type(right_slot);
    if left_type != right_type && !(left_type.is_numeric() && right_type.is_numeric()) {
        return Err(QueryError::type_mismatch(left_type.name(), right_type.name()));
    }

    let right_column = right_rel.column(right_slot);
    let mut rows = Vec::new();
    for tuple in &left.rows {
        let key = left.value(left_slot, tuple);
        if key.is_null() {
            continue;
        }
        for (r, candidate) in right_column.iter().enumerate() {
            if key.sql_eq(&candidate) {
                let mut joined = tuple.clone();
                joined.push(r);
                rows.push(joined);
            }
        }
    }

    let mut sources = left.sources;
    sources.push(Source {
        qualifier: qualifier.to_string(),
        table: right,
    });
    Ok(Relation { sources, rows })
}

/// Resolve `ON a = b` with `a` on the left and `b` on the right (or swapped)
fn resolve_pair(
    left: &Relation<'_>,
    right: &Relation<'_>,
    join: &Join,
    swapped: bool,
) -> Result<(Slot, Slot), QueryError> {
    let (l, r) = if swapped {
        (&join.right, &join.left)
    } else {
        (&join.left, &join.right)
    };
    Ok((left.resolve(l)?, right.resolve(r)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ColumnRef, TableRef};
    use grizzly_storage::{DataType, Field, Schema, Value};

    fn two_col(a: &str, b: &str, rows: &[(i64, i64)]) -> Table {
        let schema = Schema::new(vec![
            Field::new(a, DataType::Int64),
            Field::new(b, DataType::Int64),
        ])
        .unwrap();
        let mut table = Table::new(schema);
        for (x, y) in rows {
            table.append_row(vec![Value::Int64(*x), Value::Int64(*y)]).unwrap();
        }
        table
    }

    fn join(left: ColumnRef, right: ColumnRef) -> Join {
        Join {
            table: TableRef {
                name: "u".into(),
                alias: None,
            },
            left,
            right,
        }
    }

    #[test]
    fn test_unqualified_on_resolves_per_side() {
        let t = two_col("id", "v", &[(1, 10), (2, 20), (3, 30)]);
        let u = two_col("id", "o", &[(2, 200), (1, 100), (1, 101)]);
        let joined = nested_loop(
            Relation::scan("t", &t),
            &join(ColumnRef::new("id"), ColumnRef::new("id")),
            &u,
        )
        .unwrap();
        assert_eq!(joined.rows, vec![vec![0, 1], vec![0, 2], vec![1, 0]]);
        assert!(joined.resolve(&ColumnRef::new("id")).is_err());
        assert!(joined.resolve(&ColumnRef::qualified("u", "o")).is_ok());
    }

    #[test]
    fn test_swapped_on_clause() {
        let t = two_col("id", "v", &[(1, 10)]);
        let u = two_col("tid", "o", &[(1, 100)]);
        let joined = nested_loop(
            Relation::scan("t", &t),
            &join(ColumnRef::qualified("u", "tid"), ColumnRef::qualified("t", "id")),
            &u,
        )
        .unwrap();
        assert_eq!(joined.rows, vec![vec![0, 0]]);
    }

    #[test]
    fn test_unknown_join_column() {
        let t = two_col("id", "v", &[(1, 10)]);
        let u = two_col("id", "o", &[(1, 100)]);
        let err = nested_loop(
            Relation::scan("t", &t),
            &join(ColumnRef::new("nope"), ColumnRef::new("id")),
            &u,
        )
        .err()
        .unwrap();
        assert_eq!(err, QueryError::ColumnNotFound("nope".to_string()));
    }
}
