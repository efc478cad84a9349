//! ORDER BY: stable multi-key sort
//!
//! Nulls sort before every value in ascending order and after every value in
//! descending order. NaN sorts after every number. Ties keep their input order.

use std::cmp::Ordering;

use grizzly_common::error::QueryError;
use grizzly_common::types::RowId;
use grizzly_storage::{Table, Value};

use super::{execution_error, Relation, Slot};
use crate::parser::{ColumnRef, Expr, OrderBy, Projection, Query};

/// Ascending total order: nulls first, NaN after every number, and values of
/// unrelated types grouped by type
pub fn compare_nulls_first(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (is_nan(a), is_nan(b)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a
                .compare(b)
                .unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
        },
    }
}

fn is_nan(value: &Value) -> bool {
    matches!(value, Value::Float64(v) if v.is_nan())
}

/// Numbers compare with each other; everything else sorts by type
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int64(_) | Value::Float64(_) | Value::Date32(_) | Value::Timestamp(_) => 1,
        Value::Utf8(_) => 2,
        Value::ListInt64(_) => 3,
    }
}

/// Lexicographic comparison of two sort keys, one direction flag per part
pub fn compare_keys(a: &[Value], b: &[Value], descending: &[bool]) -> Ordering {
    a.iter()
        .zip(b)
        .zip(descending)
        .map(|((x, y), desc)| {
            let ord = compare_nulls_first(x, y);
            if *desc {
                ord.reverse()
            } else {
                ord
            }
        })
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Positions of `keys` in sorted order; equal keys keep their relative order
pub fn sorted_permutation(keys: &[Vec<Value>], descending: &[bool]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b], descending));
    order
}

/// Sort the tuples of a non-aggregate query in place
pub(super) fn order_rows(relation: &mut Relation<'_>, query: &Query) -> Result<(), QueryError> {
    if query.order_by.is_empty() {
        return Ok(());
    }

    let mut slots: Vec<Slot> = Vec::with_capacity(query.order_by.len());
    for order in &query.order_by {
        let Expr::Column(column) = &order.expr else {
            return Err(QueryError::InvalidGrouping(format!(
                "cannot order by {} outside an aggregate query",
                order.expr
            )));
        };
        let column = aliased_column(column, &query.projection).unwrap_or(column);
        slots.push(relation.resolve(column)?);
    }
    let descending = directions(&query.order_by);

    let keys: Vec<Vec<Value>> = relation
        .rows
        .iter()
        .map(|tuple| slots.iter().map(|s| relation.value(*s, tuple)).collect())
        .collect();
    let order = sorted_permutation(&keys, &descending);

    let mut rows: Vec<Option<Vec<RowId>>> =
        std::mem::take(&mut relation.rows).into_iter().map(Some).collect();
    relation.rows = order.into_iter().filter_map(|i| rows[i].take()).collect();
    Ok(())
}

/// Sort the output of an aggregate query by its output columns
pub(super) fn order_output(table: Table, query: &Query) -> Result<Table, QueryError> {
    if query.order_by.is_empty() {
        return Ok(table);
    }

    let positions = query
        .order_by
        .iter()
        .map(|order| output_position(&table, order, &query.projection))
        .collect::<Result<Vec<_>, _>>()?;
    let descending = directions(&query.order_by);

    let keys: Vec<Vec<Value>> = (0..table.num_rows())
        .map(|row| {
            positions
                .iter()
                .map(|&c| table.columns()[c].get(row).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    let order = sorted_permutation(&keys, &descending);
    table.take(&order).map_err(execution_error)
}

fn directions(order_by: &[OrderBy]) -> Vec<bool> {
    order_by.iter().map(|o| o.descending).collect()
}

/// The column behind a select alias, if `column` names one
fn aliased_column<'q>(column: &ColumnRef, projection: &'q Projection) -> Option<&'q ColumnRef> {
    if column.qualifier.is_some() {
        return None;
    }
    let Projection::Items(items) = projection else {
        return None;
    };
    items.iter().find_map(|item| match (&item.alias, &item.expr) {
        (Some(alias), Expr::Column(target)) if *alias == column.name => Some(target),
        _ => None,
    })
}

/// Output column an ORDER BY item refers to: same expression, alias or name
fn output_position(
    table: &Table,
    order: &OrderBy,
    projection: &Projection,
) -> Result<usize, QueryError> {
    if let Projection::Items(items) = projection {
        if let Some(i) = items.iter().position(|item| item.expr == order.expr) {
            return Ok(i);
        }
    }
    let name = order.expr.to_string();
    table
        .schema()
        .index_of(&name)
        .map_err(|_| QueryError::ColumnNotFound(name))
}
