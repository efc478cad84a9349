//! GROUP BY partitioning and aggregate functions

use std::cmp::Ordering;
use std::collections::HashMap;

use grizzly_common::error::QueryError;
use grizzly_storage::{Column, DataType, Field, IndexKey, Table, Value};

use super::{build_table, Relation, Slot};
use crate::parser::{AggArg, AggFunc, Expr, Projection, Query};

/// One output column of an aggregate query
enum Output {
    Group { slot: Slot },
    Aggregate { func: AggFunc, slot: Option<Slot> },
}

/// Partition tuples by the GROUP BY columns and evaluate every select item per
/// group. Groups appear in order of first appearance. Without GROUP BY the
/// whole relation is one group, even when empty.
pub(super) fn group(relation: &Relation<'_>, query: &Query) -> Result<Table, QueryError> {
    let Projection::Items(items) = &query.projection else {
        return Err(QueryError::InvalidGrouping(
            "SELECT * cannot be combined with GROUP BY".to_string(),
        ));
    };

    let group_slots = query
        .group_by
        .iter()
        .map(|c| relation.resolve(c))
        .collect::<Result<Vec<_>, _>>()?;

    let mut outputs = Vec::with_capacity(items.len());
    let mut fields = Vec::with_capacity(items.len());
    for item in items {
        let (output, data_type) = match &item.expr {
            Expr::Column(column) => {
                let slot = relation.resolve(column)?;
                if !group_slots.contains(&slot) {
                    return Err(QueryError::InvalidGrouping(format!(
                        "{} must appear in GROUP BY or inside an aggregate",
                        column
                    )));
                }
                (Output::Group { slot }, relation.data_type(slot))
            }
            Expr::Aggregate { func, arg } => {
                let slot = match arg {
                    AggArg::Star if *func == AggFunc::Count => None,
                    AggArg::Star => {
                        return Err(QueryError::parse(
                            "SELECT",
                            format!("{}(*) is not supported", func.name()),
                        ))
                    }
                    AggArg::Column(column) => Some(relation.resolve(column)?),
                };
                let input = slot.map(|s| relation.data_type(s));
                (Output::Aggregate { func: *func, slot }, result_type(*func, input)?)
            }
        };
        outputs.push(output);
        fields.push(Field::new(item.output_name(), data_type));
    }

    let groups = partition(relation, &group_slots);

    let mut columns: Vec<Column> = fields.iter().map(|f| Column::new(f.data_type)).collect();
    for members in &groups {
        for (output, column) in outputs.iter().zip(columns.iter_mut()) {
            let value = match output {
                Output::Group { slot } => members
                    .first()
                    .map_or(Value::Null, |&i| relation.value(*slot, &relation.rows[i])),
                Output::Aggregate { func, slot } => evaluate(*func, *slot, relation, members)?,
            };
            column
                .push(value)
                .map_err(|e| QueryError::ExecutionError(e.to_string()))?;
        }
    }

    build_table(fields, columns)
}

/// Output type of `func` over a column of type `input` (`None` for `*`)
fn result_type(func: AggFunc, input: Option<DataType>) -> Result<DataType, QueryError> {
    match (func, input) {
        (AggFunc::Count, _) => Ok(DataType::Int64),
        (AggFunc::Sum, Some(t @ (DataType::Int64 | DataType::Float64))) => Ok(t),
        (AggFunc::Avg, Some(DataType::Int64 | DataType::Float64)) => Ok(DataType::Float64),
        (AggFunc::Min | AggFunc::Max, Some(t)) => Ok(t),
        (_, Some(t)) => Err(QueryError::type_mismatch("numeric", t.name())),
        (_, None) => Err(QueryError::parse(
            "SELECT",
            format!("{} needs a column", func.name()),
        )),
    }
}

/// Tuple indexes per group, in first-appearance order
fn partition(relation: &Relation<'_>, slots: &[Slot]) -> Vec<Vec<usize>> {
    if slots.is_empty() {
        return vec![(0..relation.rows.len()).collect()];
    }
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut positions: HashMap<Vec<Option<IndexKey>>, usize> = HashMap::new();
    for (i, tuple) in relation.rows.iter().enumerate() {
        let key: Vec<Option<IndexKey>> = slots
            .iter()
            .map(|slot| IndexKey::from_value(&relation.value(*slot, tuple)))
            .collect();
        let position = *positions.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[position].push(i);
    }
    groups
}

/// Apply one aggregate to a group. Nulls are skipped; an empty input gives
/// 0 for COUNT and SUM and null for AVG, MIN and MAX.
fn evaluate(
    func: AggFunc,
    slot: Option<Slot>,
    relation: &Relation<'_>,
    members: &[usize],
) -> Result<Value, QueryError> {
    let Some(slot) = slot else {
        return count(members.len());
    };
    let values: Vec<Value> = members
        .iter()
        .map(|&i| relation.value(slot, &relation.rows[i]))
        .filter(|v| !v.is_null())
        .collect();

    match func {
        AggFunc::Count => count(values.len()),
        AggFunc::Sum => match relation.data_type(slot) {
            DataType::Int64 => values
                .iter()
                .filter_map(Value::as_i64)
                .try_fold(0i64, i64::checked_add)
                .map(Value::Int64)
                .ok_or_else(|| QueryError::ExecutionError("integer overflow in SUM".to_string())),
            _ => Ok(Value::Float64(values.iter().filter_map(Value::as_f64).sum())),
        },
        AggFunc::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
            #[allow(clippy::cast_precision_loss)]
            let n = values.len() as f64;
            Ok(Value::Float64(sum / n))
        }
        AggFunc::Min => Ok(extreme(values, Ordering::Less)),
        AggFunc::Max => Ok(extreme(values, Ordering::Greater)),
    }
}

fn count(n: usize) -> Result<Value, QueryError> {
    i64::try_from(n)
        .map(Value::Int64)
        .map_err(|_| QueryError::ExecutionError("count overflow".to_string()))
}

/// First value that no later value beats in direction `wanted`
fn extreme(values: Vec<Value>, wanted: Ordering) -> Value {
    values
        .into_iter()
        .reduce(|best, v| {
            if v.compare(&best) == Some(wanted) {
                v
            } else {
                best
            }
        })
        .unwrap_or(Value::Null)
}
