//! WHERE evaluation, with index lookups for int64 predicates

use std::cmp::Ordering;

use grizzly_common::error::QueryError;
use grizzly_common::types::RowId;
use grizzly_storage::{DataType, IndexKey, Value};
use tracing::debug;

use super::{Relation, Slot};
use crate::parser::{CompareOp, Predicate};

/// A predicate with its columns resolved and literal types checked
enum Compiled {
    Compare { slot: Slot, op: CompareOp, value: Value },
    Between { slot: Slot, low: Value, high: Value },
    And(Box<Compiled>, Box<Compiled>),
    Or(Box<Compiled>, Box<Compiled>),
}

/// Row tuples satisfying `predicate`, in their original order
pub(super) fn apply(
    relation: &Relation<'_>,
    predicate: &Predicate,
    use_indexes: bool,
) -> Result<Vec<Vec<RowId>>, QueryError> {
    let compiled = compile(relation, predicate)?;

    if use_indexes && !relation.is_joined() {
        if let Some(mut candidates) = index_candidates(relation, &compiled) {
            candidates.sort_unstable();
            candidates.dedup();
            return Ok(candidates
                .into_iter()
                .map(|row| vec![row])
                .filter(|tuple| compiled.eval(relation, tuple))
                .collect());
        }
    }

    Ok(relation
        .rows
        .iter()
        .filter(|tuple| compiled.eval(relation, tuple))
        .cloned()
        .collect())
}

fn compile(relation: &Relation<'_>, predicate: &Predicate) -> Result<Compiled, QueryError> {
    Ok(match predicate {
        Predicate::Compare { column, op, value } => {
            let slot = relation.resolve(column)?;
            check_literal(relation.data_type(slot), value)?;
            Compiled::Compare {
                slot,
                op: *op,
                value: value.clone(),
            }
        }
        Predicate::Between { column, low, high } => {
            let slot = relation.resolve(column)?;
            check_literal(relation.data_type(slot), low)?;
            check_literal(relation.data_type(slot), high)?;
            Compiled::Between {
                slot,
                low: low.clone(),
                high: high.clone(),
            }
        }
        Predicate::And(a, b) => Compiled::And(
            Box::new(compile(relation, a)?),
            Box::new(compile(relation, b)?),
        ),
        Predicate::Or(a, b) => Compiled::Or(
            Box::new(compile(relation, a)?),
            Box::new(compile(relation, b)?),
        ),
    })
}

/// Numbers compare with numeric columns, strings with string columns
fn check_literal(column: DataType, literal: &Value) -> Result<(), QueryError> {
    let fits = match literal {
        Value::Null => true,
        Value::Int64(_) | Value::Float64(_) => column.is_numeric(),
        Value::Utf8(_) => column == DataType::Utf8,
        _ => false,
    };
    if fits {
        Ok(())
    } else {
        Err(QueryError::type_mismatch(column.name(), literal.type_name()))
    }
}

impl Compiled {
    fn eval(&self, relation: &Relation<'_>, tuple: &[RowId]) -> bool {
        match self {
            Compiled::Compare { slot, op, value } => {
                match relation.value(*slot, tuple).compare(value) {
                    Some(ordering) => matches_op(*op, ordering),
                    None => false,
                }
            }
            Compiled::Between { slot, low, high } => {
                let v = relation.value(*slot, tuple);
                matches!(v.compare(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(v.compare(high), Some(Ordering::Less | Ordering::Equal))
            }
            Compiled::And(a, b) => a.eval(relation, tuple) && b.eval(relation, tuple),
            Compiled::Or(a, b) => a.eval(relation, tuple) || b.eval(relation, tuple),
        }
    }
}

fn matches_op(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
    }
}

/// Candidate rows from a fresh index, or `None` to fall back to a scan.
///
/// Only int64 columns with integer literals qualify. Equality uses any index,
/// ranges need a B-tree. Under AND either side may supply the candidates.
fn index_candidates(relation: &Relation<'_>, compiled: &Compiled) -> Option<Vec<RowId>> {
    match compiled {
        Compiled::Compare {
            slot,
            op,
            value: Value::Int64(v),
        } => {
            let (field, index) = int64_index(relation, *slot)?;
            let v = *v;
            let rows = match op {
                CompareOp::Eq => Some(index.lookup(&IndexKey::Int(v))),
                CompareOp::NotEq => None,
                CompareOp::Lt => Some(match v.checked_sub(1) {
                    Some(hi) => index.range(&IndexKey::Int(i64::MIN), &IndexKey::Int(hi))?,
                    None => Vec::new(),
                }),
                CompareOp::LtEq => index.range(&IndexKey::Int(i64::MIN), &IndexKey::Int(v)),
                CompareOp::Gt => Some(match v.checked_add(1) {
                    Some(lo) => index.range(&IndexKey::Int(lo), &IndexKey::Int(i64::MAX))?,
                    None => Vec::new(),
                }),
                CompareOp::GtEq => index.range(&IndexKey::Int(v), &IndexKey::Int(i64::MAX)),
            }?;
            debug!("Index on {} produced {} candidates", field, rows.len());
            Some(rows)
        }
        Compiled::Between {
            slot,
            low: Value::Int64(lo),
            high: Value::Int64(hi),
        } => {
            let (field, index) = int64_index(relation, *slot)?;
            let rows = index.range(&IndexKey::Int(*lo), &IndexKey::Int(*hi))?;
            debug!("Index range on {} produced {} candidates", field, rows.len());
            Some(rows)
        }
        Compiled::And(a, b) => {
            index_candidates(relation, a).or_else(|| index_candidates(relation, b))
        }
        _ => None,
    }
}

fn int64_index<'a>(
    relation: &Relation<'a>,
    slot: Slot,
) -> Option<(&'a str, &'a grizzly_storage::FieldIndex)> {
    let field = relation.field(slot);
    if field.data_type != DataType::Int64 {
        return None;
    }
    let table = relation.sources[slot.source].table;
    table
        .fresh_index(&field.name)
        .map(|index| (field.name.as_str(), index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ColumnRef;
    use grizzly_storage::{Field, IndexKind, Schema, Table};

    fn table() -> Table {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ])
        .unwrap();
        let mut table = Table::new(schema);
        for (id, name) in [(5, "e"), (1, "a"), (3, "c"), (1, "z"), (9, "i")] {
            table.append_row(vec![Value::Int64(id), Value::from(name)]).unwrap();
        }
        table
    }

    fn compare(name: &str, op: CompareOp, value: Value) -> Predicate {
        Predicate::Compare {
            column: ColumnRef::new(name),
            op,
            value,
        }
    }

    fn ids(relation: &Relation<'_>, rows: &[Vec<RowId>]) -> Vec<Value> {
        let slot = relation.resolve(&ColumnRef::new("id")).unwrap();
        rows.iter().map(|t| relation.value(slot, t)).collect()
    }

    #[test]
    fn test_index_and_scan_agree() {
        let mut indexed = table();
        indexed.build_index("id", IndexKind::BTree).unwrap();
        let plain = table();

        for predicate in [
            compare("id", CompareOp::Eq, Value::Int64(1)),
            compare("id", CompareOp::Gt, Value::Int64(3)),
            compare("id", CompareOp::LtEq, Value::Int64(3)),
            Predicate::Between {
                column: ColumnRef::new("id"),
                low: Value::Int64(2),
                high: Value::Int64(9),
            },
        ] {
            let a = Relation::scan("t", &indexed);
            let b = Relation::scan("t", &plain);
            assert_eq!(
                apply(&a, &predicate, true).unwrap(),
                apply(&b, &predicate, false).unwrap()
            );
        }
    }

    #[test]
    fn test_hash_index_only_serves_equality() {
        let mut t = table();
        t.build_index("id", IndexKind::Hash).unwrap();
        let relation = Relation::scan("t", &t);
        let compiled = compile(&relation, &compare("id", CompareOp::Gt, Value::Int64(1))).unwrap();
        assert!(index_candidates(&relation, &compiled).is_none());
        let compiled = compile(&relation, &compare("id", CompareOp::Eq, Value::Int64(1))).unwrap();
        assert_eq!(index_candidates(&relation, &compiled), Some(vec![1, 3]));
    }

    #[test]
    fn test_or_and_strings() {
        let t = table();
        let relation = Relation::scan("t", &t);
        let predicate = Predicate::Or(
            Box::new(compare("name", CompareOp::Eq, Value::from("z"))),
            Box::new(compare("id", CompareOp::Gt, Value::Int64(4))),
        );
        let rows = apply(&relation, &predicate, true).unwrap();
        assert_eq!(
            ids(&relation, &rows),
            vec![Value::Int64(5), Value::Int64(1), Value::Int64(9)]
        );
    }

    #[test]
    fn test_literal_type_mismatch() {
        let t = table();
        let relation = Relation::scan("t", &t);
        let err = apply(&relation, &compare("id", CompareOp::Eq, Value::from("x")), true)
            .unwrap_err();
        assert_eq!(err, QueryError::type_mismatch("int64", "string"));

        let err = apply(&relation, &compare("name", CompareOp::Gt, Value::Int64(1)), true)
            .unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { .. }));
    }

    #[test]
    fn test_null_never_matches() {
        let t = table();
        let relation = Relation::scan("t", &t);
        let rows = apply(&relation, &compare("id", CompareOp::NotEq, Value::Null), false).unwrap();
        assert!(rows.is_empty());
    }
}
