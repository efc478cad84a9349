//! Multi-column exact-match index built from per-column hash indexes

use grizzly_common::error::{Result, SchemaError};
use grizzly_common::types::RowId;

use super::hash::HashIndex;
use super::key::IndexKey;
use crate::table::Table;
use crate::value::Value;

/// Answers k-tuple equality queries by intersecting per-column hit sets
#[derive(Debug, Clone)]
pub struct CompositeIndex {
    fields: Vec<String>,
    indexes: Vec<HashIndex>,
}

impl CompositeIndex {
    /// Build one hash index per field
    pub fn build(table: &Table, fields: &[&str]) -> Result<Self> {
        let mut indexes = Vec::with_capacity(fields.len());
        for field in fields {
            indexes.push(HashIndex::build(table.column(field)?));
        }
        Ok(Self {
            fields: fields.iter().map(ToString::to_string).collect(),
            indexes,
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Rows matching every value of `tuple`, ascending
    pub fn lookup(&self, tuple: &[Value]) -> Result<Vec<RowId>> {
        if tuple.len() != self.indexes.len() {
            return Err(SchemaError::ArityMismatch {
                expected: self.indexes.len(),
                actual: tuple.len(),
            }
            .into());
        }

        let mut result: Option<Vec<RowId>> = None;
        for (index, value) in self.indexes.iter().zip(tuple) {
            let Some(key) = IndexKey::from_value(value) else {
                return Ok(Vec::new());
            };
            let mut hits = index.lookup(&key).to_vec();
            hits.sort_unstable();
            result = Some(match result {
                None => hits,
                Some(acc) => intersect_sorted(&acc, &hits),
            });
            if result.as_ref().is_some_and(Vec::is_empty) {
                break;
            }
        }
        Ok(result.unwrap_or_default())
    }
}

/// Two-pointer merge intersection of ascending row lists
pub fn intersect_sorted(a: &[RowId], b: &[RowId]) -> Vec<RowId> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
