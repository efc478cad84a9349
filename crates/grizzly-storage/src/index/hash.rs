//! In-memory hash index for equality lookups

use std::collections::HashMap;

use grizzly_common::types::RowId;

use super::key::IndexKey;
use crate::columnar::Column;

/// Maps a key to the rows holding it, in insertion order.
///
/// Inserting the same `(key, row)` pair twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    buckets: HashMap<IndexKey, Vec<RowId>>,
    entries: usize,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full build over a column; null slots are skipped
    pub fn build(column: &Column) -> Self {
        let mut index = HashIndex {
            buckets: HashMap::with_capacity(column.len()),
            entries: 0,
        };
        for (row, value) in column.iter().enumerate() {
            if let Some(key) = IndexKey::from_value(&value) {
                index.insert(key, row);
            }
        }
        index
    }

    /// Add `row` to the bucket for `key`; returns false if already present
    pub fn insert(&mut self, key: IndexKey, row: RowId) -> bool {
        let bucket = self.buckets.entry(key).or_default();
        if bucket.contains(&row) {
            return false;
        }
        bucket.push(row);
        self.entries += 1;
        true
    }

    /// Rows holding `key`; empty for an absent key
    pub fn lookup(&self, key: &IndexKey) -> &[RowId] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remove(&mut self, key: &IndexKey, row: RowId) -> bool {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|&r| r == row) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        self.entries -= 1;
        true
    }

    /// Number of (key, row) entries
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn distinct_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataType, Value};
    use proptest::prelude::*;

    #[test]
    fn test_lookup_returns_rows_in_insertion_order() {
        let column = Column::from_values(
            DataType::Int64,
            [1, 2, 1, 3].into_iter().map(Value::Int64),
        )
        .unwrap();
        let index = HashIndex::build(&column);

        assert_eq!(index.lookup(&IndexKey::Int(1)), &[0, 2]);
        assert_eq!(index.lookup(&IndexKey::Int(3)), &[3]);
        assert!(index.lookup(&IndexKey::Int(42)).is_empty());
        assert_eq!(index.len(), 4);
        assert_eq!(index.distinct_keys(), 3);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = HashIndex::new();
        assert!(index.insert(IndexKey::from("a"), 0));
        assert!(!index.insert(IndexKey::from("a"), 0));
        assert_eq!(index.lookup(&IndexKey::from("a")), &[0]);
    }

    #[test]
    fn test_remove_drops_empty_bucket() {
        let mut index = HashIndex::new();
        index.insert(IndexKey::Int(5), 1);
        assert!(index.remove(&IndexKey::Int(5), 1));
        assert!(!index.remove(&IndexKey::Int(5), 1));
        assert_eq!(index.distinct_keys(), 0);
    }

    proptest! {
        #[test]
        fn prop_mutations_match_linear_scan(
            ops in prop::collection::vec((any::<bool>(), 0i64..8, 0usize..24), 0..300),
        ) {
            let mut index = HashIndex::new();
            let mut model: Vec<(i64, RowId)> = Vec::new();

            for (insert, key, row) in ops {
                let present = model.iter().position(|&entry| entry == (key, row));
                if insert {
                    prop_assert_eq!(index.insert(IndexKey::from(key), row), present.is_none());
                    if present.is_none() {
                        model.push((key, row));
                    }
                } else {
                    prop_assert_eq!(index.remove(&IndexKey::from(key), row), present.is_some());
                    if let Some(pos) = present {
                        model.remove(pos);
                    }
                }
            }

            prop_assert_eq!(index.len(), model.len());
            for key in 0i64..8 {
                let expected: Vec<RowId> = model
                    .iter()
                    .filter(|(k, _)| *k == key)
                    .map(|(_, row)| *row)
                    .collect();
                prop_assert_eq!(index.lookup(&IndexKey::from(key)), expected.as_slice());
            }
            let mut keys: Vec<i64> = model.iter().map(|(k, _)| *k).collect();
            keys.sort_unstable();
            keys.dedup();
            prop_assert_eq!(index.distinct_keys(), keys.len());
        }
    }
}
