//! Secondary indexes over table columns

mod btree;
mod composite;
mod hash;
mod key;

pub use btree::{BTreeIndex, DEFAULT_DEGREE};
pub use composite::{intersect_sorted, CompositeIndex};
pub use hash::HashIndex;
pub use key::IndexKey;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use grizzly_common::error::StorageError;
use grizzly_common::types::RowId;

use crate::columnar::Column;

/// Which structure backs a field index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Hash,
    BTree,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Hash => f.write_str("hash"),
            IndexKind::BTree => f.write_str("btree"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hash" => Ok(IndexKind::Hash),
            "btree" | "b-tree" => Ok(IndexKind::BTree),
            other => Err(StorageError::IndexError(format!("unknown index kind {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
enum IndexImpl {
    Hash(HashIndex),
    BTree(BTreeIndex),
}

/// The index attached to one table field.
///
/// A stale index no longer matches its column (rows were deleted) and must not
/// be consulted until rebuilt.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    inner: IndexImpl,
    stale: bool,
}

impl FieldIndex {
    /// Full build over `column`
    pub fn build(kind: IndexKind, column: &Column, degree: usize) -> Self {
        let inner = match kind {
            IndexKind::Hash => IndexImpl::Hash(HashIndex::build(column)),
            IndexKind::BTree => IndexImpl::BTree(BTreeIndex::build(column, degree)),
        };
        Self {
            inner,
            stale: false,
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self.inner {
            IndexImpl::Hash(_) => IndexKind::Hash,
            IndexImpl::BTree(_) => IndexKind::BTree,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn as_hash(&self) -> Option<&HashIndex> {
        match &self.inner {
            IndexImpl::Hash(index) => Some(index),
            IndexImpl::BTree(_) => None,
        }
    }

    pub fn as_btree(&self) -> Option<&BTreeIndex> {
        match &self.inner {
            IndexImpl::BTree(index) => Some(index),
            IndexImpl::Hash(_) => None,
        }
    }

    /// Rows holding `key`
    pub fn lookup(&self, key: &IndexKey) -> Vec<RowId> {
        match &self.inner {
            IndexImpl::Hash(index) => index.lookup(key).to_vec(),
            IndexImpl::BTree(index) => index.search(key),
        }
    }

    /// Rows with keys in `[min, max]`; `None` when the index is unordered
    pub fn range(&self, min: &IndexKey, max: &IndexKey) -> Option<Vec<RowId>> {
        self.as_btree().map(|index| index.search_range(min, max))
    }

    pub(crate) fn insert(&mut self, key: IndexKey, row: RowId) {
        match &mut self.inner {
            IndexImpl::Hash(index) => {
                index.insert(key, row);
            }
            IndexImpl::BTree(index) => {
                index.insert(key, row);
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &IndexKey, row: RowId) {
        match &mut self.inner {
            IndexImpl::Hash(index) => {
                index.remove(key, row);
            }
            IndexImpl::BTree(index) => {
                index.remove(key, row);
            }
        }
    }

    /// Number of (key, row) entries
    pub fn len(&self) -> usize {
        match &self.inner {
            IndexImpl::Hash(index) => index.len(),
            IndexImpl::BTree(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
