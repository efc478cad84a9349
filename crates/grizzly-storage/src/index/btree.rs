//! B-tree index of minimum degree `t` for ordered and range lookups
//!
//! Every node except the root holds between `t-1` and `2t-1` keys. Full children
//! are split on the way down during insert, so a node never exceeds `2t-1` keys
//! and all leaves stay at the same depth.
//!
//! Each key owns a posting list of row positions (deduplicated, insertion order),
//! so duplicate column values index exactly like the hash index does.

use grizzly_common::types::RowId;

use super::key::IndexKey;
use crate::columnar::Column;

pub const DEFAULT_DEGREE: usize = 3;

#[derive(Debug, Clone)]
struct Node<K> {
    keys: Vec<K>,
    postings: Vec<Vec<RowId>>,
    children: Vec<Node<K>>,
}

impl<K: Ord + Clone> Node<K> {
    fn leaf() -> Self {
        Self {
            keys: Vec::new(),
            postings: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn find(&self, key: &K) -> Option<&Vec<RowId>> {
        match self.keys.binary_search(key) {
            Ok(i) => Some(&self.postings[i]),
            Err(i) if !self.is_leaf() => self.children[i].find(key),
            Err(_) => None,
        }
    }

    fn find_mut(&mut self, key: &K) -> Option<&mut Vec<RowId>> {
        match self.keys.binary_search(key) {
            Ok(i) => Some(&mut self.postings[i]),
            Err(i) if !self.is_leaf() => self.children[i].find_mut(key),
            Err(_) => None,
        }
    }

    /// Split the full child at `i`, promoting its median into `self`
    fn split_child(&mut self, i: usize, degree: usize) {
        let child = &mut self.children[i];
        let right = Node {
            keys: child.keys.split_off(degree),
            postings: child.postings.split_off(degree),
            children: if child.is_leaf() {
                Vec::new()
            } else {
                child.children.split_off(degree)
            },
        };
        let median_key = child.keys.pop();
        let median_rows = child.postings.pop();
        if let (Some(key), Some(rows)) = (median_key, median_rows) {
            self.keys.insert(i, key);
            self.postings.insert(i, rows);
            self.children.insert(i + 1, right);
        }
    }

    fn insert_non_full(&mut self, key: K, row: RowId, degree: usize) {
        let mut i = match self.keys.binary_search(&key) {
            Ok(i) => {
                self.postings[i].push(row);
                return;
            }
            Err(i) => i,
        };
        if self.is_leaf() {
            self.keys.insert(i, key);
            self.postings.insert(i, vec![row]);
            return;
        }
        if self.children[i].keys.len() == 2 * degree - 1 {
            self.split_child(i, degree);
            if key > self.keys[i] {
                i += 1;
            } else if key == self.keys[i] {
                self.postings[i].push(row);
                return;
            }
        }
        self.children[i].insert_non_full(key, row, degree);
    }

    fn collect_range(&self, min: &K, max: &K, out: &mut Vec<RowId>) {
        for (i, key) in self.keys.iter().enumerate() {
            if !self.is_leaf() && min < key {
                self.children[i].collect_range(min, max, out);
            }
            if key > max {
                return;
            }
            if key >= min {
                out.extend_from_slice(&self.postings[i]);
            }
        }
        if let Some(last) = self.children.last() {
            last.collect_range(min, max, out);
        }
    }

    fn collect_keys(&self, out: &mut Vec<K>) {
        for (i, key) in self.keys.iter().enumerate() {
            if !self.is_leaf() {
                self.children[i].collect_keys(out);
            }
            out.push(key.clone());
        }
        if let Some(last) = self.children.last() {
            last.collect_keys(out);
        }
    }

    fn validate(
        &self,
        degree: usize,
        is_root: bool,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<(), String> {
        let n = self.keys.len();
        if n > 2 * degree - 1 {
            return Err(format!("node holds {} keys, max is {}", n, 2 * degree - 1));
        }
        if !is_root && n < degree - 1 {
            return Err(format!("node holds {} keys, min is {}", n, degree - 1));
        }
        if self.postings.len() != n {
            return Err("postings out of step with keys".to_string());
        }
        if self.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err("keys not strictly increasing".to_string());
        }
        if let (Some(lo), Some(first)) = (lower, self.keys.first()) {
            if first <= lo {
                return Err("key below separator".to_string());
            }
        }
        if let (Some(hi), Some(last)) = (upper, self.keys.last()) {
            if last >= hi {
                return Err("key above separator".to_string());
            }
        }
        if self.is_leaf() {
            match *leaf_depth {
                Some(d) if d != depth => return Err("leaves at different depths".to_string()),
                Some(_) => {}
                None => *leaf_depth = Some(depth),
            }
            return Ok(());
        }
        if self.children.len() != n + 1 {
            return Err(format!("{} keys but {} children", n, self.children.len()));
        }
        for (i, child) in self.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { self.keys.get(i - 1) };
            let hi = if i == n { upper } else { self.keys.get(i) };
            child.validate(degree, false, depth + 1, leaf_depth, lo, hi)?;
        }
        Ok(())
    }
}

/// Ordered index supporting point and inclusive range lookups
#[derive(Debug, Clone)]
pub struct BTreeIndex<K = IndexKey> {
    root: Node<K>,
    degree: usize,
    keys: usize,
    entries: usize,
}

impl<K: Ord + Clone> BTreeIndex<K> {
    /// Empty tree of minimum degree `degree` (clamped to at least 2)
    pub fn new(degree: usize) -> Self {
        Self {
            root: Node::leaf(),
            degree: degree.max(2),
            keys: 0,
            entries: 0,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Add `row` under `key`; returns false if the pair was already present
    pub fn insert(&mut self, key: K, row: RowId) -> bool {
        if let Some(posting) = self.root.find_mut(&key) {
            if posting.contains(&row) {
                return false;
            }
            posting.push(row);
            self.entries += 1;
            return true;
        }

        if self.root.keys.len() == 2 * self.degree - 1 {
            let old_root = std::mem::replace(&mut self.root, Node::leaf());
            self.root.children.push(old_root);
            self.root.split_child(0, self.degree);
        }
        self.root.insert_non_full(key, row, self.degree);
        self.keys += 1;
        self.entries += 1;
        true
    }

    /// Rows stored under `key`; empty if absent
    pub fn search(&self, key: &K) -> Vec<RowId> {
        self.root.find(key).cloned().unwrap_or_default()
    }

    /// Rows whose key lies in `[min, max]`, in ascending key order
    pub fn search_range(&self, min: &K, max: &K) -> Vec<RowId> {
        let mut out = Vec::new();
        if min <= max {
            self.root.collect_range(min, max, &mut out);
        }
        out
    }

    /// Drop `row` from the posting list of `key`.
    ///
    /// The key itself stays in the tree with an empty posting list, so the
    /// structure never needs rebalancing on removal.
    pub fn remove(&mut self, key: &K, row: RowId) -> bool {
        let Some(posting) = self.root.find_mut(key) else {
            return false;
        };
        let Some(pos) = posting.iter().position(|&r| r == row) else {
            return false;
        };
        posting.remove(pos);
        self.entries -= 1;
        true
    }

    /// All keys in order, including keys whose postings were emptied
    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.keys);
        self.root.collect_keys(&mut out);
        out
    }

    /// Number of distinct keys in the tree
    pub fn distinct_keys(&self) -> usize {
        self.keys
    }

    /// Number of (key, row) entries
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut node = &self.root;
        while let Some(child) = node.children.first() {
            height += 1;
            node = child;
        }
        height
    }

    /// Check node sizes, key ordering and uniform leaf depth
    pub fn validate(&self) -> Result<(), String> {
        let mut leaf_depth = None;
        self.root
            .validate(self.degree, true, 0, &mut leaf_depth, None, None)
    }
}

impl BTreeIndex<IndexKey> {
    /// Full build over a column; null slots are skipped
    pub fn build(column: &Column, degree: usize) -> Self {
        let mut index = BTreeIndex::new(degree);
        for (row, value) in column.iter().enumerate() {
            if let Some(key) = IndexKey::from_value(&value) {
                index.insert(key, row);
            }
        }
        index
    }
}
