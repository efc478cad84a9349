//! Immutable, hash-chained table snapshots
//!
//! A block's hash is SHA-256 over a canonical encoding of the table (schema,
//! then every logical cell column by column) followed by the predecessor's hash.
//! Null cells encode as nulls rather than as their stored zero values.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use grizzly_common::error::{IntegrityError, Result};

use crate::table::Table;

/// A frozen table plus its chain link
#[derive(Debug, Clone)]
pub struct Block {
    data: Table,
    hash: String,
    prev_hash: String,
}

impl Block {
    /// Snapshot `table` and hash it onto `prev_hash` (empty for genesis)
    pub fn new(table: &Table, prev_hash: impl Into<String>) -> Result<Self> {
        let data = table.snapshot();
        let prev_hash = prev_hash.into();
        let hash = compute_hash(&data, &prev_hash)?;
        Ok(Self {
            data,
            hash,
            prev_hash,
        })
    }

    /// Reassemble a stored block without rehashing
    pub fn from_parts(data: Table, hash: String, prev_hash: String) -> Self {
        Self {
            data,
            hash,
            prev_hash,
        }
    }

    pub fn data(&self) -> &Table {
        &self.data
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Recompute the hash and compare it with the stored one
    pub fn verify(&self) -> bool {
        self.verify_at(0).is_ok()
    }

    /// Like `verify`, reporting the mismatch for a block at `position`
    pub fn verify_at(&self, position: usize) -> std::result::Result<(), IntegrityError> {
        let computed = compute_hash(&self.data, &self.prev_hash).unwrap_or_default();
        if computed == self.hash {
            Ok(())
        } else {
            Err(IntegrityError::HashMismatch {
                position,
                stored: self.hash.clone(),
                computed,
            })
        }
    }
}

/// Hex SHA-256 of `table` chained onto `prev_hash`
pub fn compute_hash(table: &Table, prev_hash: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    bincode::serialize_into(&mut hasher, table.schema())?;
    for column in table.columns() {
        feed(&mut hasher, &(column.len() as u64))?;
        for value in column.iter() {
            feed(&mut hasher, &value)?;
        }
    }
    hasher.update(prev_hash.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn feed<T: Serialize>(hasher: &mut Sha256, value: &T) -> Result<()> {
    bincode::serialize_into(hasher, value)?;
    Ok(())
}

/// True when every block verifies and links to its predecessor
pub fn verify_chain(blocks: &[Block]) -> bool {
    match verify_chain_detailed(blocks) {
        Ok(()) => true,
        Err(e) => {
            warn!("Chain verification failed: {}", e);
            false
        }
    }
}

/// Verify a chain, stopping at the first failing position
pub fn verify_chain_detailed(blocks: &[Block]) -> std::result::Result<(), IntegrityError> {
    let mut expected_prev = "";
    for (position, block) in blocks.iter().enumerate() {
        if block.prev_hash != expected_prev {
            return Err(IntegrityError::BrokenLink {
                position,
                expected: expected_prev.to_string(),
                found: block.prev_hash.clone(),
            });
        }
        block.verify_at(position)?;
        expected_prev = &block.hash;
    }
    Ok(())
}
