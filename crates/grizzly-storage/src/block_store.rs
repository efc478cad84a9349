//! Append-only store of hash-chained blocks
//!
//! On disk a store is a directory holding, per block, `<seq>.block` (the
//! bincode-encoded table) and `<seq>.meta.json` (`{hash, prev_hash}`), plus a
//! `chain.json` listing every hash in append order.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use grizzly_common::error::{IntegrityError, Result, StorageError};
use grizzly_common::metrics;

use crate::block::{self, Block};
use crate::table::Table;

const CHAIN_FILE: &str = "chain.json";

#[derive(Debug, Serialize, Deserialize)]
struct BlockMeta {
    hash: String,
    prev_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChainManifest {
    hashes: Vec<String>,
}

/// Blocks in append order, addressable by hash or sequence number
#[derive(Debug, Clone, Default)]
pub struct BlockStore {
    blocks: Vec<Block>,
    by_hash: HashMap<String, usize>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block that extends the current head, returning its sequence number
    pub fn append(&mut self, block: Block) -> Result<usize> {
        if block.prev_hash() != self.head_hash() {
            warn!(
                "Block {} does not extend head {}",
                block.hash(),
                self.head_hash()
            );
            return Err(IntegrityError::BrokenLink {
                position: self.blocks.len(),
                expected: self.head_hash().to_string(),
                found: block.prev_hash().to_string(),
            }
            .into());
        }
        self.push(block)
    }

    /// Store a block without checking its link; `verify_chain` reports breaks
    fn push(&mut self, block: Block) -> Result<usize> {
        if self.by_hash.contains_key(block.hash()) {
            return Err(StorageError::DuplicateBlock(block.hash().to_string()).into());
        }
        let seq = self.blocks.len();
        self.by_hash.insert(block.hash().to_string(), seq);
        self.blocks.push(block);
        metrics::record_block_appended();
        Ok(seq)
    }

    /// Snapshot `table` into a new block on top of the current head
    pub fn append_table(&mut self, table: &Table) -> Result<&Block> {
        let block = Block::new(table, self.head_hash())?;
        let seq = self.append(block)?;
        Ok(&self.blocks[seq])
    }

    pub fn get(&self, hash: &str) -> Option<&Block> {
        self.by_hash.get(hash).map(|&seq| &self.blocks[seq])
    }

    pub fn get_by_seq(&self, seq: usize) -> Option<&Block> {
        self.blocks.get(seq)
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Hash of the newest block, empty for an empty store
    pub fn head_hash(&self) -> &str {
        self.head().map_or("", Block::hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn verify_chain(&self) -> std::result::Result<(), IntegrityError> {
        block::verify_chain_detailed(&self.blocks)
    }

    /// Persist every block not yet on disk, then rewrite the manifest
    pub async fn save(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let mut written = 0;
        for (seq, block) in self.blocks.iter().enumerate() {
            let data_path = dir.join(format!("{}.block", seq));
            let meta_path = dir.join(format!("{}.meta.json", seq));
            if tokio::fs::try_exists(&data_path).await? {
                let existing: BlockMeta =
                    serde_json::from_slice(&tokio::fs::read(&meta_path).await?)?;
                if existing.hash != block.hash() {
                    return Err(StorageError::CorruptData(format!(
                        "block {} on disk has hash {}, refusing to keep it in place of {}",
                        seq,
                        existing.hash,
                        block.hash()
                    ))
                    .into());
                }
                continue;
            }
            let meta = BlockMeta {
                hash: block.hash().to_string(),
                prev_hash: block.prev_hash().to_string(),
            };
            tokio::fs::write(&data_path, bincode::serialize(block.data())?).await?;
            tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?).await?;
            written += 1;
        }

        let manifest = ChainManifest {
            hashes: self.blocks.iter().map(|b| b.hash().to_string()).collect(),
        };
        let tmp = dir.join(format!("{}.tmp", CHAIN_FILE));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&manifest)?).await?;
        tokio::fs::rename(&tmp, dir.join(CHAIN_FILE)).await?;

        debug!("Saved {} new blocks to {:?}", written, dir);
        Ok(())
    }

    /// Rebuild a store from `dir` without rehashing.
    ///
    /// A missing directory or manifest yields an empty store. Metadata that
    /// disagrees with the manifest is reported as corrupt.
    pub async fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(CHAIN_FILE);
        if !tokio::fs::try_exists(&manifest_path).await? {
            return Ok(Self::new());
        }
        let manifest: ChainManifest =
            serde_json::from_slice(&tokio::fs::read(&manifest_path).await?)?;

        let mut store = Self::new();
        for (seq, expected) in manifest.hashes.iter().enumerate() {
            let meta: BlockMeta = serde_json::from_slice(
                &tokio::fs::read(dir.join(format!("{}.meta.json", seq))).await?,
            )?;
            if &meta.hash != expected {
                return Err(StorageError::CorruptData(format!(
                    "block {} metadata hash {} does not match manifest {}",
                    seq, meta.hash, expected
                ))
                .into());
            }
            let data: Table =
                bincode::deserialize(&tokio::fs::read(dir.join(format!("{}.block", seq))).await?)?;
            store.push(Block::from_parts(data, meta.hash, meta.prev_hash))?;
        }

        info!("Loaded {} blocks from {:?}", store.len(), dir);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema};
    use crate::value::{DataType, Value};

    fn table(v: i64) -> Table {
        let schema = Schema::new(vec![Field::new("v", DataType::Int64)]).unwrap();
        let mut table = Table::new(schema);
        table.append_row(vec![Value::Int64(v)]).unwrap();
        table
    }

    #[test]
    fn test_append_and_lookup() {
        let mut store = BlockStore::new();
        assert_eq!(store.head_hash(), "");
        let first = store.append_table(&table(1)).unwrap().hash().to_string();
        let second = store.append_table(&table(2)).unwrap().hash().to_string();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&first).unwrap().data().get("v", 0).unwrap(), Value::Int64(1));
        assert_eq!(store.get_by_seq(1).unwrap().prev_hash(), first);
        assert_eq!(store.head_hash(), second);
        assert!(store.verify_chain().is_ok());
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let mut store = BlockStore::new();
        let block = Block::new(&table(1), "").unwrap();
        store.append(block.clone()).unwrap();
        assert!(store.append(block).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_rejects_block_off_head() {
        let mut store = BlockStore::new();
        let first = store.append_table(&table(1)).unwrap().hash().to_string();
        store.append_table(&table(2)).unwrap();

        let fork = Block::new(&table(3), &first).unwrap();
        let err = store.append(fork).unwrap_err();
        assert!(matches!(
            err,
            grizzly_common::error::Error::Integrity(IntegrityError::BrokenLink { position: 2, .. })
        ));
        let orphan = Block::new(&table(4), "").unwrap();
        assert!(store.append(orphan).is_err());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_save_refuses_to_overlay_a_different_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut ours = BlockStore::new();
        ours.append_table(&table(1)).unwrap();
        ours.save(dir.path()).await.unwrap();

        let mut theirs = BlockStore::new();
        theirs.append_table(&table(9)).unwrap();
        theirs.append_table(&table(10)).unwrap();
        assert!(theirs.save(dir.path()).await.is_err());

        let loaded = BlockStore::load(dir.path()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.head_hash(), ours.head_hash());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::new();
        for v in 0..3 {
            store.append_table(&table(v)).unwrap();
        }
        store.save(dir.path()).await.unwrap();

        store.append_table(&table(3)).unwrap();
        store.save(dir.path()).await.unwrap();

        let loaded = BlockStore::load(dir.path()).await.unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.head_hash(), store.head_hash());
        assert!(loaded.verify_chain().is_ok());
    }

    #[tokio::test]
    async fn test_load_detects_tampered_block_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::new();
        store.append_table(&table(1)).unwrap();
        store.append_table(&table(2)).unwrap();
        store.save(dir.path()).await.unwrap();

        tokio::fs::write(dir.path().join("0.block"), bincode::serialize(&table(7)).unwrap())
            .await
            .unwrap();

        let loaded = BlockStore::load(dir.path()).await.unwrap();
        assert!(matches!(
            loaded.verify_chain(),
            Err(IntegrityError::HashMismatch { position: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_load_keeps_broken_links_for_verification() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::new();
        store.append_table(&table(1)).unwrap();
        store.append_table(&table(2)).unwrap();
        store.save(dir.path()).await.unwrap();

        let meta = BlockMeta {
            hash: store.head_hash().to_string(),
            prev_hash: "0".repeat(64),
        };
        tokio::fs::write(dir.path().join("1.meta.json"), serde_json::to_vec(&meta).unwrap())
            .await
            .unwrap();

        let loaded = BlockStore::load(dir.path()).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(matches!(
            loaded.verify_chain(),
            Err(IntegrityError::BrokenLink { position: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = BlockStore::load(&dir.path().join("nothing")).await.unwrap();
        assert!(loaded.is_empty());
    }
}
