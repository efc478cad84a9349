//! Pluggable block-chain persistence
//!
//! Backends are chosen by a tag from configuration. The registry maps each tag
//! to a factory and is resolved once when the engine opens.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use grizzly_common::config::StorageConfig;
use grizzly_common::error::{Result, StorageError};

use crate::block_store::BlockStore;
use crate::schema::check_table_name;

/// Where named block chains live between runs
#[async_trait]
pub trait BlockBackend: Send + Sync {
    /// Backend tag, for logging
    fn name(&self) -> &'static str;

    /// Persist the full chain `chain`
    async fn persist(&self, chain: &str, store: &BlockStore) -> Result<()>;

    /// Restore a chain; an unknown chain restores empty
    async fn restore(&self, chain: &str) -> Result<BlockStore>;

    /// Names of every stored chain, sorted
    async fn chains(&self) -> Result<Vec<String>>;

    /// Forget a chain; removing an unknown chain is a no-op
    async fn remove(&self, chain: &str) -> Result<()>;
}

/// One directory per chain under a root directory
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of `chain`; chain names are table names and never hold separators
    fn chain_dir(&self, chain: &str) -> Result<PathBuf> {
        check_table_name(chain)?;
        Ok(self.root.join(chain))
    }
}

#[async_trait]
impl BlockBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn persist(&self, chain: &str, store: &BlockStore) -> Result<()> {
        store.save(&self.chain_dir(chain)?).await
    }

    async fn restore(&self, chain: &str) -> Result<BlockStore> {
        BlockStore::load(&self.chain_dir(chain)?).await
    }

    async fn remove(&self, chain: &str) -> Result<()> {
        let dir = self.chain_dir(chain)?;
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
            info!("Removed block chain {}", chain);
        }
        Ok(())
    }

    async fn chains(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(names);
        }
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                match entry.file_name().to_str() {
                    Some(name) if check_table_name(name).is_ok() => names.push(name.to_string()),
                    _ => warn!("Ignoring {:?} under {:?}", entry.file_name(), self.root),
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Chains held in process memory; lost on exit
#[derive(Default)]
pub struct MemoryBackend {
    chains: Mutex<HashMap<String, BlockStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn persist(&self, chain: &str, store: &BlockStore) -> Result<()> {
        self.chains.lock().insert(chain.to_string(), store.clone());
        Ok(())
    }

    async fn restore(&self, chain: &str) -> Result<BlockStore> {
        Ok(self.chains.lock().get(chain).cloned().unwrap_or_default())
    }

    async fn chains(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.chains.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn remove(&self, chain: &str) -> Result<()> {
        self.chains.lock().remove(chain);
        Ok(())
    }
}

/// Builds a backend from storage configuration
pub type BackendFactory = Box<dyn Fn(&StorageConfig) -> Result<Arc<dyn BlockBackend>> + Send + Sync>;

/// Tag to factory mapping for block backends
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Registry with no backends
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `file` and `memory` backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("file", |config: &StorageConfig| {
            Ok(Arc::new(FileBackend::new(config.blocks_dir())) as Arc<dyn BlockBackend>)
        });
        registry.register("memory", |_: &StorageConfig| {
            Ok(Arc::new(MemoryBackend::new()) as Arc<dyn BlockBackend>)
        });
        registry
    }

    /// Register or replace the factory for `tag`
    pub fn register<F>(&mut self, tag: &str, factory: F)
    where
        F: Fn(&StorageConfig) -> Result<Arc<dyn BlockBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(tag.to_string(), Box::new(factory));
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Build the backend named by `config.blocks.backend`
    pub fn resolve(&self, config: &StorageConfig) -> Result<Arc<dyn BlockBackend>> {
        let tag = config.blocks.backend.as_str();
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| StorageError::UnknownBackend(tag.to_string()))?;
        let backend = factory(config)?;
        info!("Using {} block backend", backend.name());
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
