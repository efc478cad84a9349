//! Configuration management for Grizzly

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};

/// Main configuration structure for Grizzly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Query engine configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Replication configuration
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Config {
    /// Load configuration from a TOML/JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.validate()?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    /// A file that exists and fails to parse is still an error.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await? {
            Self::load(path).await
        } else {
            info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.index.btree_degree < 2 {
            return Err(Error::Config(format!(
                "btree_degree must be at least 2, got {}",
                self.index.btree_degree
            )));
        }
        if !(0.0..=1.0).contains(&self.replication.load_threshold) {
            return Err(Error::Config(format!(
                "load_threshold must be within [0, 1], got {}",
                self.replication.load_threshold
            )));
        }
        if let Some(key) = &self.storage.wal.encryption_key {
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::Config(
                    "encryption_key must be 32 bytes of hex".to_string(),
                ));
            }
        }
        if let SyncMode::Batched(0) = self.storage.wal.sync_mode {
            return Err(Error::Config("batched sync needs a non-zero batch".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root data directory
    pub data_dir: PathBuf,
    /// Write-ahead log settings
    #[serde(default)]
    pub wal: WalConfig,
    /// Block store settings
    #[serde(default)]
    pub blocks: BlockStoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./grizzly-data"),
            wal: WalConfig::default(),
            blocks: BlockStoreConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Path of the WAL file
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal.file_name)
    }

    /// Directory holding persisted block chains
    pub fn blocks_dir(&self) -> PathBuf {
        self.blocks
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("blocks"))
    }
}

/// When the WAL forces appended records to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Flush to the OS only; no fsync
    Never,
    /// fsync before every append is acknowledged
    PerEntry,
    /// fsync once every N appends
    Batched(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Enable write-ahead logging
    pub enabled: bool,
    /// WAL file name inside the data directory
    pub file_name: String,
    /// Durability level
    pub sync_mode: SyncMode,
    /// Compress records with lz4
    pub compression: bool,
    /// Hex-encoded 32-byte key; records are encrypted when set
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_name: "grizzly.wal".to_string(),
            sync_mode: SyncMode::PerEntry,
            compression: false,
            encryption_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStoreConfig {
    /// Registered backend tag ("file" or "memory")
    pub backend: String,
    /// Override for the block directory (defaults to `<data_dir>/blocks`)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for BlockStoreConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Minimum degree `t` of B-tree indexes
    pub btree_degree: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { btree_degree: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Consult fresh indexes for WHERE predicates
    pub use_indexes: bool,
    /// Hard cap on rows returned by a single query
    #[serde(default)]
    pub max_rows: Option<usize>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            use_indexes: true,
            max_rows: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Replica addresses as `host:port`
    pub replicas: Vec<String>,
    /// Nodes at or above this load are skipped by query fan-out
    pub load_threshold: f64,
    /// Load added to a node per dispatched query
    pub load_increment: f64,
    /// Health check timeout in milliseconds
    pub health_timeout_ms: u64,
    /// PREPARE timeout in milliseconds
    pub prepare_timeout_ms: u64,
    /// COMMIT/ABORT timeout in milliseconds
    pub commit_timeout_ms: u64,
    /// Abort instead of skipping participants that are down
    pub require_all_participants: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replicas: vec![],
            load_threshold: 0.8,
            load_increment: 0.1,
            health_timeout_ms: 1000,
            prepare_timeout_ms: 5000,
            commit_timeout_ms: 5000,
            require_all_participants: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grizzly.toml");
        tokio::fs::write(
            &path,
            r#"
[storage]
data_dir = "/tmp/grizzly"

[storage.wal]
enabled = true
file_name = "ops.wal"
sync_mode = { batched = 16 }
compression = true

[index]
btree_degree = 4

[replication]
replicas = ["10.0.0.2:7070"]
load_threshold = 0.7
load_increment = 0.05
health_timeout_ms = 200
prepare_timeout_ms = 1000
commit_timeout_ms = 1000
require_all_participants = true
"#,
        )
        .await
        .unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.storage.wal.sync_mode, SyncMode::Batched(16));
        assert_eq!(config.storage.wal_path(), PathBuf::from("/tmp/grizzly/ops.wal"));
        assert_eq!(config.index.btree_degree, 4);
        assert_eq!(config.replication.replicas, vec!["10.0.0.2:7070".to_string()]);
        assert!(config.query.use_indexes);
    }

    #[tokio::test]
    async fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load_or_default(dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(missing.index.btree_degree, Config::default().index.btree_degree);

        let path = dir.path().join("grizzly.toml");
        tokio::fs::write(&path, "[index]\nbtree_degree = 1\n").await.unwrap();
        assert!(Config::load_or_default(&path).await.is_err());

        tokio::fs::write(&path, "[index]\nbtree_degree = 5\n").await.unwrap();
        assert_eq!(Config::load_or_default(&path).await.unwrap().index.btree_degree, 5);
    }

    #[test]
    fn test_validate_rejects_tiny_degree() {
        let mut config = Config::default();
        config.index.btree_degree = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_key() {
        let mut config = Config::default();
        config.storage.wal.encryption_key = Some("abcd".to_string());
        assert!(config.validate().is_err());
    }
}
