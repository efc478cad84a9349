//! The engine session object

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use grizzly_cluster::{RemoteNode, ReplicationCoordinator};
use grizzly_common::config::Config;
use grizzly_common::error::{Result, SchemaError};
use grizzly_common::types::{now_millis, RowId, Timestamp};
use grizzly_query::{QueryEngine, QueryResult};
use grizzly_storage::{
    export_rows, BackendRegistry, BlockBackend, BlockStore, IndexKind, Schema, Table, Value,
    WalOp, WalSink, WalTarget, WriteAheadLog,
};
use grizzly_txn::TxnOutcome;

/// What [`Engine::recover`] found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tables restored from the head of their block chain
    pub tables_restored: usize,
    /// Blocks whose hashes and links were verified
    pub blocks_verified: usize,
    /// WAL entries reapplied on top of the restored tables
    pub entries_replayed: usize,
}

/// Owner of every piece of engine state.
///
/// Mutations take `&mut self`: one writer at a time, as the block chains and
/// the WAL are single-writer.
pub struct Engine {
    config: Config,
    catalog: HashMap<String, Table>,
    /// Index definitions, reapplied after recovery
    indexes: Vec<(String, String, IndexKind)>,
    wal: Option<WriteAheadLog>,
    chains: HashMap<String, BlockStore>,
    backend: Arc<dyn BlockBackend>,
    query: QueryEngine,
    replication: ReplicationCoordinator,
}

impl Engine {
    /// Open an engine over `config.storage.data_dir`.
    ///
    /// The WAL is opened (and its entries read back) but not applied; call
    /// [`recover`](Self::recover) to rebuild tables from disk.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        info!("Opening Grizzly engine in {}", config.storage.data_dir.display());
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;

        let wal = if config.storage.wal.enabled {
            Some(WriteAheadLog::open(config.storage.wal_path(), &config.storage.wal).await?)
        } else {
            None
        };
        let backend = BackendRegistry::with_defaults().resolve(&config.storage)?;
        let replication = ReplicationCoordinator::connect(&config.replication)?;
        if let Some(wal) = &wal {
            for sink in replication.wal_sinks() {
                wal.add_replica(sink);
            }
        }

        Ok(Self {
            query: QueryEngine::new(&config.query),
            config,
            catalog: HashMap::new(),
            indexes: Vec::new(),
            wal,
            chains: HashMap::new(),
            backend,
            replication,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub async fn create_table(&mut self, name: &str, schema: Schema) -> Result<()> {
        self.write(WalOp::CreateTable {
            table: name.to_string(),
            schema,
        })
        .await
    }

    /// Drop a table and its index definitions. The table's block chain stays
    /// on disk until the next checkpoint, so a replayed drop finds it.
    pub async fn drop_table(&mut self, name: &str) -> Result<()> {
        self.write(WalOp::DropTable {
            table: name.to_string(),
        })
        .await
    }

    /// Append a row, returning its position
    pub async fn insert(&mut self, table: &str, values: Vec<Value>) -> Result<RowId> {
        self.write(WalOp::Insert {
            table: table.to_string(),
            values,
        })
        .await?;
        Ok(self.table_ref(table)?.num_rows() - 1)
    }

    pub async fn update(&mut self, table: &str, field: &str, row: RowId, value: Value) -> Result<()> {
        self.write(WalOp::Update {
            table: table.to_string(),
            field: field.to_string(),
            row,
            value,
        })
        .await
    }

    /// Remove a row; later rows shift down by one
    pub async fn delete(&mut self, table: &str, row: RowId) -> Result<Vec<Value>> {
        let removed = self.table_ref(table)?.row(row).unwrap_or_default();
        self.write(WalOp::Delete {
            table: table.to_string(),
            row,
        })
        .await?;
        if let Some(t) = self.catalog.get_mut(table) {
            t.refresh_indexes()?;
        }
        Ok(removed)
    }

    /// Bulk load through the collaborator boundary; every row is logged
    pub async fn load_rows(&mut self, table: &str, rows: Vec<Vec<Value>>) -> Result<usize> {
        let target = self.table_ref(table)?;
        for row in &rows {
            target.check_row(row)?;
        }
        let n = rows.len();
        for values in rows {
            self.insert(table, values).await?;
        }
        debug!("Loaded {} rows into {}", n, table);
        Ok(n)
    }

    pub fn export_rows(&self, table: &str) -> Result<Vec<Vec<Value>>> {
        Ok(export_rows(self.table_ref(table)?))
    }

    /// Build (or rebuild) an index; the definition survives recovery
    pub fn build_index(&mut self, table: &str, field: &str, kind: IndexKind) -> Result<()> {
        self.catalog
            .get_mut(table)
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?
            .build_index(field, kind)?;
        self.indexes.retain(|(t, f, _)| !(t == table && f == field));
        self.indexes.push((table.to_string(), field.to_string(), kind));
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.catalog.get(name)
    }

    /// Table names, sorted
    pub fn tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.catalog.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Deep copy of a table, safe to hand to a long-running reader
    pub fn snapshot(&self, table: &str) -> Result<Table> {
        Ok(self.table_ref(table)?.snapshot())
    }

    /// Run query text against the catalog; errors come back in the result
    pub fn query(&self, text: &str) -> QueryResult {
        self.query.execute(&self.catalog, text)
    }

    // ========================================================================
    // Durability
    // ========================================================================

    pub fn wal(&self) -> Option<&WriteAheadLog> {
        self.wal.as_ref()
    }

    /// Block chain of one table
    pub fn chain(&self, table: &str) -> Option<&BlockStore> {
        self.chains.get(table)
    }

    /// Snapshot every table into a new block on its chain, persist the
    /// chains, then truncate the WAL. Returns the new head hash per table.
    pub async fn checkpoint(&mut self) -> Result<Vec<(String, String)>> {
        let mut names: Vec<String> = self.catalog.keys().cloned().collect();
        names.sort();

        let mut heads = Vec::with_capacity(names.len());
        for name in names {
            let Some(table) = self.catalog.get(&name) else {
                continue;
            };
            let chain = self.chains.entry(name.clone()).or_default();
            let hash = chain.append_table(table)?.hash().to_string();
            self.backend.persist(&name, chain).await?;
            heads.push((name, hash));
        }

        if let Some(wal) = &self.wal {
            wal.commit().await?;
        }
        for name in self.backend.chains().await? {
            if !self.catalog.contains_key(&name) {
                self.backend.remove(&name).await?;
            }
        }
        info!("Checkpointed {} tables", heads.len());
        Ok(heads)
    }

    /// Rebuild the catalog: restore and verify every persisted chain, take each
    /// chain's head as the table, then replay the WAL on top
    pub async fn recover(&mut self) -> Result<RecoveryReport> {
        self.recover_until(None).await
    }

    /// Like [`recover`](Self::recover), but stop replaying at the first WAL
    /// entry newer than `until`
    pub async fn recover_to_timestamp(&mut self, until: Timestamp) -> Result<RecoveryReport> {
        self.recover_until(Some(until)).await
    }

    async fn recover_until(&mut self, until: Option<Timestamp>) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut catalog = HashMap::new();
        let mut chains = HashMap::new();

        for name in self.backend.chains().await? {
            let chain = self.backend.restore(&name).await?;
            chain.verify_chain().map_err(|e| {
                warn!("Chain {} failed verification: {}", name, e);
                e
            })?;
            report.blocks_verified += chain.len();
            if let Some(head) = chain.head() {
                catalog.insert(name.clone(), head.data().clone());
                report.tables_restored += 1;
            }
            chains.insert(name, chain);
        }

        if let Some(wal) = &self.wal {
            report.entries_replayed = match until {
                Some(ts) => wal.replay_to_timestamp(&mut catalog, ts).await?,
                None => wal.replay(&mut catalog).await?,
            };
        }

        let degree = self.config.index.btree_degree;
        self.catalog = catalog
            .into_iter()
            .map(|(name, table)| (name, table.with_btree_degree(degree)))
            .collect();
        chains.retain(|name, _| self.catalog.contains_key(name));
        self.chains = chains;
        let catalog = &self.catalog;
        self.indexes.retain(|(table, _, _)| catalog.contains_key(table));

        for (table, field, kind) in self.indexes.clone() {
            if let Some(t) = self.catalog.get_mut(&table) {
                t.build_index(&field, kind)?;
            }
        }

        info!(
            "Recovered {} tables ({} blocks, {} WAL entries)",
            report.tables_restored, report.blocks_verified, report.entries_replayed
        );
        Ok(report)
    }

    // ========================================================================
    // Replication
    // ========================================================================

    pub fn replication(&self) -> &ReplicationCoordinator {
        &self.replication
    }

    /// Track a replica; it also starts receiving WAL entries
    pub fn add_replica(&self, host: &str, port: u16) -> Arc<RemoteNode> {
        let known = self.replication.nodes().len();
        let node = self.replication.add_replica(host, port);
        if let Some(wal) = &self.wal {
            if self.replication.nodes().len() > known {
                wal.add_replica(node.clone() as Arc<dyn WalSink>);
            }
        }
        node
    }

    /// Health-check every replica; returns how many are alive
    pub async fn failover_check(&self) -> usize {
        self.replication.failover_check().await
    }

    pub async fn distribute_query(&self, text: &str) -> Result<Table> {
        self.replication.distribute_query(text).await
    }

    /// Apply `ops` here and on every replica, or nowhere.
    ///
    /// The ops are dry-run locally first; the replicas then decide through
    /// two-phase commit, and only a committed transaction is applied and
    /// logged locally.
    pub async fn replicated_write(&mut self, ops: Vec<WalOp>) -> Result<TxnOutcome> {
        let mut scratch: HashMap<String, Table> = ops
            .iter()
            .filter_map(|op| {
                self.catalog
                    .get(op.table())
                    .map(|t| (op.table().to_string(), t.clone()))
            })
            .collect();
        for op in &ops {
            scratch.apply(op)?;
        }

        let outcome = self.replication.replicated_write(ops.clone()).await?;
        if outcome.committed() {
            let timestamp = now_millis();
            for op in ops {
                if let Some(wal) = &self.wal {
                    wal.append_local(op.clone(), timestamp).await?;
                }
                self.apply(&op)?;
            }
        }
        Ok(outcome)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn table_ref(&self, name: &str) -> Result<&Table> {
        self.catalog
            .get(name)
            .ok_or_else(|| SchemaError::TableNotFound(name.to_string()).into())
    }

    /// Validate, log, then apply
    async fn write(&mut self, op: WalOp) -> Result<()> {
        self.catalog.check(&op)?;
        if let Some(wal) = &self.wal {
            wal.append(op.clone()).await?;
        }
        self.apply(&op)
    }

    fn apply(&mut self, op: &WalOp) -> Result<()> {
        self.catalog.apply(op)?;
        if let WalOp::CreateTable { table, .. } = op {
            let degree = self.config.index.btree_degree;
            if let Some(t) = self.catalog.remove(table) {
                self.catalog.insert(table.clone(), t.with_btree_degree(degree));
            }
            info!("Created table {}", table);
        }
        if let WalOp::DropTable { table } = op {
            self.indexes.retain(|(t, _, _)| t != table);
            self.chains.remove(table);
            info!("Dropped table {}", table);
        }
        Ok(())
    }
}
