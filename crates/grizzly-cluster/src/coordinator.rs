//! Replication coordinator
//!
//! Owns the replica list. Health checks run only when asked for
//! ([`ReplicationCoordinator::failover_check`]); nothing here runs on a timer.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use grizzly_common::config::ReplicationConfig;
use grizzly_common::error::{Error, ReplicationError, Result};
use grizzly_storage::{Table, WalOp, WalSink};
use grizzly_txn::{Participant, TransactionCoordinator, TxnOutcome};

use crate::node::RemoteNode;
use crate::transport::{NodeTransport, TcpTransport};

pub struct ReplicationCoordinator {
    config: ReplicationConfig,
    transport: Arc<dyn NodeTransport>,
    nodes: RwLock<Vec<Arc<RemoteNode>>>,
    txns: TransactionCoordinator,
}

impl ReplicationCoordinator {
    pub fn new(config: &ReplicationConfig, transport: Arc<dyn NodeTransport>) -> Self {
        Self {
            config: config.clone(),
            transport,
            nodes: RwLock::new(Vec::new()),
            txns: TransactionCoordinator::from_config(config),
        }
    }

    /// Coordinator over TCP with every replica listed in `config`
    pub fn connect(config: &ReplicationConfig) -> Result<Self> {
        let timeout_ms = config.prepare_timeout_ms.max(config.commit_timeout_ms);
        let transport = Arc::new(TcpTransport::new(Duration::from_millis(timeout_ms)));
        let coordinator = Self::new(config, transport);
        for address in &config.replicas {
            let (host, port) = parse_address(address)?;
            coordinator.add_replica(host, port);
        }
        Ok(coordinator)
    }

    /// Track a replica; adding the same address twice returns the known node
    pub fn add_replica(&self, host: &str, port: u16) -> Arc<RemoteNode> {
        let mut nodes = self.nodes.write();
        let address = format!("{}:{}", host, port);
        if let Some(node) = nodes.iter().find(|n| n.address() == address) {
            return node.clone();
        }
        info!("Added replica {}", address);
        let node = Arc::new(RemoteNode::new(host, port, self.transport.clone()));
        nodes.push(node.clone());
        node
    }

    pub fn nodes(&self) -> Vec<Arc<RemoteNode>> {
        self.nodes.read().clone()
    }

    pub fn alive_nodes(&self) -> Vec<Arc<RemoteNode>> {
        self.nodes()
            .into_iter()
            .filter(|n| Participant::is_alive(n.as_ref()))
            .collect()
    }

    pub fn transactions(&self) -> &TransactionCoordinator {
        &self.txns
    }

    /// Ping every node and update its liveness; returns how many are alive
    pub async fn failover_check(&self) -> usize {
        let limit = Duration::from_millis(self.config.health_timeout_ms);
        let nodes = self.nodes();
        let before: Vec<bool> = nodes
            .iter()
            .map(|n| Participant::is_alive(n.as_ref()))
            .collect();

        let after = join_all(nodes.iter().map(|n| n.health_check(limit))).await;

        for ((node, was), now) in nodes.iter().zip(before).zip(&after) {
            if was != *now {
                if *now {
                    info!("Replica {} is back up", node.address());
                } else {
                    warn!("Replica {} is down", node.address());
                }
                grizzly_common::metrics::record_failover(node.address(), *now);
            }
        }
        after.into_iter().filter(|alive| *alive).count()
    }

    /// Alive nodes under the load threshold, or every alive node if none are
    pub fn select_nodes(&self) -> Result<Vec<Arc<RemoteNode>>> {
        let alive = self.alive_nodes();
        if alive.is_empty() {
            return Err(ReplicationError::NoAliveNodes.into());
        }
        let idle: Vec<Arc<RemoteNode>> = alive
            .iter()
            .filter(|n| n.load() < self.config.load_threshold)
            .cloned()
            .collect();
        if idle.is_empty() {
            debug!("Every alive replica is above the load threshold");
            Ok(alive)
        } else {
            Ok(idle)
        }
    }

    /// Run `text` on the selected nodes and concatenate their results.
    ///
    /// Each dispatched node has its load raised by `load_increment`. Partial
    /// results must share a schema; the first node's column order wins.
    pub async fn distribute_query(&self, text: &str) -> Result<Table> {
        let nodes = self.select_nodes()?;
        debug!("Distributing query to {} replicas", nodes.len());

        let results = join_all(nodes.iter().map(|n| n.query(text))).await;
        for node in &nodes {
            node.add_load(self.config.load_increment);
        }

        let mut parts = Vec::with_capacity(results.len());
        for (node, result) in nodes.iter().zip(results) {
            let table = result.map_err(|e| {
                warn!("Replica {} failed the query: {}", node.address(), e);
                e
            })?;
            parts.push((node.address().to_string(), table));
        }
        merge_tables(parts)
    }

    /// Apply `ops` on every replica through two-phase commit
    pub async fn replicated_write(&self, ops: Vec<WalOp>) -> Result<TxnOutcome> {
        let participants: Vec<Arc<dyn Participant>> = self
            .nodes()
            .into_iter()
            .map(|n| n as Arc<dyn Participant>)
            .collect();
        self.txns.run(participants, ops).await
    }

    /// Every node as a WAL shipping target
    pub fn wal_sinks(&self) -> Vec<Arc<dyn WalSink>> {
        self.nodes()
            .into_iter()
            .map(|n| n as Arc<dyn WalSink>)
            .collect()
    }
}

/// Concatenate partial results, rejecting any whose schema differs from the first
pub fn merge_tables(parts: Vec<(String, Table)>) -> Result<Table> {
    let mut parts = parts.into_iter();
    let Some((_, mut merged)) = parts.next() else {
        return Err(ReplicationError::NoAliveNodes.into());
    };
    let names: Vec<String> = merged
        .schema()
        .field_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    for (source, part) in parts {
        if part.schema() != merged.schema() {
            return Err(ReplicationError::SchemaMismatch(source).into());
        }
        let aligned = part.select(&names)?;
        for row in aligned.rows() {
            merged.append_row(row)?;
        }
    }
    Ok(merged)
}

/// Split `host:port`
pub fn parse_address(address: &str) -> Result<(&str, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("replica address {} is not host:port", address)))?;
    let port = port
        .parse()
        .map_err(|_| Error::Config(format!("replica address {} has a bad port", address)))?;
    Ok((host, port))
}
