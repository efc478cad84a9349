//! Remote replicas as seen by the coordinator

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::timeout;
use tracing::debug;

use grizzly_common::error::{ReplicationError, Result};
use grizzly_storage::{Table, WalEntry, WalSink};
use grizzly_txn::{Participant, Proposal};

use crate::protocol::{Request, Response};
use crate::transport::NodeTransport;

/// Health and load of a node as last observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeState {
    /// Simulated contention in `[0, 1]`
    pub load: f64,
    pub is_alive: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            load: 0.0,
            is_alive: true,
        }
    }
}

/// A replica reachable at `host:port`
pub struct RemoteNode {
    host: String,
    port: u16,
    address: String,
    state: RwLock<NodeState>,
    transport: Arc<dyn NodeTransport>,
}

impl RemoteNode {
    pub fn new(host: impl Into<String>, port: u16, transport: Arc<dyn NodeTransport>) -> Self {
        let host = host.into();
        let address = format!("{}:{}", host, port);
        Self {
            host,
            port,
            address,
            state: RwLock::new(NodeState::default()),
            transport,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn load(&self) -> f64 {
        self.state.read().load
    }

    pub fn set_alive(&self, alive: bool) {
        self.state.write().is_alive = alive;
    }

    /// Raise the load by `delta`, saturating at 1.0
    pub fn add_load(&self, delta: f64) {
        let mut state = self.state.write();
        state.load = (state.load + delta).clamp(0.0, 1.0);
    }

    pub fn reset_load(&self) {
        self.state.write().load = 0.0;
    }

    /// Ping the node and record whether it answered in time
    pub async fn health_check(&self, limit: Duration) -> bool {
        let answered = matches!(
            timeout(limit, self.transport.send(&self.address, &Request::Ping)).await,
            Ok(Ok(Response::Pong))
        );
        debug!("Health check of {}: {}", self.address, answered);
        self.set_alive(answered);
        answered
    }

    /// Run query text on the node
    pub async fn query(&self, text: &str) -> Result<Table> {
        self.request(&Request::Query {
            text: text.to_string(),
        })
        .await?
        .into_table()
    }

    pub async fn request(&self, request: &Request) -> Result<Response> {
        self.transport.send(&self.address, request).await
    }

    async fn expect_ack(&self, request: &Request) -> Result<()> {
        self.request(request).await?.into_ack()
    }
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Participant for RemoteNode {
    fn id(&self) -> String {
        self.address.clone()
    }

    fn is_alive(&self) -> bool {
        self.state.read().is_alive
    }

    async fn prepare(&self, proposal: &Proposal) -> Result<()> {
        self.expect_ack(&Request::Prepare {
            proposal: proposal.clone(),
        })
        .await
    }

    async fn commit(&self, txn_id: &str) -> Result<()> {
        self.expect_ack(&Request::Commit {
            txn_id: txn_id.to_string(),
        })
        .await
    }

    async fn abort(&self, txn_id: &str) -> Result<()> {
        self.expect_ack(&Request::Abort {
            txn_id: txn_id.to_string(),
        })
        .await
    }
}

#[async_trait]
impl WalSink for RemoteNode {
    fn name(&self) -> String {
        self.address.clone()
    }

    async fn ship(&self, entry: &WalEntry) -> Result<()> {
        if !Participant::is_alive(self) {
            return Err(ReplicationError::Unreachable(self.address.clone()).into());
        }
        self.expect_ack(&Request::Replicate {
            entry: entry.clone(),
        })
        .await
    }
}
