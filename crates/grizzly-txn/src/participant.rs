//! The seam between a commit coordinator and the nodes it coordinates

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use grizzly_common::error::Result;
use grizzly_common::types::Timestamp;
use grizzly_storage::WalOp;

/// The write a transaction asks every participant to apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub txn_id: String,
    /// Commit timestamp handed out by the oracle
    pub timestamp: Timestamp,
    pub ops: Vec<WalOp>,
}

impl Proposal {
    pub fn new(txn_id: impl Into<String>, timestamp: Timestamp, ops: Vec<WalOp>) -> Self {
        Self {
            txn_id: txn_id.into(),
            timestamp,
            ops,
        }
    }
}

/// A node taking part in two-phase commit.
///
/// `prepare` returning `Ok` is a YES vote: the participant has staged the
/// proposal and promises to apply it on COMMIT. Any error is a NO vote.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Stable identifier used in logs and outcomes
    fn id(&self) -> String;

    /// Last known liveness; dead participants are not contacted
    fn is_alive(&self) -> bool;

    async fn prepare(&self, proposal: &Proposal) -> Result<()>;

    async fn commit(&self, txn_id: &str) -> Result<()>;

    async fn abort(&self, txn_id: &str) -> Result<()>;
}
