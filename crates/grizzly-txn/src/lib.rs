//! Distributed transaction support
//!
//! Provides:
//! - The `Participant` seam every replica implements
//! - 2PC (Two-Phase Commit) with fail-fast prepare and per-phase timeouts
//! - Timestamp Oracle
//! - A coordinator that numbers transactions and remembers how they ended

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod participant;
pub mod two_phase;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use grizzly_common::config::ReplicationConfig;
use grizzly_common::error::Result;
use grizzly_common::types::{now_millis, Timestamp};
use grizzly_storage::WalOp;

pub use participant::{Participant, Proposal};
pub use two_phase::{CommitOptions, TwoPhaseCommit, TxnOutcome, TxnState};

/// Transaction coordinator
pub struct TransactionCoordinator {
    /// Timestamp oracle
    tso: TimestampOracle,
    options: CommitOptions,
    /// Final outcome of every transaction run through this coordinator
    history: DashMap<String, TxnOutcome>,
}

impl TransactionCoordinator {
    /// Create a new transaction coordinator
    pub fn new(options: CommitOptions) -> Self {
        Self {
            tso: TimestampOracle::new(),
            options,
            history: DashMap::new(),
        }
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(CommitOptions::from(config))
    }

    /// Begin a new transaction over `participants`
    pub fn begin(&self, participants: Vec<Arc<dyn Participant>>) -> TwoPhaseCommit {
        let txn_id = uuid::Uuid::new_v4().to_string();
        TwoPhaseCommit::with_options(txn_id, participants, self.options)
    }

    /// Run `ops` as one transaction across `participants`
    pub async fn run(
        &self,
        participants: Vec<Arc<dyn Participant>>,
        ops: Vec<WalOp>,
    ) -> Result<TxnOutcome> {
        let mut txn = self.begin(participants);
        let proposal = Proposal::new(txn.txn_id(), self.tso.next(), ops);
        info!(
            "Transaction {} carries {} operations",
            proposal.txn_id,
            proposal.ops.len()
        );

        let outcome = txn.execute(&proposal).await?;
        self.history.insert(outcome.txn_id.clone(), outcome.clone());
        Ok(outcome)
    }

    /// Final state of a finished transaction
    pub fn status(&self, txn_id: &str) -> Option<TxnState> {
        self.history.get(txn_id).map(|o| o.state)
    }

    pub fn outcome(&self, txn_id: &str) -> Option<TxnOutcome> {
        self.history.get(txn_id).map(|o| o.value().clone())
    }

    /// Number of finished transactions
    pub fn finished(&self) -> usize {
        self.history.len()
    }

    pub fn oracle(&self) -> &TimestampOracle {
        &self.tso
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new(CommitOptions::default())
    }
}

/// Timestamp Oracle for global ordering.
///
/// Hands out strictly increasing millisecond timestamps that never fall
/// behind the wall clock.
pub struct TimestampOracle {
    last: AtomicI64,
}

impl TimestampOracle {
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Get next unique timestamp
    pub fn next(&self) -> Timestamp {
        let now = now_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    /// Last timestamp handed out
    pub fn current(&self) -> Timestamp {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockParticipant;

    #[test]
    fn test_oracle_is_strictly_increasing() {
        let tso = TimestampOracle::new();
        let mut last = tso.next();
        for _ in 0..1000 {
            let ts = tso.next();
            assert!(ts > last);
            last = ts;
        }
        assert_eq!(tso.current(), last);
    }

    #[tokio::test]
    async fn test_three_node_abort_when_one_fails_prepare() {
        let n1 = MockParticipant::new("node-1");
        let n2 = MockParticipant::failing("node-2");
        let n3 = MockParticipant::new("node-3");
        let participants: Vec<Arc<dyn Participant>> = vec![n1.clone(), n2.clone(), n3.clone()];

        let coordinator = TransactionCoordinator::default();
        let outcome = coordinator.run(participants, vec![]).await.unwrap();

        assert!(!outcome.committed());
        assert_eq!(coordinator.status(&outcome.txn_id), Some(TxnState::Aborted));
        let abort = format!("abort {}", outcome.txn_id);
        assert!(n1.log().contains(&abort));
        assert!(n3.log().contains(&abort));
        assert!(!n1.log().iter().any(|m| m.starts_with("commit")));
        assert!(!n3.log().iter().any(|m| m.starts_with("commit")));
    }

    #[tokio::test]
    async fn test_history_records_commits() {
        let coordinator = TransactionCoordinator::default();
        let node = MockParticipant::new("solo");
        let outcome = coordinator
            .run(vec![node as Arc<dyn Participant>], vec![])
            .await
            .unwrap();
        assert!(outcome.committed());
        assert_eq!(coordinator.finished(), 1);
        assert_eq!(coordinator.outcome(&outcome.txn_id), Some(outcome));
    }
}
