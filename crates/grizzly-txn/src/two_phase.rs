//! Two-phase commit state machine
//!
//! `Init -> Prepared -> Committed` when every alive participant votes yes,
//! `Init -> Aborted` as soon as one of them votes no or times out. Callers only
//! ever see those four states; there is no half-committed state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use grizzly_common::config::ReplicationConfig;
use grizzly_common::error::{Error, ReplicationError, Result};

use crate::participant::{Participant, Proposal};

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnState {
    Init,
    Prepared,
    Committed,
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnState::Init => "INIT",
            TxnState::Prepared => "PREPARED",
            TxnState::Committed => "COMMITTED",
            TxnState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Timeouts and the dead-participant policy
#[derive(Debug, Clone, Copy)]
pub struct CommitOptions {
    pub prepare_timeout: Duration,
    pub commit_timeout: Duration,
    /// Abort when a participant is down instead of skipping it
    pub require_all_participants: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self::from(&ReplicationConfig::default())
    }
}

impl From<&ReplicationConfig> for CommitOptions {
    fn from(config: &ReplicationConfig) -> Self {
        Self {
            prepare_timeout: Duration::from_millis(config.prepare_timeout_ms),
            commit_timeout: Duration::from_millis(config.commit_timeout_ms),
            require_all_participants: config.require_all_participants,
        }
    }
}

/// What happened to a finished transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnOutcome {
    pub txn_id: String,
    pub state: TxnState,
    /// Participants that were down and never contacted
    pub skipped: Vec<String>,
    /// Participants that could not be told the final decision
    pub failed_delivery: Vec<String>,
    /// Why the transaction aborted
    pub reason: Option<String>,
}

impl TxnOutcome {
    pub fn committed(&self) -> bool {
        self.state == TxnState::Committed
    }

    /// Committed, but some participant may not have applied the write
    pub fn is_partial(&self) -> bool {
        self.committed() && !(self.skipped.is_empty() && self.failed_delivery.is_empty())
    }
}

/// One distributed transaction over a fixed participant set
pub struct TwoPhaseCommit {
    txn_id: String,
    participants: Vec<Arc<dyn Participant>>,
    /// One vote flag per participant
    prepared: Vec<bool>,
    /// Participants found dead during prepare
    skipped: Vec<usize>,
    state: TxnState,
    options: CommitOptions,
    reason: Option<String>,
}

impl TwoPhaseCommit {
    pub fn new(txn_id: impl Into<String>, participants: Vec<Arc<dyn Participant>>) -> Self {
        Self::with_options(txn_id, participants, CommitOptions::default())
    }

    pub fn with_options(
        txn_id: impl Into<String>,
        participants: Vec<Arc<dyn Participant>>,
        options: CommitOptions,
    ) -> Self {
        let n = participants.len();
        Self {
            txn_id: txn_id.into(),
            participants,
            prepared: vec![false; n],
            skipped: Vec::new(),
            state: TxnState::Init,
            options,
            reason: None,
        }
    }

    pub fn txn_id(&self) -> &str {
        &self.txn_id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_committed(&self) -> bool {
        self.state == TxnState::Committed
    }

    /// Vote flags in participant order
    pub fn prepared(&self) -> &[bool] {
        &self.prepared
    }

    /// Phase one: send PREPARE to every alive participant, in order.
    ///
    /// Stops at the first NO vote or timeout and moves to `Aborted`; the ABORT
    /// messages go out in [`commit`](Self::commit). Returns whether every
    /// contacted participant voted yes.
    pub async fn prepare(&mut self, proposal: &Proposal) -> Result<bool> {
        self.expect_state(TxnState::Init, "prepare")?;
        info!(
            "Preparing transaction {} on {} participants",
            self.txn_id,
            self.participants.len()
        );

        for (i, participant) in self.participants.iter().enumerate() {
            if !participant.is_alive() {
                if self.options.require_all_participants {
                    warn!(
                        "Participant {} is down, aborting transaction {}",
                        participant.id(),
                        self.txn_id
                    );
                    self.reason = Some(ReplicationError::Unreachable(participant.id()).to_string());
                    self.state = TxnState::Aborted;
                    return Ok(false);
                }
                warn!(
                    "Skipping dead participant {} for transaction {}",
                    participant.id(),
                    self.txn_id
                );
                self.skipped.push(i);
                continue;
            }

            let vote = match timeout(self.options.prepare_timeout, participant.prepare(proposal)).await
            {
                Ok(vote) => vote,
                Err(_) => Err(ReplicationError::Timeout(millis(self.options.prepare_timeout)).into()),
            };
            match vote {
                Ok(()) => {
                    debug!("Participant {} prepared {}", participant.id(), self.txn_id);
                    self.prepared[i] = true;
                }
                Err(e) => {
                    let failure = ReplicationError::PrepareFailed {
                        txn_id: self.txn_id.clone(),
                        participant: participant.id(),
                        reason: e.to_string(),
                    };
                    warn!("{}", failure);
                    self.reason = Some(failure.to_string());
                    self.state = TxnState::Aborted;
                    return Ok(false);
                }
            }
        }

        self.state = TxnState::Prepared;
        Ok(true)
    }

    /// Phase two: COMMIT if every contacted participant voted yes, otherwise
    /// ABORT. COMMIT goes only to participants that prepared; ABORT goes to
    /// every participant not skipped during prepare.
    pub async fn commit(&mut self) -> Result<TxnOutcome> {
        let all_prepared = self.state == TxnState::Prepared
            && self
                .prepared
                .iter()
                .enumerate()
                .all(|(i, ok)| *ok || self.skipped.contains(&i));

        match self.state {
            TxnState::Prepared if all_prepared => {
                let failed = self.broadcast(Decision::Commit).await;
                self.state = TxnState::Committed;
                info!("Transaction {} committed", self.txn_id);
                grizzly_common::metrics::record_txn_outcome(true);
                Ok(self.outcome(failed))
            }
            TxnState::Prepared | TxnState::Aborted => self.abort().await,
            state => Err(invalid_state(&self.txn_id, state, "commit")),
        }
    }

    /// Send ABORT to every participant not skipped and finish as `Aborted`
    pub async fn abort(&mut self) -> Result<TxnOutcome> {
        if self.state == TxnState::Committed {
            return Err(invalid_state(&self.txn_id, self.state, "abort"));
        }
        let failed = self.broadcast(Decision::Abort).await;
        self.state = TxnState::Aborted;
        info!(
            "Transaction {} aborted: {}",
            self.txn_id,
            self.reason.as_deref().unwrap_or("requested")
        );
        grizzly_common::metrics::record_txn_outcome(false);
        Ok(self.outcome(failed))
    }

    /// Both phases
    pub async fn execute(&mut self, proposal: &Proposal) -> Result<TxnOutcome> {
        self.prepare(proposal).await?;
        self.commit().await
    }

    /// Deliver a decision concurrently; returns the ids that did not
    /// acknowledge it.
    ///
    /// A participant that prepared holds the transaction open, so failing to
    /// reach it is reported even when it is down. Skipped participants never
    /// saw the transaction and are not contacted.
    async fn broadcast(&self, decision: Decision) -> Vec<String> {
        let deadline = self.options.commit_timeout;
        let sends = self
            .participants
            .iter()
            .enumerate()
            .filter(|(i, _)| match decision {
                Decision::Commit => self.prepared[*i],
                Decision::Abort => !self.skipped.contains(i),
            })
            .map(|(i, p)| async move {
                if !p.is_alive() {
                    if !self.prepared[i] {
                        return None;
                    }
                    warn!("{} of {} not delivered, {} is down", decision, self.txn_id, p.id());
                    return Some(p.id());
                }
                let sent = match decision {
                    Decision::Commit => timeout(deadline, p.commit(&self.txn_id)).await,
                    Decision::Abort => timeout(deadline, p.abort(&self.txn_id)).await,
                };
                match sent {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => {
                        warn!("{} of {} failed on {}: {}", decision, self.txn_id, p.id(), e);
                        Some(p.id())
                    }
                    Err(_) => {
                        warn!("{} of {} timed out on {}", decision, self.txn_id, p.id());
                        Some(p.id())
                    }
                }
            });
        futures::future::join_all(sends)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    fn outcome(&self, failed_delivery: Vec<String>) -> TxnOutcome {
        TxnOutcome {
            txn_id: self.txn_id.clone(),
            state: self.state,
            skipped: self
                .skipped
                .iter()
                .map(|&i| self.participants[i].id())
                .collect(),
            failed_delivery,
            reason: self.reason.clone(),
        }
    }

    fn expect_state(&self, expected: TxnState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(invalid_state(&self.txn_id, self.state, action))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Decision {
    Commit,
    Abort,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Commit => "COMMIT",
            Decision::Abort => "ABORT",
        })
    }
}

fn invalid_state(txn_id: &str, state: TxnState, action: &str) -> Error {
    ReplicationError::InvalidState {
        txn_id: txn_id.to_string(),
        state: state.to_string(),
        action: action.to_string(),
    }
    .into()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockParticipant;

    fn proposal() -> Proposal {
        Proposal::new("t1", 1, vec![])
    }

    fn as_dyn(nodes: &[Arc<MockParticipant>]) -> Vec<Arc<dyn Participant>> {
        nodes.iter().map(|n| n.clone() as Arc<dyn Participant>).collect()
    }

    #[tokio::test]
    async fn test_all_prepared_commits() {
        let nodes: Vec<_> = (1..=3).map(|i| MockParticipant::new(&format!("n{}", i))).collect();
        let mut txn = TwoPhaseCommit::new("t1", as_dyn(&nodes));

        let outcome = txn.execute(&proposal()).await.unwrap();
        assert!(outcome.committed());
        assert!(!outcome.is_partial());
        assert_eq!(txn.prepared(), &[true, true, true]);
        for node in &nodes {
            assert_eq!(node.log(), vec!["prepare t1", "commit t1"]);
        }
    }

    #[tokio::test]
    async fn test_failed_prepare_aborts_everyone_alive() {
        let nodes = vec![
            MockParticipant::new("n1"),
            MockParticipant::failing("n2"),
            MockParticipant::new("n3"),
        ];
        let mut txn = TwoPhaseCommit::new("t1", as_dyn(&nodes));

        assert!(!txn.prepare(&proposal()).await.unwrap());
        assert_eq!(txn.state(), TxnState::Aborted);

        let outcome = txn.commit().await.unwrap();
        assert!(!outcome.committed());
        assert!(!txn.is_committed());
        assert!(outcome.reason.unwrap().contains("n2"));

        assert_eq!(nodes[0].log(), vec!["prepare t1", "abort t1"]);
        assert_eq!(nodes[1].log(), vec!["prepare t1", "abort t1"]);
        // fail-fast: n3 never saw PREPARE
        assert_eq!(nodes[2].log(), vec!["abort t1"]);
    }

    #[tokio::test]
    async fn test_dead_participant_is_skipped_and_reported() {
        let nodes = vec![MockParticipant::new("n1"), MockParticipant::new("n2")];
        nodes[1].set_alive(false);
        let mut txn = TwoPhaseCommit::new("t1", as_dyn(&nodes));

        let outcome = txn.execute(&proposal()).await.unwrap();
        assert!(outcome.committed());
        assert!(outcome.is_partial());
        assert_eq!(outcome.skipped, vec!["n2".to_string()]);
        assert!(nodes[1].log().is_empty());
    }

    #[tokio::test]
    async fn test_decision_follows_prepare_not_current_liveness() {
        let nodes: Vec<_> = (1..=3).map(|i| MockParticipant::new(&format!("n{}", i))).collect();
        nodes[2].set_alive(false);
        let mut txn = TwoPhaseCommit::new("t1", as_dyn(&nodes));
        assert!(txn.prepare(&proposal()).await.unwrap());
        assert_eq!(txn.prepared(), &[true, true, false]);

        nodes[1].set_alive(false);
        nodes[2].set_alive(true);
        let outcome = txn.commit().await.unwrap();

        assert!(outcome.committed());
        assert_eq!(outcome.skipped, vec!["n3".to_string()]);
        assert_eq!(outcome.failed_delivery, vec!["n2".to_string()]);
        assert_eq!(nodes[0].log(), vec!["prepare t1", "commit t1"]);
        assert_eq!(nodes[1].log(), vec!["prepare t1"]);
        assert!(nodes[2].log().is_empty());
    }

    #[tokio::test]
    async fn test_abort_reports_prepared_participant_that_went_down() {
        let nodes: Vec<_> = (1..=3).map(|i| MockParticipant::new(&format!("n{}", i))).collect();
        nodes[2].set_alive(false);
        let mut txn = TwoPhaseCommit::new("t1", as_dyn(&nodes));
        assert!(txn.prepare(&proposal()).await.unwrap());

        nodes[0].set_alive(false);
        nodes[2].set_alive(true);
        let outcome = txn.abort().await.unwrap();

        assert_eq!(outcome.state, TxnState::Aborted);
        assert_eq!(outcome.failed_delivery, vec!["n1".to_string()]);
        assert_eq!(nodes[1].log(), vec!["prepare t1", "abort t1"]);
        assert!(nodes[2].log().is_empty());
    }

    #[tokio::test]
    async fn test_require_all_participants_aborts_on_dead_node() {
        let nodes = vec![MockParticipant::new("n1"), MockParticipant::new("n2")];
        nodes[1].set_alive(false);
        let options = CommitOptions {
            require_all_participants: true,
            ..CommitOptions::default()
        };
        let mut txn = TwoPhaseCommit::with_options("t1", as_dyn(&nodes), options);

        let outcome = txn.execute(&proposal()).await.unwrap();
        assert_eq!(outcome.state, TxnState::Aborted);
        assert_eq!(nodes[0].log(), vec!["abort t1"]);
    }

    #[tokio::test]
    async fn test_prepare_timeout_aborts() {
        let nodes = vec![MockParticipant::new("n1"), MockParticipant::slow("n2")];
        let options = CommitOptions {
            prepare_timeout: Duration::from_millis(20),
            ..CommitOptions::default()
        };
        let mut txn = TwoPhaseCommit::with_options("t1", as_dyn(&nodes), options);

        let outcome = txn.execute(&proposal()).await.unwrap();
        assert!(!outcome.committed());
        assert!(outcome.reason.unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_state_machine_rejects_replays() {
        let nodes = vec![MockParticipant::new("n1")];
        let mut txn = TwoPhaseCommit::new("t1", as_dyn(&nodes));
        assert!(txn.commit().await.is_err());

        txn.execute(&proposal()).await.unwrap();
        assert!(txn.prepare(&proposal()).await.is_err());
        assert!(txn.abort().await.is_err());
        assert_eq!(txn.state(), TxnState::Committed);
    }
}
