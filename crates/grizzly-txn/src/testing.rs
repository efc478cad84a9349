//! In-memory participants for coordinator tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use grizzly_common::error::{Error, Result};

use crate::participant::{Participant, Proposal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Vote,
    Refuse,
    Stall,
}

pub struct MockParticipant {
    id: String,
    alive: AtomicBool,
    behavior: Behavior,
    log: Mutex<Vec<String>>,
}

impl MockParticipant {
    fn build(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            alive: AtomicBool::new(true),
            behavior,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn new(id: &str) -> Arc<Self> {
        Self::build(id, Behavior::Vote)
    }

    /// Votes NO on every PREPARE
    pub fn failing(id: &str) -> Arc<Self> {
        Self::build(id, Behavior::Refuse)
    }

    /// Never answers PREPARE
    pub fn slow(id: &str) -> Arc<Self> {
        Self::build(id, Behavior::Stall)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Messages received, in order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Participant for MockParticipant {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn prepare(&self, proposal: &Proposal) -> Result<()> {
        self.log.lock().push(format!("prepare {}", proposal.txn_id));
        match self.behavior {
            Behavior::Vote => Ok(()),
            Behavior::Refuse => Err(Error::Internal("disk full".to_string())),
            Behavior::Stall => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
    }

    async fn commit(&self, txn_id: &str) -> Result<()> {
        self.log.lock().push(format!("commit {}", txn_id));
        Ok(())
    }

    async fn abort(&self, txn_id: &str) -> Result<()> {
        self.log.lock().push(format!("abort {}", txn_id));
        Ok(())
    }
}
