//! A participant backed by an in-memory catalog
//!
//! PREPARE dry-runs the proposal against copies of the tables it touches and
//! stages it; COMMIT applies the staged operations for real; ABORT drops them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use grizzly_common::config::QueryConfig;
use grizzly_common::error::Result;
use grizzly_query::QueryEngine;
use grizzly_storage::{Table, WalOp, WalTarget};
use grizzly_txn::Proposal;

use crate::protocol::{Request, Response};
use crate::server::ParticipantHandler;

pub struct LocalParticipant {
    catalog: RwLock<HashMap<String, Table>>,
    staged: DashMap<String, Proposal>,
    engine: QueryEngine,
    refuse_prepare: AtomicBool,
}

impl LocalParticipant {
    pub fn new() -> Self {
        Self::with_tables(HashMap::new())
    }

    pub fn with_tables(tables: HashMap<String, Table>) -> Self {
        Self {
            catalog: RwLock::new(tables),
            staged: DashMap::new(),
            engine: QueryEngine::new(&QueryConfig::default()),
            refuse_prepare: AtomicBool::new(false),
        }
    }

    /// Copy of one table
    pub fn table(&self, name: &str) -> Option<Table> {
        self.catalog.read().get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.catalog.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Vote NO on every PREPARE while set
    pub fn set_refuse_prepare(&self, refuse: bool) {
        self.refuse_prepare.store(refuse, Ordering::SeqCst);
    }

    /// Transactions prepared but not yet decided
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Apply operations straight to the catalog
    pub fn apply(&self, ops: &[WalOp]) -> Result<()> {
        let mut catalog = self.catalog.write();
        for op in ops {
            catalog.apply(op)?;
        }
        Ok(())
    }

    fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,
            Request::Query { text } => {
                let result = self.engine.execute(&*self.catalog.read(), &text);
                match result.into_result() {
                    Ok(table) => Response::Rows { table },
                    Err(e) => Response::error(e),
                }
            }
            Request::Prepare { proposal } => self.prepare(proposal),
            Request::Commit { txn_id } => match self.staged.remove(&txn_id) {
                Some((_, proposal)) => match self.apply(&proposal.ops) {
                    Ok(()) => {
                        info!("Committed transaction {}", txn_id);
                        Response::Ack
                    }
                    Err(e) => {
                        warn!("Staged transaction {} failed to apply: {}", txn_id, e);
                        Response::error(e)
                    }
                },
                None => Response::error(format!("transaction {} is not prepared", txn_id)),
            },
            Request::Abort { txn_id } => {
                if self.staged.remove(&txn_id).is_some() {
                    debug!("Dropped staged transaction {}", txn_id);
                }
                Response::Ack
            }
            Request::Replicate { entry } => match self.apply(std::slice::from_ref(&entry.op)) {
                Ok(()) => Response::Ack,
                Err(e) => Response::error(e),
            },
        }
    }

    fn prepare(&self, proposal: Proposal) -> Response {
        if self.refuse_prepare.load(Ordering::SeqCst) {
            return Response::error("participant is refusing new transactions");
        }

        // Dry run against copies of the touched tables
        let mut scratch: HashMap<String, Table> = {
            let catalog = self.catalog.read();
            proposal
                .ops
                .iter()
                .filter_map(|op| {
                    catalog
                        .get(op.table())
                        .map(|t| (op.table().to_string(), t.clone()))
                })
                .collect()
        };
        for op in &proposal.ops {
            if let Err(e) = scratch.apply(op) {
                debug!("Rejecting transaction {}: {}", proposal.txn_id, e);
                return Response::error(e);
            }
        }

        debug!("Staged transaction {}", proposal.txn_id);
        self.staged.insert(proposal.txn_id.clone(), proposal);
        Response::Ack
    }
}

impl Default for LocalParticipant {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParticipantHandler for LocalParticipant {
    async fn handle(&self, request: Request) -> Response {
        self.dispatch(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grizzly_storage::{DataType, Field, Schema, Value};

    fn create_users() -> WalOp {
        WalOp::CreateTable {
            table: "users".to_string(),
            schema: Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("name", DataType::Utf8),
            ])
            .unwrap(),
        }
    }

    fn insert(id: i64, name: &str) -> WalOp {
        WalOp::Insert {
            table: "users".to_string(),
            values: vec![Value::Int64(id), Value::from(name)],
        }
    }

    #[tokio::test]
    async fn test_prepare_stages_until_commit() {
        let node = LocalParticipant::new();
        let proposal = Proposal::new("t1", 1, vec![create_users(), insert(1, "ann")]);

        assert_eq!(node.handle(Request::Prepare { proposal }).await, Response::Ack);
        assert_eq!(node.staged(), 1);
        assert!(node.table("users").is_none());

        let commit = Request::Commit {
            txn_id: "t1".to_string(),
        };
        assert_eq!(node.handle(commit.clone()).await, Response::Ack);
        assert_eq!(node.table("users").unwrap().num_rows(), 1);
        assert!(matches!(node.handle(commit).await, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_invalid_proposal_votes_no() {
        let node = LocalParticipant::new();
        node.apply(&[create_users()]).unwrap();

        let bad = Proposal::new(
            "t2",
            1,
            vec![WalOp::Insert {
                table: "users".to_string(),
                values: vec![Value::Int64(1)],
            }],
        );
        let response = node.handle(Request::Prepare { proposal: bad }).await;
        assert!(matches!(response, Response::Error { .. }));
        assert_eq!(node.staged(), 0);
        assert_eq!(node.table("users").unwrap().num_rows(), 0);
    }

    #[tokio::test]
    async fn test_abort_discards_and_query_reads_catalog() {
        let node = LocalParticipant::new();
        node.apply(&[create_users(), insert(1, "ann"), insert(2, "bob")]).unwrap();

        let proposal = Proposal::new("t3", 1, vec![insert(3, "cy")]);
        node.handle(Request::Prepare { proposal }).await;
        let abort = Request::Abort {
            txn_id: "t3".to_string(),
        };
        assert_eq!(node.handle(abort).await, Response::Ack);
        assert_eq!(node.staged(), 0);

        let response = node
            .handle(Request::Query {
                text: "SELECT name FROM users WHERE id > 1".to_string(),
            })
            .await;
        let table = response.into_table().unwrap();
        assert_eq!(table.row(0).unwrap(), vec![Value::from("bob")]);
        assert_eq!(table.num_rows(), 1);
    }
}
