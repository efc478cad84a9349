//! Integration tests for Grizzly
//!
//! These tests drive the storage, query, transaction and cluster crates
//! together, mostly through the `Engine` session object.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::oneshot;

use grizzly::Engine;
use grizzly_cluster::{
    InProcessTransport, LocalParticipant, ParticipantHandler, ParticipantServer,
    ReplicationCoordinator, Request, Response, TcpTransport,
};
use grizzly_common::config::{Config, ReplicationConfig, SyncMode};
use grizzly_common::error::Error;
use grizzly_query::QueryEngine;
use grizzly_storage::wal::read_log;
use grizzly_storage::{
    load_rows, DataType, Field, IndexKey, IndexKind, Schema, Table, Value, WalOp, WalTarget,
};

fn schema(fields: &[&str]) -> Schema {
    Schema::new(
        fields
            .iter()
            .map(|name| Field::new(*name, DataType::Int64))
            .collect(),
    )
    .unwrap()
}

fn int_table(fields: &[&str], rows: &[&[i64]]) -> Table {
    load_rows(
        schema(fields),
        rows.iter()
            .map(|row| row.iter().map(|v| Value::Int64(*v)).collect()),
    )
    .unwrap()
}

fn id_value_table() -> Table {
    int_table(&["id", "value"], &[&[1, 10], &[2, 20], &[3, 30]])
}

/// Test helper to create an engine over a fresh directory
async fn create_test_engine() -> (Engine, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = Engine::open(test_config(&temp_dir))
        .await
        .expect("Failed to open engine");
    (engine, temp_dir)
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.wal.sync_mode = SyncMode::Never;
    config
}

fn insert(table: &str, values: &[i64]) -> WalOp {
    WalOp::Insert {
        table: table.to_string(),
        values: values.iter().map(|v| Value::Int64(*v)).collect(),
    }
}

// ============================================================================
// Query Scenarios
// ============================================================================

#[test]
fn test_scenario_a_filter() {
    let result = QueryEngine::default().execute(&id_value_table(), "SELECT * FROM table WHERE value > 15");
    assert!(result.is_ok());
    let ids: Vec<Value> = result.rows().into_iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids, vec![Value::Int64(2), Value::Int64(3)]);
}

#[test]
fn test_scenario_b_aggregates() {
    let engine = QueryEngine::default();
    let table = id_value_table();

    let sum = engine.execute(&table, "SELECT SUM(value) FROM table");
    assert_eq!(sum.value(0, 0), Some(Value::Int64(60)));

    let avg = engine.execute(&table, "SELECT AVG(value) FROM table");
    assert_eq!(avg.value(0, 0), Some(Value::Float64(20.0)));
}

#[test]
fn test_scenario_c_join() {
    let mut catalog = HashMap::new();
    catalog.insert("a".to_string(), int_table(&["id", "v"], &[&[1, 10], &[2, 20]]));
    catalog.insert("b".to_string(), int_table(&["id", "o"], &[&[1, 100], &[2, 200]]));

    let result = QueryEngine::default().execute(&catalog, "SELECT v, o FROM a JOIN b ON id = id");
    assert_eq!(
        result.rows(),
        vec![
            vec![Value::Int64(10), Value::Int64(100)],
            vec![Value::Int64(20), Value::Int64(200)],
        ]
    );
}

#[tokio::test]
async fn test_scenario_d_hash_index_through_engine() {
    let (mut engine, _temp_dir) = create_test_engine().await;
    engine.create_table("t", schema(&["id"])).await.unwrap();
    for id in [1, 2, 1, 3] {
        engine.insert("t", vec![Value::Int64(id)]).await.unwrap();
    }
    engine.build_index("t", "id", IndexKind::Hash).unwrap();

    let index = engine.table("t").unwrap().fresh_index("id").unwrap();
    assert_eq!(index.lookup(&IndexKey::from(1i64)), vec![0, 2]);

    // Indexed and scanned answers agree
    let result = engine.query("SELECT * FROM t WHERE id = 1");
    assert_eq!(result.num_rows(), 2);
}

// ============================================================================
// Two-Phase Commit
// ============================================================================

/// Wraps a participant and records every request kind it sees
struct Recording {
    inner: LocalParticipant,
    seen: Mutex<Vec<&'static str>>,
}

impl Recording {
    fn new(inner: LocalParticipant) -> Arc<Self> {
        Arc::new(Self {
            inner,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<&'static str> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ParticipantHandler for Recording {
    async fn handle(&self, request: Request) -> Response {
        let kind = match &request {
            Request::Ping => "ping",
            Request::Query { .. } => "query",
            Request::Prepare { .. } => "prepare",
            Request::Commit { .. } => "commit",
            Request::Abort { .. } => "abort",
            Request::Replicate { .. } => "replicate",
        };
        self.seen.lock().unwrap().push(kind);
        self.inner.handle(request).await
    }
}

fn replica_with_table() -> LocalParticipant {
    let mut tables = HashMap::new();
    tables.insert("t".to_string(), int_table(&["id"], &[]));
    LocalParticipant::with_tables(tables)
}

#[tokio::test]
async fn test_scenario_e_failed_prepare_aborts_everywhere() {
    let transport = Arc::new(InProcessTransport::new());
    let coordinator = ReplicationCoordinator::new(&ReplicationConfig::default(), transport.clone());

    let nodes: Vec<Arc<Recording>> = (0..3).map(|_| Recording::new(replica_with_table())).collect();
    nodes[1].inner.set_refuse_prepare(true);
    for (i, node) in nodes.iter().enumerate() {
        let port = 7001 + u16::try_from(i).unwrap();
        transport.register(format!("node{}:{}", i + 1, port), node.clone());
        coordinator.add_replica(&format!("node{}", i + 1), port);
    }

    let outcome = coordinator.replicated_write(vec![insert("t", &[1])]).await.unwrap();
    assert!(!outcome.committed());
    assert!(outcome.reason.is_some());

    assert_eq!(nodes[0].seen(), vec!["prepare", "abort"]);
    assert_eq!(nodes[1].seen(), vec!["prepare", "abort"]);
    assert_eq!(nodes[2].seen(), vec!["abort"]);
    for node in &nodes {
        assert_eq!(node.inner.table("t").unwrap().num_rows(), 0);
        assert_eq!(node.inner.staged(), 0);
    }
}

#[tokio::test]
async fn test_two_phase_commit_over_tcp() {
    let mut replicas = Vec::new();
    let mut shutdowns = Vec::new();
    for _ in 0..2 {
        let server = ParticipantServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handler = Arc::new(replica_with_table());
        let (tx, rx) = oneshot::channel::<()>();
        let served = handler.clone();
        tokio::spawn(async move {
            server
                .run_until(served, async {
                    rx.await.ok();
                })
                .await
        });
        replicas.push((addr, handler));
        shutdowns.push(tx);
    }

    let transport = Arc::new(TcpTransport::new(Duration::from_secs(2)));
    let coordinator = ReplicationCoordinator::new(&ReplicationConfig::default(), transport);
    for (addr, _) in &replicas {
        coordinator.add_replica(&addr.ip().to_string(), addr.port());
    }
    assert_eq!(coordinator.failover_check().await, 2);

    let outcome = coordinator
        .replicated_write(vec![insert("t", &[1]), insert("t", &[2])])
        .await
        .unwrap();
    assert!(outcome.committed());
    for (_, handler) in &replicas {
        assert_eq!(handler.table("t").unwrap().num_rows(), 2);
    }

    let merged = coordinator.distribute_query("SELECT id FROM t").await.unwrap();
    assert_eq!(merged.num_rows(), 4);

    // A replica that goes away is found by the next health check
    shutdowns.pop().unwrap().send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.failover_check().await, 1);
    let partial = coordinator
        .replicated_write(vec![insert("t", &[3])])
        .await
        .unwrap();
    assert!(partial.committed());
    assert_eq!(partial.skipped.len(), 1);
    assert_eq!(replicas[0].1.table("t").unwrap().num_rows(), 3);
}

// ============================================================================
// Engine Durability
// ============================================================================

#[tokio::test]
async fn test_engine_checkpoint_and_recover() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut engine = Engine::open(test_config(&temp_dir)).await.unwrap();
        engine.create_table("t", schema(&["id", "value"])).await.unwrap();
        engine
            .load_rows("t", vec![vec![Value::Int64(1), Value::Int64(10)]])
            .await
            .unwrap();
        engine.checkpoint().await.unwrap();
        engine
            .load_rows(
                "t",
                vec![
                    vec![Value::Int64(2), Value::Int64(20)],
                    vec![Value::Int64(3), Value::Null],
                ],
            )
            .await
            .unwrap();
        engine.update("t", "value", 2, Value::Int64(30)).await.unwrap();
        engine.checkpoint().await.unwrap();
        engine.delete("t", 0).await.unwrap();
    }

    let mut engine = Engine::open(test_config(&temp_dir)).await.unwrap();
    let report = engine.recover().await.unwrap();
    assert_eq!(report.tables_restored, 1);
    assert_eq!(report.blocks_verified, 2);
    assert_eq!(report.entries_replayed, 1);

    let result = engine.query("SELECT SUM(value) FROM t");
    assert_eq!(result.value(0, 0), Some(Value::Int64(50)));
    assert!(engine.chain("t").unwrap().verify_chain().is_ok());
}

#[tokio::test]
async fn test_wal_replay_is_idempotent() {
    let (mut engine, temp_dir) = create_test_engine().await;
    engine.create_table("t", schema(&["id"])).await.unwrap();
    for id in 0..5 {
        engine.insert("t", vec![Value::Int64(id)]).await.unwrap();
    }
    engine.update("t", "id", 4, Value::Int64(40)).await.unwrap();
    engine.delete("t", 1).await.unwrap();

    let config = test_config(&temp_dir);
    let entries = read_log(config.storage.wal_path(), &config.storage.wal)
        .await
        .unwrap();
    assert_eq!(entries.len(), 8);

    let mut first: HashMap<String, Table> = HashMap::new();
    let mut second: HashMap<String, Table> = HashMap::new();
    for entry in &entries {
        first.apply(&entry.op).unwrap();
    }
    for entry in &entries {
        second.apply(&entry.op).unwrap();
    }
    assert_eq!(first, second);
    assert_eq!(&first["t"], engine.table("t").unwrap());
}

#[tokio::test]
async fn test_tampered_block_fails_recovery() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut engine = Engine::open(test_config(&temp_dir)).await.unwrap();
        engine.create_table("t", schema(&["id"])).await.unwrap();
        engine.insert("t", vec![Value::Int64(1)]).await.unwrap();
        engine.checkpoint().await.unwrap();
    }

    let block = temp_dir.path().join("data").join("blocks").join("t").join("0.block");
    let forged = int_table(&["id"], &[&[999]]);
    tokio::fs::write(&block, bincode::serialize(&forged).unwrap())
        .await
        .unwrap();

    let mut engine = Engine::open(test_config(&temp_dir)).await.unwrap();
    let err = engine.recover().await.unwrap_err();
    assert!(matches!(err, Error::Integrity(_)), "{}", err);
}

#[tokio::test]
async fn test_engine_replicated_write_reaches_replicas() {
    let (mut engine, _temp_dir) = create_test_engine().await;

    let server = ParticipantServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let replica = Arc::new(LocalParticipant::new());
    let served = replica.clone();
    tokio::spawn(async move { server.run(served).await });

    engine.add_replica(&addr.ip().to_string(), addr.port());
    assert_eq!(engine.failover_check().await, 1);

    // Logged writes are shipped as they happen
    engine.create_table("t", schema(&["id"])).await.unwrap();
    engine.insert("t", vec![Value::Int64(1)]).await.unwrap();
    assert_eq!(replica.table("t").unwrap().num_rows(), 1);

    let outcome = engine
        .replicated_write(vec![insert("t", &[2]), insert("t", &[3])])
        .await
        .unwrap();
    assert!(outcome.committed());
    assert_eq!(engine.table("t").unwrap().num_rows(), 3);
    assert_eq!(replica.table("t").unwrap(), *engine.table("t").unwrap());

    // Committed ops are logged once locally and not re-shipped
    assert_eq!(engine.wal().unwrap().len().await, 4);

    let remote = engine.distribute_query("SELECT id FROM t ORDER BY id DESC").await.unwrap();
    assert_eq!(remote.num_rows(), 3);
}
