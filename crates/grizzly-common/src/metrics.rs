//! Metrics for Grizzly
//!
//! Thin wrappers over the `metrics` facade. Nothing here installs an exporter;
//! the embedding application decides where the numbers go.

use metrics::{counter, histogram};

// ============================================================================
// Query Metrics
// ============================================================================

/// Record a finished query
pub fn record_query(duration_ms: f64, failed: bool) {
    counter!("grizzly_queries_total").increment(1);
    if failed {
        counter!("grizzly_queries_failed_total").increment(1);
    }
    histogram!("grizzly_query_duration_ms").record(duration_ms);
}

// ============================================================================
// Storage Metrics
// ============================================================================

/// Record a WAL append of `bytes` encoded bytes
pub fn record_wal_append(bytes: u64) {
    counter!("grizzly_wal_appends_total").increment(1);
    counter!("grizzly_wal_bytes_total").increment(bytes);
}

/// Record a block appended to a chain
pub fn record_block_appended() {
    counter!("grizzly_blocks_appended_total").increment(1);
}

/// Record a full index build
pub fn record_index_build(rows: u64) {
    counter!("grizzly_index_builds_total").increment(1);
    histogram!("grizzly_index_build_rows").record(rows as f64);
}

// ============================================================================
// Replication Metrics
// ============================================================================

/// Record the outcome of a two-phase commit
pub fn record_txn_outcome(committed: bool) {
    let outcome = if committed { "committed" } else { "aborted" };
    counter!("grizzly_txn_total", "outcome" => outcome).increment(1);
}

/// Record a node changing liveness during a health check
pub fn record_failover(node: &str, alive: bool) {
    let state = if alive { "up" } else { "down" };
    counter!("grizzly_node_transitions_total", "node" => node.to_string(), "state" => state)
        .increment(1);
}
