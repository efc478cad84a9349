//! Common type definitions for Grizzly

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Position of a row inside a table
pub type RowId = usize;

/// Log sequence number of a WAL entry
pub type Lsn = u64;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
