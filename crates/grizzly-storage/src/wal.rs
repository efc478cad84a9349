//! Write-Ahead Log (WAL) implementation
//!
//! Each record is one line: `<crc32 hex> <base64 payload>`, where the payload is
//! the JSON entry passed through [`WalCodec`]. The CRC covers the base64 text.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use grizzly_common::config::{SyncMode, WalConfig};
use grizzly_common::error::{Result, SchemaError, StorageError};
use grizzly_common::metrics;
use grizzly_common::types::{now_millis, Lsn, RowId, Timestamp};

use crate::codec::WalCodec;
use crate::schema::{check_table_name, Schema};
use crate::table::Table;
use crate::value::Value;

/// A mutating operation, with enough detail to reapply it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalOp {
    CreateTable { table: String, schema: Schema },
    Insert { table: String, values: Vec<Value> },
    Update {
        table: String,
        field: String,
        row: RowId,
        value: Value,
    },
    Delete { table: String, row: RowId },
    DropTable { table: String },
}

impl WalOp {
    /// Target table name
    pub fn table(&self) -> &str {
        match self {
            WalOp::CreateTable { table, .. }
            | WalOp::Insert { table, .. }
            | WalOp::Update { table, .. }
            | WalOp::Delete { table, .. }
            | WalOp::DropTable { table } => table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WalOp::CreateTable { .. } => "create_table",
            WalOp::Insert { .. } => "insert",
            WalOp::Update { .. } => "update",
            WalOp::Delete { .. } => "delete",
            WalOp::DropTable { .. } => "drop_table",
        }
    }
}

/// One logged operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: Lsn,
    /// Milliseconds since the Unix epoch
    pub timestamp: Timestamp,
    pub op: WalOp,
}

/// Something logged operations can be reapplied to
pub trait WalTarget {
    /// Report whether `apply` would succeed, without changing anything
    fn check(&self, op: &WalOp) -> Result<()>;

    fn apply(&mut self, op: &WalOp) -> Result<()>;
}

/// A single table ignores the table name carried by each op
impl WalTarget for Table {
    fn check(&self, op: &WalOp) -> Result<()> {
        match op {
            WalOp::CreateTable { .. } => Ok(()),
            WalOp::Insert { values, .. } => self.check_row(values),
            WalOp::Update {
                field, row, value, ..
            } => self.check_set(field, *row, value),
            WalOp::Delete { row, .. } => {
                let len = self.num_rows();
                if *row < len {
                    Ok(())
                } else {
                    Err(SchemaError::RowOutOfBounds { row: *row, len }.into())
                }
            }
            WalOp::DropTable { table } => Err(single_table_drop(table)),
        }
    }

    fn apply(&mut self, op: &WalOp) -> Result<()> {
        match op {
            WalOp::CreateTable { schema, .. } => {
                *self = Table::new(schema.clone());
            }
            WalOp::Insert { values, .. } => {
                self.append_row(values.clone())?;
            }
            WalOp::Update {
                field, row, value, ..
            } => self.set(field, *row, value.clone())?,
            WalOp::Delete { row, .. } => {
                self.delete_row(*row)?;
            }
            WalOp::DropTable { table } => return Err(single_table_drop(table)),
        }
        Ok(())
    }
}

fn single_table_drop(table: &str) -> grizzly_common::error::Error {
    StorageError::WalError(format!("cannot replay a drop of {} into a lone table", table)).into()
}

/// A catalog of named tables
impl WalTarget for HashMap<String, Table> {
    fn check(&self, op: &WalOp) -> Result<()> {
        match op {
            WalOp::CreateTable { table, .. } => {
                check_table_name(table)?;
                if self.contains_key(table) {
                    return Err(SchemaError::TableExists(table.clone()).into());
                }
                Ok(())
            }
            WalOp::DropTable { table } => {
                if self.contains_key(table) {
                    Ok(())
                } else {
                    Err(SchemaError::TableNotFound(table.clone()).into())
                }
            }
            _ => self
                .get(op.table())
                .ok_or_else(|| SchemaError::TableNotFound(op.table().to_string()))?
                .check(op),
        }
    }

    fn apply(&mut self, op: &WalOp) -> Result<()> {
        match op {
            WalOp::CreateTable { table, schema } => {
                WalTarget::check(self, op)?;
                self.insert(table.clone(), Table::new(schema.clone()));
                Ok(())
            }
            WalOp::DropTable { table } => self
                .remove(table)
                .map(|_| ())
                .ok_or_else(|| SchemaError::TableNotFound(table.clone()).into()),
            _ => self
                .get_mut(op.table())
                .ok_or_else(|| SchemaError::TableNotFound(op.table().to_string()))?
                .apply(op),
        }
    }
}

/// Receives every entry after it is durable locally
#[async_trait]
pub trait WalSink: Send + Sync {
    fn name(&self) -> String;

    async fn ship(&self, entry: &WalEntry) -> Result<()>;
}

struct WalState {
    file: File,
    /// Bytes of whole records in the file
    len: u64,
    entries: Vec<WalEntry>,
    next_seq: Lsn,
    unsynced: usize,
    /// Fail the next write after this many bytes reach the file
    #[cfg(test)]
    fail_after: Option<usize>,
}

/// Write-Ahead Log for durability
pub struct WriteAheadLog {
    /// Path to the log file
    path: PathBuf,
    codec: WalCodec,
    sync_mode: SyncMode,
    /// File handle and in-memory copy of the current epoch
    state: Mutex<WalState>,
    replicas: RwLock<Vec<Arc<dyn WalSink>>>,
}

impl WriteAheadLog {
    /// Open or create the log at `path`, recovering any existing records
    pub async fn open(path: impl AsRef<Path>, config: &WalConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening WAL at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let codec = WalCodec::from_config(config)?;
        let recovered = if tokio::fs::try_exists(&path).await? {
            decode_log(&tokio::fs::read(&path).await?, &codec)?
        } else {
            Recovered::default()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if recovered.torn {
            warn!(
                "Dropping torn record at end of WAL {:?} (keeping {} bytes)",
                path, recovered.valid_len
            );
            file.set_len(recovered.valid_len).await?;
        }

        let next_seq = recovered.entries.last().map_or(0, |e| e.seq + 1);
        info!("WAL recovered {} entries", recovered.entries.len());

        Ok(Self {
            path,
            codec,
            sync_mode: config.sync_mode,
            state: Mutex::new(WalState {
                file,
                len: recovered.valid_len,
                entries: recovered.entries,
                next_seq,
                unsynced: 0,
                #[cfg(test)]
                fail_after: None,
            }),
            replicas: RwLock::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ship every future entry to `sink`
    pub fn add_replica(&self, sink: Arc<dyn WalSink>) {
        info!("Shipping WAL to replica {}", sink.name());
        self.replicas.write().push(sink);
    }

    /// Append an operation stamped with the current time
    pub async fn append(&self, op: WalOp) -> Result<Lsn> {
        self.append_at(op, now_millis()).await
    }

    /// Append an operation with an explicit timestamp
    pub async fn append_at(&self, op: WalOp, timestamp: Timestamp) -> Result<Lsn> {
        let entry = self.write(op, timestamp).await?;
        self.ship(&entry).await;
        Ok(entry.seq)
    }

    /// Append without shipping, for writes the replicas already received
    /// through two-phase commit
    pub async fn append_local(&self, op: WalOp, timestamp: Timestamp) -> Result<Lsn> {
        Ok(self.write(op, timestamp).await?.seq)
    }

    async fn write(&self, op: WalOp, timestamp: Timestamp) -> Result<WalEntry> {
        let entry = {
            let mut state = self.state.lock().await;
            let entry = WalEntry {
                seq: state.next_seq,
                timestamp,
                op,
            };
            let line = encode_line(&entry, &self.codec)?;
            if let Err(e) = write_record(&mut state, line.as_bytes(), self.sync_mode).await {
                // A partial record here would sit in the middle of the log
                // once the next append lands
                warn!("WAL append failed, truncating to {} bytes: {}", state.len, e);
                let len = state.len;
                state.file.set_len(len).await?;
                return Err(e.into());
            }
            state.len += line.len() as u64;
            state.next_seq += 1;
            state.entries.push(entry.clone());
            metrics::record_wal_append(line.len() as u64);
            entry
        };

        debug!(seq = entry.seq, kind = entry.op.kind(), table = entry.op.table(), "WAL append");
        Ok(entry)
    }

    async fn ship(&self, entry: &WalEntry) {
        let replicas: Vec<Arc<dyn WalSink>> = self.replicas.read().clone();
        for replica in replicas {
            if let Err(e) = replica.ship(entry).await {
                warn!("Failed to ship WAL entry {} to {}: {}", entry.seq, replica.name(), e);
            }
        }
    }

    /// Entries of the current epoch, in order
    pub async fn entries(&self) -> Vec<WalEntry> {
        self.state.lock().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Reapply every entry to `target`; returns how many were applied
    pub async fn replay<T: WalTarget + ?Sized>(&self, target: &mut T) -> Result<usize> {
        let entries = self.entries().await;
        let applied = apply_entries(&entries, target, None)?;
        info!("Replayed {} WAL entries", applied);
        Ok(applied)
    }

    /// Reapply entries up to and including time `until`
    pub async fn replay_to_timestamp<T: WalTarget + ?Sized>(
        &self,
        target: &mut T,
        until: Timestamp,
    ) -> Result<usize> {
        let entries = self.entries().await;
        let applied = apply_entries(&entries, target, Some(until))?;
        info!("Replayed {} WAL entries up to {}", applied, until);
        Ok(applied)
    }

    /// Sync the WAL to disk
    pub async fn sync(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.file.flush().await?;
        state.file.sync_data().await?;
        state.unsynced = 0;
        Ok(())
    }

    /// Discard the log. Callers must have captured its effects elsewhere first.
    pub async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.file.flush().await?;
        state.file.set_len(0).await?;
        state.file.sync_all().await?;
        let dropped = state.entries.len();
        state.entries.clear();
        state.len = 0;
        state.unsynced = 0;
        info!("WAL committed, discarded {} entries", dropped);
        Ok(())
    }
}

async fn write_record(state: &mut WalState, line: &[u8], sync_mode: SyncMode) -> std::io::Result<()> {
    #[cfg(test)]
    {
        if let Some(keep) = state.fail_after.take() {
            state.file.write_all(&line[..keep.min(line.len())]).await?;
            state.file.flush().await?;
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        }
    }

    state.file.write_all(line).await?;
    match sync_mode {
        SyncMode::Never => state.file.flush().await?,
        SyncMode::PerEntry => state.file.sync_data().await?,
        SyncMode::Batched(n) => {
            state.unsynced += 1;
            if state.unsynced >= n {
                state.file.sync_data().await?;
                state.unsynced = 0;
            } else {
                state.file.flush().await?;
            }
        }
    }
    Ok(())
}

/// Decode a log file without opening it for writing
pub async fn read_log(path: impl AsRef<Path>, config: &WalConfig) -> Result<Vec<WalEntry>> {
    let codec = WalCodec::from_config(config)?;
    let bytes = tokio::fs::read(path.as_ref()).await?;
    Ok(decode_log(&bytes, &codec)?.entries)
}

/// Apply `entries` in order, stopping before the first one later than `until`
pub fn apply_entries<T: WalTarget + ?Sized>(
    entries: &[WalEntry],
    target: &mut T,
    until: Option<Timestamp>,
) -> Result<usize> {
    let mut applied = 0;
    for entry in entries {
        if until.is_some_and(|t| entry.timestamp > t) {
            break;
        }
        target.apply(&entry.op)?;
        applied += 1;
    }
    Ok(applied)
}

fn encode_line(entry: &WalEntry, codec: &WalCodec) -> Result<String> {
    let payload = codec.encode(&serde_json::to_vec(entry)?)?;
    Ok(format!("{:08x} {}\n", crc32fast::hash(payload.as_bytes()), payload))
}

fn decode_line(line: &[u8], codec: &WalCodec) -> Result<WalEntry> {
    let line = std::str::from_utf8(line)
        .map_err(|_| StorageError::CorruptData("record is not UTF-8".to_string()))?;
    let (crc, payload) = line
        .split_once(' ')
        .ok_or_else(|| StorageError::CorruptData("record has no checksum".to_string()))?;
    let crc = u32::from_str_radix(crc, 16)
        .map_err(|_| StorageError::CorruptData(format!("bad checksum field {:?}", crc)))?;
    if crc != crc32fast::hash(payload.as_bytes()) {
        return Err(StorageError::CorruptData("checksum mismatch".to_string()).into());
    }
    Ok(serde_json::from_slice(&codec.decode(payload)?)?)
}

#[derive(Default)]
struct Recovered {
    entries: Vec<WalEntry>,
    valid_len: u64,
    torn: bool,
}

/// A bad final record (or one missing its newline) is torn and dropped;
/// a bad record anywhere else is corruption.
fn decode_log(bytes: &[u8], codec: &WalCodec) -> Result<Recovered> {
    let mut recovered = Recovered::default();
    let mut pos = 0;
    while pos < bytes.len() {
        let newline = bytes[pos..].iter().position(|&b| b == b'\n').map(|i| pos + i);
        let (line, next) = match newline {
            Some(end) => (&bytes[pos..end], end + 1),
            None => (&bytes[pos..], bytes.len()),
        };
        let is_last = next >= bytes.len();

        if newline.is_none() {
            recovered.torn = true;
            break;
        }
        if !line.is_empty() {
            match decode_line(line, codec) {
                Ok(entry) => recovered.entries.push(entry),
                Err(_) if is_last => {
                    recovered.torn = true;
                    break;
                }
                Err(e) => {
                    return Err(StorageError::WalError(format!(
                        "record at byte {}: {}",
                        pos, e
                    ))
                    .into())
                }
            }
        }
        pos = next;
        recovered.valid_len = pos as u64;
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::value::DataType;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("value", DataType::Int64),
        ])
        .unwrap()
    }

    fn ops() -> Vec<WalOp> {
        vec![
            WalOp::CreateTable {
                table: "t".into(),
                schema: schema(),
            },
            WalOp::Insert {
                table: "t".into(),
                values: vec![Value::Int64(1), Value::Int64(10)],
            },
            WalOp::Insert {
                table: "t".into(),
                values: vec![Value::Int64(2), Value::Null],
            },
            WalOp::Update {
                table: "t".into(),
                field: "value".into(),
                row: 1,
                value: Value::Int64(20),
            },
            WalOp::Insert {
                table: "t".into(),
                values: vec![Value::Int64(3), Value::Int64(30)],
            },
            WalOp::Delete {
                table: "t".into(),
                row: 0,
            },
        ]
    }

    async fn write_ops(wal: &WriteAheadLog) {
        for (i, op) in ops().into_iter().enumerate() {
            wal.append_at(op, 1000 + i as i64).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_reopen_recovers_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grizzly.wal");
        let config = WalConfig::default();
        {
            let wal = WriteAheadLog::open(&path, &config).await.unwrap();
            write_ops(&wal).await;
        }
        let wal = WriteAheadLog::open(&path, &config).await.unwrap();
        let entries = wal.entries().await;
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[3].seq, 3);
        assert_eq!(wal.append(WalOp::Delete { table: "t".into(), row: 0 }).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_replay_twice_gives_identical_tables() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("a.wal"), &WalConfig::default())
            .await
            .unwrap();
        write_ops(&wal).await;

        let mut first = Table::new(schema());
        let mut second = Table::new(schema());
        assert_eq!(wal.replay(&mut first).await.unwrap(), 6);
        wal.replay(&mut second).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.num_rows(), 2);
        assert_eq!(first.get("value", 0).unwrap(), Value::Int64(20));
    }

    #[tokio::test]
    async fn test_replay_to_timestamp_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("a.wal"), &WalConfig::default())
            .await
            .unwrap();
        write_ops(&wal).await;

        let mut catalog: HashMap<String, Table> = HashMap::new();
        assert_eq!(wal.replay_to_timestamp(&mut catalog, 1002).await.unwrap(), 3);
        let table = &catalog["t"];
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.get("value", 1).unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_torn_tail_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.wal");
        {
            let wal = WriteAheadLog::open(&path, &WalConfig::default()).await.unwrap();
            write_ops(&wal).await;
        }
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"deadbeef eyJzZXEi").await.unwrap();
        file.sync_all().await.unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&path, &WalConfig::default()).await.unwrap();
        assert_eq!(wal.len().await, 6);
        wal.append(WalOp::Delete { table: "t".into(), row: 0 }).await.unwrap();
        drop(wal);

        let reopened = WriteAheadLog::open(&path, &WalConfig::default()).await.unwrap();
        assert_eq!(reopened.len().await, 7);
    }

    #[tokio::test]
    async fn test_corruption_in_middle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wal");
        {
            let wal = WriteAheadLog::open(&path, &WalConfig::default()).await.unwrap();
            write_ops(&wal).await;
        }
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        lines[1] = format!("00000000 {}", lines[1].split_once(' ').unwrap().1);
        tokio::fs::write(&path, lines.join("\n") + "\n").await.unwrap();

        assert!(WriteAheadLog::open(&path, &WalConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_commit_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wal");
        let wal = WriteAheadLog::open(&path, &WalConfig::default()).await.unwrap();
        write_ops(&wal).await;
        wal.commit().await.unwrap();

        assert!(wal.is_empty().await);
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
        let seq = wal.append(WalOp::Delete { table: "t".into(), row: 0 }).await.unwrap();
        assert_eq!(seq, 6);
    }

    #[tokio::test]
    async fn test_encrypted_log_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enc.wal");
        let config = WalConfig {
            compression: true,
            sync_mode: SyncMode::Batched(4),
            encryption_key: Some("11".repeat(32)),
            ..WalConfig::default()
        };
        {
            let wal = WriteAheadLog::open(&path, &config).await.unwrap();
            write_ops(&wal).await;
            wal.sync().await.unwrap();
        }
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains("create_table"));

        let entries = read_log(&path, &config).await.unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].op.kind(), "create_table");
        assert!(read_log(&path, &WalConfig::default()).await.is_err());
    }

    struct CollectingSink(parking_lot::Mutex<Vec<Lsn>>);

    #[async_trait]
    impl WalSink for CollectingSink {
        fn name(&self) -> String {
            "collector".to_string()
        }

        async fn ship(&self, entry: &WalEntry) -> Result<()> {
            self.0.lock().push(entry.seq);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_entries_shipped_to_replicas() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("r.wal"), &WalConfig::default())
            .await
            .unwrap();
        let sink = Arc::new(CollectingSink(parking_lot::Mutex::new(Vec::new())));
        wal.add_replica(sink.clone());
        write_ops(&wal).await;
        assert_eq!(*sink.0.lock(), vec![0, 1, 2, 3, 4, 5]);

        let seq = wal.append_local(ops()[1].clone(), 0).await.unwrap();
        assert_eq!(seq, 6);
        assert_eq!(sink.0.lock().len(), 6);
        assert_eq!(wal.len().await, 7);
    }

    #[tokio::test]
    async fn test_failed_append_leaves_no_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grizzly.wal");
        let config = WalConfig::default();
        let ops = ops();
        {
            let wal = WriteAheadLog::open(&path, &config).await.unwrap();
            wal.append(ops[0].clone()).await.unwrap();
            wal.state.lock().await.fail_after = Some(12);
            assert!(wal.append(ops[1].clone()).await.is_err());
            assert_eq!(wal.append(ops[2].clone()).await.unwrap(), 1);
        }

        let wal = WriteAheadLog::open(&path, &config).await.unwrap();
        let entries = wal.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].op, ops[2]);
        assert_eq!(entries[1].seq, 1);
    }

    #[test]
    fn test_catalog_rejects_unknown_table() {
        let mut catalog: HashMap<String, Table> = HashMap::new();
        let err = catalog
            .apply(&WalOp::Delete {
                table: "ghost".into(),
                row: 0,
            })
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_check_matches_apply_without_mutating() {
        let mut catalog: HashMap<String, Table> = HashMap::new();
        let ops = ops();
        assert!(catalog.check(&ops[1]).is_err());
        catalog.check(&ops[0]).unwrap();
        catalog.apply(&ops[0]).unwrap();
        assert!(catalog.check(&ops[0]).is_err());

        let bad_insert = WalOp::Insert {
            table: "t".into(),
            values: vec![Value::from("x"), Value::Int64(1)],
        };
        assert!(catalog.check(&bad_insert).is_err());
        let bad_delete = WalOp::Delete {
            table: "t".into(),
            row: 0,
        };
        assert!(catalog.check(&bad_delete).is_err());

        catalog.check(&ops[1]).unwrap();
        assert_eq!(catalog["t"].num_rows(), 0);
    }

    #[test]
    fn test_catalog_rejects_unsafe_table_names() {
        let mut catalog: HashMap<String, Table> = HashMap::new();
        for name in ["a/b", "../escape", ""] {
            let op = WalOp::CreateTable {
                table: name.into(),
                schema: schema(),
            };
            assert!(catalog.check(&op).is_err());
            assert!(catalog.apply(&op).is_err());
        }
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_drop_table() {
        let mut catalog: HashMap<String, Table> = HashMap::new();
        let ops = ops();
        catalog.apply(&ops[0]).unwrap();
        let drop = WalOp::DropTable { table: "t".into() };
        catalog.check(&drop).unwrap();
        catalog.apply(&drop).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.check(&drop).is_err());
        assert!(catalog.apply(&ops[1]).is_err());

        // The name is free again
        catalog.apply(&ops[0]).unwrap();
        let mut lone = Table::new(schema());
        assert!(lone.apply(&drop).is_err());
    }
}
