//! Grizzly Storage Engine
//!
//! Storage layer providing:
//! - Typed columns with validity bitmaps and tables built from them
//! - Hash, B-tree and composite secondary indexes
//! - Hash-chained blocks and an append-only block store
//! - Pluggable block persistence backends
//! - A write-ahead log with optional compression and encryption
//! - Row and Arrow conversion for format adapters

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod arrow_interop;
pub mod block;
pub mod block_store;
pub mod codec;
pub mod columnar;
pub mod index;
pub mod persistence;
pub mod rows;
pub mod schema;
pub mod table;
pub mod value;
pub mod wal;

pub use block::{verify_chain, verify_chain_detailed, Block};
pub use block_store::BlockStore;
pub use columnar::{Column, ValidityBitmap};
pub use index::{BTreeIndex, CompositeIndex, FieldIndex, HashIndex, IndexKey, IndexKind};
pub use persistence::{BackendRegistry, BlockBackend, FileBackend, MemoryBackend};
pub use rows::{export_rows, load_rows};
pub use schema::{check_table_name, Field, Schema};
pub use table::Table;
pub use value::{DataType, Value};
pub use wal::{WalEntry, WalOp, WalSink, WalTarget, WriteAheadLog};
