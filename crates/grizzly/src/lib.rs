//! Grizzly - embeddable columnar engine
//!
//! The [`Engine`] is the session object an application owns: it holds the
//! table catalog, the write-ahead log, one hash-chained block store per table
//! and the replication coordinator. Nothing is global; open two engines on
//! two data directories and they share nothing.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod engine;

pub use engine::{Engine, RecoveryReport};

pub use grizzly_cluster as cluster;
pub use grizzly_common as common;
pub use grizzly_query as query;
pub use grizzly_storage as storage;
pub use grizzly_txn as txn;
