//! Cluster management
//!
//! Provides:
//! - `RemoteNode`: a replica tracked by health and load
//! - Node transports (TCP, in-process) and the JSON-lines wire protocol
//! - `ParticipantServer` and `LocalParticipant` for running a replica
//! - `ReplicationCoordinator`: failover checks, query fan-out, replicated writes

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod coordinator;
pub mod local;
pub mod node;
pub mod protocol;
pub mod server;
pub mod transport;

pub use coordinator::{merge_tables, parse_address, ReplicationCoordinator};
pub use local::LocalParticipant;
pub use node::{NodeState, RemoteNode};
pub use protocol::{Request, Response};
pub use server::{ParticipantHandler, ParticipantServer};
pub use transport::{InProcessTransport, NodeTransport, TcpTransport};
