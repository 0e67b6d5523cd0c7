//! Raft replication of the index.
//!
//! Built on [openraft](https://docs.rs/openraft):
//! - **types**: Raft type configuration, log entry definitions, and type aliases.
//! - **log_store**: persistent, checksummed Raft log.
//! - **store**: state machine applying committed entries to the [`IndexEngine`](lodestone_core::IndexEngine).
//! - **snapshot**: snapshot files on disk.
//! - **membership**: cluster view and join/leave rules.
//! - **network** / **api**: HTTP transport between Raft peers.

/// Axum routes for Raft peer RPCs.
pub mod api;
/// Persistent Raft log storage.
pub mod log_store;
/// Cluster membership view and join/leave planning.
pub mod membership;
/// HTTP-based Raft RPC network transport using reqwest.
pub mod network;
/// Snapshot file persistence.
pub mod snapshot;
/// Raft state machine backed by the index engine.
pub mod store;
/// Raft type configuration, log entry definitions, and type aliases.
pub mod types;

pub use membership::{ClusterView, NodeInfo, NodeRole};
pub use types::{LogEntry, LogEntryResponse, NodeId, Raft, TypeConfig};
