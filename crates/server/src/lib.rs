//! lodestone-server: Raft-replicated full-text search node.
//!
//! Provides the replicated index coordinator, its Raft storage and transport,
//! and the HTTP API. The index engine itself lives in `lodestone-core`.

/// REST API layer: Axum router, HTTP handlers, models, metrics.
pub mod api;
/// Raft consensus: log storage, state machine, snapshots, membership, transport.
pub mod cluster;
/// Node configuration.
pub mod config;
/// The replicated index coordinator.
pub mod coordinator;
/// Coordinator error type.
pub mod error;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::CoordinatorError;
