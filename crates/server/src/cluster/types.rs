//! Raft type configuration, log entry definitions, and type aliases.

use lodestone_core::document::Document;
use openraft::BasicNode;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Unique identifier for a node in the cluster. Must be non-zero.
pub type NodeId = u64;

/// The openraft `Raft` instance parameterized with our [`TypeConfig`].
pub type Raft = openraft::Raft<TypeConfig>;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = LogEntry,
        R = LogEntryResponse,
);

pub type LogId = openraft::LogId<NodeId>;
pub type Entry = openraft::Entry<TypeConfig>;
pub type StorageError = openraft::StorageError<NodeId>;
pub type SnapshotMeta = openraft::SnapshotMeta<NodeId, BasicNode>;
pub type StoredMembership = openraft::StoredMembership<NodeId, BasicNode>;
pub type Vote = openraft::Vote<NodeId>;

/// A replicated index mutation. Membership changes travel as openraft's own
/// membership entries and never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Insert or replace a document.
    IndexDocument { document: Document },
    /// Remove a document. Removing an absent id succeeds.
    DeleteDocument { id: String },
}

impl LogEntry {
    /// Short operation name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LogEntry::IndexDocument { .. } => "index",
            LogEntry::DeleteDocument { .. } => "delete",
        }
    }
}

/// Result of applying one [`LogEntry`] on a node.
///
/// Apply never fails the log: a document the engine rejects produces
/// `success: false` with the reason, and the log moves on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntryResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntryResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
