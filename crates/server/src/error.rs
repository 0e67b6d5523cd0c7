//! Coordinator error type and classification of openraft errors.

use crate::cluster::types::NodeId;
use lodestone_core::EngineError;
use openraft::error::{ChangeMembershipError, ClientWriteError, RaftError};
use openraft::BasicNode;
use serde::Serialize;

/// Client write error as returned by `client_write`, `add_learner` and
/// `change_membership`.
pub type WriteError = RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>;

/// Where the caller should send a write the local node cannot accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderHint {
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

/// Errors surfaced by every coordinator operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The node cannot serve the request right now, usually because it is not
    /// the leader. `leader` is set when the current leader is known.
    #[error("unavailable: {message}")]
    Unavailable {
        message: String,
        leader: Option<LeaderHint>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        CoordinatorError::Unavailable {
            message: message.into(),
            leader: None,
        }
    }

    /// Not the leader; point at `leader` if one is known.
    pub fn not_leader(leader: Option<LeaderHint>) -> Self {
        let message = match &leader {
            Some(hint) => format!("not the leader; current leader is node {}", hint.id),
            None => "not the leader and no leader is currently known".to_string(),
        };
        CoordinatorError::Unavailable { message, leader }
    }

    /// Classifies an openraft write error.
    ///
    /// `ForwardToLeader` and membership changes already in flight are
    /// transient and map to `Unavailable`; malformed membership requests map
    /// to `InvalidArgument`; fatal errors (storage failure, shutdown) map to
    /// `Internal`.
    pub fn from_write_error(err: WriteError) -> Self {
        match err {
            RaftError::APIError(ClientWriteError::ForwardToLeader(fwd)) => {
                CoordinatorError::not_leader(fwd.leader_id.map(|id| LeaderHint {
                    id,
                    addr: fwd.leader_node.as_ref().map(|n| n.addr.clone()),
                }))
            }
            RaftError::APIError(ClientWriteError::ChangeMembershipError(e)) => match e {
                ChangeMembershipError::InProgress(_) => CoordinatorError::unavailable(e.to_string()),
                other => CoordinatorError::InvalidArgument(other.to_string()),
            },
            RaftError::Fatal(fatal) => {
                tracing::error!(error = %fatal, "raft fatal error");
                CoordinatorError::Internal(fatal.to_string())
            }
        }
    }

    /// The leader hint carried by an `Unavailable` error.
    pub fn leader_hint(&self) -> Option<&LeaderHint> {
        match self {
            CoordinatorError::Unavailable { leader, .. } => leader.as_ref(),
            _ => None,
        }
    }
}

impl From<EngineError> for CoordinatorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidDocument(msg) | EngineError::InvalidQuery(msg) => {
                CoordinatorError::InvalidArgument(msg)
            }
            EngineError::Corrupt(msg) => CoordinatorError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::error::ForwardToLeader;

    #[test]
    fn test_forward_to_leader_carries_hint() {
        let err: WriteError = RaftError::APIError(ClientWriteError::ForwardToLeader(
            ForwardToLeader::new(3, BasicNode::new("10.0.0.3:7070")),
        ));
        let mapped = CoordinatorError::from_write_error(err);
        assert_eq!(
            mapped.leader_hint(),
            Some(&LeaderHint {
                id: 3,
                addr: Some("10.0.0.3:7070".into())
            })
        );
    }

    #[test]
    fn test_forward_to_unknown_leader() {
        let err: WriteError =
            RaftError::APIError(ClientWriteError::ForwardToLeader(ForwardToLeader::empty()));
        let mapped = CoordinatorError::from_write_error(err);
        assert!(matches!(
            mapped,
            CoordinatorError::Unavailable { leader: None, .. }
        ));
    }

    #[test]
    fn test_engine_errors() {
        assert!(matches!(
            CoordinatorError::from(EngineError::InvalidDocument("x".into())),
            CoordinatorError::InvalidArgument(_)
        ));
        assert!(matches!(
            CoordinatorError::from(EngineError::InvalidQuery("x".into())),
            CoordinatorError::InvalidArgument(_)
        ));
        assert!(matches!(
            CoordinatorError::from(EngineError::Corrupt("x".into())),
            CoordinatorError::Internal(_)
        ));
    }
}
