//! Axum routes for Raft peer RPCs.
//!
//! Each handler forwards the request to the local Raft instance and returns
//! the full `Result` as JSON; [`super::network`] decodes it on the other side.

use crate::cluster::types::{NodeId, Raft, TypeConfig};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use std::sync::Arc;

/// Shared state for Raft API handlers, wrapping the Raft instance.
#[derive(Clone)]
pub struct RaftState {
    /// The openraft `Raft` instance for this node.
    pub raft: Arc<Raft>,
}

/// Builds the router for peer RPCs:
/// `POST /raft/vote`, `POST /raft/append`, `POST /raft/snapshot`.
pub fn raft_router(state: RaftState) -> Router {
    Router::new()
        .route("/raft/vote", post(handle_vote))
        .route("/raft/append", post(handle_append))
        .route("/raft/snapshot", post(handle_snapshot))
        .with_state(state)
}

async fn handle_vote(
    State(state): State<RaftState>,
    Json(req): Json<VoteRequest<NodeId>>,
) -> Json<Result<VoteResponse<NodeId>, RaftError<NodeId>>> {
    Json(state.raft.vote(req).await)
}

async fn handle_append(
    State(state): State<RaftState>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> Json<Result<AppendEntriesResponse<NodeId>, RaftError<NodeId>>> {
    Json(state.raft.append_entries(req).await)
}

async fn handle_snapshot(
    State(state): State<RaftState>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Json<Result<InstallSnapshotResponse<NodeId>, RaftError<NodeId, InstallSnapshotError>>> {
    Json(state.raft.install_snapshot(req).await)
}
