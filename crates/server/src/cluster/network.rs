//! HTTP-based Raft RPC network transport.
//!
//! Implements openraft's `RaftNetworkFactory` and `RaftNetwork` traits with a
//! shared reqwest client. Peers answer with `Result<Resp, RaftError>` as JSON
//! so a remote Raft error is reported back to openraft as a `RemoteError`
//! instead of being flattened into a transport failure.

use crate::cluster::types::{NodeId, TypeConfig};
use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Type alias for Raft RPC errors with default infallible application error.
pub type RPCErr<E = openraft::error::Infallible> =
    RPCError<NodeId, BasicNode, RaftError<NodeId, E>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Factory that creates HTTP network connections to Raft peers.
#[derive(Clone)]
pub struct NetworkFactory {
    client: reqwest::Client,
}

impl NetworkFactory {
    /// Creates a factory with a pooled client and bounded connect/request timeouts.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for NetworkFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// An HTTP connection to a single Raft peer node.
pub struct NetworkConnection {
    target: NodeId,
    target_addr: String,
    client: reqwest::Client,
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        NetworkConnection {
            target,
            target_addr: node.addr.clone(),
            client: self.client.clone(),
        }
    }
}

impl NetworkConnection {
    async fn send_rpc<Req, Resp, E>(
        &self,
        path: &str,
        req: &Req,
        option: &RPCOption,
    ) -> Result<Resp, RPCErr<E>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let url = format!("http://{}/raft/{}", self.target_addr, path);
        let resp = self
            .client
            .post(&url)
            .timeout(option.hard_ttl())
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RPCError::Unreachable(Unreachable::new(&e))
                } else {
                    RPCError::Network(NetworkError::new(&e))
                }
            })?;

        let result: Result<Resp, RaftError<NodeId, E>> = resp
            .json()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        result.map_err(|e| {
            tracing::debug!(peer = self.target, error = %e, path, "peer returned raft error");
            RPCError::RemoteError(RemoteError::new(self.target, e))
        })
    }
}

impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCErr> {
        self.send_rpc("append", &rpc, &option).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        option: RPCOption,
    ) -> Result<InstallSnapshotResponse<NodeId>, RPCErr<InstallSnapshotError>> {
        self.send_rpc("snapshot", &rpc, &option).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCErr> {
        self.send_rpc("vote", &rpc, &option).await
    }
}
