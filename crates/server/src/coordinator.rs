//! The replicated index coordinator.
//!
//! [`Coordinator`] is the single entry point the HTTP layer talks to. Writes
//! and membership changes are proposed through openraft and return once the
//! entry is committed and applied on this node; reads go straight to the
//! local [`IndexEngine`] and may lag the leader.

use crate::cluster::log_store::LogStore;
use crate::cluster::membership::{plan_join, plan_leave, JoinPlan, LeavePlan};
use crate::cluster::network::NetworkFactory;
use crate::cluster::store::StateMachineStore;
use crate::cluster::{ClusterView, LogEntry, NodeId, NodeInfo, NodeRole, Raft};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, LeaderHint};
use futures::{Stream, StreamExt};
use lodestone_core::document::validate_id;
use lodestone_core::{Document, IndexEngine, IndexStats, SearchRequest, SearchResult};
use openraft::error::{InitializeError, RaftError};
use openraft::{BasicNode, ChangeMembers, RaftMetrics, ServerState};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Local view of this node's consensus state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub addr: String,
    /// `None` until the node appears in an applied membership.
    pub role: Option<NodeRole>,
    /// `leader`, `candidate`, `follower`, `learner` or `shutdown`.
    pub state: &'static str,
    pub current_term: u64,
    pub leader: Option<NodeId>,
    pub last_log_index: Option<u64>,
    /// Highest index applied to the local index. Everything up to here is
    /// known committed.
    pub last_applied: Option<u64>,
    pub snapshot_index: Option<u64>,
}

/// Index statistics plus replication progress of this node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStats {
    #[serde(flatten)]
    pub index: IndexStats,
    pub last_applied: Option<u64>,
    pub snapshot_index: Option<u64>,
}

/// Log position covered by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub index: u64,
    pub term: u64,
}

/// Result of a bulk operation: how many items were committed before the
/// stream ended or the first error stopped it.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome {
    pub count: usize,
    pub error: Option<CoordinatorError>,
}

/// One Lodestone node: Raft instance, state machine and index.
pub struct Coordinator {
    config: CoordinatorConfig,
    raft: Arc<Raft>,
    state_machine: Arc<StateMachineStore>,
    engine: IndexEngine,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("node_id", &self.config.node_id)
            .field("addr", &self.config.addr)
            .finish_non_exhaustive()
    }
}

fn io_error(context: &str, e: std::io::Error) -> CoordinatorError {
    CoordinatorError::Internal(format!("{context}: {e}"))
}

fn server_state_name(state: ServerState) -> &'static str {
    match state {
        ServerState::Leader => "leader",
        ServerState::Candidate => "candidate",
        ServerState::Follower => "follower",
        ServerState::Learner => "learner",
        ServerState::Shutdown => "shutdown",
    }
}

impl Coordinator {
    /// Opens the node's persisted state under `config.data_dir` and starts
    /// its Raft instance. Corrupt log or snapshot files fail the open.
    pub async fn open(config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let raft_config = Arc::new(config.to_raft_config()?);
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| io_error("cannot create data dir", e))?;

        let log_store = LogStore::open(config.data_dir.join("raft"))
            .map_err(|e| io_error("cannot open raft log", e))?;
        let engine = IndexEngine::new();
        let state_machine = Arc::new(
            StateMachineStore::open(engine.clone(), config.data_dir.join("snapshots"))
                .map_err(|e| io_error("cannot open snapshot", e))?,
        );
        let pristine = log_store.is_pristine().await;

        let raft = Raft::new(
            config.node_id,
            raft_config,
            NetworkFactory::new(),
            log_store,
            state_machine.clone(),
        )
        .await
        .map_err(|e| CoordinatorError::Internal(format!("cannot start raft: {e}")))?;

        tracing::info!(
            node_id = config.node_id,
            addr = %config.addr,
            data_dir = %config.data_dir.display(),
            pristine,
            documents = engine.document_count(),
            "coordinator started"
        );

        Ok(Self {
            config,
            raft: Arc::new(raft),
            state_machine,
            engine,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// The Raft handle, for mounting the peer RPC routes.
    pub fn raft(&self) -> Arc<Raft> {
        self.raft.clone()
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    fn metrics(&self) -> RaftMetrics<NodeId, BasicNode> {
        self.raft.metrics().borrow().clone()
    }

    fn leader_hint_from(metrics: &RaftMetrics<NodeId, BasicNode>) -> Option<LeaderHint> {
        let id = metrics.current_leader?;
        let addr = metrics
            .membership_config
            .membership()
            .nodes()
            .find(|(nid, _)| **nid == id)
            .map(|(_, node)| node.addr.clone());
        Some(LeaderHint { id, addr })
    }

    /// Fails with `Unavailable` plus a leader hint unless this node leads.
    fn ensure_leader(&self) -> Result<(), CoordinatorError> {
        let metrics = self.metrics();
        if metrics.state == ServerState::Leader {
            return Ok(());
        }
        Err(CoordinatorError::not_leader(Self::leader_hint_from(
            &metrics,
        )))
    }

    /// Bounds a replicated operation by the configured write timeout.
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, CoordinatorError>
    where
        F: Future<Output = Result<T, CoordinatorError>>,
    {
        match tokio::time::timeout(self.config.write_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    op = what,
                    timeout_ms = self.config.write_timeout.as_millis() as u64,
                    "replicated operation timed out"
                );
                Err(CoordinatorError::Internal(format!("{what} timed out")))
            }
        }
    }

    // -- Membership --------------------------------------------------------

    /// Initializes a single-voter cluster consisting of this node.
    ///
    /// Returns `false` without changing anything if the node already belongs
    /// to a cluster, so running it on every start is safe.
    pub async fn bootstrap(&self) -> Result<bool, CoordinatorError> {
        let members = BTreeMap::from([(
            self.config.node_id,
            BasicNode::new(self.config.addr.clone()),
        )]);
        match self.raft.initialize(members).await {
            Ok(()) => {
                tracing::info!(node_id = self.config.node_id, "cluster bootstrapped");
                Ok(true)
            }
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                tracing::info!(
                    node_id = self.config.node_id,
                    "node already initialized; skipping bootstrap"
                );
                Ok(false)
            }
            Err(e) => Err(CoordinatorError::Internal(e.to_string())),
        }
    }

    /// Adds `node` to the cluster, or changes its role.
    ///
    /// New nodes are added as learners and wait until they have caught up
    /// before a voter is promoted, so a slow joiner never stalls commits.
    pub async fn join(&self, node: NodeInfo) -> Result<(), CoordinatorError> {
        node.validate()?;
        self.ensure_leader()?;
        let view = self.get_cluster().await;
        let plan = plan_join(&view, &node)?;
        tracing::info!(node_id = node.id, addr = %node.addr, role = ?node.role, plan = ?plan, "join");

        let raft = &self.raft;
        match plan {
            JoinPlan::AlreadyMember => return Ok(()),
            JoinPlan::AddLearner { promote } => {
                self.bounded("add learner", async {
                    raft.add_learner(node.id, BasicNode::new(node.addr.clone()), true)
                        .await
                        .map_err(CoordinatorError::from_write_error)
                })
                .await?;
                if promote {
                    self.change_membership(ChangeMembers::AddVoterIds(BTreeSet::from([node.id])), false)
                        .await?;
                }
            }
            JoinPlan::Promote => {
                self.change_membership(ChangeMembers::AddVoterIds(BTreeSet::from([node.id])), false)
                    .await?;
            }
            JoinPlan::Demote => {
                self.change_membership(ChangeMembers::RemoveVoters(BTreeSet::from([node.id])), true)
                    .await?;
            }
        }
        metrics::counter!("lodestone_membership_changes_total", "op" => "join").increment(1);
        Ok(())
    }

    /// Removes node `id` from the cluster.
    ///
    /// Removing the leader itself is allowed: the change goes through joint
    /// consensus, the remaining voters elect a new leader, and this node's
    /// Raft instance is shut down once the change has committed.
    pub async fn leave(&self, id: NodeId) -> Result<(), CoordinatorError> {
        self.ensure_leader()?;
        let view = self.get_cluster().await;
        let plan = plan_leave(&view, id)?;
        tracing::info!(node_id = id, plan = ?plan, "leave");

        let ids = BTreeSet::from([id]);
        match plan {
            LeavePlan::RemoveVoter => {
                self.change_membership(ChangeMembers::RemoveVoters(ids), false)
                    .await?
            }
            LeavePlan::RemoveNonvoter => {
                self.change_membership(ChangeMembers::RemoveNodes(ids), false)
                    .await?
            }
        }
        metrics::counter!("lodestone_membership_changes_total", "op" => "leave").increment(1);

        if id == self.config.node_id {
            tracing::info!(node_id = id, "removed self from cluster; stopping raft");
            self.shutdown().await?;
        }
        Ok(())
    }

    async fn change_membership(
        &self,
        change: ChangeMembers<NodeId, BasicNode>,
        retain: bool,
    ) -> Result<(), CoordinatorError> {
        let raft = &self.raft;
        self.bounded("membership change", async {
            raft.change_membership(change, retain)
                .await
                .map(drop)
                .map_err(CoordinatorError::from_write_error)
        })
        .await
    }

    /// This node's consensus state. Local, never blocks on peers.
    pub fn get_node(&self) -> NodeStatus {
        let metrics = self.metrics();
        let membership = metrics.membership_config.membership();
        let role = if membership.voter_ids().any(|id| id == self.config.node_id) {
            Some(NodeRole::Voter)
        } else if membership.nodes().any(|(id, _)| *id == self.config.node_id) {
            Some(NodeRole::Nonvoter)
        } else {
            None
        };
        NodeStatus {
            id: self.config.node_id,
            addr: self.config.addr.clone(),
            role,
            state: server_state_name(metrics.state),
            current_term: metrics.current_term,
            leader: metrics.current_leader,
            last_log_index: metrics.last_log_index,
            last_applied: metrics.last_applied.map(|l| l.index),
            snapshot_index: metrics.snapshot.map(|l| l.index),
        }
    }

    /// The membership applied on this node plus the leader it currently
    /// knows of. May be stale on followers.
    pub async fn get_cluster(&self) -> ClusterView {
        let leader = self.metrics().current_leader;
        let membership = self.state_machine.membership().await;
        ClusterView::from_membership(&membership, leader)
    }

    // -- Snapshots ---------------------------------------------------------

    /// Snapshots everything applied so far and compacts the log behind it.
    ///
    /// Returns `None` when nothing has been applied yet.
    pub async fn snapshot(&self) -> Result<Option<SnapshotInfo>, CoordinatorError> {
        let Some(target) = self.state_machine.last_applied().await else {
            return Ok(None);
        };
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        let metrics = self
            .raft
            .wait(Some(self.config.write_timeout))
            .metrics(
                |m| m.snapshot.is_some_and(|s| s.index >= target.index),
                "snapshot built",
            )
            .await
            .map_err(|e| CoordinatorError::Internal(format!("snapshot: {e}")))?;

        let Some(snapshot) = metrics.snapshot else {
            return Err(CoordinatorError::Internal("snapshot missing after build".into()));
        };
        self.raft
            .trigger()
            .purge_log(snapshot.index)
            .await
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        tracing::info!(index = snapshot.index, term = snapshot.leader_id.term, "snapshot taken");
        Ok(Some(SnapshotInfo {
            index: snapshot.index,
            term: snapshot.leader_id.term,
        }))
    }

    // -- Documents ---------------------------------------------------------

    /// Reads a document from the local index.
    pub fn get(&self, id: &str) -> Result<Arc<Document>, CoordinatorError> {
        self.engine
            .get(id)
            .ok_or_else(|| CoordinatorError::NotFound(format!("document '{id}' not found")))
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, CoordinatorError> {
        Ok(self.engine.search(request)?)
    }

    pub fn stats(&self) -> NodeStats {
        let metrics = self.metrics();
        NodeStats {
            index: self.engine.stats(),
            last_applied: metrics.last_applied.map(|l| l.index),
            snapshot_index: metrics.snapshot.map(|l| l.index),
        }
    }

    /// Inserts or replaces a document once it is committed and applied here.
    pub async fn index(&self, document: Document) -> Result<(), CoordinatorError> {
        document.validate()?;
        self.propose(LogEntry::IndexDocument { document }).await
    }

    /// Deletes a document. Deleting an absent id succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), CoordinatorError> {
        validate_id(id)?;
        self.propose(LogEntry::DeleteDocument { id: id.to_string() })
            .await
    }

    async fn propose(&self, entry: LogEntry) -> Result<(), CoordinatorError> {
        let op = entry.kind();
        let started = Instant::now();
        let raft = &self.raft;
        let response = self
            .bounded(op, async {
                raft.client_write(entry)
                    .await
                    .map_err(CoordinatorError::from_write_error)
            })
            .await?;
        metrics::histogram!("lodestone_write_duration_seconds", "op" => op)
            .record(started.elapsed().as_secs_f64());

        if response.data.success {
            Ok(())
        } else {
            let reason = response.data.error.unwrap_or_default();
            tracing::error!(index = response.log_id.index, op, error = %reason, "committed entry failed to apply");
            Err(CoordinatorError::Internal(reason))
        }
    }

    /// Indexes every document of `documents`, one proposal each, stopping at
    /// the first error.
    pub async fn bulk_index<S>(&self, mut documents: S) -> BulkOutcome
    where
        S: Stream<Item = Result<Document, CoordinatorError>> + Unpin,
    {
        let mut count = 0;
        while let Some(item) = documents.next().await {
            let result = match item {
                Ok(document) => self.index(document).await,
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                tracing::warn!(count, error = %error, "bulk index stopped");
                return BulkOutcome {
                    count,
                    error: Some(error),
                };
            }
            count += 1;
        }
        BulkOutcome { count, error: None }
    }

    /// Deletes every id of `ids`, one proposal each, stopping at the first error.
    pub async fn bulk_delete<S>(&self, mut ids: S) -> BulkOutcome
    where
        S: Stream<Item = Result<String, CoordinatorError>> + Unpin,
    {
        let mut count = 0;
        while let Some(item) = ids.next().await {
            let result = match item {
                Ok(id) => self.delete(&id).await,
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                tracing::warn!(count, error = %error, "bulk delete stopped");
                return BulkOutcome {
                    count,
                    error: Some(error),
                };
            }
            count += 1;
        }
        BulkOutcome { count, error: None }
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Waits until some leader is known to this node.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId, CoordinatorError> {
        let metrics = self
            .raft
            .wait(Some(timeout))
            .metrics(|m| m.current_leader.is_some(), "leader elected")
            .await
            .map_err(|e| CoordinatorError::unavailable(e.to_string()))?;
        metrics
            .current_leader
            .ok_or_else(|| CoordinatorError::unavailable("no leader"))
    }

    /// Waits until this node has applied at least `index`.
    pub async fn wait_for_applied(
        &self,
        index: u64,
        timeout: Duration,
    ) -> Result<(), CoordinatorError> {
        self.raft
            .wait(Some(timeout))
            .applied_index_at_least(Some(index), "applied")
            .await
            .map(drop)
            .map_err(|e| CoordinatorError::unavailable(e.to_string()))
    }

    /// Stops the Raft instance. Further writes fail with `Internal`.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.raft
            .shutdown()
            .await
            .map_err(|e| CoordinatorError::Internal(format!("raft shutdown: {e}")))
    }
}
