#![allow(dead_code)]

use lodestone_core::{Document, FieldValue};
use lodestone_server::api::create_app;
use lodestone_server::api::handlers::AppState;
use lodestone_server::cluster::{NodeId, NodeInfo, NodeRole};
use lodestone_server::{Coordinator, CoordinatorConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(15);

fn prometheus_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(_) => metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle(),
    }
}

pub fn node_config(id: NodeId, addr: &str, dir: &Path) -> CoordinatorConfig {
    CoordinatorConfig {
        heartbeat_interval_ms: 50,
        election_timeout_min_ms: 300,
        election_timeout_max_ms: 600,
        max_in_snapshot_log_to_keep: 0,
        write_timeout: Duration::from_secs(5),
        ..CoordinatorConfig::new(id, addr, dir)
    }
}

/// A node running in-process with its HTTP server on loopback.
pub struct TestNode {
    pub id: NodeId,
    pub addr: String,
    pub data_dir: PathBuf,
    pub coordinator: Arc<Coordinator>,
    stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl TestNode {
    /// Starts a node on a fresh ephemeral port.
    pub async fn start(id: NodeId, data_dir: &Path) -> TestNode {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().unwrap().to_string();
        Self::start_with(id, data_dir, listener, addr).await
    }

    /// Starts a node on a specific address (used to restart a stopped node).
    pub async fn start_at(id: NodeId, data_dir: &Path, addr: &str) -> TestNode {
        let deadline = Instant::now() + WAIT;
        let listener = loop {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => break l,
                Err(e) if Instant::now() < deadline => {
                    let _ = e;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => panic!("cannot rebind {addr}: {e}"),
            }
        };
        Self::start_with(id, data_dir, listener, addr.to_string()).await
    }

    async fn start_with(
        id: NodeId,
        data_dir: &Path,
        listener: tokio::net::TcpListener,
        addr: String,
    ) -> TestNode {
        let coordinator = Arc::new(
            Coordinator::open(node_config(id, &addr, data_dir))
                .await
                .expect("open coordinator"),
        );
        let state = AppState {
            coordinator: coordinator.clone(),
            prometheus_handle: prometheus_handle(),
            start_time: Instant::now(),
        };
        let app = create_app(state);
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        TestNode {
            id,
            addr,
            data_dir: data_dir.to_path_buf(),
            coordinator,
            stop: Some(tx),
            server: Some(server),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn info(&self, role: NodeRole) -> NodeInfo {
        NodeInfo::new(self.id, self.addr.clone(), role)
    }

    pub fn is_leader(&self) -> bool {
        self.coordinator.get_node().state == "leader"
    }

    pub fn applied(&self) -> u64 {
        self.coordinator.get_node().last_applied.unwrap_or(0)
    }

    /// Stops the HTTP server and the Raft instance. Persisted state stays.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            if tokio::time::timeout(Duration::from_secs(5), server).await.is_err() {
                panic!("server on {} did not stop", self.addr);
            }
        }
        let _ = self.coordinator.shutdown().await;
    }
}

/// A set of nodes sharing a temp directory.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub dir: TempDir,
}

impl TestCluster {
    /// Bootstraps node 1 and joins nodes `2..=size` as voters.
    pub async fn start(size: u64) -> TestCluster {
        let dir = TempDir::new().unwrap();
        let first = TestNode::start(1, &dir.path().join("node-1")).await;
        first.coordinator.bootstrap().await.unwrap();
        wait_until(WAIT, || first.is_leader()).await;

        let mut cluster = TestCluster {
            nodes: vec![first],
            dir,
        };
        for id in 2..=size {
            cluster.add_node(id, NodeRole::Voter).await;
        }
        cluster
    }

    /// Starts node `id` and joins it through the current leader.
    pub async fn add_node(&mut self, id: NodeId, role: NodeRole) -> &TestNode {
        let node = TestNode::start(id, &self.dir.path().join(format!("node-{id}"))).await;
        let info = node.info(role);
        self.leader().coordinator.join(info).await.unwrap();
        self.nodes.push(node);
        self.nodes.last().unwrap()
    }

    pub fn node(&self, id: NodeId) -> &TestNode {
        self.nodes.iter().find(|n| n.id == id).unwrap()
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TestNode {
        self.nodes.iter_mut().find(|n| n.id == id).unwrap()
    }

    pub fn leader(&self) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.is_leader())
            .expect("no leader")
    }

    /// Waits until one of `candidates` is leader and returns its id.
    pub async fn wait_for_leader_among(&self, candidates: &[NodeId]) -> NodeId {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(n) = self
                .nodes
                .iter()
                .find(|n| candidates.contains(&n.id) && n.is_leader())
            {
                return n.id;
            }
            assert!(Instant::now() < deadline, "no leader elected among {candidates:?}");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Waits until every node in `ids` has applied everything the leader has.
    pub async fn wait_converged(&self, ids: &[NodeId]) {
        let target = self.leader().applied();
        let deadline = Instant::now() + WAIT;
        while !ids.iter().all(|id| self.node(*id).applied() >= target) {
            assert!(Instant::now() < deadline, "nodes {ids:?} did not reach index {target}");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn stop_all(&mut self) {
        for node in &mut self.nodes {
            node.stop().await;
        }
    }
}

pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn doc(id: &str, title: &str) -> Document {
    Document::new(id, BTreeMap::new())
        .with_field("title", FieldValue::Text(title.to_string()))
        .with_field("len", FieldValue::Integer(title.len() as i64))
}
