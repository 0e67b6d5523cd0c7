//! Runtime configuration of a coordinator node.

use crate::cluster::NodeId;
use crate::error::CoordinatorError;
use lodestone_core::config;
use openraft::SnapshotPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for one node. Built from CLI flags in the binary and directly in tests.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub node_id: NodeId,
    /// Address peers and clients use to reach this node (`host:port`).
    pub addr: String,
    pub data_dir: PathBuf,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Applied entries since the last snapshot that trigger a new one. 0 disables.
    pub snapshot_threshold: u64,
    /// Log entries retained behind a snapshot so slow followers can catch up
    /// without a full snapshot transfer.
    pub max_in_snapshot_log_to_keep: u64,
    /// Upper bound on how long a write waits for commit and apply.
    pub write_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            addr: format!("127.0.0.1:{}", config::DEFAULT_PORT),
            data_dir: PathBuf::from(config::DEFAULT_DATA_DIR),
            heartbeat_interval_ms: config::DEFAULT_HEARTBEAT_INTERVAL_MS,
            election_timeout_min_ms: config::DEFAULT_ELECTION_TIMEOUT_MIN_MS,
            election_timeout_max_ms: config::DEFAULT_ELECTION_TIMEOUT_MAX_MS,
            snapshot_threshold: config::DEFAULT_SNAPSHOT_THRESHOLD,
            max_in_snapshot_log_to_keep: config::DEFAULT_LOGS_TO_KEEP,
            write_timeout: Duration::from_secs(config::DEFAULT_WRITE_TIMEOUT_SECS),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(node_id: NodeId, addr: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id,
            addr: addr.into(),
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.node_id == 0 {
            return Err(CoordinatorError::InvalidArgument(
                "node id must be non-zero".into(),
            ));
        }
        crate::cluster::membership::validate_addr(&self.addr)?;
        if self.heartbeat_interval_ms == 0 {
            return Err(CoordinatorError::InvalidArgument(
                "heartbeat interval must be > 0".into(),
            ));
        }
        if self.election_timeout_min_ms <= self.heartbeat_interval_ms {
            return Err(CoordinatorError::InvalidArgument(
                "election timeout must exceed the heartbeat interval".into(),
            ));
        }
        if self.election_timeout_max_ms <= self.election_timeout_min_ms {
            return Err(CoordinatorError::InvalidArgument(
                "election timeout max must exceed min".into(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(CoordinatorError::InvalidArgument(
                "write timeout must be > 0".into(),
            ));
        }
        // Writes must fail with their own error before the HTTP layer gives up.
        if self.write_timeout >= Duration::from_secs(config::REQUEST_TIMEOUT_SECS) {
            return Err(CoordinatorError::InvalidArgument(format!(
                "write timeout must be below the {}s request timeout",
                config::REQUEST_TIMEOUT_SECS
            )));
        }
        Ok(())
    }

    /// Converts to a validated openraft configuration.
    pub fn to_raft_config(&self) -> Result<openraft::Config, CoordinatorError> {
        self.validate()?;
        let snapshot_policy = if self.snapshot_threshold == 0 {
            SnapshotPolicy::Never
        } else {
            SnapshotPolicy::LogsSinceLast(self.snapshot_threshold)
        };
        openraft::Config {
            cluster_name: "lodestone".to_string(),
            heartbeat_interval: self.heartbeat_interval_ms,
            election_timeout_min: self.election_timeout_min_ms,
            election_timeout_max: self.election_timeout_max_ms,
            snapshot_policy,
            max_in_snapshot_log_to_keep: self.max_in_snapshot_log_to_keep,
            ..Default::default()
        }
        .validate()
        .map_err(|e| CoordinatorError::InvalidArgument(e.to_string()))
    }
}
