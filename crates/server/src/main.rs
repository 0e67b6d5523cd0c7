use clap::Parser;
use lodestone_core::config;
use lodestone_server::api::create_app;
use lodestone_server::api::handlers::AppState;
use lodestone_server::api::metrics;
use lodestone_server::cluster::{NodeInfo, NodeRole};
use lodestone_server::{Coordinator, CoordinatorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lodestone", about = "Raft-replicated full-text search node")]
struct Args {
    /// Unique, non-zero node id
    #[arg(long, env = "LODESTONE_NODE_ID")]
    node_id: u64,

    /// Address other nodes and clients use to reach this node (host:port)
    #[arg(long, env = "LODESTONE_ADDR", default_value_t = format!("127.0.0.1:{}", config::DEFAULT_PORT))]
    addr: String,

    /// Socket address to listen on (defaults to --addr)
    #[arg(long, env = "LODESTONE_LISTEN")]
    listen: Option<String>,

    /// Data directory for the Raft log and snapshots
    #[arg(short, long, env = "LODESTONE_DATA_DIR", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Initialize a new single-node cluster if this node has no state yet
    #[arg(long, env = "LODESTONE_BOOTSTRAP", default_value_t = false)]
    bootstrap: bool,

    /// Address of an existing member to join through
    #[arg(long, env = "LODESTONE_JOIN")]
    join: Option<String>,

    /// Role to join with: voter or nonvoter
    #[arg(long, env = "LODESTONE_ROLE", default_value = "voter", value_parser = parse_role)]
    role: NodeRole,

    /// Leader heartbeat interval in milliseconds
    #[arg(long, env = "LODESTONE_HEARTBEAT_MS", default_value_t = config::DEFAULT_HEARTBEAT_INTERVAL_MS)]
    heartbeat_ms: u64,

    /// Minimum election timeout in milliseconds
    #[arg(long, env = "LODESTONE_ELECTION_MIN_MS", default_value_t = config::DEFAULT_ELECTION_TIMEOUT_MIN_MS)]
    election_min_ms: u64,

    /// Maximum election timeout in milliseconds
    #[arg(long, env = "LODESTONE_ELECTION_MAX_MS", default_value_t = config::DEFAULT_ELECTION_TIMEOUT_MAX_MS)]
    election_max_ms: u64,

    /// Applied entries between automatic snapshots (0 = disabled)
    #[arg(long, env = "LODESTONE_SNAPSHOT_THRESHOLD", default_value_t = config::DEFAULT_SNAPSHOT_THRESHOLD)]
    snapshot_threshold: u64,

    /// How long a write waits for commit before failing, in seconds
    #[arg(long, env = "LODESTONE_WRITE_TIMEOUT_SECS", default_value_t = config::DEFAULT_WRITE_TIMEOUT_SECS)]
    write_timeout_secs: u64,

    /// Graceful shutdown timeout in seconds
    #[arg(long, env = "LODESTONE_SHUTDOWN_TIMEOUT", default_value_t = config::DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    shutdown_timeout: u64,
}

fn parse_role(s: &str) -> Result<NodeRole, String> {
    match s {
        "voter" => Ok(NodeRole::Voter),
        "nonvoter" => Ok(NodeRole::Nonvoter),
        other => Err(format!("unknown role '{other}', expected voter or nonvoter")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(
                    "lodestone_server=info"
                        .parse()
                        .expect("valid directive literal"),
                )
                .add_directive(
                    "lodestone_core=info"
                        .parse()
                        .expect("valid directive literal"),
                )
                .add_directive("openraft=warn".parse().expect("valid directive literal")),
        )
        .init();

    let args = Args::parse();

    if args.data_dir.exists() && !args.data_dir.is_dir() {
        eprintln!(
            "Error: data_dir '{}' exists but is not a directory",
            args.data_dir.display()
        );
        std::process::exit(1);
    }
    if args.bootstrap && args.join.is_some() {
        eprintln!("Error: --bootstrap and --join are mutually exclusive");
        std::process::exit(1);
    }

    let node_config = CoordinatorConfig {
        node_id: args.node_id,
        addr: args.addr.clone(),
        data_dir: args.data_dir.clone(),
        heartbeat_interval_ms: args.heartbeat_ms,
        election_timeout_min_ms: args.election_min_ms,
        election_timeout_max_ms: args.election_max_ms,
        snapshot_threshold: args.snapshot_threshold,
        write_timeout: Duration::from_secs(args.write_timeout_secs),
        ..CoordinatorConfig::default()
    };
    if let Err(e) = node_config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let coordinator = Arc::new(Coordinator::open(node_config).await?);
    if args.bootstrap {
        coordinator.bootstrap().await?;
    }

    let prometheus_handle =
        metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        coordinator: coordinator.clone(),
        prometheus_handle,
        start_time: Instant::now(),
    };
    let app = create_app(state);

    let listen = args.listen.clone().unwrap_or_else(|| args.addr.clone());
    let listener = tokio::net::TcpListener::bind(&listen).await?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = args.node_id,
        addr = %args.addr,
        listen = %listen,
        data_dir = %args.data_dir.display(),
        bootstrap = args.bootstrap,
        join = ?args.join,
        "lodestone ready"
    );

    let metrics_coordinator = coordinator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            metrics::update_node_metrics(&metrics_coordinator);
        }
    });

    if let Some(seed) = args.join.clone() {
        let node = NodeInfo::new(args.node_id, args.addr.clone(), args.role);
        tokio::spawn(join_cluster(seed, node));
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    tracing::info!("HTTP server stopped, shutting down raft");
    match tokio::time::timeout(
        Duration::from_secs(args.shutdown_timeout),
        coordinator.shutdown(),
    )
    .await
    {
        Ok(Ok(())) => tracing::info!("raft stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "raft shutdown failed"),
        Err(_) => tracing::error!(
            "Shutdown timeout ({}s) exceeded while stopping raft",
            args.shutdown_timeout
        ),
    }

    Ok(())
}

/// Asks `seed` to add this node, retrying with exponential backoff until the
/// cluster accepts it. Redirects to the leader are followed by the client.
async fn join_cluster(seed: String, node: NodeInfo) {
    let client = reqwest::Client::new();
    let url = format!("http://{seed}/cluster/nodes");
    let mut delay = Duration::from_millis(500);
    for attempt in 1..=10 {
        match client.post(&url).json(&node).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(seed = %seed, attempt, "joined cluster");
                return;
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if status.is_client_error() {
                    tracing::error!(seed = %seed, %status, body = %body, "join rejected");
                    return;
                }
                tracing::warn!(seed = %seed, attempt, %status, body = %body, "join failed, retrying");
            }
            Err(e) => {
                tracing::warn!(seed = %seed, attempt, error = %e, "join request failed, retrying");
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(30));
    }
    tracing::error!(seed = %seed, "giving up joining the cluster");
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}
