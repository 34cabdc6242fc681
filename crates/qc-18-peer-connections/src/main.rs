//! # Quantum-Chain Peer Node
//!
//! Standalone node for exercising the connection layer: listens on the
//! configured port, dials the configured peers, logs every connection
//! event and shuts down cleanly on Ctrl+C.
//!
//! ```text
//! qc-peer-node --config node.toml --connect 127.0.0.1:7481
//! ```
//!
//! `RUST_LOG` overrides the configured `log_level`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qc_18_peer_connections::{
    CloseReason, Connection, NetworkId, NetworkMessage, Node, NodeConfig, NodeListener, NodeState,
};

#[derive(Parser, Debug)]
#[command(name = "qc-peer-node")]
#[command(about = "Quantum-Chain peer connection node")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additional peer to dial on startup (host:port), repeatable
    #[arg(long = "connect", value_name = "PEER")]
    connect: Vec<String>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

/// Logs node events.
struct LoggingListener;

impl NodeListener for LoggingListener {
    fn on_message(&self, message: &NetworkMessage, connection: &Connection, network_id: &NetworkId) {
        info!(
            network = %network_id,
            peer = %connection.peer_address(),
            kind = message.kind(),
            "Message received"
        );
    }

    fn on_connection(&self, connection: &Connection) {
        info!(
            peer = %connection.peer_capability(),
            direction = ?connection.direction(),
            "Peer connected"
        );
    }

    fn on_disconnect(&self, connection: &Connection, close_reason: &CloseReason) {
        let metrics = connection.metrics();
        info!(
            peer = %connection.peer_address(),
            reason = %close_reason,
            sent = metrics.sent_messages,
            received = metrics.received_messages,
            "Peer disconnected"
        );
    }

    fn on_state_change(&self, state: NodeState) {
        info!(state = %state, "Node state changed");
    }
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    config.peers.extend(args.connect.iter().cloned());
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let node = Node::new(config);
    node.add_listener(Arc::new(LoggingListener));
    node.initialize().await.context("starting node")?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    node.shutdown().await;
    Ok(())
}
