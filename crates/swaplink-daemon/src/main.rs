//! swaplink-daemon: run one Swaplink overlay peer over UDP.
//!
//! Joins the overlay through the given bootstrap peers, logs every change
//! to its out-links and periodically draws a random sample of the overlay.

use anyhow::{Context, Result, ensure};
use clap::Parser;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use swaplink_core::{Node, Swaplink, SwaplinkConfig};
use swaplink_daemon::UdpBinder;

#[derive(Parser, Debug)]
#[command(name = "swaplink-daemon")]
#[command(about = "Swaplink overlay peer")]
struct Args {
    /// Host to bind (overrides SWAPLINK_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Host other peers reach this one at; required when --host is a
    /// wildcard such as 0.0.0.0 (overrides SWAPLINK_ADVERTISE_HOST)
    #[arg(long)]
    advertise_host: Option<String>,

    /// UDP port to bind, 0 for ephemeral (overrides SWAPLINK_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Target number of in-links and out-links
    #[arg(short = 'k', long, default_value_t = 3)]
    degree: usize,

    /// Peer to join through, as host:port (repeatable; none starts a new overlay)
    #[arg(short, long = "bootstrap")]
    bootstrap: Vec<Node>,

    /// Milliseconds between logged samples
    #[arg(long, default_value_t = 5000)]
    sample_interval_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn format_nodes(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(Node::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,swaplink_core=debug,swaplink_daemon=debug"
    } else {
        "info,swaplink_core=info,swaplink_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    ensure!(args.sample_interval_ms > 0, "--sample-interval-ms must be positive");

    let mut config = SwaplinkConfig::from_env().context("Invalid SWAPLINK_* configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.advertise_host {
        config.advertise_host = Some(host);
    }

    info!("Starting swaplink-daemon");
    info!("Bind address: {}", config.node());
    info!("Target degree: {}", args.degree);

    let binder =
        UdpBinder::new(config.rpc_timeout).with_advertise_host(config.advertise_host.clone());
    let mut peer = Swaplink::new(config, binder);
    let mut neighbours = peer.subscribe_neighbours();

    peer.join(args.degree, args.bootstrap)
        .await
        .context("Failed to join the overlay")?;
    info!("Joined as {}", peer.node());

    let mut samples = tokio::time::interval(Duration::from_millis(args.sample_interval_ms));

    info!("Peer running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(snapshot) = neighbours.recv() => {
                info!("Out-links ({}): [{}]", snapshot.len(), format_nodes(&snapshot));
            }

            _ = samples.tick() => {
                match peer.select().await {
                    Ok(sample) => info!("Sample: {}", sample),
                    Err(e) => debug!("No sample this round: {}", e),
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("In-links at shutdown: [{}]", format_nodes(&peer.in_links()));
    peer.leave().await;
    info!("Shutting down");
    Ok(())
}
