//! Storage node binary

use anyhow::Result;
use clap::Parser;
use minifs::common::{Config, ReplicaConfig};
use minifs::ReplicaServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minifs-replica")]
#[command(about = "minifs storage node")]
#[command(version)]
struct Args {
    /// Address clients connect to; its port is the replica's identity
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Coordinator address
    #[arg(short, long)]
    coordinator: Option<SocketAddr>,

    /// Data directory for stored files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Timeout for client transfers in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Keep files found in the data directory instead of clearing it
    #[arg(long)]
    keep_existing: bool,

    /// Config file (default: minifs.toml or $MINIFS_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let log_level = args.log_level.clone().unwrap_or(config.log_level);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut replica_config: ReplicaConfig = config.replica.unwrap_or_default();
    if let Some(bind) = args.bind {
        replica_config.bind_addr = bind;
    }
    if let Some(coordinator) = args.coordinator {
        replica_config.coordinator_addr = coordinator;
    }
    if let Some(dir) = args.data_dir {
        replica_config.data_dir = dir;
    }
    if let Some(ms) = args.timeout_ms {
        replica_config.timeout_ms = ms;
    }
    if args.keep_existing {
        replica_config.clean_on_start = false;
    }

    let server = ReplicaServer::bind(replica_config).await?;
    server
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
