//! Coordinator binary

use clap::Parser;
use minifs::common::{Config, CoordinatorConfig};
use minifs::Coordinator;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minifs-coord")]
#[command(about = "minifs coordinator: placement, locking and ACK collection")]
#[command(version)]
struct Args {
    /// Port for clients and replicas
    cport: Option<u16>,

    /// Replication factor
    #[arg(value_name = "R")]
    replicas: Option<usize>,

    /// ACK timeout in milliseconds
    #[arg(value_name = "TIMEOUT")]
    timeout: Option<u64>,

    /// Rebalance period in milliseconds
    #[arg(value_name = "REBALANCE_PERIOD")]
    rebalance_period: Option<u64>,

    /// Bind address (overrides the positional port)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Replication factor
    #[arg(long)]
    replication_factor: Option<usize>,

    /// ACK timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Config file (default: minifs.toml or $MINIFS_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Command-line values win over the config file and environment.
    fn apply(&self, config: &mut CoordinatorConfig) {
        if let Some(port) = self.cport {
            config.bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        }
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(r) = self.replication_factor.or(self.replicas) {
            config.replication_factor = r;
        }
        if let Some(ms) = self.timeout_ms.or(self.timeout) {
            config.timeout_ms = ms;
        }
        if let Some(ms) = self.rebalance_period {
            config.rebalance_period_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let log_level = args.log_level.clone().unwrap_or(config.log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut coord_config = config.coordinator.unwrap_or_default();
    args.apply(&mut coord_config);

    let coordinator = Coordinator::bind(coord_config).await?;
    coordinator
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
