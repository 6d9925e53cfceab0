//! CLI for the file store

use clap::{Parser, Subcommand};
use minifs::common::format_bytes;
use minifs::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "minifs")]
#[command(about = "minifs replicated file store CLI")]
#[command(version)]
struct Cli {
    /// Coordinator address
    #[arg(long, default_value = "127.0.0.1:12345")]
    coordinator: SocketAddr,

    /// Network timeout in milliseconds (keep above the coordinator's)
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored files
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store a file
    Store {
        /// Name in the store
        name: String,

        /// File path
        #[arg(long)]
        file: PathBuf,
    },

    /// Load a file
    Load {
        /// Name in the store
        name: String,

        /// Output file
        #[arg(long)]
        output: PathBuf,
    },

    /// Remove a file
    Remove {
        /// Name in the store
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut client = Client::connect(cli.coordinator, Duration::from_millis(cli.timeout_ms)).await?;

    match cli.command {
        Commands::List { json } => {
            let names = client.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("(no files)");
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }

        Commands::Store { name, file } => {
            let data = tokio::fs::read(&file).await?;
            client.store(&name, &data).await?;
            println!("✓ Stored {} ({})", name, format_bytes(data.len() as u64));
        }

        Commands::Load { name, output } => {
            let data = client.load(&name).await?;
            tokio::fs::write(&output, &data).await?;
            println!(
                "✓ Loaded {} ({}) into {}",
                name,
                format_bytes(data.len() as u64),
                output.display()
            );
        }

        Commands::Remove { name } => {
            client.remove(&name).await?;
            println!("✓ Removed {}", name);
        }
    }

    Ok(())
}
