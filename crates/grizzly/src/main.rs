//! Grizzly command line
//!
//! - `serve`: recover the data directory and answer coordinators as a replica
//! - `query`: run one query against the recovered data directory
//! - `verify`: check one persisted block chain, or all of them
//! - `replay`: decode a WAL file and summarize what it would rebuild

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use clap::{Parser, Subcommand};
use anyhow::Result;
use grizzly::common::config::Config;

mod cli;

#[derive(Parser)]
#[command(name = "grizzly")]
#[command(author, version, about = "Grizzly - columnar engine with a verifiable block log", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "grizzly.toml", env = "GRIZZLY_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the recovered tables as a replication participant
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        listen: String,
    },

    /// Execute a query
    Query {
        /// Query text
        #[arg(short, long)]
        query: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Verify block chains: one chain directory, or every chain in the data directory
    Verify {
        /// Directory of a single persisted chain
        #[arg(short, long)]
        dir: Option<String>,
    },

    /// Decode a WAL file and report what replaying it produces
    Replay {
        /// WAL file; defaults to the configured one
        #[arg(short, long)]
        wal: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("grizzly=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen } => {
            let config = Config::load_or_default(&cli.config).await?;
            cli::serve(config, &listen).await?;
        }

        Commands::Query { query, format } => {
            let config = Config::load_or_default(&cli.config).await?;
            let output = cli::query(config, &query, &format).await?;
            println!("{}", output);
        }

        Commands::Verify { dir: Some(dir) } => {
            println!("{}", cli::verify_dir(&dir).await?);
        }

        Commands::Verify { dir: None } => {
            let config = Config::load_or_default(&cli.config).await?;
            println!("{}", cli::verify(config).await?);
        }

        Commands::Replay { wal } => {
            let config = Config::load_or_default(&cli.config).await?;
            println!("{}", cli::replay(&config, wal.as_deref()).await?);
        }

        Commands::Version => {
            println!("Grizzly version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
