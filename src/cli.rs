//! Command-line interface for the package repository server.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::server::run_server;

/// Command-line interface for the package repository server
#[derive(Parser)]
#[command(name = "pkg-depot")]
#[command(about = "Package repository server with local, proxy-cache and virtual repositories")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the package repository server
    Start {
        /// Host to bind the server to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to run the server on
        #[arg(long, default_value = "3080")]
        port: u16,

        /// Data directory for repository storage
        #[arg(long, default_value = "./data")]
        data: PathBuf,

        /// Path to a JSON config file (seeded repositories, limits)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Execute the parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start {
            host,
            port,
            data,
            config,
        } => run_server(host, port, data, config).await,
    }
}
