//! kic CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// kic - Kubernetes clusters in containers
#[derive(Parser, Debug)]
#[command(name = "kic")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a cluster
    Create(commands::create::CreateArgs),
    /// Delete a cluster
    Delete(commands::delete::DeleteArgs),
    /// Get clusters, nodes or credentials paths
    Get(commands::get::GetArgs),
    /// Export cluster diagnostics
    Export(commands::export::ExportArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Create(args) => commands::create::run(args).await,
            Commands::Delete(args) => commands::delete::run(args).await,
            Commands::Get(args) => commands::get::run(args).await,
            Commands::Export(args) => commands::export::run(args).await,
        }
    }
}
