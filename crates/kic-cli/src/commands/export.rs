//! Export command - dump cluster diagnostics to disk

use std::path::PathBuf;

use clap::{Args, Subcommand};

use kic_cluster::{Backend, ClusterContext};

use super::{generate_run_id, ClusterArgs};
use crate::{Error, Result};

/// Export resources
#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub resource: ExportResource,
}

/// Resource to export
#[derive(Subcommand, Debug)]
pub enum ExportResource {
    /// Export node logs and runtime state
    Logs {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Output directory (default: a fresh directory under the system temp dir)
        dir: Option<PathBuf>,
    },
}

/// Run the export command
pub async fn run(args: ExportArgs) -> Result<()> {
    match args.resource {
        ExportResource::Logs { cluster, dir } => {
            let dir = dir.unwrap_or_else(default_logs_dir);
            let ctx = ClusterContext::new(cluster.identity(), Backend::docker());

            if ctx.list_nodes().await?.is_empty() {
                return Err(Error::validation(format!(
                    "no nodes found for cluster '{}'",
                    ctx.identity().name()
                )));
            }

            ctx.collect_logs(&dir).await?;
            println!("Exported logs for cluster '{}' to {}", ctx.identity().name(), dir.display());
            Ok(())
        }
    }
}

fn default_logs_dir() -> PathBuf {
    std::env::temp_dir().join(format!("kic-logs-{}", generate_run_id()))
}
