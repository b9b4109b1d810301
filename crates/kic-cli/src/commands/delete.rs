//! Delete command - tear down a cluster

use clap::{Args, Subcommand};
use tracing::info;

use kic_cluster::{Backend, ClusterContext};

use super::ClusterArgs;
use crate::Result;

/// Delete resources
#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(subcommand)]
    pub resource: DeleteResource,
}

/// Resource to delete
#[derive(Subcommand, Debug)]
pub enum DeleteResource {
    /// Delete a cluster and its kubeconfig file
    Cluster(ClusterArgs),
}

/// Run the delete command
pub async fn run(args: DeleteArgs) -> Result<()> {
    match args.resource {
        DeleteResource::Cluster(cluster) => {
            let identity = cluster.identity();
            info!(cluster = %identity.name(), "Deleting cluster");
            ClusterContext::new(identity, Backend::docker())
                .delete()
                .await?;
            Ok(())
        }
    }
}
