//! Create command - bring up a new cluster

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use tracing::info;

use kic_cluster::{Backend, ClusterContext, CreateOption};
use kic_common::ClusterConfig;

use super::ClusterArgs;
use crate::Result;

/// Create resources
#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(subcommand)]
    pub resource: CreateResource,
}

/// Resource to create
#[derive(Subcommand, Debug)]
pub enum CreateResource {
    /// Create a cluster
    Cluster(CreateClusterArgs),
}

#[derive(Args, Debug)]
pub struct CreateClusterArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Path to a cluster configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Node image to use for every node (overrides the config file)
    #[arg(long, env = "KIC_NODE_IMAGE")]
    pub image: Option<String>,

    /// Keep nodes after a failed create for debugging
    #[arg(long)]
    pub retain: bool,

    /// Seconds to wait for the control plane to be ready (0 = don't wait)
    #[arg(long, value_name = "SECS", default_value = "0")]
    pub wait: u64,
}

impl CreateClusterArgs {
    /// Load the configuration file, or the default configuration
    pub fn load_config(&self) -> Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_file(path)?,
            None => ClusterConfig::default(),
        };
        if let Some(image) = &self.image {
            // Defaults first so an empty node list still gets the image
            config.apply_defaults();
            config.override_node_image(image);
        }
        Ok(config)
    }

    /// Creation options selected by flags
    pub fn options(&self) -> Vec<CreateOption> {
        let mut options = vec![CreateOption::Retain(self.retain)];
        if self.wait > 0 {
            options.push(CreateOption::WaitForReady(Duration::from_secs(self.wait)));
        }
        options
    }
}

/// Run the create command
pub async fn run(args: CreateArgs) -> Result<()> {
    match args.resource {
        CreateResource::Cluster(args) => create_cluster(args).await,
    }
}

async fn create_cluster(args: CreateClusterArgs) -> Result<()> {
    let config = args.load_config()?;
    let identity = args.cluster.identity();
    info!(cluster = %identity.name(), "Creating cluster");

    let guidance = ClusterContext::new(identity, Backend::docker())
        .create(config, &args.options())
        .await?;
    println!("{}", guidance);
    Ok(())
}
