//! CLI commands

use std::path::PathBuf;

use clap::Args;

use kic_common::{ClusterIdentity, DEFAULT_CLUSTER_NAME};

pub mod create;
pub mod delete;
pub mod export;
pub mod get;

/// Arguments selecting which cluster a command operates on
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Cluster name
    #[arg(long, env = "KIC_CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    pub name: String,

    /// Directory holding generated kubeconfig files (default: ~/.kube)
    #[arg(long, value_name = "DIR")]
    pub kubeconfig_dir: Option<PathBuf>,
}

impl ClusterArgs {
    /// Identity of the selected cluster
    pub fn identity(&self) -> ClusterIdentity {
        match &self.kubeconfig_dir {
            Some(dir) => ClusterIdentity::with_credentials_dir(&self.name, dir),
            None => ClusterIdentity::new(&self.name),
        }
    }
}

/// Generate a short readable run ID (6 hex chars).
///
/// Used to name fresh output directories so parallel runs never collide.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32;
    let pid = std::process::id();
    format!("{:06x}", (timestamp ^ pid) & 0xFFFFFF)
}
