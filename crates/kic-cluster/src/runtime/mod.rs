//! Container runtime collaborators
//!
//! The orchestrator only talks to the container runtime through these traits,
//! allowing tests to mock them while production code shells out to Docker.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use kic_common::{ClusterConfig, ClusterIdentity, Error};

use crate::node::Node;
use crate::pipeline::{Action, PipelineOption};
use crate::topology::Topology;

pub mod actions;
pub mod docker;
pub mod logs;

pub use actions::DockerActionRunner;
pub use docker::{DockerCli, DockerProvisioner, DockerRegistry};
pub use logs::DockerLogCollector;

/// Lists and removes node containers by label
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Every container matching `selector`; empty when there are none
    async fn list(&self, selector: &str) -> Result<Vec<Node>, Error>;

    /// Remove the given containers. Already-removed containers are not an error.
    async fn delete(&self, nodes: &[Node]) -> Result<(), Error>;

    /// Names of all clusters with at least one node container
    async fn list_clusters(&self) -> Result<Vec<String>, Error>;
}

/// Realizes node specifications as running containers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeProvisioner: Send + Sync {
    /// Make sure every image the topology needs is present locally
    async fn ensure_node_images(&self, topology: &Topology) -> Result<(), Error>;

    /// Create one container per node specification.
    ///
    /// On error some containers may already exist; they carry the cluster
    /// label so a later delete finds them.
    async fn provision(
        &self,
        cluster: &ClusterIdentity,
        topology: &Topology,
    ) -> Result<Vec<Node>, Error>;
}

/// Executes post-provisioning actions against the node set
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Run `actions` in order, stopping at the first failure.
    ///
    /// Failures are reported as [`Error::Pipeline`] naming the action.
    async fn execute(
        &self,
        cluster: &ClusterIdentity,
        config: &ClusterConfig,
        nodes: &[Node],
        actions: &[Action],
        options: &[PipelineOption],
    ) -> Result<(), Error>;
}

/// Extracts diagnostics from nodes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogCollector: Send + Sync {
    /// Write diagnostics for every node under `dir`
    async fn collect(&self, nodes: &[Node], dir: &Path) -> Result<(), Error>;
}

/// The set of collaborators a [`ClusterContext`](crate::ClusterContext) uses
#[derive(Clone)]
pub struct Backend {
    pub registry: Arc<dyn NodeRegistry>,
    pub provisioner: Arc<dyn NodeProvisioner>,
    pub actions: Arc<dyn ActionRunner>,
    pub logs: Arc<dyn LogCollector>,
}

impl Backend {
    /// Collaborators backed by the local `docker` CLI
    pub fn docker() -> Self {
        let cli = DockerCli::new();
        Self {
            registry: Arc::new(DockerRegistry::new(cli.clone())),
            provisioner: Arc::new(DockerProvisioner::new(cli.clone())),
            actions: Arc::new(DockerActionRunner::new(cli.clone())),
            logs: Arc::new(DockerLogCollector::new(cli)),
        }
    }
}
