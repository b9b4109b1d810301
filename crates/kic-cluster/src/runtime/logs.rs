//! Diagnostics export from node containers

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use kic_common::{NodeRole, Result};

use super::docker::DockerCli;
use super::LogCollector;
use crate::node::Node;

/// Services whose journals are captured from every kubelet node
const JOURNAL_UNITS: [&str; 2] = ["kubelet", "containerd"];

/// Dumps docker and node-level logs into a directory tree
#[derive(Clone, Debug, Default)]
pub struct DockerLogCollector {
    docker: DockerCli,
}

impl DockerLogCollector {
    pub fn new(docker: DockerCli) -> Self {
        Self { docker }
    }

    async fn collect_node(&self, node: &Node, dir: &Path) -> Result<()> {
        let node_dir = dir.join(&node.name);
        tokio::fs::create_dir_all(&node_dir).await?;

        let inspect = self.docker.run(["inspect", node.name.as_str()]).await?;
        tokio::fs::write(node_dir.join("inspect.json"), inspect).await?;

        let serial = self.docker.run(["logs", node.name.as_str()]).await?;
        tokio::fs::write(node_dir.join("serial.log"), serial).await?;

        if node.role == NodeRole::ExternalLoadBalancer {
            return Ok(());
        }

        for unit in JOURNAL_UNITS {
            // A unit that never started has no journal; keep going
            match self
                .docker
                .exec(&node.name, &["journalctl", "--no-pager", "-u", unit])
                .await
            {
                Ok(journal) => {
                    tokio::fs::write(node_dir.join(format!("{}.log", unit)), journal).await?
                }
                Err(e) => warn!(node = %node, unit, error = %e, "Failed to read journal"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LogCollector for DockerLogCollector {
    async fn collect(&self, nodes: &[Node], dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;

        let docker_info = self.docker.run(["info"]).await?;
        tokio::fs::write(dir.join("docker-info.txt"), docker_info).await?;

        for node in nodes {
            self.collect_node(node, dir).await?;
        }
        info!(dir = %dir.display(), nodes = nodes.len(), "Exported logs");
        Ok(())
    }
}
