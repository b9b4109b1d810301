//! Cluster lifecycle orchestration
//!
//! [`ClusterContext`] sequences the create flow (validate, derive, provision,
//! configure) and owns the retain-or-cleanup decision when a stage after
//! provisioning fails. It also implements teardown, node listing and log
//! export. All container work is delegated to the [`Backend`] collaborators.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use kic_common::{ClusterConfig, ClusterIdentity, Error, Result, KUBECONFIG_ENV};

use crate::context::RunContext;
use crate::node::Node;
use crate::options::CreateOption;
use crate::pipeline::CREATE_ACTIONS;
use crate::runtime::Backend;
use crate::status::{StatusGuard, StatusSink, TracingStatus};
use crate::topology::Topology;

/// Lifecycle operations for one named cluster
#[derive(Clone)]
pub struct ClusterContext {
    identity: ClusterIdentity,
    backend: Backend,
    status: Arc<dyn StatusSink>,
}

impl ClusterContext {
    /// Operate on `identity` through `backend`, reporting progress via tracing
    pub fn new(identity: ClusterIdentity, backend: Backend) -> Self {
        Self {
            identity,
            backend,
            status: Arc::new(TracingStatus::new()),
        }
    }

    /// Report progress to `status` instead of the default tracing sink
    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    /// Create the cluster described by `config`.
    ///
    /// Returns connection guidance for the user on success. When provisioning
    /// or the action pipeline fails, created nodes are deleted unless a
    /// [`CreateOption::Retain`] asked to keep them; either way the original
    /// error is returned.
    pub async fn create(
        &self,
        mut config: ClusterConfig,
        options: &[CreateOption],
    ) -> Result<String> {
        self.identity.validate()?;

        config.apply_defaults();
        config.validate()?;
        let topology = Topology::derive(&config)?;
        topology.validate()?;

        let ctx = RunContext::new(config, topology, self.identity.clone(), self.status.clone())
            .with_options(options);
        let _guard = StatusGuard::new(ctx.status.clone());

        info!(
            cluster = %ctx.identity.name(),
            nodes = ctx.topology.nodes.len(),
            retain = ctx.retain,
            "Creating cluster"
        );

        ctx.status.start("Ensuring node images");
        if let Err(e) = self.backend.provisioner.ensure_node_images(&ctx.topology).await {
            warn!(error = %e, "Failed to prefetch node images, continuing");
            ctx.status.warn(&format!("failed to ensure node images: {}", e));
            ctx.status.end(false);
        }

        if let Err(err) = self.provision_and_configure(&ctx).await {
            ctx.status.end(false);
            error!(cluster = %ctx.identity.name(), error = %err, "Cluster creation failed");
            if ctx.retain {
                warn!(
                    cluster = %ctx.identity.name(),
                    "Retaining nodes for debugging; run `kic delete cluster --name={}` when done",
                    ctx.identity.name()
                );
            } else if let Err(cleanup) = self.delete().await {
                error!(
                    cluster = %ctx.identity.name(),
                    error = %cleanup,
                    "Failed to clean up after failed create"
                );
            }
            return Err(err);
        }

        ctx.status.end(true);
        info!(cluster = %ctx.identity.name(), "Cluster created");
        Ok(success_guidance(ctx.identity.name(), cfg!(windows)))
    }

    async fn provision_and_configure(&self, ctx: &RunContext) -> Result<()> {
        ctx.status.start("Preparing nodes");
        let nodes = self
            .backend
            .provisioner
            .provision(&ctx.identity, &ctx.topology)
            .await?;

        ctx.status.start("Configuring cluster");
        self.backend
            .actions
            .execute(
                &ctx.identity,
                &ctx.config,
                &nodes,
                &CREATE_ACTIONS,
                &ctx.pipeline_options,
            )
            .await
    }

    /// Delete every node of the cluster and its credentials file.
    ///
    /// Deleting a cluster that no longer exists succeeds.
    pub async fn delete(&self) -> Result<()> {
        let nodes = self.list_nodes().await?;

        let path = self.identity.credentials_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed credentials file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                let err = Error::CredentialsRemoval {
                    path: path.clone(),
                    source,
                };
                self.status.warn(&err.to_string());
            }
        }

        if let Ok(value) = std::env::var(KUBECONFIG_ENV) {
            if references_path(&value, &path) {
                self.status.warn(&format!(
                    "{} still references {}; run `unset {}`",
                    KUBECONFIG_ENV,
                    path.display(),
                    KUBECONFIG_ENV
                ));
            }
        }

        self.backend
            .registry
            .delete(&nodes)
            .await
            .map_err(|e| match e {
                Error::NodeDeletion { .. } => e,
                other => Error::node_deletion(other.to_string()),
            })?;

        info!(cluster = %self.identity.name(), nodes = nodes.len(), "Deleted cluster");
        Ok(())
    }

    /// Every node currently labelled as part of this cluster
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let selector = self.identity.label();
        self.backend
            .registry
            .list(&selector)
            .await
            .map_err(|e| Error::list(selector, e))
    }

    /// Export diagnostics of every node into `dir`
    pub async fn collect_logs(&self, dir: &Path) -> Result<()> {
        let nodes = self.list_nodes().await?;
        self.backend.logs.collect(&nodes, dir).await
    }
}

/// Whether a `KUBECONFIG`-style value mentions `path`
fn references_path(value: &str, path: &Path) -> bool {
    let path = path.to_string_lossy();
    !path.is_empty() && value.contains(path.as_ref())
}

/// Instructions for pointing a client at the new cluster's credentials
pub fn success_guidance(name: &str, windows: bool) -> String {
    let path_cmd = format!("kic get kubeconfig-path --name=\"{}\"", name);
    if windows {
        format!(
            "Cluster creation complete. You can now use the cluster with:\n\n\
             cmd.exe:\n\n\
             for /f \"tokens=*\" %i in ('{path_cmd}') do set KUBECONFIG=%i\n\
             kubectl cluster-info\n\n\
             PowerShell:\n\n\
             $env:KUBECONFIG = ({path_cmd})\n\
             kubectl cluster-info\n\n\
             bash:\n\n\
             export KUBECONFIG=\"$({path_cmd})\"\n\
             kubectl cluster-info\n",
            path_cmd = path_cmd
        )
    } else {
        format!(
            "Cluster creation complete. You can now use the cluster with:\n\n\
             export KUBECONFIG=\"$({})\"\n\
             kubectl cluster-info\n",
            path_cmd
        )
    }
}
