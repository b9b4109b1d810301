//! Kubernetes client helpers used after the control plane is up

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, NodeCondition};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use kic_common::Error;

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";
/// Label carried by control-plane nodes
pub const CONTROL_PLANE_NODE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Default polling interval for wait operations
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from a kubeconfig file
pub async fn create_client(kubeconfig: &Path) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to read kubeconfig: {}", e))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Check if a node condition of the given type has status "True"
pub fn has_condition(conditions: Option<&[NodeCondition]>, condition_type: &str) -> bool {
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == condition_type && c.status == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Poll `check_fn` until it returns `Ok(true)`, an error, or `timeout` passes.
///
/// Transient errors should be mapped to `Ok(false)` by the caller.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = std::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                debug!("condition not met yet, polling again");
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wait for every control-plane node to report Ready
pub async fn wait_for_control_plane_ready(client: &Client, timeout: Duration) -> Result<(), Error> {
    let nodes: Api<Node> = Api::all(client.clone());
    let params = ListParams::default().labels(CONTROL_PLANE_NODE_LABEL);

    poll_until(
        timeout,
        DEFAULT_POLL_INTERVAL,
        format!("timed out after {:?} waiting for control-plane nodes to be ready", timeout),
        || async {
            // The API server may still be coming up; keep polling on errors
            let node_list = match nodes.list(&params).await {
                Ok(list) => list,
                Err(e) => {
                    debug!(error = %e, "failed to list nodes");
                    return Ok(false);
                }
            };

            if node_list.items.is_empty() {
                return Ok(false);
            }

            Ok(node_list.items.iter().all(|node| {
                let conditions = node.status.as_ref().and_then(|s| s.conditions.as_ref());
                has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
            }))
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn condition(type_: &str, status: &str) -> NodeCondition {
        NodeCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn has_condition_requires_true_status() {
        let conditions = vec![
            condition("MemoryPressure", "False"),
            condition(CONDITION_READY, "True"),
        ];
        assert!(has_condition(Some(conditions.as_slice()), CONDITION_READY));

        let not_ready = vec![condition(CONDITION_READY, "False")];
        assert!(!has_condition(Some(not_ready.as_slice()), CONDITION_READY));
        assert!(!has_condition(None, CONDITION_READY));
    }

    #[tokio::test]
    async fn poll_until_returns_when_condition_met() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "never",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n >= 2) }
            },
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_until_times_out() {
        let result = poll_until(
            Duration::from_millis(20),
            Duration::from_millis(5),
            "waiting for godot",
            || async { Ok(false) },
        )
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("waiting for godot"));
    }

    #[tokio::test]
    async fn poll_until_stops_on_error() {
        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "unused",
            || async { Err(Error::internal_with_context("test", "boom")) },
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("boom"));
    }
}
