//! Full create / inspect / delete cycle of a single-node cluster
//!
//! ```bash
//! cargo test -p kic-cli --features docker-e2e --test e2e lifecycle -- --nocapture
//! ```

#![cfg(feature = "docker-e2e")]

use std::sync::Once;
use std::time::Duration;

use tracing::info;

use kic_cli::commands::generate_run_id;
use kic_cluster::{Backend, ClusterContext, CreateOption, NodeRole};
use kic_common::{ClusterConfig, ClusterIdentity};

const READY_TIMEOUT: Duration = Duration::from_secs(300);

static TRACING: Once = Once::new();

fn init_e2e_test() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn context(name: &str, kubeconfig_dir: &std::path::Path) -> ClusterContext {
    ClusterContext::new(
        ClusterIdentity::with_credentials_dir(name, kubeconfig_dir),
        Backend::docker(),
    )
}

#[tokio::test]
async fn test_single_node_lifecycle() {
    init_e2e_test();
    let dir = tempfile::tempdir().expect("temp dir");
    let name = format!("e2e-{}", generate_run_id());
    let ctx = context(&name, dir.path());

    info!(cluster = %name, "Creating cluster");
    let result = ctx
        .create(
            ClusterConfig::default(),
            &[CreateOption::WaitForReady(READY_TIMEOUT)],
        )
        .await;
    if let Err(e) = &result {
        let _ = ctx.delete().await;
        panic!("create failed: {}", e);
    }

    let nodes = ctx.list_nodes().await.expect("list nodes");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].role, NodeRole::ControlPlane);
    assert!(ctx.identity().credentials_path().exists());

    let logs = dir.path().join("logs");
    ctx.collect_logs(&logs).await.expect("collect logs");
    assert!(logs.join("docker-info.txt").exists());
    assert!(logs.join(&nodes[0].name).join("inspect.json").exists());

    ctx.delete().await.expect("delete");
    assert!(ctx.list_nodes().await.expect("list nodes").is_empty());
    assert!(!ctx.identity().credentials_path().exists());

    // A second delete of the same cluster is a no-op
    ctx.delete().await.expect("second delete");
}

#[tokio::test]
async fn test_failed_create_with_retain_keeps_nodes() {
    init_e2e_test();
    let dir = tempfile::tempdir().expect("temp dir");
    let name = format!("e2e-retain-{}", generate_run_id());
    let ctx = context(&name, dir.path());

    // An image without kubeadm provisions fine but fails the pipeline
    let mut config = ClusterConfig::default();
    config.apply_defaults();
    config.override_node_image("busybox:1.36");

    let err = ctx
        .create(config, &[CreateOption::Retain(true)])
        .await
        .expect_err("create should fail");
    assert!(err.failed_action().is_some(), "unexpected error: {}", err);

    let nodes = ctx.list_nodes().await.expect("list nodes");
    assert_eq!(nodes.len(), 1);

    ctx.delete().await.expect("delete");
}
