//! Docker-backed action pipeline
//!
//! Bootstraps Kubernetes inside freshly provisioned node containers with
//! kubeadm. Each action is idempotent only in the sense that it overwrites
//! files it owns; re-running `kubeadm init` on a node is not supported.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use rand::Rng;
use tracing::{debug, info};

use kic_common::{
    ClusterConfig, ClusterIdentity, Error, NodeRole, Result, API_SERVER_INTERNAL_PORT,
};

use super::docker::DockerCli;
use super::ActionRunner;
use crate::kube_utils;
use crate::node::{self, Node};
use crate::pipeline::{self, Action, PipelineOption};

const HAPROXY_CONFIG_PATH: &str = "/usr/local/etc/haproxy/haproxy.cfg";
const KUBEADM_CONFIG_PATH: &str = "/kind/kubeadm.conf";
const KUBE_VERSION_PATH: &str = "/kind/version";
const DEFAULT_CNI_MANIFEST: &str = "/kind/manifests/default-cni.yaml";
const DEFAULT_STORAGE_MANIFEST: &str = "/kind/manifests/default-storage.yaml";
const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";
const CRI_SOCKET: &str = "unix:///run/containerd/containerd.sock";
const POD_SUBNET_PLACEHOLDER: &str = "{{ .PodSubnet }}";

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Runs the create pipeline with kubeadm inside node containers
#[derive(Clone, Debug, Default)]
pub struct DockerActionRunner {
    docker: DockerCli,
}

/// State shared by every action of one pipeline run
struct Run<'a> {
    cluster: &'a ClusterIdentity,
    config: &'a ClusterConfig,
    nodes: Vec<Node>,
    token: String,
    certificate_key: String,
    wait: Option<Duration>,
}

impl Run<'_> {
    fn control_planes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| n.role == NodeRole::ControlPlane)
    }

    fn workers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Worker)
    }

    fn load_balancer(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.role == NodeRole::ExternalLoadBalancer)
    }

    /// Nodes that run kubelet
    fn kube_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| n.role != NodeRole::ExternalLoadBalancer)
    }

    fn bootstrap_node(&self) -> Result<&Node> {
        self.control_planes().next().ok_or_else(|| {
            Error::internal_with_context("bootstrap_node", "no control-plane node in node set")
        })
    }

    /// The in-cluster address every node uses to reach the API server
    fn control_plane_endpoint(&self) -> Result<String> {
        let host = match self.load_balancer() {
            Some(lb) => lb.name.as_str(),
            None => self.bootstrap_node()?.name.as_str(),
        };
        Ok(format!("{}:{}", host, API_SERVER_INTERNAL_PORT))
    }

    /// The node whose API server port is published on the host
    fn api_server_node(&self) -> Result<&Node> {
        match self.load_balancer() {
            Some(lb) => Ok(lb),
            None => self.bootstrap_node(),
        }
    }
}

impl DockerActionRunner {
    pub fn new(docker: DockerCli) -> Self {
        Self { docker }
    }

    async fn run_action(&self, action: Action, run: &Run<'_>) -> Result<()> {
        match action {
            Action::LoadBalancerConfig => self.configure_load_balancer(run).await,
            Action::KubeconfigMaterialize => self.write_kubeadm_configs(run).await,
            Action::ControlPlaneInit => self.init_control_plane(run).await,
            Action::NodeJoin => self.join_nodes(run).await,
        }
    }

    async fn configure_load_balancer(&self, run: &Run<'_>) -> Result<()> {
        let Some(lb) = run.load_balancer() else {
            debug!("no external load balancer, skipping");
            return Ok(());
        };

        let mut backends = Vec::new();
        for cp in run.control_planes() {
            let ip = self.docker.container_ip(&cp.name).await?;
            backends.push((cp.name.clone(), ip));
        }

        let config = render_haproxy_config(&backends);
        self.docker
            .write_file(&lb.name, HAPROXY_CONFIG_PATH, &config)
            .await?;
        // haproxy reloads its configuration on SIGHUP
        self.docker
            .run(["kill", "-s", "HUP", lb.name.as_str()])
            .await?;
        info!(load_balancer = %lb, backends = backends.len(), "Configured load balancer");
        Ok(())
    }

    async fn write_kubeadm_configs(&self, run: &Run<'_>) -> Result<()> {
        let bootstrap = run.bootstrap_node()?;
        let version = self
            .docker
            .exec(&bootstrap.name, &["cat", KUBE_VERSION_PATH])
            .await?;
        let version = version.trim();
        let endpoint = run.control_plane_endpoint()?;

        for node in run.kube_nodes() {
            let node_ip = self.docker.container_ip(&node.name).await?;
            let params = KubeadmParams {
                cluster_name: run.cluster.name(),
                kubernetes_version: version,
                control_plane_endpoint: &endpoint,
                pod_subnet: &run.config.networking.pod_subnet,
                service_subnet: &run.config.networking.service_subnet,
                api_server_address: &run.config.networking.api_server_address,
                token: &run.token,
                certificate_key: &run.certificate_key,
                node_name: &node.name,
                node_ip: &node_ip,
                control_plane: node.role == NodeRole::ControlPlane,
            };
            self.docker
                .write_file(&node.name, KUBEADM_CONFIG_PATH, &render_kubeadm_config(&params))
                .await?;
            debug!(node = %node, "Wrote kubeadm config");
        }
        Ok(())
    }

    async fn init_control_plane(&self, run: &Run<'_>) -> Result<()> {
        let bootstrap = run.bootstrap_node()?;

        info!(node = %bootstrap, "Running kubeadm init");
        let config_arg = format!("--config={}", KUBEADM_CONFIG_PATH);
        self.docker
            .exec(
                &bootstrap.name,
                &[
                    "kubeadm",
                    "init",
                    "--skip-phases=preflight",
                    config_arg.as_str(),
                    "--skip-token-print",
                    "--upload-certs",
                ],
            )
            .await?;

        self.apply_default_manifests(run, bootstrap).await?;
        self.export_kubeconfig(run, bootstrap).await?;

        if let Some(timeout) = run.wait {
            info!(timeout = ?timeout, "Waiting for control plane to be ready");
            let client = kube_utils::create_client(&run.cluster.credentials_path()).await?;
            kube_utils::wait_for_control_plane_ready(&client, timeout).await?;
        }
        Ok(())
    }

    async fn apply_default_manifests(&self, run: &Run<'_>, node: &Node) -> Result<()> {
        let cni = self
            .docker
            .exec(&node.name, &["cat", DEFAULT_CNI_MANIFEST])
            .await?;
        let cni = cni.replace(POD_SUBNET_PLACEHOLDER, &run.config.networking.pod_subnet);
        self.kubectl_apply(node, &cni).await?;

        let storage = self
            .docker
            .exec(&node.name, &["cat", DEFAULT_STORAGE_MANIFEST])
            .await?;
        self.kubectl_apply(node, &storage).await?;
        Ok(())
    }

    async fn kubectl_apply(&self, node: &Node, manifest: &str) -> Result<()> {
        let kubeconfig = format!("--kubeconfig={}", ADMIN_KUBECONFIG);
        self.docker
            .run_with_stdin(
                [
                    "exec",
                    "-i",
                    node.name.as_str(),
                    "kubectl",
                    kubeconfig.as_str(),
                    "apply",
                    "-f",
                    "-",
                ],
                manifest.as_bytes(),
            )
            .await?;
        Ok(())
    }

    /// Copy the admin kubeconfig to the host, pointed at the published API port
    async fn export_kubeconfig(&self, run: &Run<'_>, bootstrap: &Node) -> Result<()> {
        let admin = self
            .docker
            .exec(&bootstrap.name, &["cat", ADMIN_KUBECONFIG])
            .await?;

        let api_node = run.api_server_node()?;
        let port_spec = format!("{}/tcp", API_SERVER_INTERNAL_PORT);
        let output = self
            .docker
            .run(["port", api_node.name.as_str(), port_spec.as_str()])
            .await?;
        let port = parse_port_output(&output).ok_or_else(|| {
            Error::internal_with_context(
                "export_kubeconfig",
                format!("unexpected `docker port` output: {:?}", output.trim()),
            )
        })?;

        let server = server_url(&run.config.networking.api_server_address, port);
        let kubeconfig = rewrite_kubeconfig_server(&admin, &server)?;
        let path = run.cluster.credentials_path();
        write_credentials(&path, &kubeconfig).await?;
        info!(path = %path.display(), server = %server, "Exported kubeconfig");
        Ok(())
    }

    async fn join_nodes(&self, run: &Run<'_>) -> Result<()> {
        // Control-plane joins contend on etcd membership; run them one at a time
        for cp in run.control_planes().skip(1) {
            self.join(cp).await?;
        }
        try_join_all(run.workers().map(|w| self.join(w))).await?;
        Ok(())
    }

    async fn join(&self, node: &Node) -> Result<()> {
        info!(node = %node, "Joining node");
        self.docker
            .exec(
                &node.name,
                &[
                    "kubeadm",
                    "join",
                    "--config",
                    KUBEADM_CONFIG_PATH,
                    "--skip-phases=preflight",
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ActionRunner for DockerActionRunner {
    async fn execute(
        &self,
        cluster: &ClusterIdentity,
        config: &ClusterConfig,
        nodes: &[Node],
        actions: &[Action],
        options: &[PipelineOption],
    ) -> Result<()> {
        let run = Run {
            cluster,
            config,
            nodes: node::sorted(nodes),
            token: generate_token(),
            certificate_key: generate_certificate_key(),
            wait: pipeline::wait_for_ready(options),
        };

        for action in actions {
            debug!(action = %action, "Starting action");
            self.run_action(*action, &run)
                .await
                .map_err(|e| Error::pipeline(action.name(), e.to_string()))?;
        }
        Ok(())
    }
}

/// A kubeadm bootstrap token: `[a-z0-9]{6}.[a-z0-9]{16}`
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let mut part = |len: usize| -> String {
        (0..len)
            .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
            .collect()
    };
    let id = part(6);
    let secret = part(16);
    format!("{}.{}", id, secret)
}

/// A 32-byte hex key used to encrypt uploaded control-plane certificates
fn generate_certificate_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn render_haproxy_config(backends: &[(String, String)]) -> String {
    let mut config = String::from(
        "global\n  log /dev/log local0\n  log /dev/log local1 notice\n  daemon\n\n\
         defaults\n  log global\n  mode tcp\n  option dontlognull\n  \
         timeout connect 5000\n  timeout client 50000\n  timeout server 50000\n\n",
    );
    config.push_str(&format!(
        "frontend control-plane\n  bind *:{port}\n  default_backend kube-apiservers\n\n\
         backend kube-apiservers\n  option httpchk GET /healthz\n",
        port = API_SERVER_INTERNAL_PORT
    ));
    for (name, ip) in backends {
        config.push_str(&format!(
            "  server {} {}:{} check check-ssl verify none\n",
            name,
            bracket_ipv6(ip),
            API_SERVER_INTERNAL_PORT
        ));
    }
    config
}

struct KubeadmParams<'a> {
    cluster_name: &'a str,
    kubernetes_version: &'a str,
    control_plane_endpoint: &'a str,
    pod_subnet: &'a str,
    service_subnet: &'a str,
    api_server_address: &'a str,
    token: &'a str,
    certificate_key: &'a str,
    node_name: &'a str,
    node_ip: &'a str,
    control_plane: bool,
}

fn render_kubeadm_config(p: &KubeadmParams<'_>) -> String {
    let join_control_plane = if p.control_plane {
        format!(
            "controlPlane:\n  localAPIEndpoint:\n    advertiseAddress: \"{ip}\"\n    \
             bindPort: {port}\n  certificateKey: \"{key}\"\n",
            ip = p.node_ip,
            port = API_SERVER_INTERNAL_PORT,
            key = p.certificate_key,
        )
    } else {
        String::new()
    };

    format!(
        r#"apiVersion: kubeadm.k8s.io/v1beta3
kind: ClusterConfiguration
clusterName: "{cluster}"
controlPlaneEndpoint: "{endpoint}"
kubernetesVersion: "{version}"
networking:
  podSubnet: "{pod_subnet}"
  serviceSubnet: "{service_subnet}"
apiServer:
  certSANs:
  - "localhost"
  - "127.0.0.1"
  - "{api_address}"
---
apiVersion: kubeadm.k8s.io/v1beta3
kind: InitConfiguration
bootstrapTokens:
- token: "{token}"
certificateKey: "{key}"
localAPIEndpoint:
  advertiseAddress: "{ip}"
  bindPort: {port}
nodeRegistration:
  name: "{node}"
  criSocket: "{cri}"
  kubeletExtraArgs:
    node-ip: "{ip}"
---
apiVersion: kubeadm.k8s.io/v1beta3
kind: JoinConfiguration
{join_control_plane}discovery:
  bootstrapToken:
    apiServerEndpoint: "{endpoint}"
    token: "{token}"
    unsafeSkipCAVerification: true
nodeRegistration:
  name: "{node}"
  criSocket: "{cri}"
  kubeletExtraArgs:
    node-ip: "{ip}"
---
apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
cgroupDriver: systemd
failSwapOn: false
"#,
        cluster = p.cluster_name,
        endpoint = p.control_plane_endpoint,
        version = p.kubernetes_version,
        pod_subnet = p.pod_subnet,
        service_subnet = p.service_subnet,
        api_address = p.api_server_address,
        token = p.token,
        key = p.certificate_key,
        ip = p.node_ip,
        port = API_SERVER_INTERNAL_PORT,
        node = p.node_name,
        cri = CRI_SOCKET,
        join_control_plane = join_control_plane,
    )
}

/// Host port from `docker port` output such as `127.0.0.1:32768`
fn parse_port_output(output: &str) -> Option<u16> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|line| line.rsplit_once(':'))
        .and_then(|(_, port)| port.parse().ok())
}

fn server_url(address: &str, port: u16) -> String {
    // Wildcard listeners are reachable through loopback
    let host = match address {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    };
    format!("https://{}:{}", bracket_ipv6(host), port)
}

fn bracket_ipv6(address: &str) -> String {
    if address.contains(':') {
        format!("[{}]", address)
    } else {
        address.to_string()
    }
}

/// Point every cluster entry of a kubeconfig at `server`
fn rewrite_kubeconfig_server(kubeconfig: &str, server: &str) -> Result<String> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(kubeconfig)?;
    let clusters = doc
        .get_mut("clusters")
        .and_then(serde_yaml::Value::as_sequence_mut)
        .ok_or_else(|| {
            Error::internal_with_context("rewrite_kubeconfig_server", "kubeconfig has no clusters")
        })?;

    for entry in clusters.iter_mut() {
        if let Some(cluster) = entry
            .get_mut("cluster")
            .and_then(serde_yaml::Value::as_mapping_mut)
        {
            cluster.insert("server".into(), server.into());
        }
    }
    Ok(serde_yaml::to_string(&doc)?)
}

async fn write_credentials(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}
