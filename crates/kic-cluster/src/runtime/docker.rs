//! Docker-backed node registry and provisioner
//!
//! Every node is a privileged container labelled with its cluster name and
//! role. Containers share the `kic` user-defined network so nodes can reach
//! each other by container name.

use std::collections::BTreeSet;
use std::process::Stdio;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use kic_common::{
    ClusterIdentity, Error, NodeRole, Result, API_SERVER_INTERNAL_PORT, CLUSTER_LABEL_KEY,
    ROLE_LABEL_KEY,
};

use super::{NodeProvisioner, NodeRegistry};
use crate::node::Node;
use crate::topology::{NodeSpec, Topology};

/// Docker network shared by all node containers
pub const NODE_NETWORK: &str = "kic";

/// Thin async wrapper around the `docker` binary
#[derive(Clone, Debug)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a docker-compatible binary other than `docker`
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a command and return its stdout
    pub async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = collect_args(args);
        debug!(command = %self.describe(&args), "running");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::command(self.describe(&args), e.to_string()))?;

        if !output.status.success() {
            return Err(Error::command(
                self.describe(&args),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command feeding `input` on stdin
    pub async fn run_with_stdin<I, S>(&self, args: I, input: &[u8]) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = collect_args(args);
        debug!(command = %self.describe(&args), "running with stdin");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::command(self.describe(&args), e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::command(
                self.describe(&args),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command and report only whether it exited successfully
    pub async fn succeeds<I, S>(&self, args: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = collect_args(args);
        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::command(self.describe(&args), e.to_string()))?;
        Ok(status.success())
    }

    /// Run a command inside a node container
    pub async fn exec(&self, node: &str, command: &[&str]) -> Result<String> {
        let mut args = vec!["exec", "--privileged", node];
        args.extend_from_slice(command);
        self.run(args).await
    }

    /// Write `contents` to `path` inside a node container
    pub async fn write_file(&self, node: &str, path: &str, contents: &str) -> Result<()> {
        let dir = path.rsplit_once('/').map(|(d, _)| d).unwrap_or("/");
        if !dir.is_empty() {
            self.exec(node, &["mkdir", "-p", dir]).await?;
        }
        self.run_with_stdin(
            ["exec", "-i", node, "cp", "/dev/stdin", path],
            contents.as_bytes(),
        )
        .await?;
        Ok(())
    }

    /// IPv4 address of a container on the node network
    pub async fn container_ip(&self, node: &str) -> Result<String> {
        let format = format!(
            "{{{{with index .NetworkSettings.Networks \"{}\"}}}}{{{{.IPAddress}}}}{{{{end}}}}",
            NODE_NETWORK
        );
        let ip = self.run(["inspect", "-f", format.as_str(), node]).await?;
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(Error::command(
                format!("{} inspect {}", self.binary, node),
                format!("container has no address on network {}", NODE_NETWORK),
            ));
        }
        Ok(ip.to_string())
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }
}

fn collect_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().map(|a| a.as_ref().to_string()).collect()
}

/// Node registry backed by `docker ps` / `docker rm`
#[derive(Clone, Debug, Default)]
pub struct DockerRegistry {
    docker: DockerCli,
}

impl DockerRegistry {
    pub fn new(docker: DockerCli) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl NodeRegistry for DockerRegistry {
    async fn list(&self, selector: &str) -> Result<Vec<Node>> {
        let format = format!("{{{{.Names}}}}\t{{{{.Label \"{}\"}}}}", ROLE_LABEL_KEY);
        let filter = format!("label={}", selector);
        let output = self
            .docker
            .run(["ps", "-a", "--filter", filter.as_str(), "--format", format.as_str()])
            .await?;
        Ok(parse_node_list(&output))
    }

    async fn delete(&self, nodes: &[Node]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm".to_string(), "-f".to_string(), "-v".to_string()];
        args.extend(nodes.iter().map(|n| n.name.clone()));

        self.docker
            .run(args)
            .await
            .map_err(|e| Error::node_deletion(e.to_string()))?;
        info!(count = nodes.len(), "Deleted node containers");
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let format = format!("{{{{.Label \"{}\"}}}}", CLUSTER_LABEL_KEY);
        let filter = format!("label={}", CLUSTER_LABEL_KEY);
        let output = self
            .docker
            .run(["ps", "-a", "--filter", filter.as_str(), "--format", format.as_str()])
            .await?;

        let clusters: BTreeSet<String> = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        Ok(clusters.into_iter().collect())
    }
}

/// Parse `docker ps` output of `name<TAB>role` lines
fn parse_node_list(output: &str) -> Vec<Node> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let (name, role) = line.split_once('\t').unwrap_or((line, ""));
            let role = role
                .trim()
                .parse::<NodeRole>()
                .unwrap_or_else(|_| Node::role_from_name(name));
            Node::new(name.trim(), role)
        })
        .collect()
}

/// Node provisioner backed by `docker run`
#[derive(Clone, Debug, Default)]
pub struct DockerProvisioner {
    docker: DockerCli,
}

impl DockerProvisioner {
    pub fn new(docker: DockerCli) -> Self {
        Self { docker }
    }

    async fn ensure_network(&self) -> Result<()> {
        if self
            .docker
            .succeeds(["network", "inspect", NODE_NETWORK])
            .await?
        {
            return Ok(());
        }
        info!(network = NODE_NETWORK, "Creating node network");
        if let Err(e) = self.docker.run(["network", "create", NODE_NETWORK]).await {
            // A concurrent create for another cluster may have won the race
            if self
                .docker
                .succeeds(["network", "inspect", NODE_NETWORK])
                .await?
            {
                debug!(network = NODE_NETWORK, "Node network created concurrently");
                return Ok(());
            }
            return Err(Error::provisioning(e.to_string()));
        }
        Ok(())
    }

    async fn create_node(
        &self,
        cluster: &ClusterIdentity,
        topology: &Topology,
        spec: &NodeSpec,
    ) -> Result<Node> {
        let name = spec.container_name(cluster);
        let args = run_args(cluster, topology, spec);

        info!(node = %name, role = %spec.role, image = %spec.image, "Creating node container");
        self.docker
            .run(args)
            .await
            .map_err(|e| Error::provisioning_for(&name, e.to_string()))?;

        Ok(Node::new(name, spec.role))
    }
}

#[async_trait]
impl NodeProvisioner for DockerProvisioner {
    async fn ensure_node_images(&self, topology: &Topology) -> Result<()> {
        for image in topology.images() {
            if self
                .docker
                .succeeds(["inspect", "--type=image", image])
                .await?
            {
                debug!(image = %image, "Image present locally");
                continue;
            }
            info!(image = %image, "Pulling image");
            self.docker
                .run(["pull", image])
                .await
                .map_err(|e| {
                    Error::provisioning(format!("failed to pull image {}: {}", image, e))
                })?;
        }
        Ok(())
    }

    async fn provision(&self, cluster: &ClusterIdentity, topology: &Topology) -> Result<Vec<Node>> {
        self.ensure_network().await?;

        // Every `docker run` must settle before returning so cleanup sees
        // all containers that will ever exist
        let creations = topology
            .nodes
            .iter()
            .map(|spec| self.create_node(cluster, topology, spec));
        let results = join_all(creations).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "Some node containers failed to start");
        }
        results.into_iter().collect()
    }
}

/// Build the `docker run` arguments for one node
fn run_args(cluster: &ClusterIdentity, topology: &Topology, spec: &NodeSpec) -> Vec<String> {
    let name = spec.container_name(cluster);
    let mut args: Vec<String> = vec![
        "run".into(),
        "--detach".into(),
        "--tty".into(),
        "--hostname".into(),
        name.clone(),
        "--name".into(),
        name,
        "--label".into(),
        format!("{}={}", CLUSTER_LABEL_KEY, cluster.name()),
        "--label".into(),
        format!("{}={}", ROLE_LABEL_KEY, spec.role),
        "--net".into(),
        NODE_NETWORK.into(),
        "--restart=on-failure:1".into(),
    ];

    if spec.role != NodeRole::ExternalLoadBalancer {
        args.extend(
            [
                "--privileged",
                "--security-opt",
                "seccomp=unconfined",
                "--security-opt",
                "apparmor=unconfined",
                "--tmpfs",
                "/tmp",
                "--tmpfs",
                "/run",
                "--volume",
                "/var",
                "--volume",
                "/lib/modules:/lib/modules:ro",
            ]
            .map(String::from),
        );
    }

    for mount in &spec.mounts {
        let mut volume = format!("{}:{}", mount.host_path, mount.container_path);
        if mount.read_only {
            volume.push_str(":ro");
        }
        args.push("--volume".into());
        args.push(volume);
    }

    for mapping in &spec.port_mappings {
        args.push("--publish".into());
        args.push(publish_arg(
            &mapping.listen_address,
            mapping.host_port,
            mapping.container_port,
            mapping.protocol.as_str(),
        ));
    }

    if spec.publishes_api_server {
        args.push("--publish".into());
        args.push(publish_arg(
            &topology.api_server_address,
            topology.api_server_port,
            API_SERVER_INTERNAL_PORT,
            "tcp",
        ));
    }

    args.push(spec.image.clone());
    args
}

fn publish_arg(address: &str, host_port: u16, container_port: u16, protocol: &str) -> String {
    let address = if address.contains(':') {
        format!("[{}]", address)
    } else {
        address.to_string()
    };
    // An empty host port lets docker pick a free one
    let host_port = if host_port == 0 {
        String::new()
    } else {
        host_port.to_string()
    };
    format!("{}:{}:{}/{}", address, host_port, container_port, protocol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kic_common::{ClusterConfig, NodeConfig, PortMapping};

    fn topology(roles: &[NodeRole]) -> Topology {
        let mut config = ClusterConfig {
            nodes: roles.iter().map(|r| NodeConfig::with_role(*r)).collect(),
            ..Default::default()
        };
        config.apply_defaults();
        Topology::derive(&config).unwrap()
    }

    #[test]
    fn parse_node_list_reads_roles() {
        let output = "dev-control-plane\tcontrol-plane\ndev-worker\tworker\n\n";
        let nodes = parse_node_list(output);
        assert_eq!(
            nodes,
            vec![
                Node::new("dev-control-plane", NodeRole::ControlPlane),
                Node::new("dev-worker", NodeRole::Worker),
            ]
        );
    }

    #[test]
    fn parse_node_list_falls_back_to_name_without_label() {
        let nodes = parse_node_list("old-control-plane\t\nold-external-load-balancer\n");
        assert_eq!(nodes[0].role, NodeRole::ControlPlane);
        assert_eq!(nodes[1].role, NodeRole::ExternalLoadBalancer);
    }

    #[test]
    fn parse_node_list_empty_output_is_empty() {
        assert!(parse_node_list("").is_empty());
    }

    #[test]
    fn run_args_label_node_with_cluster_and_role() {
        let cluster = ClusterIdentity::new("dev");
        let topology = topology(&[NodeRole::ControlPlane]);
        let args = run_args(&cluster, &topology, &topology.nodes[0]);

        assert!(args.contains(&"io.x-k8s.kic.cluster=dev".to_string()));
        assert!(args.contains(&"io.x-k8s.kic.role=control-plane".to_string()));
        assert!(args.contains(&"--privileged".to_string()));
        assert!(args.contains(&"127.0.0.1::6443/tcp".to_string()));
        assert_eq!(args.last().map(String::as_str), Some(kic_common::DEFAULT_NODE_IMAGE));
    }

    #[test]
    fn load_balancer_is_not_privileged() {
        let cluster = ClusterIdentity::new("ha");
        let topology = topology(&[NodeRole::ControlPlane, NodeRole::ControlPlane]);
        let lb = topology.api_server_node().unwrap();
        let args = run_args(&cluster, &topology, lb);

        assert!(!args.contains(&"--privileged".to_string()));
        assert!(args.contains(&"ha-external-load-balancer".to_string()));
        assert!(args.contains(&"127.0.0.1::6443/tcp".to_string()));
    }

    #[test]
    fn run_args_include_mounts_and_port_mappings() {
        let cluster = ClusterIdentity::new("dev");
        let mut config = ClusterConfig::default();
        config.nodes.push(NodeConfig {
            extra_mounts: vec![kic_common::Mount {
                host_path: "/src".to_string(),
                container_path: "/src".to_string(),
                read_only: true,
            }],
            extra_port_mappings: vec![PortMapping {
                container_port: 80,
                host_port: 8080,
                ..Default::default()
            }],
            ..Default::default()
        });
        config.networking.api_server_port = 6443;
        config.apply_defaults();
        let topology = Topology::derive(&config).unwrap();
        let args = run_args(&cluster, &topology, &topology.nodes[0]);

        assert!(args.contains(&"/src:/src:ro".to_string()));
        assert!(args.contains(&"0.0.0.0:8080:80/tcp".to_string()));
        assert!(args.contains(&"127.0.0.1:6443:6443/tcp".to_string()));
    }

    #[test]
    fn publish_arg_brackets_ipv6() {
        assert_eq!(publish_arg("::1", 0, 6443, "tcp"), "[::1]::6443/tcp");
    }

    /// Install a shell script standing in for the docker binary
    #[cfg(unix)]
    fn fake_docker(dir: &std::path::Path, body: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::with_binary(path.to_string_lossy())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn provision_waits_for_slow_nodes_when_one_fails() {
        let dir = tempfile::tempdir().unwrap();
        let created = dir.path().join("created");
        let docker = fake_docker(
            dir.path(),
            &format!(
                r#"case "$1" in
  run)
    case "$*" in
      *dev-worker*) echo "worker exited" >&2; exit 1 ;;
    esac
    sleep 1
    touch "{}"
    ;;
esac
exit 0
"#,
                created.display()
            ),
        );
        let provisioner = DockerProvisioner::new(docker);
        let cluster = ClusterIdentity::new("dev");
        let topology = topology(&[NodeRole::ControlPlane, NodeRole::Worker]);

        let err = provisioner.provision(&cluster, &topology).await.unwrap_err();

        assert!(matches!(err, Error::Provisioning { ref node, .. } if node == "dev-worker"));
        assert!(created.exists(), "control-plane creation still in flight");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn network_created_concurrently_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let network = dir.path().join("network");
        let docker = fake_docker(
            dir.path(),
            &format!(
                r#"if [ "$1" = network ]; then
  case "$2" in
    inspect) [ -f "{net}" ] && exit 0; exit 1 ;;
    create) touch "{net}"; echo "network with name kic already exists" >&2; exit 1 ;;
  esac
fi
exit 0
"#,
                net = network.display()
            ),
        );

        DockerProvisioner::new(docker).ensure_network().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn network_create_failure_is_provisioning_error() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            dir.path(),
            r#"[ "$1" = network ] && exit 1
exit 0
"#,
        );

        let err = DockerProvisioner::new(docker).ensure_network().await.unwrap_err();
        assert!(matches!(err, Error::Provisioning { .. }));
    }
}
