//! Declarative cluster configuration
//!
//! The configuration document is YAML:
//!
//! ```yaml
//! kind: Cluster
//! apiVersion: kic.x-k8s.io/v1alpha1
//! nodes:
//! - role: control-plane
//! - role: worker
//!   extraPortMappings:
//!   - containerPort: 80
//!     hostPort: 8080
//! networking:
//!   apiServerPort: 6443
//! ```
//!
//! Configurations built in memory must behave like ones loaded from disk, so
//! every consumer calls [`ClusterConfig::apply_defaults`] before
//! [`ClusterConfig::validate`].

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, DEFAULT_NODE_IMAGE};

/// The only supported `kind`
pub const CLUSTER_KIND: &str = "Cluster";

/// The only supported `apiVersion`
pub const CLUSTER_API_VERSION: &str = "kic.x-k8s.io/v1alpha1";

const DEFAULT_API_SERVER_ADDRESS: &str = "127.0.0.1";
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";
const DEFAULT_POD_SUBNET: &str = "10.244.0.0/16";
const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";

/// Role of a node within a cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Runs the Kubernetes control plane
    #[default]
    ControlPlane,
    /// Runs workloads only
    Worker,
    /// Balances API server traffic across control-plane nodes.
    ///
    /// Generated during topology derivation; not accepted in user configuration.
    ExternalLoadBalancer,
}

impl NodeRole {
    /// Value stored in the role container label
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
            NodeRole::ExternalLoadBalancer => "external-load-balancer",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control-plane" => Ok(NodeRole::ControlPlane),
            "worker" => Ok(NodeRole::Worker),
            "external-load-balancer" => Ok(NodeRole::ExternalLoadBalancer),
            other => Err(Error::config_invalid(format!("unknown node role '{}'", other))),
        }
    }
}

/// Top-level cluster configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterConfig {
    /// Document kind, always "Cluster"
    #[serde(default)]
    pub kind: String,

    /// Document API version
    #[serde(default)]
    pub api_version: String,

    /// Nodes to create, in order
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Cluster-wide network settings
    #[serde(default)]
    pub networking: NetworkingConfig,
}

/// One requested node
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeConfig {
    /// Node role
    #[serde(default)]
    pub role: NodeRole,

    /// Node image; defaults to [`DEFAULT_NODE_IMAGE`]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Host paths mounted into the node container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<Mount>,

    /// Extra container ports published on the host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_port_mappings: Vec<PortMapping>,
}

/// A host path mounted into a node container
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Mount {
    /// Path on the host
    pub host_path: String,
    /// Path inside the node container
    pub container_path: String,
    /// Mount read-only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// A container port published on the host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortMapping {
    /// Port inside the node container
    pub container_port: u16,
    /// Port on the host; 0 lets the runtime pick one
    #[serde(default)]
    pub host_port: u16,
    /// Host address to bind; defaults to 0.0.0.0
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub listen_address: String,
    /// Transport protocol
    #[serde(default)]
    pub protocol: PortProtocol,
}

/// Transport protocol of a port mapping
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
    /// SCTP
    Sctp,
}

impl PortProtocol {
    /// Lowercase name as understood by the container runtime
    pub fn as_str(&self) -> &'static str {
        match self {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
            PortProtocol::Sctp => "sctp",
        }
    }
}

/// Cluster-wide network settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkingConfig {
    /// Host address the API server is published on
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_server_address: String,

    /// Host port the API server is published on; 0 lets the runtime pick one
    #[serde(default)]
    pub api_server_port: u16,

    /// Pod network CIDR
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_subnet: String,

    /// Service network CIDR
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_subnet: String,
}

impl ClusterConfig {
    /// Parse a configuration document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config_invalid(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Fill every field the caller omitted. Applying defaults twice is a no-op.
    pub fn apply_defaults(&mut self) {
        if self.kind.is_empty() {
            self.kind = CLUSTER_KIND.to_string();
        }
        if self.api_version.is_empty() {
            self.api_version = CLUSTER_API_VERSION.to_string();
        }
        if self.nodes.is_empty() {
            self.nodes.push(NodeConfig::default());
        }
        for node in &mut self.nodes {
            if node.image.is_empty() {
                node.image = DEFAULT_NODE_IMAGE.to_string();
            }
            for mapping in &mut node.extra_port_mappings {
                if mapping.listen_address.is_empty() {
                    mapping.listen_address = DEFAULT_LISTEN_ADDRESS.to_string();
                }
            }
        }

        let net = &mut self.networking;
        if net.api_server_address.is_empty() {
            net.api_server_address = DEFAULT_API_SERVER_ADDRESS.to_string();
        }
        if net.pod_subnet.is_empty() {
            net.pod_subnet = DEFAULT_POD_SUBNET.to_string();
        }
        if net.service_subnet.is_empty() {
            net.service_subnet = DEFAULT_SERVICE_SUBNET.to_string();
        }
    }

    /// Use `image` for every node
    pub fn override_node_image(&mut self, image: &str) {
        for node in &mut self.nodes {
            node.image = image.to_string();
        }
    }

    /// Number of nodes with the given role
    pub fn count_role(&self, role: NodeRole) -> usize {
        self.nodes.iter().filter(|n| n.role == role).count()
    }

    /// Validate a defaulted configuration
    pub fn validate(&self) -> Result<()> {
        if self.kind != CLUSTER_KIND {
            return Err(Error::config_invalid_field(
                "kind",
                format!("expected '{}', got '{}'", CLUSTER_KIND, self.kind),
            ));
        }
        if self.api_version != CLUSTER_API_VERSION {
            return Err(Error::config_invalid_field(
                "apiVersion",
                format!(
                    "expected '{}', got '{}'",
                    CLUSTER_API_VERSION, self.api_version
                ),
            ));
        }

        if self.count_role(NodeRole::ControlPlane) == 0 {
            return Err(Error::config_invalid_field(
                "nodes",
                "must contain at least one control-plane node",
            ));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            node.validate(i)?;
        }

        self.networking.validate()
    }
}

impl NodeConfig {
    /// Create a node with the given role and default settings
    pub fn with_role(role: NodeRole) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        let field = |name: &str| format!("nodes[{}].{}", index, name);

        if self.role == NodeRole::ExternalLoadBalancer {
            return Err(Error::config_invalid_field(
                field("role"),
                "external-load-balancer is generated automatically and cannot be requested",
            ));
        }
        if self.image.trim().is_empty() {
            return Err(Error::config_invalid_field(field("image"), "must not be empty"));
        }

        for (m, mount) in self.extra_mounts.iter().enumerate() {
            if !Path::new(&mount.host_path).is_absolute() {
                return Err(Error::config_invalid_field(
                    field(&format!("extraMounts[{}].hostPath", m)),
                    format!("must be absolute, got '{}'", mount.host_path),
                ));
            }
            if !mount.container_path.starts_with('/') {
                return Err(Error::config_invalid_field(
                    field(&format!("extraMounts[{}].containerPath", m)),
                    format!("must be absolute, got '{}'", mount.container_path),
                ));
            }
        }

        for (p, mapping) in self.extra_port_mappings.iter().enumerate() {
            if mapping.container_port == 0 {
                return Err(Error::config_invalid_field(
                    field(&format!("extraPortMappings[{}].containerPort", p)),
                    "must be between 1 and 65535",
                ));
            }
            if mapping.listen_address.parse::<IpAddr>().is_err() {
                return Err(Error::config_invalid_field(
                    field(&format!("extraPortMappings[{}].listenAddress", p)),
                    format!("'{}' is not an IP address", mapping.listen_address),
                ));
            }
        }

        Ok(())
    }
}

impl NetworkingConfig {
    fn validate(&self) -> Result<()> {
        if self.api_server_address.parse::<IpAddr>().is_err() {
            return Err(Error::config_invalid_field(
                "networking.apiServerAddress",
                format!("'{}' is not an IP address", self.api_server_address),
            ));
        }

        let pod = parse_cidr(&self.pod_subnet).ok_or_else(|| {
            Error::config_invalid_field(
                "networking.podSubnet",
                format!("'{}' is not a CIDR", self.pod_subnet),
            )
        })?;
        let service = parse_cidr(&self.service_subnet).ok_or_else(|| {
            Error::config_invalid_field(
                "networking.serviceSubnet",
                format!("'{}' is not a CIDR", self.service_subnet),
            )
        })?;

        if pod.0.is_ipv4() != service.0.is_ipv4() {
            return Err(Error::config_invalid_field(
                "networking",
                "podSubnet and serviceSubnet must be of the same IP family",
            ));
        }

        Ok(())
    }
}

/// Parse `address/prefix`, checking the prefix fits the address family
pub fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}
