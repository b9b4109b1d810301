//! Concrete node topology derived from a cluster configuration
//!
//! Derivation numbers the nodes of each role, decides which node publishes
//! the API server on the host, and adds an external load balancer in front of
//! multiple control-plane nodes. Node container names are formed later from
//! the cluster identity, so a topology is a pure function of the configuration.

use std::collections::{BTreeSet, HashMap, HashSet};

use kic_common::config::PortProtocol;
use kic_common::{
    ClusterConfig, ClusterIdentity, Error, Mount, NodeRole, PortMapping, Result,
    DEFAULT_LOAD_BALANCER_IMAGE,
};

/// Specification of one node container
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSpec {
    /// Role within the cluster
    pub role: NodeRole,
    /// Name suffix, e.g. "control-plane2"; unique within the topology
    pub suffix: String,
    /// Node image
    pub image: String,
    /// Host paths mounted into the container
    pub mounts: Vec<Mount>,
    /// User-requested host port mappings
    pub port_mappings: Vec<PortMapping>,
    /// Whether the API server is published on the host through this node
    pub publishes_api_server: bool,
}

impl NodeSpec {
    fn new(role: NodeRole, suffix: String, image: String) -> Self {
        Self {
            role,
            suffix,
            image,
            mounts: Vec::new(),
            port_mappings: Vec::new(),
            publishes_api_server: false,
        }
    }

    /// Container name of this node within the given cluster
    pub fn container_name(&self, cluster: &ClusterIdentity) -> String {
        format!("{}-{}", cluster.name(), self.suffix)
    }
}

/// The full set of nodes to provision
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    /// Node specifications in provisioning order
    pub nodes: Vec<NodeSpec>,
    /// Host address the API server is published on
    pub api_server_address: String,
    /// Host port the API server is published on; 0 lets the runtime pick one
    pub api_server_port: u16,
}

impl Topology {
    /// Derive the node topology from a defaulted, validated configuration
    pub fn derive(config: &ClusterConfig) -> Result<Self> {
        let mut counters: HashMap<NodeRole, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(config.nodes.len() + 1);
        let mut host_ports: Vec<(&PortMapping, String)> = Vec::new();

        for node in &config.nodes {
            let count = counters.entry(node.role).or_insert(0);
            *count += 1;
            let suffix = numbered_suffix(node.role, *count);

            for mapping in &node.extra_port_mappings {
                if mapping.host_port == 0 {
                    continue;
                }
                let clash = host_ports.iter().find(|(other, _)| {
                    other.host_port == mapping.host_port
                        && other.protocol == mapping.protocol
                        && binds_overlap(&other.listen_address, &mapping.listen_address)
                });
                if let Some((other, owner)) = clash {
                    return Err(Error::derivation(format!(
                        "host port {}:{}/{} requested by {} overlaps {}:{} requested by {}",
                        mapping.listen_address,
                        mapping.host_port,
                        mapping.protocol.as_str(),
                        suffix,
                        other.listen_address,
                        other.host_port,
                        owner
                    )));
                }
                host_ports.push((mapping, suffix.clone()));
            }

            let mut spec = NodeSpec::new(node.role, suffix, node.image.clone());
            spec.mounts = node.extra_mounts.clone();
            spec.port_mappings = node.extra_port_mappings.clone();
            nodes.push(spec);
        }

        let control_planes = counters.get(&NodeRole::ControlPlane).copied().unwrap_or(0);
        if control_planes > 1 {
            let mut lb = NodeSpec::new(
                NodeRole::ExternalLoadBalancer,
                numbered_suffix(NodeRole::ExternalLoadBalancer, 1),
                DEFAULT_LOAD_BALANCER_IMAGE.to_string(),
            );
            lb.publishes_api_server = true;
            nodes.push(lb);
        } else if let Some(cp) = nodes.iter_mut().find(|n| n.role == NodeRole::ControlPlane) {
            cp.publishes_api_server = true;
        }

        Ok(Self {
            nodes,
            api_server_address: config.networking.api_server_address.clone(),
            api_server_port: config.networking.api_server_port,
        })
    }

    /// Check the structural invariants of the topology
    pub fn validate(&self) -> Result<()> {
        let control_planes = self.count_role(NodeRole::ControlPlane);
        if control_planes == 0 {
            return Err(Error::topology_invalid(
                "at least one control-plane node is required",
            ));
        }

        let load_balancers = self.count_role(NodeRole::ExternalLoadBalancer);
        let expected_lbs = usize::from(control_planes > 1);
        if load_balancers != expected_lbs {
            return Err(Error::topology_invalid(format!(
                "{} control-plane nodes require {} load balancer(s), found {}",
                control_planes, expected_lbs, load_balancers
            )));
        }

        let publishers: Vec<&NodeSpec> =
            self.nodes.iter().filter(|n| n.publishes_api_server).collect();
        let expected_role = if expected_lbs == 1 {
            NodeRole::ExternalLoadBalancer
        } else {
            NodeRole::ControlPlane
        };
        match publishers.as_slice() {
            [node] if node.role == expected_role => {}
            _ => {
                return Err(Error::topology_invalid(format!(
                    "exactly one {} node must publish the API server",
                    expected_role
                )))
            }
        }

        let mut suffixes = HashSet::new();
        for node in &self.nodes {
            if !suffixes.insert(node.suffix.as_str()) {
                return Err(Error::topology_invalid(format!(
                    "duplicate node {}",
                    node.suffix
                )));
            }
            if node.image.is_empty() {
                return Err(Error::topology_invalid(format!(
                    "node {} has no image",
                    node.suffix
                )));
            }
        }

        if self.api_server_port != 0 {
            for node in &self.nodes {
                let collision = node.port_mappings.iter().any(|m| {
                    m.host_port == self.api_server_port
                        && m.protocol == PortProtocol::Tcp
                        && binds_overlap(&m.listen_address, &self.api_server_address)
                });
                if collision {
                    return Err(Error::topology_invalid(format!(
                        "node {} maps host port {} which is reserved for the API server",
                        node.suffix, self.api_server_port
                    )));
                }
            }
        }

        Ok(())
    }

    /// Number of nodes with the given role
    pub fn count_role(&self, role: NodeRole) -> usize {
        self.nodes.iter().filter(|n| n.role == role).count()
    }

    /// Distinct images required by the topology
    pub fn images(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.image.as_str()).collect()
    }

    /// The node that publishes the API server, if any
    pub fn api_server_node(&self) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.publishes_api_server)
    }
}

fn numbered_suffix(role: NodeRole, n: usize) -> String {
    if n == 1 {
        role.as_str().to_string()
    } else {
        format!("{}{}", role.as_str(), n)
    }
}

fn binds_overlap(a: &str, b: &str) -> bool {
    let wildcard = |addr: &str| addr == "0.0.0.0" || addr == "::";
    a == b || wildcard(a) || wildcard(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kic_common::NodeConfig;

    fn config(roles: &[NodeRole]) -> ClusterConfig {
        let mut config = ClusterConfig {
            nodes: roles.iter().map(|r| NodeConfig::with_role(*r)).collect(),
            ..Default::default()
        };
        config.apply_defaults();
        config
    }

    fn mapping(host_port: u16) -> PortMapping {
        PortMapping {
            container_port: 80,
            host_port,
            listen_address: "0.0.0.0".to_string(),
            protocol: PortProtocol::Tcp,
        }
    }

    #[test]
    fn single_control_plane_publishes_api_server() {
        let topology = Topology::derive(&config(&[NodeRole::ControlPlane])).unwrap();
        assert_eq!(topology.nodes.len(), 1);
        assert!(topology.nodes[0].publishes_api_server);
        assert_eq!(topology.count_role(NodeRole::ExternalLoadBalancer), 0);
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn multiple_control_planes_get_load_balancer() {
        let topology = Topology::derive(&config(&[
            NodeRole::ControlPlane,
            NodeRole::ControlPlane,
            NodeRole::ControlPlane,
            NodeRole::Worker,
        ]))
        .unwrap();

        let suffixes: Vec<_> = topology.nodes.iter().map(|n| n.suffix.as_str()).collect();
        assert_eq!(
            suffixes,
            vec![
                "control-plane",
                "control-plane2",
                "control-plane3",
                "worker",
                "external-load-balancer"
            ]
        );
        let api = topology.api_server_node().unwrap();
        assert_eq!(api.role, NodeRole::ExternalLoadBalancer);
        assert_eq!(api.image, DEFAULT_LOAD_BALANCER_IMAGE);
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn container_names_use_cluster_name() {
        let config = config(&[NodeRole::ControlPlane, NodeRole::Worker, NodeRole::Worker]);
        let topology = Topology::derive(&config).unwrap();
        let cluster = ClusterIdentity::new("dev");
        let names: Vec<_> = topology
            .nodes
            .iter()
            .map(|n| n.container_name(&cluster))
            .collect();
        assert_eq!(names, vec!["dev-control-plane", "dev-worker", "dev-worker2"]);
    }

    #[test]
    fn duplicate_host_ports_fail_derivation() {
        let mut config = config(&[NodeRole::ControlPlane, NodeRole::Worker]);
        config.nodes[0].extra_port_mappings.push(mapping(8080));
        config.nodes[1].extra_port_mappings.push(mapping(8080));

        match Topology::derive(&config) {
            Err(Error::Derivation { message }) => {
                assert!(message.contains("control-plane"));
                assert!(message.contains("worker"));
            }
            other => panic!("expected Derivation, got {other:?}"),
        }
    }

    #[test]
    fn wildcard_listen_address_overlaps_specific_address() {
        let mut config = config(&[NodeRole::ControlPlane, NodeRole::Worker]);
        config.nodes[0].extra_port_mappings.push(mapping(8080));
        config.nodes[1].extra_port_mappings.push(PortMapping {
            listen_address: "127.0.0.1".to_string(),
            ..mapping(8080)
        });

        assert!(matches!(
            Topology::derive(&config),
            Err(Error::Derivation { .. })
        ));
    }

    #[test]
    fn distinct_addresses_and_protocols_may_share_a_port() {
        let mut config = config(&[NodeRole::ControlPlane, NodeRole::Worker]);
        config.nodes[0].extra_port_mappings.push(PortMapping {
            listen_address: "127.0.0.1".to_string(),
            ..mapping(8080)
        });
        config.nodes[1].extra_port_mappings.push(PortMapping {
            listen_address: "127.0.0.2".to_string(),
            ..mapping(8080)
        });
        config.nodes[1].extra_port_mappings.push(PortMapping {
            protocol: PortProtocol::Udp,
            ..mapping(8080)
        });

        assert!(Topology::derive(&config).is_ok());
    }

    #[test]
    fn random_host_ports_never_collide() {
        let mut config = config(&[NodeRole::ControlPlane, NodeRole::Worker]);
        config.nodes[0].extra_port_mappings.push(mapping(0));
        config.nodes[1].extra_port_mappings.push(mapping(0));
        assert!(Topology::derive(&config).is_ok());
    }

    #[test]
    fn api_server_port_collision_is_invalid() {
        let mut config = config(&[NodeRole::ControlPlane]);
        config.networking.api_server_port = 6443;
        config.nodes[0].extra_port_mappings.push(mapping(6443));

        let topology = Topology::derive(&config).unwrap();
        assert!(matches!(
            topology.validate(),
            Err(Error::TopologyInvalid { .. })
        ));
    }

    #[test]
    fn missing_load_balancer_is_invalid() {
        let mut topology = Topology::derive(&config(&[
            NodeRole::ControlPlane,
            NodeRole::ControlPlane,
        ]))
        .unwrap();
        topology
            .nodes
            .retain(|n| n.role != NodeRole::ExternalLoadBalancer);
        assert!(matches!(
            topology.validate(),
            Err(Error::TopologyInvalid { .. })
        ));
    }

    #[test]
    fn images_are_deduplicated() {
        let topology = Topology::derive(&config(&[
            NodeRole::ControlPlane,
            NodeRole::ControlPlane,
            NodeRole::Worker,
        ]))
        .unwrap();
        let images = topology.images();
        assert_eq!(images.len(), 2);
        assert!(images.contains(DEFAULT_LOAD_BALANCER_IMAGE));
    }
}
