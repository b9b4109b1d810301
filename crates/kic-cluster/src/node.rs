//! Handles to running node containers

use std::fmt;

use serde::Serialize;

use kic_common::NodeRole;

/// One running container acting as a cluster member.
///
/// The orchestrator never inspects it beyond name and role; the runtime
/// collaborators resolve everything else from the container name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Node {
    /// Container name
    pub name: String,
    /// Role within the cluster
    pub role: NodeRole,
}

impl Node {
    pub fn new(name: impl Into<String>, role: NodeRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    /// Recover a node's role from its container name.
    ///
    /// Used for containers created without a role label.
    pub fn role_from_name(name: &str) -> NodeRole {
        let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
        if trimmed.ends_with("-control-plane") {
            NodeRole::ControlPlane
        } else if trimmed.ends_with("-external-load-balancer") {
            NodeRole::ExternalLoadBalancer
        } else {
            NodeRole::Worker
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Sort nodes by role and then name so the bootstrap control plane comes first
pub fn sorted(nodes: &[Node]) -> Vec<Node> {
    let mut nodes = nodes.to_vec();
    nodes.sort_by(|a, b| a.role.cmp(&b.role).then_with(|| a.name.cmp(&b.name)));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_name_handles_numbered_suffixes() {
        assert_eq!(Node::role_from_name("dev-control-plane"), NodeRole::ControlPlane);
        assert_eq!(Node::role_from_name("dev-control-plane3"), NodeRole::ControlPlane);
        assert_eq!(Node::role_from_name("dev-worker2"), NodeRole::Worker);
        assert_eq!(
            Node::role_from_name("dev-external-load-balancer"),
            NodeRole::ExternalLoadBalancer
        );
        assert_eq!(Node::role_from_name("something-else"), NodeRole::Worker);
    }

    #[test]
    fn sorted_puts_control_planes_first() {
        let nodes = vec![
            Node::new("dev-worker", NodeRole::Worker),
            Node::new("dev-control-plane2", NodeRole::ControlPlane),
            Node::new("dev-external-load-balancer", NodeRole::ExternalLoadBalancer),
            Node::new("dev-control-plane", NodeRole::ControlPlane),
        ];
        let names: Vec<_> = sorted(&nodes).into_iter().map(|n| n.name).collect();
        assert_eq!(
            names,
            vec![
                "dev-control-plane",
                "dev-control-plane2",
                "dev-worker",
                "dev-external-load-balancer"
            ]
        );
    }
}
