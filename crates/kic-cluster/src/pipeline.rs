//! Post-provisioning action pipeline vocabulary

use std::fmt;
use std::time::Duration;

/// A named step that turns raw node containers into a working cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Point the external load balancer at the control-plane nodes
    LoadBalancerConfig,
    /// Write the kubeadm configuration each node bootstraps from
    KubeconfigMaterialize,
    /// Initialize the first control-plane node and export credentials
    ControlPlaneInit,
    /// Join the remaining control-plane and worker nodes
    NodeJoin,
}

/// Actions run by `create`, in order
pub const CREATE_ACTIONS: [Action; 4] = [
    Action::LoadBalancerConfig,
    Action::KubeconfigMaterialize,
    Action::ControlPlaneInit,
    Action::NodeJoin,
];

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::LoadBalancerConfig => "loadbalancer-config",
            Action::KubeconfigMaterialize => "kubeconfig-materialize",
            Action::ControlPlaneInit => "control-plane-init",
            Action::NodeJoin => "node-join",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options forwarded to the action pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineOption {
    /// Maximum time to wait for the control plane to become ready
    WaitForReady(Duration),
}

/// The readiness bound in effect; the last `WaitForReady` wins.
pub fn wait_for_ready(options: &[PipelineOption]) -> Option<Duration> {
    options.iter().rev().find_map(|o| match o {
        PipelineOption::WaitForReady(d) => Some(*d),
    })
}
