//! Common types for kic: cluster identity, cluster configuration and errors

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod identity;

pub use config::{
    ClusterConfig, Mount, NetworkingConfig, NodeConfig, NodeRole, PortMapping, PortProtocol,
};
pub use error::Error;
pub use identity::ClusterIdentity;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Cluster name used when none is given
pub const DEFAULT_CLUSTER_NAME: &str = "kic";

/// Container label key holding the owning cluster's name
pub const CLUSTER_LABEL_KEY: &str = "io.x-k8s.kic.cluster";

/// Container label key holding the node's role within its cluster
pub const ROLE_LABEL_KEY: &str = "io.x-k8s.kic.role";

/// Environment variable clients read the active credentials file from
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Node image used when a node does not specify one
pub const DEFAULT_NODE_IMAGE: &str = "kindest/node:v1.32.0";

/// Image for the generated control-plane load balancer
pub const DEFAULT_LOAD_BALANCER_IMAGE: &str = "kindest/haproxy:v20230606-42a2262b";

/// Port the API server listens on inside the cluster
pub const API_SERVER_INTERNAL_PORT: u16 = 6443;
