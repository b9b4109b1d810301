//! Cluster lifecycle orchestration for Kubernetes-in-containers clusters
//!
//! [`ClusterContext`] is the entry point: it turns a [`ClusterConfig`] into
//! running node containers plus a bootstrapped Kubernetes control plane, and
//! tears them down again. The container runtime is reached through the
//! collaborator traits in [`runtime`], with Docker implementations provided.
//!
//! [`ClusterConfig`]: kic_common::ClusterConfig

pub mod context;
pub mod kube_utils;
pub mod lifecycle;
pub mod node;
pub mod options;
pub mod pipeline;
pub mod runtime;
pub mod status;
pub mod topology;

pub use context::RunContext;
pub use lifecycle::{success_guidance, ClusterContext};
pub use node::Node;
pub use options::CreateOption;
pub use pipeline::{Action, PipelineOption, CREATE_ACTIONS};
pub use runtime::Backend;
pub use status::{StatusGuard, StatusSink, TracingStatus};
pub use topology::{NodeSpec, Topology};

pub use kic_common::{ClusterConfig, ClusterIdentity, Error, NodeRole, Result};
