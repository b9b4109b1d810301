//! Per-call state of a `create` operation

use std::sync::Arc;

use kic_common::{ClusterConfig, ClusterIdentity};

use crate::options::CreateOption;
use crate::pipeline::PipelineOption;
use crate::status::StatusSink;
use crate::topology::Topology;

/// Everything one `create` call works from.
///
/// Owned by that call alone and dropped when it returns.
pub struct RunContext {
    /// Normalized and validated configuration
    pub config: ClusterConfig,
    /// Derived and validated topology
    pub topology: Topology,
    /// The cluster being created
    pub identity: ClusterIdentity,
    /// Keep nodes around when a later stage fails
    pub retain: bool,
    /// Options forwarded to the action pipeline
    pub pipeline_options: Vec<PipelineOption>,
    /// Progress sink for this call
    pub status: Arc<dyn StatusSink>,
}

impl RunContext {
    pub fn new(
        config: ClusterConfig,
        topology: Topology,
        identity: ClusterIdentity,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            topology,
            identity,
            retain: false,
            pipeline_options: Vec::new(),
            status,
        }
    }

    /// Apply creation options in the order given
    pub fn with_options(self, options: &[CreateOption]) -> Self {
        options.iter().fold(self, |ctx, option| option.apply(ctx))
    }
}
