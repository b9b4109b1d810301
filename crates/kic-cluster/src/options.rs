//! Options accepted by `create`

use std::time::Duration;

use crate::context::RunContext;
use crate::pipeline::PipelineOption;

/// A transformation of the run context applied before provisioning
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOption {
    /// Keep nodes after a failure for debugging instead of cleaning up
    Retain(bool),
    /// Bound the wait for control-plane readiness inside the action pipeline
    WaitForReady(Duration),
}

impl CreateOption {
    pub fn apply(self, mut ctx: RunContext) -> RunContext {
        match self {
            CreateOption::Retain(retain) => ctx.retain = retain,
            // Forwarded to the pipeline, which decides what multiple bounds mean
            CreateOption::WaitForReady(interval) => ctx
                .pipeline_options
                .push(PipelineOption::WaitForReady(interval)),
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kic_common::{ClusterConfig, ClusterIdentity};

    use crate::status::TracingStatus;
    use crate::topology::Topology;

    fn ctx() -> RunContext {
        let mut config = ClusterConfig::default();
        config.apply_defaults();
        let topology = Topology::derive(&config).unwrap();
        RunContext::new(
            config,
            topology,
            ClusterIdentity::new("dev"),
            Arc::new(TracingStatus::new()),
        )
    }

    #[test]
    fn defaults_are_cleanup_and_no_wait() {
        let ctx = ctx();
        assert!(!ctx.retain);
        assert!(ctx.pipeline_options.is_empty());
    }

    #[test]
    fn retain_is_idempotent() {
        let ctx = ctx().with_options(&[CreateOption::Retain(true), CreateOption::Retain(true)]);
        assert!(ctx.retain);
    }

    #[test]
    fn later_retain_overrides_earlier() {
        let ctx = ctx().with_options(&[CreateOption::Retain(true), CreateOption::Retain(false)]);
        assert!(!ctx.retain);
    }

    #[test]
    fn wait_for_ready_is_additive() {
        let ctx = ctx().with_options(&[
            CreateOption::WaitForReady(Duration::from_secs(5)),
            CreateOption::WaitForReady(Duration::from_secs(60)),
        ]);
        assert_eq!(
            ctx.pipeline_options,
            vec![
                PipelineOption::WaitForReady(Duration::from_secs(5)),
                PipelineOption::WaitForReady(Duration::from_secs(60)),
            ]
        );
    }
}
