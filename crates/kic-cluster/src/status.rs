//! Progress reporting for long-running lifecycle stages
//!
//! A [`StatusSink`] is handed to each `create` call explicitly. The
//! [`StatusGuard`] owned by that call closes any open stage as failed when it
//! goes out of scope, so early returns never leave a stage dangling.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{error, info, warn};

/// Receives stage transitions and warnings
pub trait StatusSink: Send + Sync {
    /// Begin a stage, ending the previous one as successful
    fn start(&self, stage: &str);

    /// End the current stage; a no-op when no stage is open
    fn end(&self, success: bool);

    /// Report a non-fatal problem
    fn warn(&self, message: &str);
}

/// Status sink that reports through `tracing`
#[derive(Debug, Default)]
pub struct TracingStatus {
    current: Mutex<Option<(String, Instant)>>,
}

impl TracingStatus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusSink for TracingStatus {
    fn start(&self, stage: &str) {
        self.end(true);
        info!("{} ...", stage);
        if let Ok(mut current) = self.current.lock() {
            *current = Some((stage.to_string(), Instant::now()));
        }
    }

    fn end(&self, success: bool) {
        let finished = match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };
        if let Some((stage, started)) = finished {
            if success {
                info!("✓ {} ({:?})", stage, started.elapsed());
            } else {
                error!("✗ {} ({:?})", stage, started.elapsed());
            }
        }
    }

    fn warn(&self, message: &str) {
        warn!("{}", message);
    }
}

/// Ends the current stage as failed on drop unless it was already closed
pub struct StatusGuard {
    status: Arc<dyn StatusSink>,
}

impl StatusGuard {
    pub fn new(status: Arc<dyn StatusSink>) -> Self {
        Self { status }
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.status.end(false);
    }
}
