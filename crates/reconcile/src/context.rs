//! Execution options, cancellation and progress reporting
//!
//! These let callers plug in their own UI and signal handling without the
//! engine depending on any terminal or signal crate.

use crate::error::ConfigError;
use crate::types::{DirectorySpec, OperationOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for a reconciliation run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of nodes worked on at once
    pub concurrency: usize,
    /// Per-operation timeout; `None` waits forever
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// Cooperative cancellation flag
///
/// Once cancelled, no new (node, directory) task is dispatched. Tasks
/// already running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registering with a signal handler
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Progress callback for reconciliation runs
///
/// Called from worker threads, hence `Sync` and `&self`.
pub trait ProgressCallback: Send + Sync {
    /// Called once before dispatch with the number of (node, directory) pairs
    fn on_run_start(&self, total: usize);

    /// Called as each pair completes, in completion order
    fn on_outcome(&self, node: &str, spec: &DirectorySpec, outcome: &OperationOutcome);

    /// Called once after every worker has returned
    fn on_run_complete(&self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&self, _total: usize) {}
    fn on_outcome(&self, _node: &str, _spec: &DirectorySpec, _outcome: &OperationOutcome) {}
    fn on_run_complete(&self) {}
}
