//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a pipeline run progresses
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A run started for one paper
    RunStarted { paper: String },

    /// A pipeline phase started
    PhaseStarted { phase: String },

    /// A pipeline phase finished
    PhaseComplete { phase: String, duration: Duration },

    /// The runtime selector settled on an interpreter
    RuntimeSelected { runtime: String, rejected: usize },

    /// A requirement was installed
    PackageInstalled {
        package: String,
        version: String,
        attempts: u32,
    },

    /// A transient install failure will be retried after `delay`
    PackageRetrying {
        package: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },

    /// A requirement could not be installed
    PackageFailed {
        package: String,
        reason: String,
        required: bool,
    },

    /// The run finished, possibly degraded or aborted
    RunCompleted {
        paper: String,
        outcome: String,
        total_time: Duration,
    },

    /// The run stopped on a fatal error
    RunFailed { paper: String, error: String },
}

/// Trait for handling progress events during a run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
