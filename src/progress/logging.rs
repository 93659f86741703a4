//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { paper } => {
                info!(paper = %paper, "Starting run");
            }
            ProgressEvent::PhaseStarted { phase } => {
                debug!(phase = %phase, "Starting phase");
            }
            ProgressEvent::PhaseComplete { phase, duration } => {
                info!(
                    phase = %phase,
                    duration_ms = duration.as_millis(),
                    "Phase complete"
                );
            }
            ProgressEvent::RuntimeSelected { runtime, rejected } => {
                info!(runtime = %runtime, rejected, "Runtime selected");
            }
            ProgressEvent::PackageInstalled {
                package,
                version,
                attempts,
            } => {
                debug!(package = %package, version = %version, attempts, "Package installed");
            }
            ProgressEvent::PackageRetrying {
                package,
                attempt,
                delay,
                reason,
            } => {
                warn!(
                    package = %package,
                    attempt,
                    delay_ms = delay.as_millis(),
                    reason = %reason,
                    "Retrying package install"
                );
            }
            ProgressEvent::PackageFailed {
                package,
                reason,
                required,
            } => {
                if *required {
                    error!(package = %package, reason = %reason, "Required package failed to install");
                } else {
                    warn!(package = %package, reason = %reason, "Package failed to install");
                }
            }
            ProgressEvent::RunCompleted {
                paper,
                outcome,
                total_time,
            } => {
                info!(
                    paper = %paper,
                    outcome = %outcome,
                    total_time_ms = total_time.as_millis(),
                    "Run complete"
                );
            }
            ProgressEvent::RunFailed { paper, error } => {
                warn!(paper = %paper, error = %error, "Run failed");
            }
        }
    }
}
