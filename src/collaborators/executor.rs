use crate::provision::ResolvedEnvironment;
use crate::util::process::{run_with_timeout, ProcessError};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Captured result of running a script, passed upward unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Never retried: running generated code twice is not assumed safe.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Demo did not finish within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Could not start demo: {0}")]
    Spawn(String),

    #[error("Demo exited with {:?}", .0.exit_code)]
    Failed(ExecutionOutcome),
}

#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(
        &self,
        script: &Path,
        environment: &ResolvedEnvironment,
        working_dir: &Path,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Runs a script with the environment's interpreter.
#[derive(Debug, Clone)]
pub struct VenvScriptExecutor {
    timeout: Duration,
}

impl VenvScriptExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ScriptExecutor for VenvScriptExecutor {
    async fn execute(
        &self,
        script: &Path,
        environment: &ResolvedEnvironment,
        working_dir: &Path,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        info!(script = %script.display(), "Running demo");

        let mut cmd = Command::new(environment.python());
        cmd.arg(script)
            .current_dir(working_dir)
            .env_remove("PYTHONPATH")
            .env_remove("PYTHONHOME")
            .env("PYTHONUNBUFFERED", "1");

        let output = run_with_timeout(cmd, self.timeout).await.map_err(|e| match e {
            ProcessError::Timeout { timeout, .. } => ExecutionError::Timeout(timeout),
            other => ExecutionError::Spawn(other.to_string()),
        })?;

        let outcome = ExecutionOutcome {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(ExecutionError::Failed(outcome))
        }
    }
}
