use crate::provision::ResolvedEnvironment;
use crate::snapshot::RepositorySnapshot;
use crate::util::process::{run_with_timeout, ProcessError};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("Demo generator command is empty")]
    EmptyCommand,

    #[error("Demo generator failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Demo generator exited with {exit_code:?}: {message}")]
    Failed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Demo generator produced no script")]
    EmptyScript,
}

/// Writes a demo script for a provisioned repository. The script's contents
/// are opaque to reprobox.
#[async_trait]
pub trait DemoGenerator: Send + Sync {
    async fn generate(
        &self,
        snapshot: &RepositorySnapshot,
        environment: &ResolvedEnvironment,
    ) -> Result<String, DemoError>;
}

/// Runs an external command and takes its stdout as the script.
///
/// The command sees `REPROBOX_REPO_DIR`, `REPROBOX_PYTHON` and
/// `REPROBOX_INSTALLED` (comma-separated `name==version`).
#[derive(Debug, Clone)]
pub struct CommandDemoGenerator {
    command: String,
    timeout: Duration,
}

impl CommandDemoGenerator {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DemoGenerator for CommandDemoGenerator {
    async fn generate(
        &self,
        snapshot: &RepositorySnapshot,
        environment: &ResolvedEnvironment,
    ) -> Result<String, DemoError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(DemoError::EmptyCommand)?;

        let installed: Vec<String> = environment
            .installed()
            .iter()
            .map(|p| format!("{}=={}", p.name, p.version))
            .collect();

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .current_dir(snapshot.root())
            .env("REPROBOX_REPO_DIR", snapshot.root())
            .env("REPROBOX_PYTHON", environment.python())
            .env("REPROBOX_INSTALLED", installed.join(","));

        info!(command = %self.command, "Generating demo script");
        let output = run_with_timeout(cmd, self.timeout).await?;
        if !output.success() {
            return Err(DemoError::Failed {
                exit_code: output.exit_code,
                message: output.tail(5),
            });
        }
        if output.stdout.trim().is_empty() {
            return Err(DemoError::EmptyScript);
        }
        Ok(output.stdout)
    }
}
