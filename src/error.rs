//! Run-level errors and their stable codes
//!
//! Each component has its own error type. [`RunError`] collects the ones that
//! end a paper's run and maps them to an [`ErrorCode`] for reports and exit
//! handling. Non-fatal conditions (manifest warnings, failed optional
//! packages, conflicts) are report data, never errors.

use crate::collaborators::{CloneError, ExecutionError};
use crate::provision::ProvisionError;
use crate::runtime::SelectionError;
use crate::workspace::WorkspaceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RepositoryNotFound,
    CloneFailure,
    UnresolvableRuntime,
    EnvironmentFailure,
    ProvisioningFailed,
    ExecutionTimeout,
    ExecutionFailure,
    WorkspaceFailure,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RepositoryNotFound => "repository_not_found",
            ErrorCode::CloneFailure => "clone_failure",
            ErrorCode::UnresolvableRuntime => "unresolvable_runtime",
            ErrorCode::EnvironmentFailure => "environment_failure",
            ErrorCode::ProvisioningFailed => "provisioning_failed",
            ErrorCode::ExecutionTimeout => "execution_timeout",
            ErrorCode::ExecutionFailure => "execution_failure",
            ErrorCode::WorkspaceFailure => "workspace_failure",
            ErrorCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("No repository URL found for '{paper}'")]
    RepositoryNotFound { paper: String },

    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error("Unresolvable runtime: {0}")]
    UnresolvableRuntime(#[from] SelectionError),

    #[error(transparent)]
    Provisioning(#[from] ProvisionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RunError::RepositoryNotFound { .. } => ErrorCode::RepositoryNotFound,
            RunError::Clone(CloneError::NotFound { .. }) => ErrorCode::RepositoryNotFound,
            RunError::Clone(_) => ErrorCode::CloneFailure,
            RunError::UnresolvableRuntime(_) => ErrorCode::UnresolvableRuntime,
            RunError::Provisioning(ProvisionError::InterpreterNotFound(_)) => {
                ErrorCode::UnresolvableRuntime
            }
            RunError::Provisioning(ProvisionError::EnvironmentCreation(_)) => {
                ErrorCode::EnvironmentFailure
            }
            RunError::Provisioning(_) => ErrorCode::ProvisioningFailed,
            RunError::Execution(ExecutionError::Timeout(_)) => ErrorCode::ExecutionTimeout,
            RunError::Execution(_) => ErrorCode::ExecutionFailure,
            RunError::Workspace(_) => ErrorCode::WorkspaceFailure,
            RunError::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// A troubleshooting message for the terminal.
    pub fn help_message(&self) -> String {
        match self.code() {
            ErrorCode::RepositoryNotFound => format!(
                "Error: {}\n\n\
                Help: reprobox does not read paper text. Pass the repository explicitly:\n\
                reprobox run paper.pdf --repo https://github.com/owner/project\n\
                For private repositories, check that git can access them without a prompt.",
                self
            ),
            ErrorCode::CloneFailure => format!(
                "Error: {}\n\n\
                Help: Check that git is installed and the URL is reachable.\n\
                Slow hosts may need a longer REPROBOX_CLONE_TIMEOUT (seconds).",
                self
            ),
            ErrorCode::UnresolvableRuntime => format!(
                "Error: {}\n\n\
                Help: No installed Python satisfies the project's declared range and pins.\n\
                - Install another interpreter (python3.X on PATH, or via pyenv)\n\
                - Check requires-python / python_requires in the repository\n\
                - Set REPROBOX_OFFLINE=true to skip release lookups for pins",
                self
            ),
            ErrorCode::EnvironmentFailure => format!(
                "Error: {}\n\n\
                Help: The virtual environment could not be created. Make sure the\n\
                interpreter ships the venv module (e.g. apt install python3.X-venv).",
                self
            ),
            ErrorCode::ProvisioningFailed => format!(
                "Error: {}\n\n\
                Help: A package imported by the entry point could not be installed.\n\
                Re-run with --persistent to keep the workspace and inspect pip's output,\n\
                or raise REPROBOX_INSTALL_RETRIES for flaky networks.",
                self
            ),
            ErrorCode::ExecutionTimeout | ErrorCode::ExecutionFailure => format!(
                "Error: {}\n\n\
                Help: The environment was provisioned; only the demo run failed.\n\
                Raise REPROBOX_EXEC_TIMEOUT for long-running demos.",
                self
            ),
            ErrorCode::WorkspaceFailure => format!(
                "Error: {}\n\n\
                Help: Check permissions on REPROBOX_TMP_DIR and REPROBOX_WORKSPACE_DIR.\n\
                Leftover roots can be removed with: reprobox cleanup --ephemeral",
                self
            ),
            ErrorCode::Cancelled => "Error: Run cancelled before it finished".to_string(),
        }
    }
}
