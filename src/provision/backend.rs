use super::retry::RetryableError;
use crate::requirement::Requirement;
use crate::runtime::RuntimeVersion;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Why a single package could not be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network timeout, connection error, rate limit or server error.
    Transient,
    /// The index has no release matching the constraint for this interpreter.
    NoCompatibleRelease,
    /// A source distribution failed to compile.
    NativeBuild,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::Transient => "transient",
            FailureKind::NoCompatibleRelease => "no compatible release",
            FailureKind::NativeBuild => "native build failure",
            FailureKind::Other => "install failure",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct InstallError {
    pub kind: FailureKind,
    pub message: String,
}

impl InstallError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    /// Classifies installer output into a failure kind.
    pub fn from_output(output: &str) -> Self {
        Self::new(classify(output), summarize(output))
    }
}

impl RetryableError for InstallError {
    fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "read timed out",
    "timed out",
    "connection reset",
    "connection refused",
    "connection aborted",
    "temporary failure in name resolution",
    "name or service not known",
    "failed to establish a new connection",
    "max retries exceeded",
    "429",
    "too many requests",
    "502 bad gateway",
    "503 service unavailable",
    "504 gateway",
    "remote end closed connection",
];

const NO_RELEASE_MARKERS: &[&str] = &[
    "no matching distribution found",
    "could not find a version that satisfies",
    "requires a different python",
    "is not a supported wheel on this platform",
];

const NATIVE_BUILD_MARKERS: &[&str] = &[
    "failed building wheel",
    "subprocess-exited-with-error",
    "error: command 'gcc'",
    "error: command 'cc'",
    "microsoft visual c++",
    "failed to build",
];

/// pip reports an unreachable index as an empty version list, so an empty
/// list next to a network error is transient. A non-empty list means the
/// index answered and no release fits.
pub fn classify(output: &str) -> FailureKind {
    let lower = output.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    let index_unreachable = lower.contains("(from versions: none)") && has(TRANSIENT_MARKERS);
    if index_unreachable {
        FailureKind::Transient
    } else if has(NO_RELEASE_MARKERS) {
        FailureKind::NoCompatibleRelease
    } else if has(NATIVE_BUILD_MARKERS) {
        FailureKind::NativeBuild
    } else if has(TRANSIENT_MARKERS) {
        FailureKind::Transient
    } else {
        FailureKind::Other
    }
}

/// Prefers pip's `ERROR:` lines, else the last few lines of output.
fn summarize(output: &str) -> String {
    let errors: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:") || l.starts_with("error:"))
        .collect();
    if !errors.is_empty() {
        return errors.join(" | ");
    }
    let lines: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "installer exited without output".to_string()
    } else {
        tail
    }
}

/// An isolated environment created inside a workspace.
#[derive(Debug, Clone)]
pub struct EnvironmentHandle {
    pub runtime: RuntimeVersion,
    pub root: PathBuf,
    pub python: PathBuf,
    pub wheelhouse: PathBuf,
    pub cache_dir: PathBuf,
    /// `site-packages` metadata has a single writer: installs hold this lock.
    install_lock: Arc<Mutex<()>>,
}

impl EnvironmentHandle {
    pub fn new(runtime: RuntimeVersion, root: PathBuf, python: PathBuf, wheelhouse: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            runtime,
            root,
            python,
            wheelhouse,
            cache_dir,
            install_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn install_lock(&self) -> &Arc<Mutex<()>> {
        &self.install_lock
    }
}

/// Where a new environment and its caches go.
#[derive(Debug, Clone)]
pub struct EnvironmentLayout {
    pub env_dir: PathBuf,
    pub wheelhouse: PathBuf,
    pub cache_dir: PathBuf,
}

/// Environment technology seam; the pipeline uses [`super::VenvBackend`].
#[async_trait]
pub trait EnvironmentBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn create(
        &self,
        runtime: RuntimeVersion,
        interpreter: &Path,
        layout: &EnvironmentLayout,
    ) -> Result<EnvironmentHandle, InstallError>;

    async fn upgrade_build_tools(&self, env: &EnvironmentHandle) -> Result<(), InstallError>;

    /// Fetches artifacts for one requirement into the wheelhouse without
    /// touching the environment. Safe to run concurrently.
    async fn download(&self, env: &EnvironmentHandle, requirement: &Requirement) -> Result<(), InstallError>;

    /// Installs one requirement and returns the installed version.
    async fn install(&self, env: &EnvironmentHandle, requirement: &Requirement) -> Result<String, InstallError>;

    /// Installs the repository itself without dependencies.
    async fn install_project(&self, env: &EnvironmentHandle, project_dir: &Path) -> Result<(), InstallError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        read_timeout = { "ReadTimeoutError: HTTPSConnectionPool: Read timed out.", FailureKind::Transient },
        rate_limited = { "HTTP error 429 while getting https://files.pythonhosted.org/...", FailureKind::Transient },
        dns = { "Temporary failure in name resolution", FailureKind::Transient },
        no_match = { "ERROR: No matching distribution found for torch==0.1", FailureKind::NoCompatibleRelease },
        no_version = { "ERROR: Could not find a version that satisfies the requirement foo", FailureKind::NoCompatibleRelease },
        python_mismatch = { "ERROR: Package 'x' requires a different Python: 3.12.1 not in '<3.11'", FailureKind::NoCompatibleRelease },
        wheel_build = { "Failed building wheel for pycocotools", FailureKind::NativeBuild },
        gcc = { "error: command 'gcc' failed with exit code 1", FailureKind::NativeBuild },
        other = { "ERROR: something unexpected", FailureKind::Other },
    )]
    fn test_classify(output: &str, expected: FailureKind) {
        assert_eq!(classify(output), expected);
    }

    #[test]
    fn test_offline_index_is_transient() {
        let output = "WARNING: Retrying (Retry(total=4, connect=None, read=None, redirect=None, status=None)) \
after connection broken by 'NewConnectionError('<pip._vendor.urllib3.connection.HTTPSConnection object>: \
Failed to establish a new connection: [Errno -3] Temporary failure in name resolution')': /simple/numpy/
ERROR: Could not find a version that satisfies the requirement numpy (from versions: none)
ERROR: No matching distribution found for numpy";
        assert_eq!(classify(output), FailureKind::Transient);
        assert!(InstallError::from_output(output).is_retryable());
    }

    #[test]
    fn test_listed_versions_are_not_transient() {
        let output = "WARNING: Retrying (Retry(total=4)) after connection broken by 'ReadTimeoutError(\"Read timed out.\")': /simple/torch/
ERROR: Could not find a version that satisfies the requirement torch==0.1 (from versions: 1.13.1, 2.0.0, 2.1.0)
ERROR: No matching distribution found for torch==0.1";
        assert_eq!(classify(output), FailureKind::NoCompatibleRelease);
    }

    #[test]
    fn test_empty_version_list_without_network_error() {
        let output = "ERROR: Could not find a version that satisfies the requirement not-a-package (from versions: none)\n\
ERROR: No matching distribution found for not-a-package";
        assert_eq!(classify(output), FailureKind::NoCompatibleRelease);
    }

    #[test]
    fn test_from_output_prefers_error_lines() {
        let err = InstallError::from_output("Collecting foo\n  Downloading...\nERROR: No matching distribution found for foo\n");
        assert_eq!(err.kind, FailureKind::NoCompatibleRelease);
        assert_eq!(err.message, "ERROR: No matching distribution found for foo");
        assert!(!err.is_retryable());
        assert!(InstallError::transient("timeout").is_retryable());
    }

    #[test]
    fn test_summarize_empty_output() {
        assert_eq!(
            InstallError::from_output("").message,
            "installer exited without output"
        );
    }
}
