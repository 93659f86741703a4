use crate::snapshot::{RepositorySnapshot, SnapshotError, SnapshotScanner};
use crate::util::process::{run_with_timeout, ProcessError};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("Repository not found: {url}")]
    NotFound { url: String },

    #[error("Cloning {url} timed out after {}s", .timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    #[error("Failed to clone {url}: {message}")]
    Failed { url: String, message: String },

    #[error("Cloned repository could not be scanned: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Produces a [`RepositorySnapshot`] from a repository URL.
#[async_trait]
pub trait RepositoryCloner: Send + Sync {
    /// Clones `url` into `dest`, which must not exist yet.
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<RepositorySnapshot, CloneError>;
}

/// Shallow `git clone`.
#[derive(Debug, Clone)]
pub struct GitCloner {
    timeout: Duration,
    depth: u32,
}

impl GitCloner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, depth: 1 }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth.max(1);
        self
    }
}

const NOT_FOUND_MARKERS: &[&str] = &[
    "repository not found",
    "does not exist",
    "not found",
    "could not read username",
];

#[async_trait]
impl RepositoryCloner for GitCloner {
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<RepositorySnapshot, CloneError> {
        info!(url, dest = %dest.display(), "Cloning repository");

        let mut cmd = Command::new("git");
        cmd.arg("clone")
            .arg("--depth")
            .arg(self.depth.to_string())
            .arg("--single-branch")
            .arg(url)
            .arg(dest)
            // A private or missing repo must fail, not prompt for credentials.
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = run_with_timeout(cmd, self.timeout).await.map_err(|e| match e {
            ProcessError::Timeout { timeout, .. } => CloneError::Timeout {
                url: url.to_string(),
                timeout,
            },
            other => CloneError::Failed {
                url: url.to_string(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            let stderr = output.stderr.to_ascii_lowercase();
            if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Err(CloneError::NotFound {
                    url: url.to_string(),
                });
            }
            return Err(CloneError::Failed {
                url: url.to_string(),
                message: output.tail(3),
            });
        }

        let snapshot = SnapshotScanner::new(dest.to_path_buf())?.scan()?;
        Ok(snapshot)
    }
}

/// Repository name from a clone URL: `https://github.com/u/radonpy.git` is `radonpy`.
pub fn repository_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| name.to_string())
}

/// Whether a paper source is itself a repository URL.
pub fn looks_like_repository(source: &str) -> bool {
    let source = source.trim();
    let hosted = ["github.com/", "gitlab.com/", "bitbucket.org/"]
        .iter()
        .any(|host| source.contains(host));
    source.starts_with("git@")
        || (source.ends_with(".git") && source.contains("://"))
        || ((source.starts_with("https://") || source.starts_with("http://")) && hosted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        https_git = { "https://github.com/u/radonpy.git", Some("radonpy") },
        https_plain = { "https://github.com/u/radonpy", Some("radonpy") },
        trailing_slash = { "https://github.com/u/radonpy/", Some("radonpy") },
        ssh = { "git@github.com:u/deep-learning.git", Some("deep-learning") },
        bare = { "radonpy", Some("radonpy") },
        empty = { "", None },
        dot_dot = { "https://example.com/..", None },
    )]
    fn test_repository_name(url: &str, expected: Option<&str>) {
        assert_eq!(repository_name(url).as_deref(), expected);
    }

    #[parameterized(
        github = { "https://github.com/u/repo", true },
        ssh = { "git@github.com:u/repo.git", true },
        self_hosted_git = { "https://git.example.org/u/repo.git", true },
        pdf_url = { "https://arxiv.org/pdf/2101.00001.pdf", false },
        local_pdf = { "papers/attention.pdf", false },
    )]
    fn test_looks_like_repository(source: &str, expected: bool) {
        assert_eq!(looks_like_repository(source), expected);
    }

    #[tokio::test]
    async fn test_clone_missing_local_repository() {
        let temp = tempfile::TempDir::new().unwrap();
        let cloner = GitCloner::new(Duration::from_secs(30));
        let missing = temp.path().join("nope");
        let result = cloner
            .clone_repository(&missing.to_string_lossy(), &temp.path().join("repo"))
            .await;
        assert!(result.is_err());
    }
}
