//! Fakes for the network- and subprocess-backed collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use reprobox::collaborators::{CloneError, RepositoryCloner};
use reprobox::index::{Release, StaticIndex};
use reprobox::pipeline::{Pipeline, PipelineConfig};
use reprobox::provision::{
    EnvironmentBackend, EnvironmentHandle, EnvironmentLayout, FailureKind, InstallError, RetryPolicy,
};
use reprobox::requirement::{Requirement, SpecifierSet, Version};
use reprobox::runtime::{RuntimeVersion, StaticLocator};
use reprobox::snapshot::{RepositorySnapshot, SnapshotScanner};
use reprobox::WorkspaceManager;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const REPO_BASE: &str = "https://github.com/fixtures/";

pub fn repo_url(name: &str) -> String {
    format!("{}{}", REPO_BASE, name)
}

/// Serves in-memory repositories keyed by URL.
#[derive(Default)]
pub struct FixtureCloner {
    repos: HashMap<String, Vec<(String, String)>>,
}

impl FixtureCloner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, name: &str, files: &[(&str, &str)]) -> Self {
        self.repos.insert(
            repo_url(name),
            files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl RepositoryCloner for FixtureCloner {
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<RepositorySnapshot, CloneError> {
        let files = self.repos.get(url).ok_or_else(|| CloneError::NotFound {
            url: url.to_string(),
        })?;
        for (path, content) in files {
            let full = dest.join(path);
            fs::create_dir_all(full.parent().unwrap_or(dest)).map_err(|e| CloneError::Failed {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            fs::write(&full, content).map_err(|e| CloneError::Failed {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(SnapshotScanner::new(dest.to_path_buf())?.scan()?)
    }
}

/// Installs by touching `<env>/site-packages/<name>`. Packages listed in
/// `failing` fail with the given kind on every attempt.
#[derive(Default)]
pub struct FakeBackend {
    failing: BTreeMap<String, FailureKind>,
    attempts: Mutex<BTreeMap<String, u32>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, package: &str, kind: FailureKind) -> Self {
        self.failing.insert(package.to_string(), kind);
        self
    }

    pub fn attempts(&self, package: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(package)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl EnvironmentBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create(
        &self,
        runtime: RuntimeVersion,
        _interpreter: &Path,
        layout: &EnvironmentLayout,
    ) -> Result<EnvironmentHandle, InstallError> {
        let site = layout.env_dir.join("site-packages");
        fs::create_dir_all(&site).map_err(|e| InstallError::new(FailureKind::Other, e.to_string()))?;
        Ok(EnvironmentHandle::new(
            runtime,
            layout.env_dir.clone(),
            layout.env_dir.join("bin").join("python"),
            layout.wheelhouse.clone(),
            layout.cache_dir.clone(),
        ))
    }

    async fn upgrade_build_tools(&self, _env: &EnvironmentHandle) -> Result<(), InstallError> {
        Ok(())
    }

    async fn download(&self, _env: &EnvironmentHandle, _requirement: &Requirement) -> Result<(), InstallError> {
        Ok(())
    }

    async fn install(&self, env: &EnvironmentHandle, requirement: &Requirement) -> Result<String, InstallError> {
        let name = requirement.name.as_str().to_string();
        *self.attempts.lock().unwrap().entry(name.clone()).or_default() += 1;
        if let Some(kind) = self.failing.get(&name) {
            return Err(InstallError::new(*kind, format!("cannot install {}", name)));
        }
        tokio::task::yield_now().await;
        fs::write(env.root.join("site-packages").join(&name), requirement.install_spec())
            .map_err(|e| InstallError::new(FailureKind::Other, e.to_string()))?;
        Ok("1.0.0".to_string())
    }

    async fn install_project(&self, _env: &EnvironmentHandle, _project_dir: &Path) -> Result<(), InstallError> {
        Ok(())
    }
}

/// Every supported runtime resolves to a dummy interpreter path.
pub fn all_interpreters() -> StaticLocator {
    [(3, 13), (3, 12), (3, 11), (3, 10), (3, 9), (3, 8)]
        .into_iter()
        .fold(StaticLocator::new(), |locator, (major, minor)| {
            locator.with_interpreter(RuntimeVersion::new(major, minor), "/usr/bin/python3")
        })
}

pub fn release(version: &str, requires_python: Option<&str>) -> Release {
    let release = Release::new(version.parse::<Version>().unwrap());
    match requires_python {
        Some(range) => release.with_requires_python(range.parse::<SpecifierSet>().unwrap()),
        None => release,
    }
}

/// A pipeline over temp dirs with fast retries and no real I/O beyond the
/// workspace tree.
pub struct Harness {
    pub temp: TempDir,
    pub backend: Arc<FakeBackend>,
}

impl Harness {
    pub fn new(backend: FakeBackend) -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            backend: Arc::new(backend),
        }
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.temp.path().join("tmp")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.temp.path().join("workspaces")
    }

    pub fn pipeline(&self, cloner: FixtureCloner, index: StaticIndex) -> Pipeline {
        let config = PipelineConfig::new()
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
            .with_index_timeout(Duration::from_secs(5));
        Pipeline::new(
            config,
            WorkspaceManager::new(self.tmp_dir(), self.workspace_dir()),
            Arc::new(cloner),
            Arc::new(all_interpreters()),
            self.backend.clone(),
        )
        .with_index(Arc::new(index))
    }

    /// Names of ephemeral roots still on disk.
    pub fn leftover_ephemeral(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.tmp_dir()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
