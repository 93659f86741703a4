//! Environment provisioning
//!
//! Builds an isolated environment for the selected runtime inside a workspace
//! and installs a [`RequirementSet`] into it:
//!
//! 1. Locate the interpreter and create the environment
//! 2. Upgrade build tools (failure is a warning)
//! 3. Download all requirements into the workspace wheelhouse, concurrently
//! 4. Install one requirement at a time in install order, retrying transient failures
//! 5. Install the repository itself without dependencies (failure is a warning)
//!
//! Installs are serialised because `site-packages` metadata has a single
//! writer. A failed package degrades the environment unless it is required
//! by the entry point, in which case provisioning aborts.

mod backend;
pub mod retry;
mod state;
mod venv;

pub use backend::{
    classify, EnvironmentBackend, EnvironmentHandle, EnvironmentLayout, FailureKind, InstallError,
};
pub use retry::{run_with_retry, RetryPolicy, RetryableError};
pub use state::{InstallState, InstallTracker, InvalidTransition, Transition};
pub use venv::VenvBackend;

use crate::merge::RequirementSet;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::requirement::{PackageName, Requirement};
use crate::runtime::{InterpreterLocator, RuntimeVersion};
use crate::workspace::Workspace;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No interpreter found on this host for Python {0}")]
    InterpreterNotFound(RuntimeVersion),

    #[error("Failed to create environment: {0}")]
    EnvironmentCreation(#[source] InstallError),

    #[error("Required package '{package}' could not be installed: {reason}")]
    RequiredPackageFailed {
        package: PackageName,
        reason: String,
        installed: usize,
        failed: usize,
    },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub name: PackageName,
    pub version: String,
    pub attempts: u32,
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPackage {
    pub name: PackageName,
    pub reason: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub required: bool,
    pub transitions: Vec<Transition>,
}

/// An environment after provisioning. Read-only once returned.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEnvironment {
    runtime_version: RuntimeVersion,
    workspace_path: PathBuf,
    python: PathBuf,
    installed: Vec<InstalledPackage>,
    failed: Vec<FailedPackage>,
    warnings: Vec<String>,
}

impl ResolvedEnvironment {
    pub fn runtime_version(&self) -> RuntimeVersion {
        self.runtime_version
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    pub fn installed(&self) -> &[InstalledPackage] {
        &self.installed
    }

    pub fn failed(&self) -> &[FailedPackage] {
        &self.failed
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Usable, but at least one package is missing.
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn is_installed(&self, name: &PackageName) -> bool {
        self.installed.iter().any(|p| &p.name == name)
    }

    #[cfg(test)]
    pub(crate) fn stub(runtime_version: RuntimeVersion, workspace_path: &Path, python: &Path) -> Self {
        Self {
            runtime_version,
            workspace_path: workspace_path.to_path_buf(),
            python: python.to_path_buf(),
            installed: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

enum InstallOutcome {
    Installed(InstalledPackage),
    Failed(InstallError, InstallTracker),
}

pub struct Provisioner {
    backend: Arc<dyn EnvironmentBackend>,
    locator: Arc<dyn InterpreterLocator>,
    retry: RetryPolicy,
    download_concurrency: usize,
    progress: Arc<dyn ProgressHandler>,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn EnvironmentBackend>, locator: Arc<dyn InterpreterLocator>) -> Self {
        Self {
            backend,
            locator,
            retry: RetryPolicy::default(),
            download_concurrency: 4,
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Provisions `requirements` for `runtime` inside `workspace`.
    ///
    /// `project_dir`, when given, is installed with `--no-deps` after the
    /// requirements.
    pub async fn provision(
        &self,
        requirements: &RequirementSet,
        runtime: RuntimeVersion,
        workspace: &Workspace,
        required: &BTreeSet<PackageName>,
        project_dir: Option<&Path>,
    ) -> Result<ResolvedEnvironment, ProvisionError> {
        let interpreter = self
            .locator
            .locate(runtime)
            .ok_or(ProvisionError::InterpreterNotFound(runtime))?;
        info!(
            runtime = %runtime,
            interpreter = %interpreter.display(),
            backend = self.backend.name(),
            packages = requirements.len(),
            "Provisioning environment"
        );

        let env = self
            .backend
            .create(runtime, &interpreter, &workspace.layout())
            .await
            .map_err(ProvisionError::EnvironmentCreation)?;

        let mut resolved = ResolvedEnvironment {
            runtime_version: runtime,
            workspace_path: workspace.root().to_path_buf(),
            python: env.python.clone(),
            installed: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
        };

        let upgrade = run_with_retry("upgrade build tools", &self.retry, || {
            self.backend.upgrade_build_tools(&env)
        })
        .await;
        if let Err(e) = upgrade {
            warn!(error = %e, "Could not upgrade build tools");
            resolved
                .warnings
                .push(format!("build tool upgrade failed: {}", e));
        }

        let ordered = requirements.install_order();
        self.download_all(&env, &ordered).await;

        for requirement in ordered {
            let is_required = required.contains(&requirement.name);
            match self.install_one(&env, requirement).await? {
                InstallOutcome::Installed(installed) => resolved.installed.push(installed),
                InstallOutcome::Failed(error, tracker) => {
                    self.progress.on_progress(&ProgressEvent::PackageFailed {
                        package: requirement.name.to_string(),
                        reason: error.to_string(),
                        required: is_required,
                    });
                    if is_required {
                        return Err(ProvisionError::RequiredPackageFailed {
                            package: requirement.name.clone(),
                            reason: error.to_string(),
                            installed: resolved.installed.len(),
                            failed: resolved.failed.len() + 1,
                        });
                    }
                    resolved.failed.push(FailedPackage {
                        name: requirement.name.clone(),
                        reason: error.message,
                        kind: error.kind,
                        attempts: tracker.attempt(),
                        required: false,
                        transitions: tracker.into_transitions(),
                    });
                }
            }
        }

        if let Some(dir) = project_dir {
            if let Err(e) = self.backend.install_project(&env, dir).await {
                warn!(error = %e, "Could not install the repository itself");
                resolved
                    .warnings
                    .push(format!("repository self-install failed: {}", e));
            }
        }

        info!(
            installed = resolved.installed.len(),
            failed = resolved.failed.len(),
            degraded = resolved.is_degraded(),
            "Provisioning complete"
        );
        Ok(resolved)
    }

    /// Warms the wheelhouse. Failures here are only logged: the install step
    /// retries against the index and reports the real error.
    async fn download_all(&self, env: &EnvironmentHandle, ordered: &[&Requirement]) {
        let mut downloads = Vec::with_capacity(ordered.len());
        for &requirement in ordered {
            downloads.push(download_one(self.backend.as_ref(), env, requirement));
        }
        let results: Vec<(PackageName, Result<(), InstallError>)> = stream::iter(downloads)
            .buffer_unordered(self.download_concurrency)
            .collect()
            .await;

        let failures = results.iter().filter(|(_, r)| r.is_err()).count();
        for (name, result) in &results {
            if let Err(e) = result {
                debug!(package = %name, error = %e, "Download failed, install will retry");
            }
        }
        debug!(total = results.len(), failures, "Downloads finished");
    }

    /// Drives one requirement through its state machine.
    async fn install_one(
        &self,
        env: &EnvironmentHandle,
        requirement: &Requirement,
    ) -> Result<InstallOutcome, ProvisionError> {
        let mut tracker = InstallTracker::new(requirement.name.as_str());
        let max_attempts = self.retry.attempts();

        loop {
            let attempt = tracker.begin_attempt()?;
            match self.backend.install(env, requirement).await {
                Ok(version) => {
                    tracker.succeed(&version)?;
                    self.progress.on_progress(&ProgressEvent::PackageInstalled {
                        package: requirement.name.to_string(),
                        version: version.clone(),
                        attempts: attempt,
                    });
                    return Ok(InstallOutcome::Installed(InstalledPackage {
                        name: requirement.name.clone(),
                        version,
                        attempts: attempt,
                        transitions: tracker.into_transitions(),
                    }));
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.backoff_delay(attempt);
                    tracker.schedule_retry(&e.message)?;
                    self.progress.on_progress(&ProgressEvent::PackageRetrying {
                        package: requirement.name.to_string(),
                        attempt,
                        delay,
                        reason: e.message.clone(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracker.fail(&e.message)?;
                    return Ok(InstallOutcome::Failed(e, tracker));
                }
            }
        }
    }
}

async fn download_one<'a>(
    backend: &'a dyn EnvironmentBackend,
    env: &'a EnvironmentHandle,
    requirement: &'a Requirement,
) -> (PackageName, Result<(), InstallError>) {
    (requirement.name.clone(), backend.download(env, requirement).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::RequirementMerger;
    use crate::requirement::{ManifestFormat, RequirementSource};
    use crate::runtime::StaticLocator;
    use crate::workspace::{WorkspaceGuard, WorkspaceManager};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockBackend {
        /// Scripted install results per package; an empty script succeeds.
        scripts: Mutex<HashMap<String, Vec<Result<String, InstallError>>>>,
        installs: Mutex<Vec<String>>,
        fail_upgrade: bool,
        fail_project: bool,
    }

    impl MockBackend {
        fn script(self, package: &str, results: Vec<Result<String, InstallError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(package.to_string(), results);
            self
        }

        fn installs(&self) -> Vec<String> {
            self.installs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EnvironmentBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        async fn create(
            &self,
            runtime: RuntimeVersion,
            _interpreter: &Path,
            layout: &EnvironmentLayout,
        ) -> Result<EnvironmentHandle, InstallError> {
            Ok(EnvironmentHandle::new(
                runtime,
                layout.env_dir.clone(),
                layout.env_dir.join("bin/python"),
                layout.wheelhouse.clone(),
                layout.cache_dir.clone(),
            ))
        }

        async fn upgrade_build_tools(&self, _env: &EnvironmentHandle) -> Result<(), InstallError> {
            if self.fail_upgrade {
                Err(InstallError::new(FailureKind::Other, "pip is broken"))
            } else {
                Ok(())
            }
        }

        async fn download(&self, _env: &EnvironmentHandle, _req: &Requirement) -> Result<(), InstallError> {
            Ok(())
        }

        async fn install(&self, _env: &EnvironmentHandle, req: &Requirement) -> Result<String, InstallError> {
            self.installs.lock().unwrap().push(req.name.to_string());
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(req.name.as_str()) {
                Some(results) if !results.is_empty() => results.remove(0),
                _ => Ok("1.0.0".to_string()),
            }
        }

        async fn install_project(&self, _env: &EnvironmentHandle, _dir: &Path) -> Result<(), InstallError> {
            if self.fail_project {
                Err(InstallError::new(FailureKind::NativeBuild, "setup.py exploded"))
            } else {
                Ok(())
            }
        }
    }

    fn requirement_set(lines: &[&str]) -> RequirementSet {
        let source = RequirementSource::manifest(ManifestFormat::RequirementsTxt, "requirements.txt");
        let reqs: Vec<Requirement> = lines
            .iter()
            .map(|l| Requirement::parse(l, source.clone()).unwrap())
            .collect();
        RequirementMerger::new().merge(reqs.iter())
    }

    fn fixture(temp: &TempDir) -> WorkspaceGuard {
        WorkspaceManager::new(temp.path().join("tmp"), temp.path().join("ws"))
            .acquire_ephemeral()
            .unwrap()
    }

    fn provisioner(backend: Arc<MockBackend>) -> Provisioner {
        let locator = StaticLocator::new().with_interpreter(RuntimeVersion::new(3, 11), "/usr/bin/python3.11");
        Provisioner::new(backend, Arc::new(locator)).with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
    }

    fn py311() -> RuntimeVersion {
        RuntimeVersion::new(3, 11)
    }

    #[tokio::test]
    async fn test_install_order_pins_first() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend::default());
        let set = requirement_set(&["tqdm", "numpy>=1.20", "torch==2.1.0", "attrs"]);

        let env = provisioner(backend.clone())
            .provision(&set, py311(), &ws, &BTreeSet::new(), None)
            .await
            .unwrap();

        assert_eq!(backend.installs(), vec!["torch", "numpy", "attrs", "tqdm"]);
        assert_eq!(env.installed().len(), 4);
        assert!(!env.is_degraded());
        assert_eq!(env.workspace_path(), ws.root());
        assert_eq!(env.runtime_version(), py311());
    }

    #[tokio::test]
    async fn test_provision_runs_on_a_spawned_task() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend::default());
        let provisioner = provisioner(backend.clone()).with_download_concurrency(2);
        let set = requirement_set(&["numpy", "scipy", "pandas"]);

        let env = tokio::spawn(async move {
            provisioner
                .provision(&set, py311(), &ws, &BTreeSet::new(), None)
                .await
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(env.installed().len(), 3);
        assert_eq!(backend.installs().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend::default().script(
            "numpy",
            vec![Err(InstallError::transient("Read timed out")), Ok("1.26.4".to_string())],
        ));
        let set = requirement_set(&["numpy"]);

        let env = provisioner(backend.clone())
            .provision(&set, py311(), &ws, &BTreeSet::new(), None)
            .await
            .unwrap();

        let numpy = &env.installed()[0];
        assert_eq!(numpy.version, "1.26.4");
        assert_eq!(numpy.attempts, 2);
        let states: Vec<InstallState> = numpy.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                InstallState::Installing,
                InstallState::Retrying,
                InstallState::Installing,
                InstallState::Installed
            ]
        );
    }

    #[tokio::test]
    async fn test_non_transient_not_retried_and_degrades() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend::default().script(
            "pycocotools",
            vec![Err(InstallError::new(FailureKind::NativeBuild, "Failed building wheel"))],
        ));
        let set = requirement_set(&["numpy", "pycocotools"]);

        let env = provisioner(backend.clone())
            .provision(&set, py311(), &ws, &BTreeSet::new(), None)
            .await
            .unwrap();

        assert!(env.is_degraded());
        assert_eq!(env.failed().len(), 1);
        assert_eq!(env.failed()[0].kind, FailureKind::NativeBuild);
        assert_eq!(env.failed()[0].attempts, 1);
        assert!(env.is_installed(&PackageName::new("numpy")));
        assert_eq!(backend.installs().iter().filter(|p| *p == "pycocotools").count(), 1);
    }

    #[tokio::test]
    async fn test_transient_exhausts_retries() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend::default().script(
            "flaky",
            vec![
                Err(InstallError::transient("connection reset")),
                Err(InstallError::transient("connection reset")),
                Err(InstallError::transient("connection reset")),
                Ok("9.9".to_string()),
            ],
        ));
        let set = requirement_set(&["flaky"]);

        let env = provisioner(backend.clone())
            .provision(&set, py311(), &ws, &BTreeSet::new(), None)
            .await
            .unwrap();

        assert_eq!(env.failed()[0].attempts, 3);
        assert_eq!(env.failed()[0].kind, FailureKind::Transient);
        assert_eq!(backend.installs().len(), 3);
    }

    #[tokio::test]
    async fn test_required_failure_aborts() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend::default().script(
            "torch",
            vec![Err(InstallError::new(
                FailureKind::NoCompatibleRelease,
                "No matching distribution found for torch==0.1",
            ))],
        ));
        let set = requirement_set(&["torch==0.1", "numpy"]);
        let required: BTreeSet<PackageName> = [PackageName::new("torch")].into_iter().collect();

        let err = provisioner(backend.clone())
            .provision(&set, py311(), &ws, &required, None)
            .await
            .unwrap_err();

        match err {
            ProvisionError::RequiredPackageFailed { package, .. } => assert_eq!(package.as_str(), "torch"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.installs(), vec!["torch"]);
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend::default());
        let err = provisioner(backend)
            .provision(&RequirementSet::new(), RuntimeVersion::new(3, 8), &ws, &BTreeSet::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InterpreterNotFound(_)));
    }

    #[tokio::test]
    async fn test_tool_and_project_failures_are_warnings() {
        let temp = TempDir::new().unwrap();
        let ws = fixture(&temp);
        let backend = Arc::new(MockBackend {
            fail_upgrade: true,
            fail_project: true,
            ..Default::default()
        });
        let set = requirement_set(&["numpy"]);

        let env = provisioner(backend)
            .provision(&set, py311(), &ws, &BTreeSet::new(), Some(ws.repo_dir().as_path()))
            .await
            .unwrap();

        assert!(!env.is_degraded());
        assert_eq!(env.warnings().len(), 2);
        assert!(env.warnings()[0].contains("build tool upgrade"));
        assert!(env.warnings()[1].contains("self-install"));
    }
}
