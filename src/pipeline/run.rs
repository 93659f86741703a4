use super::config::PipelineConfig;
use super::resolve::{resolve_requirements, Resolution};
use crate::collaborators::{
    repository_name, CommandDemoGenerator, DemoGenerator, ExecutionError, ExecutionOutcome, GitCloner,
    OverrideLocator, RepositoryCloner, RepositoryLocator, ScriptExecutor, VenvScriptExecutor,
};
use crate::config::ReproboxConfig;
use crate::error::{ErrorCode, RunError};
use crate::imports::{AmbiguousImport, ImportScanner};
use crate::index::{IndexError, PackageIndex, PyPiIndex, ReleaseCatalog};
use crate::manifest::ManifestReader;
use crate::merge::Conflict;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::provision::{
    EnvironmentBackend, FailedPackage, InstalledPackage, Provisioner, ResolvedEnvironment, VenvBackend,
};
use crate::runtime::{
    select_runtime, InterpreterLocator, RejectedCandidate, RuntimeCatalog, RuntimeVersion, WhichLocator,
};
use crate::snapshot::{RepositorySnapshot, SnapshotError, SnapshotScanner};
use crate::workspace::{WorkspaceError, WorkspaceGuard, WorkspaceManager};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const DEMO_FILE: &str = "generated_demo.py";

/// One paper to process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Paper file path or URL; may itself be a repository URL.
    pub paper: String,
    /// Explicit repository URL, skipping lookup.
    pub repository: Option<String>,
    /// Keep the workspace after the run.
    pub persistent: bool,
    /// Persistent workspace name; defaults to the repository name.
    pub workspace_name: Option<String>,
    pub auto_run: bool,
    /// Where the generated demo is copied so it outlives the workspace.
    pub output_dir: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(paper: impl Into<String>) -> Self {
        Self {
            paper: paper.into(),
            ..Default::default()
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn persistent(mut self, name: Option<String>) -> Self {
        self.persistent = true;
        self.workspace_name = name;
        self
    }

    pub fn with_auto_run(mut self, auto_run: bool) -> Self {
        self.auto_run = auto_run;
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    /// Provisioned, but at least one optional package is missing.
    Degraded,
    Aborted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Degraded => write!(f, "degraded"),
            RunOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    fn from_result(result: Result<ExecutionOutcome, ExecutionError>) -> Self {
        match result {
            Ok(outcome) => Self {
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                error_code: None,
                error: None,
            },
            Err(e) => {
                let message = e.to_string();
                let (exit_code, stdout, stderr) = match &e {
                    ExecutionError::Failed(outcome) => {
                        (outcome.exit_code, outcome.stdout.clone(), outcome.stderr.clone())
                    }
                    _ => (None, String::new(), String::new()),
                };
                Self {
                    exit_code,
                    stdout,
                    stderr,
                    error_code: Some(RunError::from(e).code()),
                    error: Some(message),
                }
            }
        }
    }

    pub fn success(&self) -> bool {
        self.error_code.is_none()
    }
}

/// What `inspect` prints: the resolution plus the runtime it would pick.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    #[serde(flatten)]
    pub resolution: Resolution,
    pub runtime: Option<RuntimeVersion>,
    pub rejected: Vec<RejectedCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_error: Option<String>,
    /// Index lookups that failed and pins the index did not know.
    pub warnings: Vec<String>,
}

/// Result of one run. Produced on every exit path.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub paper: String,
    pub repository_url: Option<String>,
    pub runtime_version: Option<RuntimeVersion>,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Troubleshooting text for terminals; not part of the serialized report.
    #[serde(skip)]
    pub help: Option<String>,
    pub installed: Vec<InstalledPackage>,
    pub failed: Vec<FailedPackage>,
    pub warnings: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub ambiguities: Vec<AmbiguousImport>,
    pub elapsed_ms: u64,
    /// Set for persistent workspaces only; ephemeral ones are gone by now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

impl RunReport {
    pub fn new(paper: impl Into<String>) -> Self {
        Self {
            paper: paper.into(),
            repository_url: None,
            runtime_version: None,
            outcome: RunOutcome::Aborted,
            error_code: None,
            error: None,
            help: None,
            installed: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
            ambiguities: Vec::new(),
            elapsed_ms: 0,
            workspace: None,
            demo_path: None,
            execution: None,
        }
    }

    /// Report for a run that was cancelled before it could produce one.
    pub fn cancelled(paper: impl Into<String>) -> Self {
        let mut report = Self::new(paper);
        report.record_error(&RunError::Cancelled);
        report
    }

    fn record_error(&mut self, error: &RunError) {
        self.outcome = RunOutcome::Aborted;
        self.error_code = Some(error.code());
        self.error = Some(error.to_string());
        self.help = Some(error.help_message());
    }

    pub fn is_aborted(&self) -> bool {
        self.outcome == RunOutcome::Aborted
    }
}

/// Runs papers through clone, resolution, runtime selection, provisioning
/// and the optional demo steps. One instance is shared by concurrent runs;
/// each run owns its own workspace.
pub struct Pipeline {
    config: PipelineConfig,
    workspaces: WorkspaceManager,
    manifests: Arc<ManifestReader>,
    imports: ImportScanner,
    catalog: RuntimeCatalog,
    locator: Arc<dyn RepositoryLocator>,
    cloner: Arc<dyn RepositoryCloner>,
    index: Option<Arc<dyn PackageIndex>>,
    interpreters: Arc<dyn InterpreterLocator>,
    backend: Arc<dyn EnvironmentBackend>,
    demo: Option<Arc<dyn DemoGenerator>>,
    executor: Option<Arc<dyn ScriptExecutor>>,
    progress: Arc<dyn ProgressHandler>,
}

impl Pipeline {
    /// A pipeline with no index, demo generator or executor.
    pub fn new(
        config: PipelineConfig,
        workspaces: WorkspaceManager,
        cloner: Arc<dyn RepositoryCloner>,
        interpreters: Arc<dyn InterpreterLocator>,
        backend: Arc<dyn EnvironmentBackend>,
    ) -> Self {
        Self {
            config,
            workspaces,
            manifests: Arc::new(ManifestReader::with_defaults()),
            imports: ImportScanner::with_defaults(),
            catalog: RuntimeCatalog::supported(),
            locator: Arc::new(OverrideLocator::default()),
            cloner,
            index: None,
            interpreters,
            backend,
            demo: None,
            executor: None,
            progress: Arc::new(NoOpHandler),
        }
    }

    /// The production wiring: git, PyPI, venv and the configured demo command.
    pub fn from_config(config: &ReproboxConfig) -> Result<Self, IndexError> {
        let mut pipeline = Self::new(
            PipelineConfig::from_config(config),
            config.workspace_manager(),
            Arc::new(GitCloner::new(config.clone_timeout())),
            Arc::new(WhichLocator::new()),
            Arc::new(VenvBackend::new(config.install_timeout())),
        )
        .with_executor(Arc::new(VenvScriptExecutor::new(config.exec_timeout())));

        if !config.offline {
            pipeline = pipeline.with_index(Arc::new(PyPiIndex::new(
                config.index_url.clone(),
                config.index_timeout(),
            )?));
        }
        if let Some(command) = &config.demo_command {
            pipeline = pipeline.with_demo_generator(Arc::new(CommandDemoGenerator::new(
                command.clone(),
                config.exec_timeout(),
            )));
        }
        Ok(pipeline)
    }

    pub fn with_locator(mut self, locator: Arc<dyn RepositoryLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn PackageIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_catalog(mut self, catalog: RuntimeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_demo_generator(mut self, demo: Arc<dyn DemoGenerator>) -> Self {
        self.demo = Some(demo);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn manifests(&self) -> &ManifestReader {
        &self.manifests
    }

    pub fn imports(&self) -> &ImportScanner {
        &self.imports
    }

    /// Processes one paper. Fatal errors end up in the report; an ephemeral
    /// workspace is already deleted when this returns.
    pub async fn run(&self, request: &RunRequest) -> RunReport {
        let start = Instant::now();
        self.progress.on_progress(&ProgressEvent::RunStarted {
            paper: request.paper.clone(),
        });

        let mut report = RunReport::new(&request.paper);
        match self.execute(request, &mut report).await {
            Ok(()) => {
                report.outcome = if report.failed.is_empty() {
                    RunOutcome::Success
                } else {
                    RunOutcome::Degraded
                };
            }
            Err(e) => {
                warn!(paper = %request.paper, code = %e.code(), error = %e, "Run aborted");
                report.record_error(&e);
                self.progress.on_progress(&ProgressEvent::RunFailed {
                    paper: request.paper.clone(),
                    error: e.to_string(),
                });
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        self.progress.on_progress(&ProgressEvent::RunCompleted {
            paper: request.paper.clone(),
            outcome: report.outcome.to_string(),
            total_time: start.elapsed(),
        });
        report
    }

    async fn execute(&self, request: &RunRequest, report: &mut RunReport) -> Result<(), RunError> {
        let phase = self.phase_started("locate");
        let url = match &request.repository {
            Some(url) => Some(url.clone()),
            None => self.locator.locate(&request.paper).await,
        }
        .ok_or_else(|| RunError::RepositoryNotFound {
            paper: request.paper.clone(),
        })?;
        report.repository_url = Some(url.clone());
        self.phase_complete("locate", phase);

        // Dropping the guard on any return below deletes an ephemeral root.
        let guard = self.acquire_workspace(request, &url)?;
        if !guard.is_ephemeral() {
            report.workspace = Some(guard.root().to_path_buf());
        }

        let phase = self.phase_started("clone");
        let snapshot = self.cloner.clone_repository(&url, &guard.repo_dir()).await?;
        self.phase_complete("clone", phase);

        let phase = self.phase_started("resolve");
        let resolution = resolve_requirements(&snapshot, &self.manifests, &self.imports);
        report.warnings.extend(resolution.warnings());
        report.conflicts = resolution.requirements.conflicts().to_vec();
        report.ambiguities = resolution.ambiguities.clone();
        self.phase_complete("resolve", phase);

        let phase = self.phase_started("prefetch");
        let (releases, index_warnings) = self.prefetch(&resolution).await;
        report.warnings.extend(index_warnings);
        self.phase_complete("prefetch", phase);

        let phase = self.phase_started("select");
        let host = self.catalog.available_on_host(self.interpreters.as_ref());
        let declared = resolution.declared_runtime.as_ref().map(|d| &d.constraint);
        let selection = select_runtime(&resolution.requirements, &host, declared, &releases)?;
        report.runtime_version = Some(selection.runtime);
        for name in &selection.unchecked {
            report
                .warnings
                .push(format!("{}: pin not checked against the index", name));
        }
        self.progress.on_progress(&ProgressEvent::RuntimeSelected {
            runtime: selection.runtime.to_string(),
            rejected: selection.rejected.len(),
        });
        self.phase_complete("select", phase);

        let phase = self.phase_started("provision");
        let provisioner = Provisioner::new(self.backend.clone(), self.interpreters.clone())
            .with_retry_policy(self.config.retry.clone())
            .with_download_concurrency(self.config.download_concurrency)
            .with_progress(self.progress.clone());
        let environment = provisioner
            .provision(
                &resolution.requirements,
                selection.runtime,
                &guard,
                &resolution.required,
                installable_project(&snapshot),
            )
            .await?;
        report.installed = environment.installed().to_vec();
        report.failed = environment.failed().to_vec();
        report.warnings.extend(environment.warnings().iter().cloned());
        self.phase_complete("provision", phase);

        let Some(script) = self.generate_demo(&snapshot, &environment, &guard, request, report).await else {
            return Ok(());
        };

        if request.auto_run {
            match &self.executor {
                Some(executor) => {
                    let phase = self.phase_started("execute");
                    let result = executor.execute(&script, &environment, snapshot.root()).await;
                    if let Err(e) = &result {
                        warn!(error = %e, "Demo execution failed");
                    }
                    report.execution = Some(ExecutionReport::from_result(result));
                    self.phase_complete("execute", phase);
                }
                None => report
                    .warnings
                    .push("auto-run requested but no executor is configured".to_string()),
            }
        }
        Ok(())
    }

    fn acquire_workspace(&self, request: &RunRequest, url: &str) -> Result<WorkspaceGuard, RunError> {
        if !request.persistent {
            return Ok(self.workspaces.acquire_ephemeral()?);
        }
        let name = request
            .workspace_name
            .clone()
            .or_else(|| repository_name(url))
            .ok_or_else(|| WorkspaceError::InvalidName(url.to_string()))?;
        Ok(self.workspaces.acquire_persistent(&name)?)
    }

    /// Release metadata for every pin. Lookup failures become warnings.
    async fn prefetch(&self, resolution: &Resolution) -> (ReleaseCatalog, Vec<String>) {
        let Some(index) = &self.index else {
            return (ReleaseCatalog::new(), Vec::new());
        };
        let pinned: Vec<_> = resolution.requirements.pinned().map(|r| r.name.clone()).collect();
        if pinned.is_empty() {
            return (ReleaseCatalog::new(), Vec::new());
        }
        let (catalog, failures) = ReleaseCatalog::prefetch(
            index.as_ref(),
            pinned,
            self.config.index_concurrency,
            self.config.index_timeout,
        )
        .await;
        let warnings = failures
            .into_iter()
            .map(|w| format!("index lookup failed for {}", w))
            .collect();
        (catalog, warnings)
    }

    /// Resolution and runtime selection for a local checkout. Nothing is
    /// cloned or installed.
    pub async fn inspect(&self, root: &Path) -> Result<Inspection, SnapshotError> {
        let snapshot = SnapshotScanner::new(root.to_path_buf())?.scan()?;
        let resolution = resolve_requirements(&snapshot, &self.manifests, &self.imports);
        let (releases, mut warnings) = self.prefetch(&resolution).await;

        let host = self.catalog.available_on_host(self.interpreters.as_ref());
        let declared = resolution.declared_runtime.as_ref().map(|d| &d.constraint);
        let (runtime, rejected, runtime_error) =
            match select_runtime(&resolution.requirements, &host, declared, &releases) {
                Ok(selection) => {
                    warnings.extend(
                        selection
                            .unchecked
                            .iter()
                            .map(|name| format!("{}: pin not checked against the index", name)),
                    );
                    (Some(selection.runtime), selection.rejected, None)
                }
                Err(e) => (None, Vec::new(), Some(e.to_string())),
            };

        Ok(Inspection {
            resolution,
            runtime,
            rejected,
            runtime_error,
            warnings,
        })
    }

    /// Writes the generated script into the workspace and copies it out when
    /// asked. Generator failures are warnings.
    async fn generate_demo(
        &self,
        snapshot: &RepositorySnapshot,
        environment: &ResolvedEnvironment,
        guard: &WorkspaceGuard,
        request: &RunRequest,
        report: &mut RunReport,
    ) -> Option<PathBuf> {
        let demo = self.demo.as_ref()?;
        let phase = self.phase_started("demo");

        let script = match demo.generate(snapshot, environment).await {
            Ok(script) => script,
            Err(e) => {
                warn!(error = %e, "Demo generation failed");
                report.warnings.push(format!("demo generation failed: {}", e));
                return None;
            }
        };

        let path = guard.demo_dir().join(DEMO_FILE);
        if let Err(e) = tokio::fs::write(&path, script).await {
            report
                .warnings
                .push(format!("could not write {}: {}", path.display(), e));
            return None;
        }
        info!(path = %path.display(), "Demo script written");

        if let Some(output_dir) = &request.output_dir {
            let relative = Path::new("demo").join(DEMO_FILE);
            match guard.persist_to(&relative, output_dir) {
                Ok(copied) => report.demo_path = Some(copied),
                Err(e) => report.warnings.push(format!("could not copy demo: {}", e)),
            }
        } else if !guard.is_ephemeral() {
            report.demo_path = Some(path.clone());
        }

        self.phase_complete("demo", phase);
        Some(path)
    }

    fn phase_started(&self, phase: &str) -> Instant {
        info!("Phase: {}", phase);
        self.progress.on_progress(&ProgressEvent::PhaseStarted {
            phase: phase.to_string(),
        });
        Instant::now()
    }

    fn phase_complete(&self, phase: &str, started: Instant) {
        self.progress.on_progress(&ProgressEvent::PhaseComplete {
            phase: phase.to_string(),
            duration: started.elapsed(),
        });
    }
}

/// The repository root if it can be installed as a package itself.
fn installable_project(snapshot: &RepositorySnapshot) -> Option<&Path> {
    let has = |name: &str| snapshot.has_manifest(Path::new(name));
    (has("pyproject.toml") || has("setup.py")).then(|| snapshot.root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = RunRequest::new("paper.pdf")
            .with_repository("https://github.com/u/repo")
            .persistent(Some("mine".to_string()))
            .with_auto_run(true)
            .with_output_dir("/out");

        assert_eq!(request.repository.as_deref(), Some("https://github.com/u/repo"));
        assert!(request.persistent);
        assert_eq!(request.workspace_name.as_deref(), Some("mine"));
        assert!(request.auto_run);
        assert_eq!(request.output_dir, Some(PathBuf::from("/out")));
    }

    #[test]
    fn test_cancelled_report() {
        let report = RunReport::cancelled("paper.pdf");
        assert!(report.is_aborted());
        assert_eq!(report.error_code, Some(ErrorCode::Cancelled));
        assert!(report.help.is_some());
    }

    #[test]
    fn test_execution_report_from_failure() {
        let outcome = ExecutionOutcome {
            exit_code: Some(1),
            stdout: "partial".to_string(),
            stderr: "Traceback".to_string(),
        };
        let report = ExecutionReport::from_result(Err(ExecutionError::Failed(outcome)));
        assert!(!report.success());
        assert_eq!(report.exit_code, Some(1));
        assert_eq!(report.stderr, "Traceback");
        assert_eq!(report.error_code, Some(ErrorCode::ExecutionFailure));
    }

    #[test]
    fn test_report_serialization_skips_help() {
        let report = RunReport::cancelled("paper.pdf");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "aborted");
        assert_eq!(json["error_code"], "cancelled");
        assert!(json.get("help").is_none());
    }
}
