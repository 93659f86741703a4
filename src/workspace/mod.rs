//! Workspace lifecycle
//!
//! A workspace owns every file a run creates: the cloned repository, the
//! virtual environment, the download wheelhouse, pip's cache and the generated
//! demo. Ephemeral workspaces are deleted when their [`WorkspaceGuard`] drops;
//! persistent ones stay until [`WorkspaceManager::cleanup`] removes them.

mod cleanup;
mod guard;

pub use cleanup::{CleanupReport, CleanupRequest};
pub use guard::WorkspaceGuard;

use crate::provision::EnvironmentLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Marker file identifying a directory as a workspace root.
pub const MARKER_FILE: &str = ".reprobox-workspace.json";

const REPO_DIR: &str = "repo";
const ENV_DIR: &str = "env";
const WHEELHOUSE_DIR: &str = "wheelhouse";
const CACHE_DIR: &str = "pip-cache";
const DEMO_DIR: &str = "demo";

/// Directories wiped when a persistent workspace is reused. The pip cache survives.
const RESET_ON_REUSE: &[&str] = &[REPO_DIR, ENV_DIR, WHEELHOUSE_DIR, DEMO_DIR];

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid workspace name '{0}': must be a single path component")]
    InvalidName(String),

    #[error("{0} exists but is not a reprobox workspace (no {MARKER_FILE})")]
    NotOwned(PathBuf),

    #[error("Corrupt workspace marker at {path}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    Ephemeral,
    Persistent,
}

impl fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceMode::Ephemeral => write!(f, "ephemeral"),
            WorkspaceMode::Persistent => write!(f, "persistent"),
        }
    }
}

/// Contents of [`MARKER_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMarker {
    pub mode: WorkspaceMode,
    pub created_at: DateTime<Utc>,
    pub pid: u32,
}

impl WorkspaceMarker {
    pub fn read(root: &Path) -> Result<Option<Self>, WorkspaceError> {
        let path = root.join(MARKER_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WorkspaceError::io(&path, e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| WorkspaceError::Marker { path, source })
    }

    fn write(&self, root: &Path) -> Result<(), WorkspaceError> {
        let path = root.join(MARKER_FILE);
        let text = serde_json::to_string_pretty(self)
            .map_err(|source| WorkspaceError::Marker {
                path: path.clone(),
                source,
            })?;
        fs::write(&path, text).map_err(|e| WorkspaceError::io(&path, e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    root: PathBuf,
    mode: WorkspaceMode,
    created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> WorkspaceMode {
        self.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_ephemeral(&self) -> bool {
        self.mode == WorkspaceMode::Ephemeral
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join(REPO_DIR)
    }

    pub fn env_dir(&self) -> PathBuf {
        self.root.join(ENV_DIR)
    }

    pub fn wheelhouse_dir(&self) -> PathBuf {
        self.root.join(WHEELHOUSE_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    pub fn demo_dir(&self) -> PathBuf {
        self.root.join(DEMO_DIR)
    }

    pub fn layout(&self) -> EnvironmentLayout {
        EnvironmentLayout {
            env_dir: self.env_dir(),
            wheelhouse: self.wheelhouse_dir(),
            cache_dir: self.cache_dir(),
        }
    }
}

/// Allocates and removes workspace roots.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    tmp_dir: PathBuf,
    workspace_dir: PathBuf,
}

impl WorkspaceManager {
    /// `tmp_dir` holds ephemeral roots, `workspace_dir` holds persistent ones.
    pub fn new(tmp_dir: impl Into<PathBuf>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            workspace_dir: workspace_dir.into(),
        }
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// Creates a uniquely named root that is deleted when the guard drops.
    pub fn acquire_ephemeral(&self) -> Result<WorkspaceGuard, WorkspaceError> {
        let created_at = Utc::now();
        let id = Uuid::new_v4().simple().to_string();
        let name = format!("run-{}-{}", created_at.format("%Y%m%d%H%M%S"), &id[..8]);
        let root = self.tmp_dir.join(name);

        fs::create_dir_all(&root).map_err(|e| WorkspaceError::io(&root, e))?;
        let workspace = Workspace {
            root,
            mode: WorkspaceMode::Ephemeral,
            created_at,
        };
        let guard = WorkspaceGuard::new(workspace);
        // The guard exists before the marker so a failed write still cleans up.
        initialize(guard.workspace())?;

        info!(root = %guard.workspace().root().display(), "Acquired ephemeral workspace");
        Ok(guard)
    }

    /// Creates `<workspace_dir>/<name>`, or resets it if it already is a workspace.
    pub fn acquire_persistent(&self, name: &str) -> Result<WorkspaceGuard, WorkspaceError> {
        let root = self.persistent_root(name)?;

        let created_at = if root.exists() {
            let marker = WorkspaceMarker::read(&root)?;
            match marker {
                Some(marker) => {
                    reset(&root)?;
                    info!(root = %root.display(), "Reusing persistent workspace");
                    marker.created_at
                }
                None if is_empty_dir(&root)? => Utc::now(),
                None => return Err(WorkspaceError::NotOwned(root)),
            }
        } else {
            fs::create_dir_all(&root).map_err(|e| WorkspaceError::io(&root, e))?;
            info!(root = %root.display(), "Created persistent workspace");
            Utc::now()
        };

        let workspace = Workspace {
            root,
            mode: WorkspaceMode::Persistent,
            created_at,
        };
        initialize(&workspace)?;
        Ok(WorkspaceGuard::new(workspace))
    }

    pub(crate) fn persistent_root(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !name.starts_with('.') => {
                Ok(self.workspace_dir.join(name))
            }
            _ => Err(WorkspaceError::InvalidName(name.to_string())),
        }
    }
}

fn initialize(workspace: &Workspace) -> Result<(), WorkspaceError> {
    // `repo/` and `env/` are created by git and venv themselves.
    for dir in [
        workspace.wheelhouse_dir(),
        workspace.cache_dir(),
        workspace.demo_dir(),
    ] {
        fs::create_dir_all(&dir).map_err(|e| WorkspaceError::io(&dir, e))?;
    }
    WorkspaceMarker {
        mode: workspace.mode,
        created_at: workspace.created_at,
        pid: std::process::id(),
    }
    .write(workspace.root())
}

fn reset(root: &Path) -> Result<(), WorkspaceError> {
    for name in RESET_ON_REUSE {
        let dir = root.join(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!(dir = %dir.display(), "Reset workspace directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WorkspaceError::io(&dir, e)),
        }
    }
    Ok(())
}

fn is_empty_dir(path: &Path) -> Result<bool, WorkspaceError> {
    let mut entries = fs::read_dir(path).map_err(|e| WorkspaceError::io(path, e))?;
    Ok(entries.next().is_none())
}

/// Removes a directory tree; `Ok(false)` if it was already gone.
pub(crate) fn remove_tree(path: &Path) -> Result<bool, WorkspaceError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(WorkspaceError::io(path, e)),
    }
}
