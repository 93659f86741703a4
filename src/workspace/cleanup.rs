use super::{remove_tree, WorkspaceError, WorkspaceManager, WorkspaceMarker, WorkspaceMode};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which workspace classes a cleanup removes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupRequest {
    /// Every marked ephemeral root under the manager's tmp dir.
    pub ephemeral: bool,
    /// Named persistent roots.
    pub persistent: Vec<String>,
    /// Every marked persistent root under the manager's workspace dir.
    pub all_persistent: bool,
}

impl CleanupRequest {
    pub fn is_empty(&self) -> bool {
        !self.ephemeral && !self.all_persistent && self.persistent.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub already_absent: Vec<PathBuf>,
    /// Directories left alone: unmarked, or owned by this process.
    pub skipped: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

impl WorkspaceManager {
    /// Removes the requested workspaces. Repeating a cleanup is a no-op that
    /// reports nothing removed.
    pub fn cleanup(&self, request: &CleanupRequest) -> Result<CleanupReport, WorkspaceError> {
        let mut report = CleanupReport::default();

        if request.ephemeral {
            for root in marked_roots(&self.tmp_dir, WorkspaceMode::Ephemeral, &mut report)? {
                remove_into(&root, &mut report)?;
            }
        }

        if request.all_persistent {
            for root in marked_roots(&self.workspace_dir, WorkspaceMode::Persistent, &mut report)? {
                remove_into(&root, &mut report)?;
            }
        }

        for name in &request.persistent {
            let root = self.persistent_root(name)?;
            if report.removed.contains(&root) {
                continue;
            }
            if !root.exists() {
                report.already_absent.push(root);
                continue;
            }
            match WorkspaceMarker::read(&root)? {
                Some(_) => remove_into(&root, &mut report)?,
                None => {
                    warn!(root = %root.display(), "Not a workspace, leaving it alone");
                    report.skipped.push(root);
                }
            }
        }

        info!(
            removed = report.removed.len(),
            already_absent = report.already_absent.len(),
            skipped = report.skipped.len(),
            "Cleanup complete"
        );
        Ok(report)
    }
}

fn remove_into(root: &Path, report: &mut CleanupReport) -> Result<(), WorkspaceError> {
    if remove_tree(root)? {
        info!(root = %root.display(), "Removed workspace");
        report.removed.push(root.to_path_buf());
    } else {
        report.already_absent.push(root.to_path_buf());
    }
    Ok(())
}

/// Marked roots of `mode` directly under `parent`. Ephemeral roots created by
/// this process belong to live runs and are skipped.
fn marked_roots(
    parent: &Path,
    mode: WorkspaceMode,
    report: &mut CleanupReport,
) -> Result<Vec<PathBuf>, WorkspaceError> {
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(WorkspaceError::io(parent, e)),
    };

    let mut roots = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| WorkspaceError::io(parent, e))?.path();
        if !path.is_dir() {
            continue;
        }
        let marker = match WorkspaceMarker::read(&path) {
            Ok(marker) => marker,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable workspace marker");
                report.skipped.push(path);
                continue;
            }
        };
        match marker {
            Some(m) if m.mode == mode => {
                if mode == WorkspaceMode::Ephemeral && m.pid == std::process::id() {
                    report.skipped.push(path);
                } else {
                    roots.push(path);
                }
            }
            Some(_) => {}
            None => report.skipped.push(path),
        }
    }
    roots.sort();
    Ok(roots)
}
