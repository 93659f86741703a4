use super::{remove_tree, Workspace, WorkspaceError};
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scoped ownership of a workspace.
///
/// Dropping the guard deletes an ephemeral root on every exit path, including
/// errors, panics and a cancelled future that owned the guard. Deletion is
/// synchronous so it cannot itself be cancelled. Persistent roots are left alone.
#[derive(Debug)]
pub struct WorkspaceGuard {
    workspace: Workspace,
    released: bool,
}

impl WorkspaceGuard {
    pub(super) fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            released: false,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Copies a file or directory from inside the workspace to `dest_dir` so it
    /// outlives an ephemeral root. Returns the copied path.
    pub fn persist_to(&self, relative: &Path, dest_dir: &Path) -> Result<PathBuf, WorkspaceError> {
        let source = self.workspace.root().join(relative);
        let name = source
            .file_name()
            .ok_or_else(|| WorkspaceError::InvalidName(relative.display().to_string()))?;
        fs::create_dir_all(dest_dir).map_err(|e| WorkspaceError::io(dest_dir, e))?;
        let dest = dest_dir.join(name);
        copy_recursive(&source, &dest)?;
        info!(from = %source.display(), to = %dest.display(), "Persisted workspace artifact");
        Ok(dest)
    }

    /// Deletes an ephemeral root now and reports whether anything was removed.
    /// Persistent roots are kept and report `false`.
    pub fn release(mut self) -> Result<bool, WorkspaceError> {
        self.released = true;
        if self.workspace.is_ephemeral() {
            remove_tree(self.workspace.root())
        } else {
            Ok(false)
        }
    }
}

impl Deref for WorkspaceGuard {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.workspace
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.released || !self.workspace.is_ephemeral() {
            return;
        }
        match remove_tree(self.workspace.root()) {
            Ok(removed) => {
                debug!(root = %self.workspace.root().display(), removed, "Released ephemeral workspace")
            }
            Err(e) => warn!(error = %e, "Failed to delete ephemeral workspace"),
        }
    }
}

fn copy_recursive(source: &Path, dest: &Path) -> Result<(), WorkspaceError> {
    let metadata = fs::metadata(source).map_err(|e| WorkspaceError::io(source, e))?;
    if metadata.is_file() {
        fs::copy(source, dest).map_err(|e| WorkspaceError::io(dest, e))?;
        return Ok(());
    }

    fs::create_dir_all(dest).map_err(|e| WorkspaceError::io(dest, e))?;
    let entries = fs::read_dir(source).map_err(|e| WorkspaceError::io(source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| WorkspaceError::io(source, e))?;
        copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}
