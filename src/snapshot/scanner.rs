use super::RepositorySnapshot;
use crate::manifest::ManifestReader;
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Directories that never hold project sources worth scanning.
pub const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    "venv",
    "env",
    "build",
    "dist",
    "node_modules",
    "site-packages",
    "*.egg-info",
];

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Repository path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Repository path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to walk repository: {0}")]
    Walk(String),

    #[error("I/O error while scanning repository: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub max_depth: usize,
    pub max_files: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_files: 50_000,
        }
    }
}

/// Builds a [`RepositorySnapshot`] by walking a checkout on disk.
///
/// Hidden directories, virtualenvs and build output are skipped, and
/// `.gitignore` rules are honoured inside git checkouts.
pub struct SnapshotScanner {
    root: PathBuf,
    manifests: Arc<ManifestReader>,
    config: ScanConfig,
}

impl SnapshotScanner {
    pub fn new(root: PathBuf) -> Result<Self, SnapshotError> {
        Self::with_reader(root, Arc::new(ManifestReader::with_defaults()))
    }

    pub fn with_reader(root: PathBuf, manifests: Arc<ManifestReader>) -> Result<Self, SnapshotError> {
        if !root.exists() {
            return Err(SnapshotError::PathNotFound(root));
        }
        if !root.is_dir() {
            return Err(SnapshotError::NotADirectory(root));
        }
        let root = root.canonicalize()?;

        debug!(root = %root.display(), "SnapshotScanner initialized");

        Ok(Self {
            root,
            manifests,
            config: ScanConfig::default(),
        })
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scan(&self) -> Result<RepositorySnapshot, SnapshotError> {
        let start = Instant::now();
        info!(
            root = %self.root.display(),
            max_depth = self.config.max_depth,
            "Scanning repository snapshot"
        );

        let mut override_builder = OverrideBuilder::new(&self.root);
        override_builder
            .add("!.*/")
            .map_err(|e| SnapshotError::Walk(e.to_string()))?;
        for excluded in EXCLUDED_DIRS {
            override_builder
                .add(&format!("!{}/", excluded))
                .map_err(|e| SnapshotError::Walk(e.to_string()))?;
        }
        let overrides = override_builder
            .build()
            .map_err(|e| SnapshotError::Walk(e.to_string()))?;

        let mut source_files = Vec::new();
        let mut manifest_files = Vec::new();
        let mut files_seen = 0usize;

        for result in WalkBuilder::new(&self.root)
            .max_depth(Some(self.config.max_depth))
            .hidden(false)
            .git_ignore(true)
            .overrides(overrides)
            .build()
        {
            let entry = match result {
                Ok(e) => e,
                Err(err) => {
                    warn!(error = %err, "Failed to read directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            if files_seen >= self.config.max_files {
                warn!(
                    files_seen,
                    max_files = self.config.max_files,
                    "Reached file limit, stopping scan"
                );
                break;
            }
            files_seen += 1;

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };

            if self.manifests.is_manifest(&relative) {
                manifest_files.push(relative.clone());
            }
            if is_python_source(&relative) {
                source_files.push(relative);
            }
        }

        let snapshot = RepositorySnapshot::new(self.root.clone(), source_files, manifest_files);
        info!(
            sources = snapshot.source_files().len(),
            manifests = snapshot.manifest_files().len(),
            files_seen,
            scan_time_ms = start.elapsed().as_millis() as u64,
            "Snapshot scan complete"
        );
        Ok(snapshot)
    }
}

fn is_python_source(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("py")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_path() {
        let result = SnapshotScanner::new(PathBuf::from("/nonexistent/repo/path"));
        assert!(matches!(result, Err(SnapshotError::PathNotFound(_))));
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            SnapshotScanner::new(file),
            Err(SnapshotError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_collects_sources_and_manifests() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main.py", "import numpy\n");
        write(temp.path(), "pkg/__init__.py", "");
        write(temp.path(), "pkg/model.py", "import torch\n");
        write(temp.path(), "requirements.txt", "numpy\n");
        write(temp.path(), "requirements/dev.txt", "pytest\n");
        write(temp.path(), ".python-version", "3.10\n");
        write(temp.path(), "README.md", "# demo\n");

        let snapshot = SnapshotScanner::new(temp.path().to_path_buf())
            .unwrap()
            .scan()
            .unwrap();

        assert_eq!(
            snapshot.source_files(),
            &[
                PathBuf::from("main.py"),
                PathBuf::from("pkg/__init__.py"),
                PathBuf::from("pkg/model.py"),
            ]
        );
        assert!(snapshot.has_manifest(Path::new("requirements.txt")));
        assert!(snapshot.has_manifest(Path::new("requirements/dev.txt")));
        assert!(snapshot.has_manifest(Path::new(".python-version")));
        assert!(!snapshot.has_manifest(Path::new("README.md")));
    }

    #[test]
    fn test_skips_virtualenvs_and_hidden_dirs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app.py", "");
        write(temp.path(), ".venv/lib/site.py", "");
        write(temp.path(), "venv/lib/other.py", "");
        write(temp.path(), "__pycache__/app.py", "");
        write(temp.path(), ".git/hooks/hook.py", "");

        let snapshot = SnapshotScanner::new(temp.path().to_path_buf())
            .unwrap()
            .scan()
            .unwrap();

        assert_eq!(snapshot.source_files(), &[PathBuf::from("app.py")]);
    }

    #[test]
    fn test_max_files_limit() {
        let temp = TempDir::new().unwrap();
        for i in 0..10 {
            write(temp.path(), &format!("m{}.py", i), "");
        }
        let snapshot = SnapshotScanner::new(temp.path().to_path_buf())
            .unwrap()
            .with_config(ScanConfig {
                max_depth: 4,
                max_files: 3,
            })
            .scan()
            .unwrap();
        assert_eq!(snapshot.source_files().len(), 3);
    }
}
