//! Immutable view of a cloned repository

mod scanner;

pub use scanner::{ScanConfig, SnapshotError, SnapshotScanner};

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Root path plus the Python sources and manifests found beneath it.
///
/// All paths other than `root` are relative to `root`. Source files are kept
/// sorted so every consumer walks them in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositorySnapshot {
    root: PathBuf,
    source_files: Vec<PathBuf>,
    manifest_files: BTreeSet<PathBuf>,
}

impl RepositorySnapshot {
    pub fn new(
        root: PathBuf,
        source_files: impl IntoIterator<Item = PathBuf>,
        manifest_files: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        let mut source_files: Vec<PathBuf> = source_files.into_iter().collect();
        source_files.sort();
        source_files.dedup();
        Self {
            root,
            source_files,
            manifest_files: manifest_files.into_iter().collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_files(&self) -> &[PathBuf] {
        &self.source_files
    }

    pub fn manifest_files(&self) -> &BTreeSet<PathBuf> {
        &self.manifest_files
    }

    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn has_source(&self, relative: &Path) -> bool {
        self.source_files.binary_search(&relative.to_path_buf()).is_ok()
    }

    pub fn has_manifest(&self, relative: &Path) -> bool {
        self.manifest_files.contains(relative)
    }

    pub fn read_to_string(&self, relative: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(self.absolute(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_sorted_and_deduplicated() {
        let snapshot = RepositorySnapshot::new(
            PathBuf::from("/repo"),
            vec![
                PathBuf::from("b.py"),
                PathBuf::from("a.py"),
                PathBuf::from("b.py"),
            ],
            vec![PathBuf::from("requirements.txt")],
        );
        assert_eq!(
            snapshot.source_files(),
            &[PathBuf::from("a.py"), PathBuf::from("b.py")]
        );
        assert!(snapshot.has_source(Path::new("a.py")));
        assert!(!snapshot.has_source(Path::new("c.py")));
        assert!(snapshot.has_manifest(Path::new("requirements.txt")));
        assert_eq!(snapshot.absolute(Path::new("a.py")), PathBuf::from("/repo/a.py"));
    }
}
