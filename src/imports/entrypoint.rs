use crate::snapshot::RepositorySnapshot;
use std::path::{Path, PathBuf};

/// Conventional script names, checked at the repository root in this order.
const ENTRY_SCRIPTS: &[&str] = &[
    "main.py",
    "app.py",
    "run.py",
    "demo.py",
    "train.py",
    "__main__.py",
];

/// Finds the file a user would most likely run first.
///
/// Console-script targets declared in the project metadata win; otherwise the
/// first conventional script present at the root, then the first
/// `<package>/__main__.py`.
pub fn detect_entry_point(snapshot: &RepositorySnapshot, script_modules: &[String]) -> Option<PathBuf> {
    for module in script_modules {
        if let Some(path) = module_file(snapshot, module) {
            return Some(path);
        }
    }

    for name in ENTRY_SCRIPTS {
        if snapshot.has_source(Path::new(name)) {
            return Some(PathBuf::from(name));
        }
    }

    snapshot
        .source_files()
        .iter()
        .find(|p| {
            p.components().count() == 2
                && p.file_name().and_then(|n| n.to_str()) == Some("__main__.py")
        })
        .cloned()
}

/// Resolves a dotted module path against the root and `src/` layouts.
fn module_file(snapshot: &RepositorySnapshot, module: &str) -> Option<PathBuf> {
    let relative: PathBuf = module.split('.').collect();
    for base in [PathBuf::new(), PathBuf::from("src")] {
        let as_file = base.join(&relative).with_extension("py");
        if snapshot.has_source(&as_file) {
            return Some(as_file);
        }
        let as_package = base.join(&relative).join("__init__.py");
        if snapshot.has_source(&as_package) {
            return Some(as_package);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(files: &[&str]) -> RepositorySnapshot {
        RepositorySnapshot::new(
            PathBuf::from("/repo"),
            files.iter().map(PathBuf::from),
            Vec::<PathBuf>::new(),
        )
    }

    #[test]
    fn test_script_module_wins() {
        let snap = snapshot(&["main.py", "src/tool/cli.py"]);
        assert_eq!(
            detect_entry_point(&snap, &["tool.cli".to_string()]),
            Some(PathBuf::from("src/tool/cli.py"))
        );
    }

    #[test]
    fn test_conventional_order() {
        let snap = snapshot(&["train.py", "demo.py", "utils.py"]);
        assert_eq!(detect_entry_point(&snap, &[]), Some(PathBuf::from("demo.py")));
    }

    #[test]
    fn test_package_main() {
        let snap = snapshot(&["pkg/__init__.py", "pkg/__main__.py", "pkg/sub/__main__.py"]);
        assert_eq!(
            detect_entry_point(&snap, &[]),
            Some(PathBuf::from("pkg/__main__.py"))
        );
    }

    #[test]
    fn test_no_entry_point() {
        let snap = snapshot(&["lib/helpers.py"]);
        assert_eq!(detect_entry_point(&snap, &["missing.module".to_string()]), None);
    }
}
