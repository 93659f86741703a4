//! Dependency manifest parsing
//!
//! Each supported format implements [`ManifestParser`]; the [`ManifestReader`]
//! holds the registered parsers and turns a [`RepositorySnapshot`] into one
//! requirement list per manifest file found. A manifest that cannot be parsed
//! never aborts the run: it becomes a [`ManifestParseWarning`] and contributes
//! no requirements.

mod pipfile;
mod pyproject;
mod requirements;
mod runtime_hint;
mod setup;

pub use pipfile::PipfileParser;
pub use pyproject::{poetry_constraint, PyProjectParser};
pub use requirements::RequirementsParser;
pub use setup::{SetupCfgParser, SetupPyParser};

use crate::requirement::{ManifestFormat, Requirement, SourcePriority, SpecifierSet};
use crate::snapshot::RepositorySnapshot;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// A manifest file name this parser claims, and where it may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestPattern {
    pub filename: &'static str,
    /// Directory relative to the repository root; empty for the root itself.
    pub directory: &'static str,
}

impl ManifestPattern {
    pub const fn root(filename: &'static str) -> Self {
        Self {
            filename,
            directory: "",
        }
    }

    pub fn matches(&self, relative: &Path) -> bool {
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));
        if parent != Path::new(self.directory) {
            return false;
        }
        let Some(name) = relative.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        match self.filename.strip_prefix("*") {
            Some(suffix) => name.ends_with(suffix),
            None => name == self.filename,
        }
    }
}

/// Borrowed view of one manifest handed to a parser.
pub struct ManifestFile<'a> {
    pub root: &'a Path,
    pub relative: &'a Path,
    pub content: &'a str,
}

impl ManifestFile<'_> {
    pub fn display_path(&self) -> String {
        self.relative.to_string_lossy().replace('\\', "/")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    pub requirements: Vec<Requirement>,
    pub python_requires: Option<SpecifierSet>,
    /// Entries skipped inside an otherwise valid manifest.
    pub notes: Vec<String>,
    /// Dotted module paths named as console-script targets.
    pub script_modules: Vec<String>,
}

pub trait ManifestParser: Send + Sync {
    fn format(&self) -> ManifestFormat;

    fn manifest_patterns(&self) -> &[ManifestPattern];

    fn matches(&self, relative: &Path) -> bool {
        self.manifest_patterns().iter().any(|p| p.matches(relative))
    }

    fn parse(&self, manifest: &ManifestFile<'_>) -> Result<ParsedManifest, ManifestError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestParseWarning {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ManifestFormat>,
    pub message: String,
}

/// Requirements declared by a single manifest file.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestRequirements {
    pub path: String,
    pub format: ManifestFormat,
    pub priority: SourcePriority,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredRuntime {
    pub constraint: SpecifierSet,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManifestReadout {
    pub lists: Vec<ManifestRequirements>,
    pub warnings: Vec<ManifestParseWarning>,
    pub declared_runtime: Option<DeclaredRuntime>,
    pub script_modules: Vec<String>,
}

impl ManifestReadout {
    pub fn requirement_count(&self) -> usize {
        self.lists.iter().map(|l| l.requirements.len()).sum()
    }

    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.lists.iter().flat_map(|l| l.requirements.iter())
    }
}

/// Registry of manifest parsers.
#[derive(Clone)]
pub struct ManifestReader {
    parsers: Vec<Arc<dyn ManifestParser>>,
}

impl ManifestReader {
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut reader = Self::new();
        reader.register(Arc::new(PyProjectParser));
        reader.register(Arc::new(PipfileParser));
        reader.register(Arc::new(SetupPyParser));
        reader.register(Arc::new(SetupCfgParser));
        reader.register(Arc::new(RequirementsParser));
        reader
    }

    pub fn register(&mut self, parser: Arc<dyn ManifestParser>) {
        self.parsers.push(parser);
    }

    fn parser_for(&self, relative: &Path) -> Option<&dyn ManifestParser> {
        self.parsers
            .iter()
            .find(|p| p.matches(relative))
            .map(|p| p.as_ref())
    }

    /// True for dependency manifests and runtime hint files.
    pub fn is_manifest(&self, relative: &Path) -> bool {
        self.parser_for(relative).is_some() || runtime_hint::is_hint_file(relative)
    }

    pub fn read(&self, snapshot: &RepositorySnapshot) -> ManifestReadout {
        let mut readout = ManifestReadout::default();
        let mut runtime_candidates: Vec<(u8, String, SpecifierSet)> = Vec::new();

        for relative in snapshot.manifest_files() {
            let path = relative.to_string_lossy().replace('\\', "/");

            let content = match snapshot.read_to_string(relative) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to read manifest");
                    readout.warnings.push(ManifestParseWarning {
                        path,
                        format: self.parser_for(relative).map(|p| p.format()),
                        message: format!("unreadable: {}", e),
                    });
                    continue;
                }
            };

            if runtime_hint::is_hint_file(relative) {
                match runtime_hint::parse(&content) {
                    Some(constraint) => {
                        runtime_candidates.push((runtime_hint::RANK, path, constraint))
                    }
                    None => readout.warnings.push(ManifestParseWarning {
                        path,
                        format: None,
                        message: format!("unrecognised runtime version '{}'", content.trim()),
                    }),
                }
                continue;
            }

            let Some(parser) = self.parser_for(relative) else {
                continue;
            };
            let format = parser.format();
            let manifest = ManifestFile {
                root: snapshot.root(),
                relative,
                content: &content,
            };

            match parser.parse(&manifest) {
                Ok(parsed) => {
                    debug!(
                        path = %path,
                        format = %format,
                        requirements = parsed.requirements.len(),
                        "Parsed manifest"
                    );
                    for note in parsed.notes {
                        readout.warnings.push(ManifestParseWarning {
                            path: path.clone(),
                            format: Some(format),
                            message: note,
                        });
                    }
                    if let Some(constraint) = parsed.python_requires {
                        runtime_candidates.push((runtime_rank(format), path.clone(), constraint));
                    }
                    readout.script_modules.extend(parsed.script_modules);
                    readout.lists.push(ManifestRequirements {
                        path,
                        format,
                        priority: format.priority(),
                        requirements: parsed.requirements,
                    });
                }
                Err(e) => {
                    warn!(path = %path, format = %format, error = %e, "Manifest could not be parsed");
                    readout.warnings.push(ManifestParseWarning {
                        path,
                        format: Some(format),
                        message: e.to_string(),
                    });
                }
            }
        }

        runtime_candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        readout.declared_runtime = runtime_candidates
            .into_iter()
            .next()
            .map(|(_, source, constraint)| DeclaredRuntime { constraint, source });

        info!(
            manifests = readout.lists.len(),
            requirements = readout.requirement_count(),
            warnings = readout.warnings.len(),
            declared_runtime = ?readout.declared_runtime.as_ref().map(|d| d.constraint.to_string()),
            "Manifest reading complete"
        );
        readout
    }
}

impl Default for ManifestReader {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Lower wins when several manifests declare a runtime range.
fn runtime_rank(format: ManifestFormat) -> u8 {
    match format {
        ManifestFormat::PyProject => 0,
        ManifestFormat::Pipfile => 1,
        ManifestFormat::SetupPy => 2,
        ManifestFormat::SetupCfg => 3,
        ManifestFormat::RequirementsTxt => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn snapshot_with(files: &[(&str, &str)]) -> (TempDir, RepositorySnapshot) {
        let temp = TempDir::new().unwrap();
        let reader = ManifestReader::with_defaults();
        let mut manifests = Vec::new();
        for (rel, content) in files {
            let path = temp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            if reader.is_manifest(Path::new(rel)) {
                manifests.push(PathBuf::from(rel));
            }
        }
        let snapshot = RepositorySnapshot::new(temp.path().to_path_buf(), Vec::new(), manifests);
        (temp, snapshot)
    }

    #[test]
    fn test_pattern_matching() {
        let reader = ManifestReader::with_defaults();
        assert!(reader.is_manifest(Path::new("pyproject.toml")));
        assert!(reader.is_manifest(Path::new("Pipfile")));
        assert!(reader.is_manifest(Path::new("setup.py")));
        assert!(reader.is_manifest(Path::new("setup.cfg")));
        assert!(reader.is_manifest(Path::new("requirements.txt")));
        assert!(reader.is_manifest(Path::new("requirements-dev.txt")));
        assert!(reader.is_manifest(Path::new("requirements/base.txt")));
        assert!(reader.is_manifest(Path::new("runtime.txt")));
        assert!(!reader.is_manifest(Path::new("docs/requirements.txt")));
        assert!(!reader.is_manifest(Path::new("sub/pyproject.toml")));
        assert!(!reader.is_manifest(Path::new("README.md")));
    }

    #[test]
    fn test_each_parser_declares_patterns() {
        let parsers: Vec<Box<dyn ManifestParser>> = vec![
            Box::new(PipfileParser),
            Box::new(PyProjectParser),
            Box::new(RequirementsParser),
            Box::new(SetupPyParser),
            Box::new(SetupCfgParser),
        ];
        for parser in &parsers {
            assert!(!parser.manifest_patterns().is_empty(), "{} has no patterns", parser.format());
        }
        assert_eq!(RequirementsParser.manifest_patterns().len(), 5);
        assert!(RequirementsParser.matches(Path::new("requirements/gpu.txt")));
        assert!(!SetupCfgParser.matches(Path::new("setup.py")));
    }

    #[test]
    fn test_reads_each_format_with_priority() {
        let (_temp, snapshot) = snapshot_with(&[
            (
                "pyproject.toml",
                "[project]\nname = \"demo\"\ndependencies = [\"numpy==2.0\"]\n",
            ),
            ("requirements.txt", "numpy==1.0\nscipy\n"),
        ]);

        let readout = ManifestReader::with_defaults().read(&snapshot);
        assert_eq!(readout.lists.len(), 2);
        assert!(readout.warnings.is_empty());

        let pyproject = readout
            .lists
            .iter()
            .find(|l| l.format == ManifestFormat::PyProject)
            .unwrap();
        assert_eq!(pyproject.priority, SourcePriority::ProjectMetadata);
        assert_eq!(pyproject.requirements.len(), 1);

        let reqs = readout
            .lists
            .iter()
            .find(|l| l.format == ManifestFormat::RequirementsTxt)
            .unwrap();
        assert_eq!(reqs.priority, SourcePriority::RequirementList);
        assert_eq!(reqs.requirements.len(), 2);
    }

    #[test]
    fn test_malformed_manifest_becomes_warning() {
        let (_temp, snapshot) = snapshot_with(&[
            ("pyproject.toml", "[project\ndependencies = ["),
            ("requirements.txt", "requests\n"),
        ]);

        let readout = ManifestReader::with_defaults().read(&snapshot);
        assert_eq!(readout.lists.len(), 1);
        assert_eq!(readout.warnings.len(), 1);
        assert_eq!(readout.warnings[0].path, "pyproject.toml");
        assert_eq!(readout.warnings[0].format, Some(ManifestFormat::PyProject));
    }

    #[test]
    fn test_declared_runtime_prefers_pyproject() {
        let (_temp, snapshot) = snapshot_with(&[
            (
                "pyproject.toml",
                "[project]\nname = \"demo\"\nrequires-python = \">=3.9\"\n",
            ),
            (".python-version", "3.11.4\n"),
        ]);

        let readout = ManifestReader::with_defaults().read(&snapshot);
        let declared = readout.declared_runtime.unwrap();
        assert_eq!(declared.constraint.to_string(), ">=3.9");
        assert_eq!(declared.source, "pyproject.toml");
    }

    #[test]
    fn test_declared_runtime_from_hint_file() {
        let (_temp, snapshot) = snapshot_with(&[("runtime.txt", "python-3.8.10\n")]);
        let readout = ManifestReader::with_defaults().read(&snapshot);
        assert_eq!(
            readout.declared_runtime.unwrap().constraint.to_string(),
            "==3.8.*"
        );
    }

    #[test]
    fn test_no_manifests() {
        let (_temp, snapshot) = snapshot_with(&[("main.py", "import os\n")]);
        let readout = ManifestReader::with_defaults().read(&snapshot);
        assert!(readout.lists.is_empty());
        assert!(readout.declared_runtime.is_none());
        assert_eq!(readout.requirement_count(), 0);
    }
}
