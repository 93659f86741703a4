//! Requirement model shared by the manifest reader, import scanner and merger
//!
//! A [`Requirement`] names one distributable package, optionally constrained
//! by a [`SpecifierSet`], and remembers where it was declared. Package names
//! are normalized on construction (lower-cased, runs of `-`, `_` and `.`
//! collapsed to `-`), so two spellings of the same package always compare
//! equal.

pub mod specifier;
pub mod version;

pub use specifier::{Operator, Restrictiveness, Specifier, SpecifierError, SpecifierSet};
pub use version::{Version, VersionParseError};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Normalized distributable package name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(raw: &str) -> Self {
        let mut normalized = String::with_capacity(raw.len());
        let mut pending_separator = false;
        for ch in raw.trim().chars() {
            if matches!(ch, '-' | '_' | '.') {
                pending_separator = true;
                continue;
            }
            if pending_separator && !normalized.is_empty() {
                normalized.push('-');
            }
            pending_separator = false;
            normalized.push(ch.to_ascii_lowercase());
        }
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageName {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Dependency declaration formats the manifest reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestFormat {
    PyProject,
    Pipfile,
    SetupPy,
    SetupCfg,
    RequirementsTxt,
}

impl ManifestFormat {
    pub fn priority(&self) -> SourcePriority {
        match self {
            ManifestFormat::PyProject | ManifestFormat::Pipfile => SourcePriority::ProjectMetadata,
            ManifestFormat::SetupPy | ManifestFormat::SetupCfg => SourcePriority::BuildScript,
            ManifestFormat::RequirementsTxt => SourcePriority::RequirementList,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ManifestFormat::PyProject => "pyproject.toml",
            ManifestFormat::Pipfile => "Pipfile",
            ManifestFormat::SetupPy => "setup.py",
            ManifestFormat::SetupCfg => "setup.cfg",
            ManifestFormat::RequirementsTxt => "requirements",
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed merge priority. Variants are declared lowest first so `Ord` follows rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePriority {
    Inferred,
    RequirementList,
    BuildScript,
    ProjectMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementSource {
    /// Declared in a manifest; `path` is relative to the repository root.
    Manifest { format: ManifestFormat, path: String },
    /// Derived from an import statement.
    Inferred,
}

impl RequirementSource {
    pub fn manifest(format: ManifestFormat, path: impl Into<String>) -> Self {
        RequirementSource::Manifest {
            format,
            path: path.into(),
        }
    }

    pub fn priority(&self) -> SourcePriority {
        match self {
            RequirementSource::Manifest { format, .. } => format.priority(),
            RequirementSource::Inferred => SourcePriority::Inferred,
        }
    }
}

impl fmt::Display for RequirementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementSource::Manifest { format, path } => write!(f, "{} ({})", path, format),
            RequirementSource::Inferred => f.write_str("inferred from imports"),
        }
    }
}

/// Install ordering class: pins go first, then ranges, then bare names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallClass {
    Pinned,
    Ranged,
    Unconstrained,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementParseError {
    #[error("Not a requirement: '{0}'")]
    Malformed(String),

    #[error("Direct URL or path references are not supported: '{0}'")]
    DirectReference(String),

    #[error("Invalid constraint in '{line}': {source}")]
    Constraint {
        line: String,
        #[source]
        source: SpecifierError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: PackageName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<SpecifierSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    pub source: RequirementSource,
}

fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<spec>.*)$",
        )
        .expect("requirement pattern is valid")
    })
}

impl Requirement {
    pub fn new(name: impl AsRef<str>, source: RequirementSource) -> Self {
        Self {
            name: PackageName::new(name.as_ref()),
            constraint: None,
            extras: Vec::new(),
            source,
        }
    }

    pub fn with_constraint(mut self, constraint: SpecifierSet) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Parses a PEP 508 style line such as `torch[cuda]>=2.0,<3 ; python_version>"3.8"`.
    ///
    /// Environment markers are dropped. Direct references (`pkg @ url`) are
    /// rejected since they cannot be merged by version.
    pub fn parse(line: &str, source: RequirementSource) -> Result<Self, RequirementParseError> {
        let without_marker = line.split(';').next().unwrap_or_default().trim();
        if without_marker.is_empty() {
            return Err(RequirementParseError::Malformed(line.to_string()));
        }
        if without_marker.contains(" @ ") || without_marker.contains("://") {
            return Err(RequirementParseError::DirectReference(line.to_string()));
        }

        let caps = requirement_regex()
            .captures(without_marker)
            .ok_or_else(|| RequirementParseError::Malformed(line.to_string()))?;

        let extras = caps
            .name("extras")
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|e| e.trim().to_ascii_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let spec_text = caps
            .name("spec")
            .map(|m| m.as_str().trim())
            .unwrap_or_default()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim();

        let constraint = if spec_text.is_empty() {
            None
        } else {
            Some(
                spec_text
                    .parse::<SpecifierSet>()
                    .map_err(|source| RequirementParseError::Constraint {
                        line: line.to_string(),
                        source,
                    })?,
            )
        };

        Ok(Self {
            name: PackageName::new(&caps["name"]),
            constraint,
            extras,
            source,
        })
    }

    pub fn is_pinned(&self) -> bool {
        self.constraint.as_ref().is_some_and(|c| c.is_pinned())
    }

    pub fn install_class(&self) -> InstallClass {
        match &self.constraint {
            Some(c) if c.is_pinned() => InstallClass::Pinned,
            Some(_) => InstallClass::Ranged,
            None => InstallClass::Unconstrained,
        }
    }

    pub fn priority(&self) -> SourcePriority {
        self.source.priority()
    }

    /// Argument form accepted by pip, e.g. `torch[cuda]>=2.0`.
    pub fn install_spec(&self) -> String {
        let mut spec = self.name.to_string();
        if !self.extras.is_empty() {
            spec.push('[');
            spec.push_str(&self.extras.join(","));
            spec.push(']');
        }
        if let Some(constraint) = &self.constraint {
            spec.push_str(&constraint.to_string());
        }
        spec
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.install_spec())
    }
}
