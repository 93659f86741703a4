use crate::imports::{detect_entry_point, AmbiguousImport, ImportScanner};
use crate::manifest::{DeclaredRuntime, ManifestParseWarning, ManifestReader};
use crate::merge::{RequirementMerger, RequirementSet};
use crate::requirement::PackageName;
use crate::snapshot::RepositorySnapshot;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

/// Everything known about a repository's needs before touching the network.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub requirements: RequirementSet,
    pub declared_runtime: Option<DeclaredRuntime>,
    pub manifest_warnings: Vec<ManifestParseWarning>,
    pub ambiguities: Vec<AmbiguousImport>,
    pub scan_notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<PathBuf>,
    /// Packages the entry point imports; failing to install one aborts the run.
    pub required: BTreeSet<PackageName>,
}

impl Resolution {
    /// Human-readable warnings from manifest parsing and import scanning.
    pub fn warnings(&self) -> Vec<String> {
        self.manifest_warnings
            .iter()
            .map(|w| format!("{}: {}", w.path, w.message))
            .chain(self.scan_notes.iter().cloned())
            .collect()
    }
}

/// Manifest reader, then import scanner, then merger.
///
/// Deterministic for a fixed snapshot.
pub fn resolve_requirements(
    snapshot: &RepositorySnapshot,
    manifests: &ManifestReader,
    imports: &ImportScanner,
) -> Resolution {
    let readout = manifests.read(snapshot);
    let scan = imports.scan(snapshot);

    let requirements =
        RequirementMerger::new().merge(readout.requirements().chain(scan.requirements.iter()));

    let entry_point = detect_entry_point(snapshot, &readout.script_modules);
    let required: BTreeSet<PackageName> = entry_point
        .as_deref()
        .map(|entry| imports.imports_of(snapshot, entry))
        .unwrap_or_default()
        .into_iter()
        .filter(|name| requirements.contains(name))
        .collect();

    info!(
        declared = readout.requirement_count(),
        inferred = scan.requirements.len(),
        merged = requirements.len(),
        conflicts = requirements.conflicts().len(),
        required = required.len(),
        "Requirements resolved"
    );

    Resolution {
        requirements,
        declared_runtime: readout.declared_runtime,
        manifest_warnings: readout.warnings,
        ambiguities: scan.ambiguities,
        scan_notes: scan.notes,
        entry_point,
        required,
    }
}
