//! Import-based requirement inference
//!
//! Used when manifests are missing or incomplete. Every source file in the
//! snapshot is read, its absolute imports are collected, and each top-level
//! module is mapped through the [`AliasTable`]. Standard-library modules and
//! modules that live inside the repository itself are dropped. Inferred
//! requirements never carry a version constraint.

mod aliases;
mod entrypoint;
pub mod scanner;
pub mod stdlib;

pub use aliases::{AliasEntry, AliasTable};
pub use entrypoint::detect_entry_point;

use crate::requirement::{PackageName, Requirement, RequirementSource};
use crate::snapshot::RepositorySnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// A module whose distribution had to be picked from several candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousImport {
    pub module: String,
    pub chosen: PackageName,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportScan {
    pub requirements: Vec<Requirement>,
    pub ambiguities: Vec<AmbiguousImport>,
    /// Source files that could not be read.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ImportScanner {
    aliases: AliasTable,
}

impl ImportScanner {
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    pub fn with_defaults() -> Self {
        Self::new(AliasTable::with_defaults())
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn scan(&self, snapshot: &RepositorySnapshot) -> ImportScan {
        let mut scan = ImportScan::default();
        let mut modules = BTreeSet::new();

        for relative in snapshot.source_files() {
            match snapshot.read_to_string(relative) {
                Ok(source) => modules.extend(scanner::imported_modules(&source)),
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "Skipping unreadable source file");
                    scan.notes
                        .push(format!("{}: unreadable ({})", relative.display(), e));
                }
            }
        }

        let local = local_modules(snapshot);
        let mut packages: BTreeMap<PackageName, Requirement> = BTreeMap::new();

        for module in &modules {
            if stdlib::is_stdlib(module) || local.contains(module.as_str()) {
                continue;
            }
            let package = self.aliases.package_for(module);
            if let Some(AliasEntry::Ambiguous { candidates, .. }) = self.aliases.lookup(module) {
                debug!(module = %module, chosen = %package, "Ambiguous import resolved to default");
                scan.ambiguities.push(AmbiguousImport {
                    module: module.clone(),
                    chosen: package.clone(),
                    candidates: candidates.clone(),
                });
            }
            packages
                .entry(package.clone())
                .or_insert_with(|| Requirement::new(package.as_str(), RequirementSource::Inferred));
        }

        scan.requirements = packages.into_values().collect();
        info!(
            files = snapshot.source_files().len(),
            modules = modules.len(),
            inferred = scan.requirements.len(),
            ambiguous = scan.ambiguities.len(),
            "Import scan complete"
        );
        scan
    }

    /// Third-party packages imported by a single file, after alias mapping.
    pub fn imports_of(&self, snapshot: &RepositorySnapshot, relative: &Path) -> BTreeSet<PackageName> {
        let source = match snapshot.read_to_string(relative) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "Entry point unreadable");
                return BTreeSet::new();
            }
        };
        let local = local_modules(snapshot);
        scanner::imported_modules(&source)
            .into_iter()
            .filter(|m| !stdlib::is_stdlib(m) && !local.contains(m.as_str()))
            .map(|m| self.aliases.package_for(&m))
            .collect()
    }
}

impl Default for ImportScanner {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Module names that resolve to code inside the repository.
fn local_modules(snapshot: &RepositorySnapshot) -> BTreeSet<String> {
    let mut local = BTreeSet::new();
    for path in snapshot.source_files() {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if file_name == "__init__.py" {
            if let Some(dir) = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
                local.insert(dir.to_string());
            }
        } else if let Some(stem) = file_name.strip_suffix(".py") {
            local.insert(stem.to_string());
        }

        let components: Vec<&str> = path
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        if components.len() >= 2 {
            local.insert(components[0].to_string());
        }
        if components.len() >= 3 && components[0] == "src" {
            local.insert(components[1].to_string());
        }
    }
    local
}
