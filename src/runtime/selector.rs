//! Greedy newest-first runtime selection
//!
//! Candidates are tried from newest to oldest; the first one for which every
//! pinned requirement has a published release supporting it is chosen. There
//! is no backtracking into the requirement set.

use super::{RuntimeCatalog, RuntimeVersion};
use crate::index::ReleaseCatalog;
use crate::merge::RequirementSet;
use crate::requirement::{PackageName, SpecifierSet};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("No supported interpreter is available on this host")]
    NoInterpreters,

    #[error("Declared runtime range '{declared}' excludes every candidate ({catalog})")]
    DeclaredRangeExcludesCatalog {
        declared: SpecifierSet,
        catalog: String,
    },

    #[error("No candidate runtime supports every pinned requirement: {}", summarize(.rejected))]
    NoCompatibleCandidate { rejected: Vec<RejectedCandidate> },
}

fn summarize(rejected: &[RejectedCandidate]) -> String {
    rejected
        .iter()
        .map(|r| format!("{} blocked by {}", r.runtime, r.blocking.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedCandidate {
    pub runtime: RuntimeVersion,
    /// `name==version` of each pin without a compatible release.
    pub blocking: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeSelection {
    pub runtime: RuntimeVersion,
    pub rejected: Vec<RejectedCandidate>,
    /// Pins the index knew nothing about; assumed compatible.
    pub unchecked: Vec<PackageName>,
}

/// Picks the newest runtime in `catalog` compatible with `declared` and the pins.
///
/// Pure: the same inputs always yield the same selection.
pub fn select_runtime(
    requirements: &RequirementSet,
    catalog: &RuntimeCatalog,
    declared: Option<&SpecifierSet>,
    releases: &ReleaseCatalog,
) -> Result<RuntimeSelection, SelectionError> {
    if catalog.is_empty() {
        return Err(SelectionError::NoInterpreters);
    }

    let candidates = match declared {
        Some(range) => {
            let restricted = catalog.restricted_to(range);
            if restricted.is_empty() {
                return Err(SelectionError::DeclaredRangeExcludesCatalog {
                    declared: range.clone(),
                    catalog: catalog.to_string(),
                });
            }
            restricted
        }
        None => catalog.clone(),
    };

    let unchecked: Vec<PackageName> = requirements
        .pinned()
        .filter(|r| !releases.is_known(&r.name))
        .map(|r| r.name.clone())
        .collect();

    let mut rejected = Vec::new();
    for &runtime in candidates.versions() {
        let blocking = blocking_pins(requirements, releases, runtime);
        if blocking.is_empty() {
            info!(
                runtime = %runtime,
                rejected = rejected.len(),
                unchecked = unchecked.len(),
                "Selected runtime"
            );
            return Ok(RuntimeSelection {
                runtime,
                rejected,
                unchecked,
            });
        }
        debug!(runtime = %runtime, blocking = ?blocking, "Runtime candidate rejected");
        rejected.push(RejectedCandidate { runtime, blocking });
    }

    Err(SelectionError::NoCompatibleCandidate { rejected })
}

fn blocking_pins(
    requirements: &RequirementSet,
    releases: &ReleaseCatalog,
    runtime: RuntimeVersion,
) -> Vec<String> {
    requirements
        .pinned()
        .filter(|req| releases.is_known(&req.name))
        .filter_map(|req| {
            let pinned = req.constraint.as_ref()?.pinned_version()?;
            let compatible = releases
                .release(&req.name, pinned)
                .is_some_and(|release| release.supports(runtime));
            (!compatible).then(|| format!("{}=={}", req.name, pinned))
        })
        .collect()
}
