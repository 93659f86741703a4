//! Requirement merging
//!
//! Groups every declared and inferred requirement by normalized name and keeps
//! exactly one constraint per name. The highest-priority source wins; between
//! sources of equal priority the more restrictive constraint wins. Whenever
//! manifests disagree the disagreement is kept as a [`Conflict`] so the run
//! report can show which declaration survived and why.
//!
//! Merging is pure: the output depends only on the multiset of input
//! requirements, never on the order they arrive in.

use crate::requirement::{
    InstallClass, PackageName, Requirement, RequirementSource, SourcePriority, SpecifierSet,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<SpecifierSet>,
    pub source: RequirementSource,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "'{}' from {}", c, self.source),
            None => write!(f, "unconstrained from {}", self.source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The winner came from a strictly higher-priority source.
    HigherPriority,
    /// Sources of equal priority disagreed; the narrower constraint won.
    MoreRestrictive,
    /// Higher-ranked declarations had contradictory bounds and were passed over.
    Unsatisfiable,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictReason::HigherPriority => "higher priority source",
            ConflictReason::MoreRestrictive => "more restrictive constraint at equal priority",
            ConflictReason::Unsatisfiable => "competing constraint is unsatisfiable",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub name: PackageName,
    /// Every distinct manifest declaration, best ranked first.
    pub competing: Vec<Candidate>,
    pub winner: Candidate,
    pub reason: ConflictReason,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let losers: Vec<String> = self
            .competing
            .iter()
            .filter(|c| **c != self.winner)
            .map(|c| c.to_string())
            .collect();
        write!(
            f,
            "{}: {} won over {} ({})",
            self.name,
            self.winner,
            losers.join(", "),
            self.reason
        )
    }
}

/// One merged requirement per package name plus the conflicts found on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequirementSet {
    entries: BTreeMap<PackageName, Requirement>,
    conflicts: Vec<Conflict>,
}

impl RequirementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &PackageName) -> Option<&Requirement> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requirements in name order.
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.values()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn pinned(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.values().filter(|r| r.is_pinned())
    }

    /// Pins first, then ranges, then bare names; name order within each class.
    pub fn install_order(&self) -> Vec<&Requirement> {
        let mut ordered: Vec<&Requirement> = self.entries.values().collect();
        ordered.sort_by(|a, b| {
            a.install_class()
                .cmp(&b.install_class())
                .then_with(|| a.name.cmp(&b.name))
        });
        ordered
    }

    pub fn count_by_class(&self, class: InstallClass) -> usize {
        self.entries
            .values()
            .filter(|r| r.install_class() == class)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementMerger;

impl RequirementMerger {
    pub fn new() -> Self {
        Self
    }

    pub fn merge<'a, I>(&self, requirements: I) -> RequirementSet
    where
        I: IntoIterator<Item = &'a Requirement>,
    {
        let mut groups: BTreeMap<PackageName, Vec<&Requirement>> = BTreeMap::new();
        for req in requirements {
            groups.entry(req.name.clone()).or_default().push(req);
        }

        let mut set = RequirementSet::new();
        for (name, mut group) in groups {
            let mut extras: Vec<String> =
                group.iter().flat_map(|r| r.extras.iter().cloned()).collect();
            extras.sort();
            extras.dedup();

            group.sort_by(|a, b| rank(a, b));
            group.dedup_by(|a, b| a.source == b.source && a.constraint == b.constraint);

            let (mut merged, conflict) = resolve_group(&name, &group);
            merged.extras = extras;
            if let Some(conflict) = conflict {
                debug!(package = %name, reason = %conflict.reason, "Recorded requirement conflict");
                set.conflicts.push(conflict);
            }
            set.entries.insert(name, merged);
        }

        info!(
            requirements = set.len(),
            conflicts = set.conflicts.len(),
            "Requirement merge complete"
        );
        set
    }
}

/// Best candidate first: priority, then restrictiveness, then source.
fn rank(a: &Requirement, b: &Requirement) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| compare_constraints(&b.constraint, &a.constraint))
        .then_with(|| a.source.cmp(&b.source))
}

fn compare_constraints(a: &Option<SpecifierSet>, b: &Option<SpecifierSet>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp_restrictiveness(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn is_usable(req: &Requirement) -> bool {
    req.constraint.as_ref().map_or(true, |c| c.is_satisfiable())
}

fn resolve_group(name: &PackageName, group: &[&Requirement]) -> (Requirement, Option<Conflict>) {
    let top = group[0];
    let winner_idx = group.iter().position(|r| is_usable(r));

    let merged = match winner_idx {
        Some(idx) => group[idx].clone(),
        // Nothing satisfiable: keep the best-ranked declaration without its bounds.
        None => Requirement {
            constraint: None,
            ..top.clone()
        },
    };

    let manifest: Vec<&Requirement> = group
        .iter()
        .copied()
        .filter(|r| r.priority() > SourcePriority::Inferred)
        .collect();
    let mut distinct: Vec<Option<String>> = manifest
        .iter()
        .map(|r| r.constraint.as_ref().map(|c| c.to_string()))
        .collect();
    distinct.sort();
    distinct.dedup();

    let skipped_unsatisfiable = winner_idx != Some(0);
    if distinct.len() < 2 && !skipped_unsatisfiable {
        return (merged, None);
    }

    let reason = if skipped_unsatisfiable {
        ConflictReason::Unsatisfiable
    } else if manifest
        .iter()
        .skip(1)
        .any(|r| r.priority() == top.priority() && r.constraint != top.constraint)
    {
        ConflictReason::MoreRestrictive
    } else {
        ConflictReason::HigherPriority
    };

    let conflict = Conflict {
        name: name.clone(),
        competing: manifest
            .iter()
            .map(|r| Candidate {
                constraint: r.constraint.clone(),
                source: r.source.clone(),
            })
            .collect(),
        winner: Candidate {
            constraint: merged.constraint.clone(),
            source: merged.source.clone(),
        },
        reason,
    };
    (merged, Some(conflict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::ManifestFormat;

    fn req(line: &str, format: ManifestFormat, path: &str) -> Requirement {
        Requirement::parse(line, RequirementSource::manifest(format, path)).unwrap()
    }

    fn pyproject(line: &str) -> Requirement {
        req(line, ManifestFormat::PyProject, "pyproject.toml")
    }

    fn requirements_txt(line: &str) -> Requirement {
        req(line, ManifestFormat::RequirementsTxt, "requirements.txt")
    }

    fn inferred(name: &str) -> Requirement {
        Requirement::new(name, RequirementSource::Inferred)
    }

    #[test]
    fn test_higher_priority_wins_with_conflict() {
        let inputs = vec![requirements_txt("X==1.0"), pyproject("X==2.0")];
        let set = RequirementMerger.merge(&inputs);

        let merged = set.get(&PackageName::new("x")).unwrap();
        assert_eq!(merged.constraint.as_ref().unwrap().to_string(), "==2.0");
        assert_eq!(set.conflicts().len(), 1);

        let conflict = &set.conflicts()[0];
        assert_eq!(conflict.reason, ConflictReason::HigherPriority);
        assert_eq!(conflict.competing.len(), 2);
        assert_eq!(
            conflict.winner.source,
            RequirementSource::manifest(ManifestFormat::PyProject, "pyproject.toml")
        );
        let text = conflict.to_string();
        assert!(text.contains("pyproject.toml"));
        assert!(text.contains("requirements.txt"));
    }

    #[test]
    fn test_equal_priority_more_restrictive_wins() {
        let inputs = vec![
            req("torch>=1.10", ManifestFormat::RequirementsTxt, "requirements.txt"),
            req("torch==2.0.1", ManifestFormat::RequirementsTxt, "requirements-dev.txt"),
        ];
        let set = RequirementMerger.merge(&inputs);
        let merged = set.get(&PackageName::new("torch")).unwrap();
        assert_eq!(merged.constraint.as_ref().unwrap().to_string(), "==2.0.1");
        assert_eq!(set.conflicts()[0].reason, ConflictReason::MoreRestrictive);
    }

    #[test]
    fn test_inferred_never_conflicts() {
        let inputs = vec![inferred("numpy"), requirements_txt("numpy>=1.20")];
        let set = RequirementMerger.merge(&inputs);
        assert!(set.conflicts().is_empty());
        assert_eq!(
            set.get(&PackageName::new("numpy"))
                .unwrap()
                .constraint
                .as_ref()
                .unwrap()
                .to_string(),
            ">=1.20"
        );
    }

    #[test]
    fn test_identical_declarations_do_not_conflict() {
        let inputs = vec![
            req("flask==2.3", ManifestFormat::RequirementsTxt, "requirements.txt"),
            req("Flask==2.3", ManifestFormat::RequirementsTxt, "requirements-base.txt"),
        ];
        let set = RequirementMerger.merge(&inputs);
        assert_eq!(set.len(), 1);
        assert!(set.conflicts().is_empty());
    }

    #[test]
    fn test_unsatisfiable_winner_is_passed_over() {
        let inputs = vec![pyproject("scipy>=2,<1"), requirements_txt("scipy>=1.10")];
        let set = RequirementMerger.merge(&inputs);
        let merged = set.get(&PackageName::new("scipy")).unwrap();
        assert_eq!(merged.constraint.as_ref().unwrap().to_string(), ">=1.10");
        assert_eq!(set.conflicts()[0].reason, ConflictReason::Unsatisfiable);
    }

    #[test]
    fn test_only_unsatisfiable_drops_bounds_but_records() {
        let inputs = vec![pyproject("scipy>=2,<1")];
        let set = RequirementMerger.merge(&inputs);
        assert!(set.get(&PackageName::new("scipy")).unwrap().constraint.is_none());
        assert_eq!(set.conflicts().len(), 1);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = vec![
            requirements_txt("X==1.0"),
            pyproject("X==2.0"),
            inferred("tqdm"),
            req("tqdm>=4", ManifestFormat::SetupPy, "setup.py"),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(RequirementMerger.merge(&a), RequirementMerger.merge(&b));
    }

    #[test]
    fn test_extras_are_unioned() {
        let inputs = vec![pyproject("ray[tune]==2.9"), requirements_txt("ray[serve]")];
        let set = RequirementMerger.merge(&inputs);
        assert_eq!(
            set.get(&PackageName::new("ray")).unwrap().extras,
            vec!["serve", "tune"]
        );
    }

    #[test]
    fn test_install_order() {
        let inputs = vec![
            requirements_txt("zlib-ng"),
            requirements_txt("pandas>=2"),
            requirements_txt("torch==2.0"),
            requirements_txt("attrs"),
        ];
        let set = RequirementMerger.merge(&inputs);
        let order: Vec<&str> = set.install_order().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["torch", "pandas", "attrs", "zlib-ng"]);
        assert_eq!(set.count_by_class(InstallClass::Unconstrained), 2);
    }
}
