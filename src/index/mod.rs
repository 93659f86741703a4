//! Package index access for the runtime compatibility check
//!
//! The runtime selector has to know, for each pinned requirement, which
//! interpreter versions the pinned release supports. That data comes from a
//! [`PackageIndex`]. Lookups happen once, up front, into a [`ReleaseCatalog`]
//! so that selection itself stays a pure function.

mod pypi;

pub use pypi::{PyPiIndex, DEFAULT_INDEX_URL};

use crate::requirement::{PackageName, SpecifierSet, Version};
use crate::runtime::RuntimeVersion;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Package '{0}' is not published on the index")]
    NotFound(String),

    #[error("Index request failed: {message}")]
    Network { message: String },

    #[error("Index request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected index response: {message}")]
    InvalidResponse { message: String },
}

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Release {
    pub version: Version,
    /// Interpreter range declared by the release files; `None` means any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<SpecifierSet>,
    pub yanked: bool,
}

impl Release {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            requires_python: None,
            yanked: false,
        }
    }

    pub fn with_requires_python(mut self, range: SpecifierSet) -> Self {
        self.requires_python = Some(range);
        self
    }

    pub fn supports(&self, runtime: RuntimeVersion) -> bool {
        self.requires_python
            .as_ref()
            .map_or(true, |range| runtime.satisfies(range))
    }
}

#[async_trait]
pub trait PackageIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn releases(&self, package: &PackageName) -> Result<Vec<Release>, IndexError>;
}

/// In-memory index, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIndex {
    packages: BTreeMap<PackageName, Vec<Release>>,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(mut self, package: &str, release: Release) -> Self {
        self.packages
            .entry(PackageName::new(package))
            .or_default()
            .push(release);
        self
    }
}

#[async_trait]
impl PackageIndex for StaticIndex {
    fn name(&self) -> &str {
        "static"
    }

    async fn releases(&self, package: &PackageName) -> Result<Vec<Release>, IndexError> {
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(package.to_string()))
    }
}

/// Release metadata fetched ahead of runtime selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseCatalog {
    packages: BTreeMap<PackageName, Vec<Release>>,
}

impl ReleaseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: PackageName, releases: Vec<Release>) {
        self.packages.insert(package, releases);
    }

    pub fn is_known(&self, package: &PackageName) -> bool {
        self.packages.contains_key(package)
    }

    pub fn releases(&self, package: &PackageName) -> &[Release] {
        self.packages.get(package).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The release matching `version` exactly, ignoring trailing zeros.
    pub fn release(&self, package: &PackageName, version: &Version) -> Option<&Release> {
        self.releases(package).iter().find(|r| &r.version == version)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Looks up every package concurrently. Failed lookups are returned as
    /// warnings and leave the package unknown.
    pub async fn prefetch(
        index: &dyn PackageIndex,
        packages: impl IntoIterator<Item = PackageName>,
        concurrency: usize,
        timeout: Duration,
    ) -> (Self, Vec<String>) {
        let lookups: Vec<_> = stream::iter(packages)
            .map(|package| async move {
                let result = match tokio::time::timeout(timeout, index.releases(&package)).await {
                    Ok(result) => result,
                    Err(_) => Err(IndexError::Timeout(timeout)),
                };
                (package, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut catalog = Self::new();
        let mut warnings = Vec::new();
        for (package, result) in lookups {
            match result {
                Ok(releases) => {
                    debug!(package = %package, releases = releases.len(), "Fetched release metadata");
                    catalog.insert(package, releases);
                }
                Err(e) => {
                    warn!(package = %package, index = index.name(), error = %e, "Release lookup failed");
                    warnings.push(format!("{}: {}", package, e));
                }
            }
        }
        warnings.sort();

        info!(
            index = index.name(),
            known = catalog.len(),
            failed = warnings.len(),
            "Release metadata prefetched"
        );
        (catalog, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn release(version: &str, requires: Option<&str>) -> Release {
        let mut r = Release::new(v(version));
        if let Some(range) = requires {
            r = r.with_requires_python(range.parse().unwrap());
        }
        r
    }

    #[test]
    fn test_release_supports() {
        let py = RuntimeVersion::new;
        assert!(release("1.0", None).supports(py(3, 13)));
        assert!(release("1.0", Some(">=3.9")).supports(py(3, 10)));
        assert!(!release("1.0", Some(">=3.9")).supports(py(3, 8)));
        assert!(!release("1.0", Some("<3.11")).supports(py(3, 12)));
        assert!(release("1.0", Some(">=3.6, !=3.9.0")).supports(py(3, 9)));
    }

    #[tokio::test]
    async fn test_prefetch_collects_hits_and_misses() {
        let index = StaticIndex::new()
            .with_release("numpy", release("1.26.4", Some(">=3.9")))
            .with_release("numpy", release("2.0.0", Some(">=3.9")));

        let (catalog, warnings) = ReleaseCatalog::prefetch(
            &index,
            vec![PackageName::new("numpy"), PackageName::new("nope")],
            4,
            Duration::from_secs(5),
        )
        .await;

        assert!(catalog.is_known(&PackageName::new("numpy")));
        assert!(!catalog.is_known(&PackageName::new("nope")));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("nope"));
        assert!(catalog
            .release(&PackageName::new("numpy"), &v("1.26.4"))
            .is_some());
        assert!(catalog.release(&PackageName::new("numpy"), &v("1.0")).is_none());
    }
}
