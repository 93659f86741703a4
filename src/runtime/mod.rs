//! Interpreter runtime catalog and selection
//!
//! The catalog is a fixed, ordered, immutable list of supported interpreter
//! series, newest first. Narrowing it (to a declared range, or to what is
//! installed on the host) always produces a new catalog.

mod locator;
mod selector;

pub use locator::{InterpreterLocator, StaticLocator, WhichLocator};
pub use selector::{select_runtime, RejectedCandidate, RuntimeSelection, SelectionError};

use crate::requirement::{SpecifierSet, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An interpreter series such as `3.11`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeVersion {
    major: u64,
    minor: u64,
}

impl RuntimeVersion {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn as_version(&self) -> Version {
        Version::new(vec![self.major, self.minor])
    }

    /// True when some patch release of this series falls inside `range`.
    ///
    /// Probes `X.Y.0`, a late patch, and every version the range itself names
    /// within the series, so `>3.9` admits 3.9 and `==3.9.7` does too.
    pub fn satisfies(&self, range: &SpecifierSet) -> bool {
        let series = [self.major, self.minor];
        let mut probes = vec![
            Version::new(vec![self.major, self.minor, 0]),
            Version::new(vec![self.major, self.minor, 999]),
        ];
        probes.extend(
            range
                .specifiers()
                .iter()
                .map(|s| s.version())
                .filter(|v| v.has_release_prefix(&series) && v.release().len() > 2)
                .cloned(),
        );
        probes.iter().any(|probe| range.contains(probe))
    }

    /// Executable name on POSIX hosts, e.g. `python3.11`.
    pub fn executable_name(&self) -> String {
        format!("python{}", self)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for RuntimeVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version: Version = s.trim().parse().map_err(|e| format!("{}", e))?;
        match version.release() {
            [major, minor] | [major, minor, _] => Ok(Self::new(*major, *minor)),
            _ => Err(format!("Invalid runtime version '{}': expected MAJOR.MINOR", s)),
        }
    }
}

impl TryFrom<String> for RuntimeVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuntimeVersion> for String {
    fn from(value: RuntimeVersion) -> Self {
        value.to_string()
    }
}

const SUPPORTED: &[RuntimeVersion] = &[
    RuntimeVersion::new(3, 13),
    RuntimeVersion::new(3, 12),
    RuntimeVersion::new(3, 11),
    RuntimeVersion::new(3, 10),
    RuntimeVersion::new(3, 9),
    RuntimeVersion::new(3, 8),
];

/// Ordered, newest-first list of candidate runtimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeCatalog {
    versions: Vec<RuntimeVersion>,
}

impl RuntimeCatalog {
    pub fn supported() -> Self {
        Self {
            versions: SUPPORTED.to_vec(),
        }
    }

    /// Builds a catalog from arbitrary versions, sorted newest first.
    pub fn from_versions(versions: impl IntoIterator<Item = RuntimeVersion>) -> Self {
        let mut versions: Vec<RuntimeVersion> = versions.into_iter().collect();
        versions.sort_by(|a, b| b.cmp(a));
        versions.dedup();
        Self { versions }
    }

    pub fn versions(&self) -> &[RuntimeVersion] {
        &self.versions
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn contains(&self, version: RuntimeVersion) -> bool {
        self.versions.contains(&version)
    }

    pub fn restricted_to(&self, range: &SpecifierSet) -> Self {
        Self {
            versions: self
                .versions
                .iter()
                .copied()
                .filter(|v| v.satisfies(range))
                .collect(),
        }
    }

    pub fn available_on_host(&self, locator: &dyn InterpreterLocator) -> Self {
        Self {
            versions: self
                .versions
                .iter()
                .copied()
                .filter(|v| locator.locate(*v).is_some())
                .collect(),
        }
    }
}

impl fmt::Display for RuntimeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.versions.iter().map(|v| v.to_string()).collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn set(s: &str) -> SpecifierSet {
        s.parse().unwrap()
    }

    #[test]
    fn test_supported_newest_first() {
        let catalog = RuntimeCatalog::supported();
        assert_eq!(catalog.versions().first(), Some(&RuntimeVersion::new(3, 13)));
        assert_eq!(catalog.versions().last(), Some(&RuntimeVersion::new(3, 8)));
        assert!(catalog.versions().windows(2).all(|w| w[0] > w[1]));
    }

    #[parameterized(
        lower_bound = { ">=3.9", "3.13, 3.12, 3.11, 3.10, 3.9" },
        bounded = { ">=3.9,<3.12", "3.11, 3.10, 3.9" },
        series = { "==3.10.*", "3.10" },
        strict_lower = { ">3.9", "3.13, 3.12, 3.11, 3.10, 3.9" },
        patch_pin = { "==3.8.10", "3.8" },
        compatible = { "~=3.11", "3.13, 3.12, 3.11" },
        excluded = { "!=3.12.*,>=3.11", "3.13, 3.11" },
        outside = { ">=3.14", "" },
    )]
    fn test_restricted_to(range: &str, expected: &str) {
        let restricted = RuntimeCatalog::supported().restricted_to(&set(range));
        assert_eq!(restricted.to_string(), expected);
    }

    #[test]
    fn test_restriction_does_not_mutate() {
        let catalog = RuntimeCatalog::supported();
        let _ = catalog.restricted_to(&set("==3.10.*"));
        assert_eq!(catalog, RuntimeCatalog::supported());
    }

    #[test]
    fn test_available_on_host() {
        let locator = StaticLocator::new()
            .with_interpreter(RuntimeVersion::new(3, 11), "/usr/bin/python3.11")
            .with_interpreter(RuntimeVersion::new(3, 9), "/usr/bin/python3.9");
        let host = RuntimeCatalog::supported().available_on_host(&locator);
        assert_eq!(host.to_string(), "3.11, 3.9");
    }

    #[test]
    fn test_runtime_version_parsing() {
        assert_eq!("3.10".parse::<RuntimeVersion>().unwrap(), RuntimeVersion::new(3, 10));
        assert_eq!("3.10.4".parse::<RuntimeVersion>().unwrap(), RuntimeVersion::new(3, 10));
        assert!("3".parse::<RuntimeVersion>().is_err());
        assert!(RuntimeVersion::new(3, 10) > RuntimeVersion::new(3, 9));
        assert_eq!(RuntimeVersion::new(3, 12).executable_name(), "python3.12");
    }

    #[test]
    fn test_from_versions_sorts() {
        let catalog = RuntimeCatalog::from_versions(vec![
            RuntimeVersion::new(3, 9),
            RuntimeVersion::new(3, 12),
            RuntimeVersion::new(3, 9),
        ]);
        assert_eq!(catalog.to_string(), "3.12, 3.9");
    }
}
