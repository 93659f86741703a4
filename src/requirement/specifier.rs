//! Version constraints: single specifiers and comma-joined specifier sets

use super::version::{Version, VersionParseError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecifierError {
    #[error("Invalid version specifier: '{0}'")]
    InvalidSpecifier(String),

    #[error(transparent)]
    InvalidVersion(#[from] VersionParseError),

    #[error("Empty version constraint")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    Compatible,
    Arbitrary,
}

impl Operator {
    fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterEqual => ">=",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::Compatible => "~=",
            Operator::Arbitrary => "===",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Specifier {
    operator: Operator,
    version: Version,
    wildcard: bool,
    raw: String,
}

fn specifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(===|~=|==|!=|<=|>=|<|>)\s*([^\s,;]+)$").expect("specifier pattern is valid")
    })
}

impl Specifier {
    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_pin(&self) -> bool {
        matches!(self.operator, Operator::Equal | Operator::Arbitrary) && !self.wildcard
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        match self.operator {
            Operator::Equal if self.wildcard => candidate.has_release_prefix(self.version.release()),
            Operator::Equal => candidate == &self.version,
            Operator::NotEqual if self.wildcard => {
                !candidate.has_release_prefix(self.version.release())
            }
            Operator::NotEqual => candidate != &self.version,
            Operator::GreaterEqual => candidate >= &self.version,
            Operator::LessEqual => candidate <= &self.version,
            Operator::Greater => candidate > &self.version,
            Operator::Less => candidate < &self.version,
            Operator::Compatible => {
                let release = self.version.release();
                let prefix = &release[..release.len().saturating_sub(1).max(1)];
                candidate >= &self.version && candidate.has_release_prefix(prefix)
            }
            Operator::Arbitrary => candidate.to_string() == self.raw,
        }
    }

    /// Lower and upper bounds this specifier imposes, as `(version, inclusive)`.
    fn bounds(&self) -> (Option<Bound>, Option<Bound>) {
        match self.operator {
            Operator::Equal | Operator::Arbitrary if !self.wildcard => (
                Some(Bound::inclusive(self.version.clone())),
                Some(Bound::inclusive(self.version.clone())),
            ),
            Operator::Equal => {
                let release = self.version.release();
                (
                    Some(Bound::inclusive(Version::new(release.to_vec()))),
                    Some(Bound::exclusive(bump_last(release))),
                )
            }
            Operator::GreaterEqual => (Some(Bound::inclusive(self.version.clone())), None),
            Operator::Greater => (Some(Bound::exclusive(self.version.clone())), None),
            Operator::LessEqual => (None, Some(Bound::inclusive(self.version.clone()))),
            Operator::Less => (None, Some(Bound::exclusive(self.version.clone()))),
            Operator::Compatible => {
                let release = self.version.release();
                let prefix = &release[..release.len().saturating_sub(1).max(1)];
                (
                    Some(Bound::inclusive(self.version.clone())),
                    Some(Bound::exclusive(bump_last(prefix))),
                )
            }
            Operator::NotEqual | Operator::Arbitrary => (None, None),
        }
    }
}

fn bump_last(release: &[u64]) -> Version {
    let mut bumped = release.to_vec();
    if let Some(last) = bumped.last_mut() {
        *last += 1;
    }
    Version::new(bumped)
}

impl FromStr for Specifier {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let caps = specifier_regex()
            .captures(trimmed)
            .ok_or_else(|| SpecifierError::InvalidSpecifier(trimmed.to_string()))?;

        let operator = match &caps[1] {
            "===" => Operator::Arbitrary,
            "~=" => Operator::Compatible,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<=" => Operator::LessEqual,
            ">=" => Operator::GreaterEqual,
            "<" => Operator::Less,
            _ => Operator::Greater,
        };
        let raw = caps[2].to_string();

        if operator == Operator::Arbitrary {
            let version = raw.parse().unwrap_or_else(|_| Version::new(vec![0]));
            return Ok(Self {
                operator,
                version,
                wildcard: false,
                raw,
            });
        }

        let (text, wildcard) = match raw.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (raw.as_str(), false),
        };
        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(SpecifierError::InvalidSpecifier(trimmed.to_string()));
        }
        if operator == Operator::Compatible && text.split('.').count() < 2 {
            return Err(SpecifierError::InvalidSpecifier(trimmed.to_string()));
        }

        let version = text.parse::<Version>()?;
        Ok(Self {
            operator,
            version,
            wildcard,
            raw,
        })
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.as_str(), self.raw)
    }
}

#[derive(Debug, Clone)]
struct Bound {
    version: Version,
    inclusive: bool,
}

impl Bound {
    fn inclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    fn exclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }

    /// Tighter of two lower bounds.
    fn max_lower(a: Option<Bound>, b: Option<Bound>) -> Option<Bound> {
        match (a, b) {
            (Some(a), Some(b)) => Some(match a.version.cmp(&b.version) {
                Ordering::Greater => a,
                Ordering::Less => b,
                Ordering::Equal => {
                    if a.inclusive {
                        b
                    } else {
                        a
                    }
                }
            }),
            (a, b) => a.or(b),
        }
    }

    /// Tighter of two upper bounds.
    fn min_upper(a: Option<Bound>, b: Option<Bound>) -> Option<Bound> {
        match (a, b) {
            (Some(a), Some(b)) => Some(match a.version.cmp(&b.version) {
                Ordering::Less => a,
                Ordering::Greater => b,
                Ordering::Equal => {
                    if a.inclusive {
                        b
                    } else {
                        a
                    }
                }
            }),
            (a, b) => a.or(b),
        }
    }
}

/// How tightly a constraint narrows the acceptable releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restrictiveness {
    Unconstrained,
    Exclusions,
    HalfBounded,
    Bounded,
    Pinned,
}

/// A comma-joined set of specifiers, all of which must hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpecifierSet {
    specifiers: Vec<Specifier>,
}

impl SpecifierSet {
    pub fn pinned(version: &Version) -> Self {
        Self {
            specifiers: vec![Specifier {
                operator: Operator::Equal,
                version: version.clone(),
                wildcard: false,
                raw: version.to_string(),
            }],
        }
    }

    pub fn specifiers(&self) -> &[Specifier] {
        &self.specifiers
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        self.specifiers.iter().all(|spec| spec.contains(candidate))
    }

    /// The pinned version when this set is exactly one `==` (or `===`) specifier.
    pub fn pinned_version(&self) -> Option<&Version> {
        match self.specifiers.as_slice() {
            [only] if only.is_pin() => Some(&only.version),
            _ => None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_version().is_some()
    }

    fn combined_bounds(&self) -> (Option<Bound>, Option<Bound>) {
        self.specifiers
            .iter()
            .fold((None, None), |(lower, upper), spec| {
                let (l, u) = spec.bounds();
                (Bound::max_lower(lower, l), Bound::min_upper(upper, u))
            })
    }

    /// False when the bounds contradict each other, e.g. `>=2,<1`.
    pub fn is_satisfiable(&self) -> bool {
        let (lower, upper) = self.combined_bounds();
        let range_ok = match (&lower, &upper) {
            (Some(l), Some(u)) => match l.version.cmp(&u.version) {
                Ordering::Less => true,
                Ordering::Equal => l.inclusive && u.inclusive,
                Ordering::Greater => false,
            },
            _ => true,
        };
        if !range_ok {
            return false;
        }

        // A point range must also survive the exclusions.
        match (&lower, &upper) {
            (Some(l), Some(u)) if l.version == u.version => self.contains(&l.version),
            _ => true,
        }
    }

    pub fn restrictiveness(&self) -> Restrictiveness {
        if self.specifiers.is_empty() {
            return Restrictiveness::Unconstrained;
        }
        if self.is_pinned() {
            return Restrictiveness::Pinned;
        }
        match self.combined_bounds() {
            (Some(l), Some(u)) if l.version == u.version => Restrictiveness::Pinned,
            (Some(_), Some(_)) => Restrictiveness::Bounded,
            (Some(_), None) | (None, Some(_)) => Restrictiveness::HalfBounded,
            (None, None) => Restrictiveness::Exclusions,
        }
    }

    /// Orders two constraints by how narrow they are; `Greater` means `self`
    /// is the more restrictive one. Ties fall back to the rendered text so the
    /// result is total and deterministic.
    pub fn cmp_restrictiveness(&self, other: &Self) -> Ordering {
        self.restrictiveness()
            .cmp(&other.restrictiveness())
            .then_with(|| {
                let (self_lower, self_upper) = self.combined_bounds();
                let (other_lower, other_upper) = other.combined_bounds();
                let lower = match (self_lower, other_lower) {
                    (Some(a), Some(b)) => a.version.cmp(&b.version),
                    _ => Ordering::Equal,
                };
                let upper = match (self_upper, other_upper) {
                    (Some(a), Some(b)) => b.version.cmp(&a.version),
                    _ => Ordering::Equal,
                };
                lower.then(upper)
            })
            .then_with(|| other.to_string().cmp(&self.to_string()))
    }
}

impl FromStr for SpecifierSet {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SpecifierError::Empty);
        }
        let specifiers = trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse::<Specifier>)
            .collect::<Result<Vec<_>, _>>()?;
        if specifiers.is_empty() {
            return Err(SpecifierError::Empty);
        }
        Ok(Self { specifiers })
    }
}

impl TryFrom<String> for SpecifierSet {
    type Error = SpecifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpecifierSet> for String {
    fn from(set: SpecifierSet) -> Self {
        set.to_string()
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.specifiers.iter().map(|s| s.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

impl PartialEq for SpecifierSet {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for SpecifierSet {}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn set(s: &str) -> SpecifierSet {
        s.parse().unwrap()
    }

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[parameterized(
        exact = { "==1.4.2", "1.4.2", true },
        exact_padded = { "==1.4", "1.4.0", true },
        exact_miss = { "==1.4.2", "1.4.3", false },
        wildcard = { "==3.11.*", "3.11.7", true },
        wildcard_miss = { "==3.11.*", "3.12", false },
        not_equal = { "!=2.0", "2.0", false },
        range = { ">=1.0,<2.0", "1.9.9", true },
        range_upper = { ">=1.0,<2.0", "2.0", false },
        compatible = { "~=1.4.2", "1.4.9", true },
        compatible_minor_bump = { "~=1.4.2", "1.5.0", false },
        compatible_two_part = { "~=3.8", "3.12", true },
        compatible_two_part_major = { "~=3.8", "4.0", false },
    )]
    fn test_contains(constraint: &str, candidate: &str, expected: bool) {
        assert_eq!(set(constraint).contains(&v(candidate)), expected);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("1.0".parse::<SpecifierSet>().is_err());
        assert!(">=".parse::<SpecifierSet>().is_err());
        assert!(">=1.*".parse::<SpecifierSet>().is_err());
        assert!("~=1".parse::<SpecifierSet>().is_err());
        assert!(matches!("".parse::<SpecifierSet>(), Err(SpecifierError::Empty)));
    }

    #[test]
    fn test_pins() {
        assert!(set("==2.0").is_pinned());
        assert!(set("===2.0-custom").is_pinned());
        assert!(!set("==2.*").is_pinned());
        assert!(!set(">=2.0,<=2.0").is_pinned());
        assert_eq!(set("==2.0").pinned_version(), Some(&v("2.0")));
    }

    #[test]
    fn test_satisfiability() {
        assert!(set(">=1.0,<2.0").is_satisfiable());
        assert!(set(">=1.0,<=1.0").is_satisfiable());
        assert!(!set(">=2,<1").is_satisfiable());
        assert!(!set(">1.0,<=1.0").is_satisfiable());
        assert!(!set("==1.0,==2.0").is_satisfiable());
        assert!(!set("==1.0,!=1.0").is_satisfiable());
    }

    #[test]
    fn test_restrictiveness_levels() {
        assert_eq!(set("==1.0").restrictiveness(), Restrictiveness::Pinned);
        assert_eq!(set(">=1.0,<2").restrictiveness(), Restrictiveness::Bounded);
        assert_eq!(set("~=1.4").restrictiveness(), Restrictiveness::Bounded);
        assert_eq!(set(">=1.0").restrictiveness(), Restrictiveness::HalfBounded);
        assert_eq!(set("!=1.3").restrictiveness(), Restrictiveness::Exclusions);
    }

    #[test]
    fn test_restrictiveness_comparison() {
        assert_eq!(set("==1.0").cmp_restrictiveness(&set(">=1.0,<2")), Ordering::Greater);
        assert_eq!(set(">=1.5").cmp_restrictiveness(&set(">=1.0")), Ordering::Greater);
        assert_eq!(set("<2.0").cmp_restrictiveness(&set("<3.0")), Ordering::Greater);
        assert_eq!(
            set(">=1.2,<2").cmp_restrictiveness(&set(">=1.0,<2")),
            Ordering::Greater
        );
        assert_eq!(set(">=1.0").cmp_restrictiveness(&set(">=1.0")), Ordering::Equal);
    }

    #[test]
    fn test_display_roundtrip_text() {
        assert_eq!(set(">= 1.0 , <2").to_string(), ">=1.0,<2");
    }
}
