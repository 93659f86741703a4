//! Release versions (a practical subset of PEP 440)

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid version: '{0}'")]
pub struct VersionParseError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreReleaseKind {
    Alpha,
    Beta,
    Candidate,
}

/// A parsed release version.
///
/// Comparison pads release segments with zeros, so `2.0 == 2.0.0`.
/// Ordering within one release is `dev < pre < final < post`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    release: Vec<u64>,
    pre: Option<(PreReleaseKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    text: String,
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)^
            v?
            (?P<release>\d+(?:\.\d+)*)
            (?:[-_.]?(?P<pre_l>a|alpha|b|beta|c|rc|pre|preview)[-_.]?(?P<pre_n>\d*))?
            (?:-(?P<post_n1>\d+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>\d*))?
            (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>\d*))?
            (?:\+[a-z0-9.]+)?
            $",
        )
        .expect("version pattern is valid")
    })
}

impl Version {
    pub fn new(release: Vec<u64>) -> Self {
        let text = release
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self {
            release,
            pre: None,
            post: None,
            dev: None,
            text,
        }
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// Segment `idx` of the release tuple, zero when absent.
    pub fn segment(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }

    /// True when this version's release tuple starts with `prefix`.
    pub fn has_release_prefix(&self, prefix: &[u64]) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(idx, part)| self.segment(idx) == *part)
    }

    fn phase_key(&self) -> (u8, u64, u64, u64) {
        // dev-only < pre-release < final < post-release
        match (self.pre, self.post, self.dev) {
            (None, None, Some(dev)) => (0, 0, 0, dev),
            (Some((kind, n)), _, dev) => (1 + kind as u8, n, 0, dev.unwrap_or(u64::MAX)),
            (None, None, None) => (4, 0, 0, u64::MAX),
            (None, Some(post), dev) => (5, post, 0, dev.unwrap_or(u64::MAX)),
        }
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for idx in 0..len {
            match self.segment(idx).cmp(&other.segment(idx)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let caps = version_regex()
            .captures(trimmed)
            .ok_or_else(|| VersionParseError(s.to_string()))?;

        let release = caps["release"]
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError(s.to_string()))?;

        let number = |name: &str| -> u64 {
            caps.name(name)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };

        let pre = caps.name("pre_l").map(|label| {
            let kind = match label.as_str().to_ascii_lowercase().as_str() {
                "a" | "alpha" => PreReleaseKind::Alpha,
                "b" | "beta" => PreReleaseKind::Beta,
                _ => PreReleaseKind::Candidate,
            };
            (kind, number("pre_n"))
        });

        let post = if caps.name("post_n1").is_some() {
            Some(number("post_n1"))
        } else if caps.name("post_l").is_some() {
            Some(number("post_n2"))
        } else {
            None
        };

        let dev = caps.name("dev_l").map(|_| number("dev_n"));

        Ok(Self {
            release,
            pre,
            post,
            dev,
            text: trimmed.to_string(),
        })
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.text
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other)
            .then_with(|| self.phase_key().cmp(&other.phase_key()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}
