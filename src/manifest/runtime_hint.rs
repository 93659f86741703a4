//! `.python-version` and `runtime.txt` interpreter hints

use crate::requirement::SpecifierSet;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Hint files rank after every manifest-declared range.
pub(super) const RANK: u8 = 5;

const HINT_FILES: &[&str] = &[".python-version", "runtime.txt"];

pub(super) fn is_hint_file(relative: &Path) -> bool {
    relative.parent().map_or(true, |p| p.as_os_str().is_empty())
        && relative
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| HINT_FILES.contains(&n))
}

/// `3.10.4` or `python-3.10.4` become `==3.10.*`.
pub(super) fn parse(content: &str) -> Option<SpecifierSet> {
    let line = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?;
    let line = line.strip_prefix("python-").unwrap_or(line);

    let caps = version_regex().captures(line)?;
    format!("=={}.{}.*", &caps[1], &caps[2]).parse().ok()
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)").expect("version hint pattern is valid"))
}
