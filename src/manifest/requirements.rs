//! pip requirement files, including nested `-r` includes

use super::{ManifestError, ManifestFile, ManifestParser, ManifestPattern, ParsedManifest};
use crate::imports::stdlib;
use crate::requirement::{ManifestFormat, Requirement, RequirementSource};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

const MAX_INCLUDE_DEPTH: usize = 8;

pub struct RequirementsParser;

impl ManifestParser for RequirementsParser {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::RequirementsTxt
    }

    fn manifest_patterns(&self) -> &[ManifestPattern] {
        const PATTERNS: &[ManifestPattern] = &[
            ManifestPattern::root("requirements.txt"),
            ManifestPattern::root("requirements-dev.txt"),
            ManifestPattern::root("requirements-test.txt"),
            ManifestPattern::root("requirements-base.txt"),
            ManifestPattern {
                filename: "*.txt",
                directory: "requirements",
            },
        ];
        PATTERNS
    }

    fn parse(&self, manifest: &ManifestFile<'_>) -> Result<ParsedManifest, ManifestError> {
        let mut parsed = ParsedManifest::default();
        let mut visited = BTreeSet::new();
        visited.insert(normalize(manifest.relative));
        parse_lines(
            manifest.root,
            manifest.relative,
            manifest.content,
            0,
            &mut visited,
            &mut parsed,
        );
        Ok(parsed)
    }
}

fn parse_lines(
    root: &Path,
    relative: &Path,
    content: &str,
    depth: usize,
    visited: &mut BTreeSet<PathBuf>,
    parsed: &mut ParsedManifest,
) {
    let display = relative.to_string_lossy().replace('\\', "/");
    let source = RequirementSource::manifest(ManifestFormat::RequirementsTxt, display.clone());

    for line in logical_lines(content) {
        if let Some(include) = include_target(&line) {
            let target = normalize(&relative.parent().unwrap_or(Path::new("")).join(include));
            if escapes_root(&target) {
                parsed
                    .notes
                    .push(format!("{}: include '{}' leaves the repository", display, include));
                continue;
            }
            if depth + 1 > MAX_INCLUDE_DEPTH || !visited.insert(target.clone()) {
                continue;
            }
            match std::fs::read_to_string(root.join(&target)) {
                Ok(nested) => parse_lines(root, &target, &nested, depth + 1, visited, parsed),
                Err(e) => parsed.notes.push(format!(
                    "{}: cannot read included file '{}': {}",
                    display, include, e
                )),
            }
            continue;
        }

        if line.starts_with('-') {
            parsed.notes.push(format!("{}: skipped option '{}'", display, line));
            continue;
        }
        if is_path_or_url(&line) {
            parsed
                .notes
                .push(format!("{}: skipped non-registry entry '{}'", display, line));
            continue;
        }

        // Per-requirement options such as `--hash=...` trail the spec.
        let spec = line.split(" --").next().unwrap_or_default().trim();
        match Requirement::parse(spec, source.clone()) {
            Ok(req) if stdlib::is_stdlib(req.name.as_str()) => parsed.notes.push(format!(
                "{}: '{}' is part of the standard library",
                display, req.name
            )),
            Ok(req) => parsed.requirements.push(req),
            Err(e) => parsed.notes.push(format!("{}: {}", display, e)),
        }
    }
}

/// Joins backslash continuations and strips comments and blank lines.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in content.lines() {
        let without_comment = strip_comment(raw);
        if let Some(body) = without_comment.trim_end().strip_suffix('\\') {
            current.push_str(body);
            current.push(' ');
            continue;
        }
        current.push_str(without_comment);
        let line = current.trim().to_string();
        current.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        lines.push(tail.to_string());
    }
    lines
}

/// pip treats `#` as a comment at line start or after whitespace.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn include_target(line: &str) -> Option<&str> {
    for prefix in ["-r", "--requirement"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            let rest = rest.strip_prefix('=').unwrap_or(rest);
            if rest.starts_with(|c: char| c.is_whitespace()) || prefix == "-r" || line.contains('=') {
                let target = rest.trim();
                if !target.is_empty() {
                    return Some(target);
                }
            }
        }
    }
    None
}

fn is_path_or_url(line: &str) -> bool {
    line.starts_with('.')
        || line.starts_with('/')
        || line.contains("://")
        || line.starts_with("git+")
        || line.ends_with(".whl")
        || line.ends_with(".tar.gz")
}

/// Lexical normalization: resolves `.` and `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn escapes_root(path: &Path) -> bool {
    path.is_absolute() || path.components().next() == Some(Component::ParentDir)
}
