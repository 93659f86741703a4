//! `pyproject.toml`: PEP 621 `[project]` tables and Poetry sections

use super::{ManifestError, ManifestFile, ManifestParser, ManifestPattern, ParsedManifest};
use crate::requirement::{
    ManifestFormat, Requirement, RequirementSource, SpecifierError, SpecifierSet, Version,
};

pub struct PyProjectParser;

impl ManifestParser for PyProjectParser {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::PyProject
    }

    fn manifest_patterns(&self) -> &[ManifestPattern] {
        const PATTERNS: &[ManifestPattern] = &[ManifestPattern::root("pyproject.toml")];
        PATTERNS
    }

    fn parse(&self, manifest: &ManifestFile<'_>) -> Result<ParsedManifest, ManifestError> {
        let doc: toml::Value = toml::from_str(manifest.content)?;
        let source = RequirementSource::manifest(self.format(), manifest.display_path());
        let mut parsed = ParsedManifest::default();

        if let Some(project) = doc.get("project").and_then(|p| p.as_table()) {
            if let Some(deps) = project.get("dependencies").and_then(|d| d.as_array()) {
                for dep in deps.iter().filter_map(|d| d.as_str()) {
                    match Requirement::parse(dep, source.clone()) {
                        Ok(req) => parsed.requirements.push(req),
                        Err(e) => parsed.notes.push(format!("skipped dependency: {}", e)),
                    }
                }
            }

            if let Some(spec) = project.get("requires-python").and_then(|v| v.as_str()) {
                match spec.parse::<SpecifierSet>() {
                    Ok(constraint) => parsed.python_requires = Some(constraint),
                    Err(e) => parsed.notes.push(format!("ignored requires-python: {}", e)),
                }
            }

            collect_scripts(project.get("scripts"), &mut parsed.script_modules);
        }

        let poetry = doc
            .get("tool")
            .and_then(|t| t.get("poetry"))
            .and_then(|p| p.as_table());
        if let Some(poetry) = poetry {
            if let Some(deps) = poetry.get("dependencies").and_then(|d| d.as_table()) {
                for (name, value) in deps {
                    let text = match value {
                        toml::Value::String(s) => Some(s.as_str()),
                        toml::Value::Table(table) => {
                            if table.contains_key("path")
                                || table.contains_key("git")
                                || table.contains_key("url")
                            {
                                parsed
                                    .notes
                                    .push(format!("skipped non-registry dependency '{}'", name));
                                continue;
                            }
                            table.get("version").and_then(|v| v.as_str())
                        }
                        _ => None,
                    };

                    let constraint = match text.map(poetry_constraint).transpose() {
                        Ok(c) => c.flatten(),
                        Err(e) => {
                            parsed
                                .notes
                                .push(format!("ignored constraint for '{}': {}", name, e));
                            None
                        }
                    };

                    if name == "python" {
                        if parsed.python_requires.is_none() {
                            parsed.python_requires = constraint;
                        }
                        continue;
                    }

                    let mut req = Requirement::new(name, source.clone());
                    req.constraint = constraint;
                    if let Some(extras) = value.get("extras").and_then(|e| e.as_array()) {
                        req.extras = extras
                            .iter()
                            .filter_map(|e| e.as_str())
                            .map(|e| e.to_ascii_lowercase())
                            .collect();
                    }
                    parsed.requirements.push(req);
                }
            }

            collect_scripts(poetry.get("scripts"), &mut parsed.script_modules);
        }

        Ok(parsed)
    }
}

/// `name = "pkg.module:func"` entries become `pkg.module`.
fn collect_scripts(scripts: Option<&toml::Value>, out: &mut Vec<String>) {
    let Some(table) = scripts.and_then(|s| s.as_table()) else {
        return;
    };
    for target in table.values().filter_map(|v| v.as_str()) {
        if let Some(module) = target.split(':').next().map(str::trim) {
            if !module.is_empty() {
                out.push(module.to_string());
            }
        }
    }
}

/// Translates a Poetry constraint (`^1.2`, `~1.2.3`, `1.4`, `>=1,<2`, `*`)
/// into a PEP 440 specifier set. `*` yields `None`.
pub fn poetry_constraint(text: &str) -> Result<Option<SpecifierSet>, SpecifierError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return Ok(None);
    }
    if trimmed.contains("||") {
        return Err(SpecifierError::InvalidSpecifier(trimmed.to_string()));
    }

    let mut parts = Vec::new();
    for part in trimmed.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(rest) = part.strip_prefix('^') {
            let version = rest.trim().parse::<Version>()?;
            let release = version.release();
            let idx = release
                .iter()
                .position(|n| *n != 0)
                .unwrap_or(release.len().saturating_sub(1));
            parts.push(format!(">={},<{}", rest.trim(), bump(release, idx)));
        } else if let Some(rest) = part.strip_prefix('~').filter(|r| !r.starts_with('=')) {
            let version = rest.trim().parse::<Version>()?;
            let release = version.release();
            let idx = if release.len() >= 2 { 1 } else { 0 };
            parts.push(format!(">={},<{}", rest.trim(), bump(release, idx)));
        } else if part.starts_with(|c: char| c.is_ascii_digit()) {
            parts.push(format!("=={}", part));
        } else {
            parts.push(part.to_string());
        }
    }

    parts.join(",").parse().map(Some)
}

fn bump(release: &[u64], idx: usize) -> String {
    let mut upper: Vec<u64> = release.iter().take(idx + 1).copied().collect();
    if upper.is_empty() {
        upper.push(0);
    }
    if let Some(last) = upper.last_mut() {
        *last += 1;
    }
    upper
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".")
}
