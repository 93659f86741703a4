use super::{ManifestError, ManifestFile, ManifestParser, ManifestPattern, ParsedManifest};
use crate::requirement::{ManifestFormat, Requirement, RequirementSource, SpecifierSet};

/// Pipenv's `Pipfile`. Only `[packages]` is installed; `[dev-packages]` is not.
pub struct PipfileParser;

impl ManifestParser for PipfileParser {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::Pipfile
    }

    fn manifest_patterns(&self) -> &[ManifestPattern] {
        const PATTERNS: &[ManifestPattern] = &[ManifestPattern::root("Pipfile")];
        PATTERNS
    }

    fn parse(&self, manifest: &ManifestFile<'_>) -> Result<ParsedManifest, ManifestError> {
        let doc: toml::Value = toml::from_str(manifest.content)?;
        let source = RequirementSource::manifest(self.format(), manifest.display_path());
        let mut parsed = ParsedManifest::default();

        if let Some(packages) = doc.get("packages").and_then(|p| p.as_table()) {
            for (name, value) in packages {
                let version = match value {
                    toml::Value::String(s) => Some(s.as_str()),
                    toml::Value::Table(table) => {
                        if table.contains_key("path")
                            || table.contains_key("git")
                            || table.contains_key("file")
                        {
                            parsed
                                .notes
                                .push(format!("skipped non-registry package '{}'", name));
                            continue;
                        }
                        table.get("version").and_then(|v| v.as_str())
                    }
                    _ => None,
                };

                let mut req = Requirement::new(name, source.clone());
                if let Some(text) = version.map(str::trim).filter(|v| !v.is_empty() && *v != "*") {
                    match text.parse::<SpecifierSet>() {
                        Ok(constraint) => req.constraint = Some(constraint),
                        Err(e) => parsed
                            .notes
                            .push(format!("ignored constraint for '{}': {}", name, e)),
                    }
                }
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

        if let Some(requires) = doc.get("requires").and_then(|r| r.as_table()) {
            let version = requires
                .get("python_version")
                .or_else(|| requires.get("python_full_version"))
                .and_then(|v| v.as_str());
            if let Some(version) = version {
                parsed.python_requires = minor_series(version);
                if parsed.python_requires.is_none() {
                    parsed
                        .notes
                        .push(format!("ignored python_version '{}'", version));
                }
            }
        }

        Ok(parsed)
    }
}

/// `3.8` or `3.8.5` become `==3.8.*`.
fn minor_series(version: &str) -> Option<SpecifierSet> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next()?.parse::<u64>().ok()?;
    format!("=={}.{}.*", major, minor).parse().ok()
}
