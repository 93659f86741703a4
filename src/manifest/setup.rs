//! Build-script declared dependencies: `setup.py` and `setup.cfg`

use super::{ManifestError, ManifestFile, ManifestParser, ManifestPattern, ParsedManifest};
use crate::requirement::{ManifestFormat, Requirement, RequirementSource, SpecifierSet};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Static extraction from `setup.py`; the script is never executed.
pub struct SetupPyParser;

impl ManifestParser for SetupPyParser {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::SetupPy
    }

    fn manifest_patterns(&self) -> &[ManifestPattern] {
        const PATTERNS: &[ManifestPattern] = &[ManifestPattern::root("setup.py")];
        PATTERNS
    }

    fn parse(&self, manifest: &ManifestFile<'_>) -> Result<ParsedManifest, ManifestError> {
        let source = RequirementSource::manifest(self.format(), manifest.display_path());
        let mut parsed = ParsedManifest::default();
        let content = manifest.content;

        match install_requires_start(content) {
            Some(start) => match string_literals_until_close(&content[start..]) {
                Some(literals) => {
                    for literal in &literals {
                        push_requirement(literal, &source, &mut parsed);
                    }
                }
                None => parsed
                    .notes
                    .push("install_requires list is not terminated".to_string()),
            },
            None if content.contains("install_requires") => parsed
                .notes
                .push("install_requires is computed at build time and was not read".to_string()),
            None => {}
        }

        if let Some(caps) = python_requires_regex().captures(content) {
            parse_python_requires(&caps[1], &mut parsed);
        }

        Ok(parsed)
    }
}

/// Declarative `setup.cfg` (`[options] install_requires`).
pub struct SetupCfgParser;

impl ManifestParser for SetupCfgParser {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::SetupCfg
    }

    fn manifest_patterns(&self) -> &[ManifestPattern] {
        const PATTERNS: &[ManifestPattern] = &[ManifestPattern::root("setup.cfg")];
        PATTERNS
    }

    fn parse(&self, manifest: &ManifestFile<'_>) -> Result<ParsedManifest, ManifestError> {
        let source = RequirementSource::manifest(self.format(), manifest.display_path());
        let mut parsed = ParsedManifest::default();
        let sections = parse_ini(manifest.content)?;

        if let Some(options) = sections.get("options") {
            if let Some(value) = options.get("install_requires") {
                for line in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    push_requirement(line, &source, &mut parsed);
                }
            }
            if let Some(value) = options.get("python_requires") {
                parse_python_requires(value.trim(), &mut parsed);
            }
        }

        Ok(parsed)
    }
}

fn install_requires_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"install_requires\s*=\s*\[").expect("install_requires pattern is valid"))
}

fn python_requires_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"python_requires\s*=\s*["']([^"']+)["']"#).expect("python_requires pattern is valid")
    })
}

/// Byte offset just past the opening `[` of the `install_requires` list.
fn install_requires_start(content: &str) -> Option<usize> {
    install_requires_regex().find(content).map(|m| m.end())
}

/// Collects string literals up to the bracket that closes an already opened
/// list. Brackets inside strings (extras such as `ray[tune]`) and comments
/// do not count. `None` when the list never closes.
fn string_literals_until_close(source: &str) -> Option<Vec<String>> {
    let mut literals = Vec::new();
    let mut depth: usize = 1;
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                let mut literal = String::new();
                loop {
                    match chars.next()? {
                        '\\' => literal.extend(chars.next()),
                        '\n' => return None,
                        ch if ch == c => break,
                        ch => literal.push(ch),
                    }
                }
                literals.push(literal);
            }
            '#' => {
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(literals);
                }
            }
            _ => {}
        }
    }
    None
}

fn push_requirement(text: &str, source: &RequirementSource, parsed: &mut ParsedManifest) {
    match Requirement::parse(text, source.clone()) {
        Ok(req) => parsed.requirements.push(req),
        Err(e) => parsed.notes.push(format!("skipped dependency: {}", e)),
    }
}

fn parse_python_requires(text: &str, parsed: &mut ParsedManifest) {
    match text.parse::<SpecifierSet>() {
        Ok(constraint) => parsed.python_requires = Some(constraint),
        Err(e) => parsed.notes.push(format!("ignored python_requires: {}", e)),
    }
}

type IniSections = BTreeMap<String, BTreeMap<String, String>>;

/// Minimal configparser-compatible reader: sections, `key = value` or
/// `key: value`, and indented continuation lines.
fn parse_ini(content: &str) -> Result<IniSections, ManifestError> {
    let mut sections: IniSections = BTreeMap::new();
    let mut section: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        if indented {
            if let (Some(sec), Some(key)) = (&section, &last_key) {
                if let Some(value) = sections.get_mut(sec).and_then(|s| s.get_mut(key)) {
                    value.push('\n');
                    value.push_str(trimmed);
                    continue;
                }
            }
            return Err(ManifestError::Syntax {
                line: line_no,
                message: "continuation line without a key".to_string(),
            });
        }

        if trimmed.starts_with('[') {
            let name = trimmed
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| ManifestError::Syntax {
                    line: line_no,
                    message: format!("unterminated section header '{}'", trimmed),
                })?;
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            section = Some(name);
            last_key = None;
            continue;
        }

        let split_at = trimmed.find(['=', ':']).ok_or_else(|| ManifestError::Syntax {
            line: line_no,
            message: format!("expected 'key = value', found '{}'", trimmed),
        })?;
        let sec = section.clone().ok_or_else(|| ManifestError::Syntax {
            line: line_no,
            message: "key outside of any section".to_string(),
        })?;
        let key = trimmed[..split_at].trim().to_string();
        let value = trimmed[split_at + 1..].trim().to_string();
        sections.entry(sec).or_default().insert(key.clone(), value);
        last_key = Some(key);
    }

    Ok(sections)
}
