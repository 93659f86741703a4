//! Statement-level Python source reader
//!
//! Just enough of the Python lexical grammar to find import statements:
//! comments and string literals (including triple-quoted and prefixed ones)
//! are blanked, backslash continuations and bracketed spans are joined into
//! one logical line, and `;` separates statements.

use std::collections::BTreeSet;

/// Collapses `source` into logical lines with string and comment contents removed.
pub fn logical_lines(source: &str) -> Vec<String> {
    let chars: Vec<char> = source.chars().collect();
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut depth: usize = 0;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                i = skip_string(&chars, i);
                current.push_str("\"\"");
                continue;
            }
            '\\' if matches!(chars.get(i + 1), Some('\n') | Some('\r')) => {
                current.push(' ');
                i += 1;
                if chars.get(i) == Some(&'\r') && chars.get(i + 1) == Some(&'\n') {
                    i += 1;
                }
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '\n' => {
                if depth == 0 {
                    flush(&mut current, &mut lines);
                } else {
                    current.push(' ');
                }
            }
            '\r' => {}
            _ => current.push(ch),
        }
        i += 1;
    }
    flush(&mut current, &mut lines);
    lines
}

fn flush(current: &mut String, lines: &mut Vec<String>) {
    let line = current.trim();
    if !line.is_empty() {
        lines.push(line.to_string());
    }
    current.clear();
}

/// Returns the index just past the string literal opening at `start`.
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => {
                if !triple {
                    return i + 1;
                }
                if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                    return i + 3;
                }
                i += 1;
            }
            // Unterminated single-quoted literal ends at the newline.
            '\n' if !triple => return i,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Top-level module names of every absolute import in `source`.
pub fn imported_modules(source: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    for line in logical_lines(source) {
        for statement in line.split(';') {
            parse_statement(statement.trim(), &mut modules);
        }
    }
    modules
}

fn parse_statement(statement: &str, out: &mut BTreeSet<String>) {
    if let Some(rest) = keyword_rest(statement, "import") {
        for item in rest.split(',') {
            let path = item.split_whitespace().next().unwrap_or_default();
            if let Some(top) = top_level(path) {
                out.insert(top.to_string());
            }
        }
    } else if let Some(rest) = keyword_rest(statement, "from") {
        let mut words = rest.split_whitespace();
        let module = words.next().unwrap_or_default();
        if words.next() != Some("import") || module.starts_with('.') {
            return;
        }
        if let Some(top) = top_level(module) {
            out.insert(top.to_string());
        }
    }
}

fn keyword_rest<'a>(statement: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = statement.strip_prefix(keyword)?;
    rest.starts_with(|c: char| c.is_whitespace() || c == '(')
        .then_some(rest.trim_start_matches(|c: char| c.is_whitespace() || c == '('))
}

fn top_level(path: &str) -> Option<&str> {
    let path = path.trim_matches(|c: char| c == '(' || c == ')');
    let top = path.split('.').next()?;
    let mut chars = top.chars();
    let first = chars.next()?;
    let valid = (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(top)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(source: &str) -> Vec<String> {
        imported_modules(source).into_iter().collect()
    }

    #[test]
    fn test_plain_and_dotted_imports() {
        let found = modules("import os\nimport numpy as np, torch.nn as nn\nfrom sklearn.model_selection import train_test_split\n");
        assert_eq!(found, vec!["numpy", "os", "sklearn", "torch"]);
    }

    #[test]
    fn test_relative_imports_ignored() {
        let found = modules("from . import utils\nfrom .models import Net\nfrom ..core import x\n");
        assert!(found.is_empty());
    }

    #[test]
    fn test_strings_and_comments_ignored() {
        let source = r#"
# import commented
doc = """
import inside_docstring
from fake import thing
"""
s = 'import quoted'
t = f"from formatted import x"
r = rb'import raw_bytes'
import real  # import trailing
"#;
        assert_eq!(modules(source), vec!["real"]);
    }

    #[test]
    fn test_parenthesised_and_continued_statements() {
        let source = "from scipy.optimize import (\n    minimize,\n    curve_fit,\n)\nimport pandas, \\\n    requests\n";
        assert_eq!(modules(source), vec!["pandas", "requests", "scipy"]);
    }

    #[test]
    fn test_indented_and_semicolon_imports() {
        let source = "try:\n    import ujson as json\nexcept ImportError:\n    import json\nx = 1; import yaml\n";
        assert_eq!(modules(source), vec!["json", "ujson", "yaml"]);
    }

    #[test]
    fn test_identifiers_starting_with_keyword() {
        let source = "important = 1\nfromage = 2\nimport_thing()\n";
        assert!(modules(source).is_empty());
    }

    #[test]
    fn test_escaped_quotes_in_strings() {
        let source = "s = 'it\\'s import x'\nimport tqdm\n";
        assert_eq!(modules(source), vec!["tqdm"]);
    }
}
