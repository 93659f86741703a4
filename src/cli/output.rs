//! Output formatting for run, batch, inspect and cleanup results
//!
//! JSON and YAML are straight serializations of the report types. The human
//! format is a terminal summary; CSV is the flat per-paper batch table.
//!
//! # Example
//!
//! ```ignore
//! use reprobox::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Json);
//! let output = formatter.format_run(&report)?;
//! println!("{}", output);
//! ```

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt::Write as _;

use crate::pipeline::{BatchReport, BatchRow, Inspection, RunOutcome, RunReport};
use crate::workspace::CleanupReport;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
    /// One row per paper; batch results only
    Csv,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_run(&self, report: &RunReport) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_run_human(report)),
            OutputFormat::Csv => bail!("CSV output is only available for batch results"),
            _ => self.serialize(report, "run report"),
        }
    }

    pub fn format_batch(&self, report: &BatchReport) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_batch_human(report)),
            OutputFormat::Csv => Ok(format_csv(&report.rows())),
            _ => self.serialize(report, "batch report"),
        }
    }

    pub fn format_inspection(&self, inspection: &Inspection) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_inspection_human(inspection)),
            OutputFormat::Csv => bail!("CSV output is only available for batch results"),
            _ => self.serialize(inspection, "inspection"),
        }
    }

    pub fn format_cleanup(&self, report: &CleanupReport) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_cleanup_human(report)),
            OutputFormat::Csv => bail!("CSV output is only available for batch results"),
            _ => self.serialize(report, "cleanup report"),
        }
    }

    fn serialize<T: Serialize>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => {
                serde_yaml::to_string(value).with_context(|| format!("Failed to serialize {} to YAML", what))
            }
            _ => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
        }
    }

    fn format_run_human(&self, report: &RunReport) -> String {
        let mut output = String::new();

        let header = match report.outcome {
            RunOutcome::Success => "\u{2713} Environment Ready",
            RunOutcome::Degraded => "\u{26A0} Environment Ready (Degraded)",
            RunOutcome::Aborted => "\u{2717} Run Aborted",
        };
        let _ = writeln!(output, "{}\n{}\n", header, RULE);

        let _ = writeln!(output, "Paper:       {}", report.paper);
        let _ = writeln!(
            output,
            "Repository:  {}",
            report.repository_url.as_deref().unwrap_or("(not found)")
        );
        let _ = writeln!(
            output,
            "Python:      {}",
            report
                .runtime_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(not selected)".to_string())
        );
        if let Some(workspace) = &report.workspace {
            let _ = writeln!(output, "Workspace:   {}", workspace.display());
        }
        output.push('\n');

        if let Some(error) = &report.error {
            let code = report.error_code.map(|c| c.to_string()).unwrap_or_default();
            let _ = writeln!(output, "Error [{}]: {}\n", code, error);
        }

        if !report.installed.is_empty() || !report.failed.is_empty() {
            let _ = writeln!(
                output,
                "Packages: {} installed, {} failed",
                report.installed.len(),
                report.failed.len()
            );
            for (i, failed) in report.failed.iter().enumerate() {
                let connector = if i == report.failed.len() - 1 { "\u{2514}" } else { "\u{251C}" };
                let marker = if failed.required { " (required)" } else { "" };
                let _ = writeln!(
                    output,
                    "{}\u{2500} {}{}: {}",
                    connector, failed.name, marker, failed.reason
                );
            }
            output.push('\n');
        }

        if !report.conflicts.is_empty() {
            output.push_str("Conflicts:\n");
            for conflict in &report.conflicts {
                let _ = writeln!(output, "  - {}", conflict);
            }
            output.push('\n');
        }

        if let Some(demo) = &report.demo_path {
            let _ = writeln!(output, "Demo script: {}", demo.display());
        }
        if let Some(execution) = &report.execution {
            let status = match (&execution.error, execution.exit_code) {
                (Some(error), _) => format!("failed: {}", error),
                (None, Some(code)) => format!("exit code {}", code),
                (None, None) => "finished".to_string(),
            };
            let _ = writeln!(output, "Demo run:    {}", status);
        }

        if !report.warnings.is_empty() {
            output.push_str("\n\u{26A0} Warnings:\n");
            for warning in &report.warnings {
                let _ = writeln!(output, "  - {}", warning);
            }
        }

        // The error line is already printed; keep only the advice.
        if let Some(help) = report.help.as_deref().and_then(|h| h.find("Help:").map(|i| &h[i..])) {
            let _ = writeln!(output, "\n{}", help);
        }

        let _ = writeln!(output, "\nProcessed in {}ms", report.elapsed_ms);
        output
    }

    fn format_batch_human(&self, report: &BatchReport) -> String {
        let mut output = String::new();
        let summary = &report.summary;
        let _ = writeln!(output, "Batch Results\n{}\n", RULE);
        let _ = writeln!(
            output,
            "{} papers: {} success, {} degraded, {} aborted\n",
            summary.total, summary.success, summary.degraded, summary.aborted
        );
        for row in report.rows() {
            let symbol = match row.outcome {
                RunOutcome::Success => "\u{2713}",
                RunOutcome::Degraded => "\u{26A0}",
                RunOutcome::Aborted => "\u{2717}",
            };
            let detail = match row.error_code {
                Some(code) => code.to_string(),
                None => format!(
                    "python {}, {} installed, {} failed",
                    row.runtime_version, row.installed, row.failed
                ),
            };
            let _ = writeln!(output, "{} {}  {}", symbol, row.paper, detail);
        }
        output
    }

    fn format_inspection_human(&self, inspection: &Inspection) -> String {
        let resolution = &inspection.resolution;
        let mut output = String::new();
        let _ = writeln!(output, "Requirements\n{}\n", RULE);

        match (&inspection.runtime, &inspection.runtime_error) {
            (Some(runtime), _) => {
                let _ = writeln!(output, "Selected Python: {}", runtime);
            }
            (None, Some(error)) => {
                let _ = writeln!(output, "Selected Python: none ({})", error);
            }
            (None, None) => {}
        }
        for rejected in &inspection.rejected {
            let _ = writeln!(
                output,
                "  {} rejected: {}",
                rejected.runtime,
                rejected.blocking.join(", ")
            );
        }

        if let Some(declared) = &resolution.declared_runtime {
            let _ = writeln!(
                output,
                "Declared Python: {} ({})",
                declared.constraint, declared.source
            );
        }
        if let Some(entry) = &resolution.entry_point {
            let _ = writeln!(output, "Entry point:     {}", entry.display());
        }
        output.push('\n');

        for requirement in resolution.requirements.install_order() {
            let marker = if resolution.required.contains(&requirement.name) {
                " *"
            } else {
                ""
            };
            let _ = writeln!(
                output,
                "  {}{}  [{}]",
                requirement.install_spec(),
                marker,
                requirement.source
            );
        }
        if resolution.requirements.is_empty() {
            output.push_str("  (none)\n");
        } else if !resolution.required.is_empty() {
            output.push_str("\n  * imported by the entry point\n");
        }

        if !resolution.requirements.conflicts().is_empty() {
            output.push_str("\nConflicts:\n");
            for conflict in resolution.requirements.conflicts() {
                let _ = writeln!(output, "  - {}", conflict);
            }
        }
        if !resolution.ambiguities.is_empty() {
            output.push_str("\nAmbiguous imports:\n");
            for ambiguity in &resolution.ambiguities {
                let _ = writeln!(
                    output,
                    "  - {} -> {} (candidates: {})",
                    ambiguity.module,
                    ambiguity.chosen,
                    ambiguity.candidates.join(", ")
                );
            }
        }
        let mut warnings = resolution.warnings();
        warnings.extend(inspection.warnings.iter().cloned());
        if !warnings.is_empty() {
            output.push_str("\n\u{26A0} Warnings:\n");
            for warning in warnings {
                let _ = writeln!(output, "  - {}", warning);
            }
        }
        output
    }

    fn format_cleanup_human(&self, report: &CleanupReport) -> String {
        let mut output = String::new();
        if report.removed.is_empty() {
            output.push_str("Nothing to remove\n");
        } else {
            let _ = writeln!(output, "Removed {} workspace(s):", report.removed_count());
            for path in &report.removed {
                let _ = writeln!(output, "  - {}", path.display());
            }
        }
        if !report.skipped.is_empty() {
            output.push_str("Skipped:\n");
            for path in &report.skipped {
                let _ = writeln!(output, "  - {}", path.display());
            }
        }
        output
    }
}

fn format_csv(rows: &[BatchRow]) -> String {
    let mut output = BatchRow::HEADERS.join(",");
    output.push('\n');
    for row in rows {
        let fields: Vec<String> = row.fields().iter().map(|f| csv_field(f)).collect();
        output.push_str(&fields.join(","));
        output.push('\n');
    }
    output
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeVersion;

    fn create_test_report() -> RunReport {
        let mut report = RunReport::new("paper.pdf");
        report.outcome = RunOutcome::Success;
        report.repository_url = Some("https://github.com/u/repo".to_string());
        report.runtime_version = Some(RuntimeVersion::new(3, 11));
        report.warnings.push("requirements.txt: skipped line".to_string());
        report.elapsed_ms = 1200;
        report
    }

    #[test]
    fn test_json_format() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_run(&create_test_report()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["runtime_version"], "3.11");
        assert_eq!(json["outcome"], "success");
    }

    #[test]
    fn test_yaml_format() {
        let formatter = OutputFormatter::new(OutputFormat::Yaml);
        let output = formatter.format_run(&create_test_report()).unwrap();
        assert!(output.contains("paper: paper.pdf"));
        assert!(output.contains("outcome: success"));
    }

    #[test]
    fn test_human_format() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_run(&create_test_report()).unwrap();
        assert!(output.contains("Environment Ready"));
        assert!(output.contains("Python:      3.11"));
        assert!(output.contains("Warnings"));
        assert!(output.contains("Processed in 1200ms"));
    }

    #[test]
    fn test_human_format_aborted_includes_help() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_run(&RunReport::cancelled("paper.pdf")).unwrap();
        assert!(output.contains("Run Aborted"));
        assert!(output.contains("Error [cancelled]"));
    }

    #[test]
    fn test_csv_rejected_for_run() {
        let formatter = OutputFormatter::new(OutputFormat::Csv);
        assert!(formatter.format_run(&create_test_report()).is_err());
    }

    #[test]
    fn test_batch_csv() {
        let mut quoted = create_test_report();
        quoted.paper = "Smith, et al.pdf".to_string();
        let batch = BatchReport::new(vec![quoted, RunReport::cancelled("b.pdf")]);

        let output = OutputFormatter::new(OutputFormat::Csv)
            .format_batch(&batch)
            .unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], BatchRow::HEADERS.join(","));
        assert!(lines[1].starts_with("\"Smith, et al.pdf\",https://github.com/u/repo,3.11,"));
        assert!(lines[2].starts_with("b.pdf,,,0,0,aborted,cancelled,"));
    }

    #[test]
    fn test_csv_field_escapes_quotes() {
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("plain"), "plain");
    }

    #[test]
    fn test_cleanup_human() {
        let report = CleanupReport::default();
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_cleanup(&report)
            .unwrap();
        assert_eq!(output, "Nothing to remove\n");
    }
}
