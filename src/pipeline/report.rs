use super::run::{RunOutcome, RunReport};
use crate::error::ErrorCode;
use serde::Serialize;

/// Aggregate of a batch: the full per-paper reports plus a one-row-per-paper
/// table for spreadsheets.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub runs: Vec<RunReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub degraded: usize,
    pub aborted: usize,
}

/// Flattened view of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRow {
    pub paper: String,
    pub repository_url: String,
    pub runtime_version: String,
    pub installed: usize,
    pub failed: usize,
    pub outcome: RunOutcome,
    pub error_code: Option<ErrorCode>,
    pub elapsed_ms: u64,
}

impl BatchRow {
    pub const HEADERS: [&'static str; 8] = [
        "paper",
        "repository_url",
        "runtime_version",
        "installed",
        "failed",
        "outcome",
        "error_code",
        "elapsed_ms",
    ];

    pub fn fields(&self) -> [String; 8] {
        [
            self.paper.clone(),
            self.repository_url.clone(),
            self.runtime_version.clone(),
            self.installed.to_string(),
            self.failed.to_string(),
            self.outcome.to_string(),
            self.error_code.map(|c| c.to_string()).unwrap_or_default(),
            self.elapsed_ms.to_string(),
        ]
    }
}

impl From<&RunReport> for BatchRow {
    fn from(report: &RunReport) -> Self {
        Self {
            paper: report.paper.clone(),
            repository_url: report.repository_url.clone().unwrap_or_default(),
            runtime_version: report
                .runtime_version
                .map(|v| v.to_string())
                .unwrap_or_default(),
            installed: report.installed.len(),
            failed: report.failed.len(),
            outcome: report.outcome,
            error_code: report.error_code,
            elapsed_ms: report.elapsed_ms,
        }
    }
}

impl BatchReport {
    pub fn new(runs: Vec<RunReport>) -> Self {
        let mut summary = BatchSummary {
            total: runs.len(),
            ..Default::default()
        };
        for run in &runs {
            match run.outcome {
                RunOutcome::Success => summary.success += 1,
                RunOutcome::Degraded => summary.degraded += 1,
                RunOutcome::Aborted => summary.aborted += 1,
            }
        }
        Self { summary, runs }
    }

    pub fn rows(&self) -> Vec<BatchRow> {
        self.runs.iter().map(BatchRow::from).collect()
    }

    pub fn all_aborted(&self) -> bool {
        self.summary.total > 0 && self.summary.aborted == self.summary.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeVersion;

    fn report(paper: &str, outcome: RunOutcome) -> RunReport {
        let mut report = RunReport::new(paper);
        report.outcome = outcome;
        report
    }

    #[test]
    fn test_summary_counts() {
        let batch = BatchReport::new(vec![
            report("a", RunOutcome::Success),
            report("b", RunOutcome::Degraded),
            report("c", RunOutcome::Aborted),
            report("d", RunOutcome::Success),
        ]);
        assert_eq!(
            batch.summary,
            BatchSummary {
                total: 4,
                success: 2,
                degraded: 1,
                aborted: 1
            }
        );
        assert!(!batch.all_aborted());
    }

    #[test]
    fn test_rows_follow_run_order() {
        let mut first = report("a", RunOutcome::Success);
        first.runtime_version = Some(RuntimeVersion::new(3, 11));
        first.repository_url = Some("https://github.com/u/a".to_string());
        let batch = BatchReport::new(vec![first, RunReport::cancelled("b")]);

        let rows = batch.rows();
        assert_eq!(rows[0].fields()[2], "3.11");
        assert_eq!(rows[1].paper, "b");
        assert_eq!(rows[1].fields()[6], "cancelled");
    }

    #[test]
    fn test_empty_batch_is_not_all_aborted() {
        assert!(!BatchReport::new(Vec::new()).all_aborted());
    }
}
