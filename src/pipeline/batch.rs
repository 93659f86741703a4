use super::report::BatchReport;
use super::run::{Pipeline, RunReport, RunRequest};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BatchParseError {
    #[error("Failed to read batch file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: expected '<paper> [<repository-url>]', got '{content}'")]
    InvalidLine { line: usize, content: String },
}

/// One line of a batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub paper: String,
    pub repository: Option<String>,
}

impl BatchEntry {
    pub fn new(paper: impl Into<String>) -> Self {
        Self {
            paper: paper.into(),
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }
}

/// Parses `<paper> [<repository-url>]` lines. Blank lines and `#` comments
/// are skipped.
pub fn parse_batch(content: &str) -> Result<Vec<BatchEntry>, BatchParseError> {
    let mut entries = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let entry = match fields.as_slice() {
            [paper] => BatchEntry::new(*paper),
            [paper, repository] => BatchEntry::new(*paper).with_repository(*repository),
            _ => {
                return Err(BatchParseError::InvalidLine {
                    line: idx + 1,
                    content: line.to_string(),
                })
            }
        };
        entries.push(entry);
    }
    Ok(entries)
}

pub fn parse_batch_file(path: &Path) -> Result<Vec<BatchEntry>, BatchParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| BatchParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_batch(&content)
}

/// Runs many papers with bounded concurrency. Each paper gets its own
/// ephemeral workspace; a failing paper never affects the others.
pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    jobs: usize,
    auto_run: bool,
    output_dir: Option<PathBuf>,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<Pipeline>, jobs: usize) -> Self {
        Self {
            pipeline,
            jobs: jobs.max(1),
            auto_run: false,
            output_dir: None,
        }
    }

    pub fn with_auto_run(mut self, auto_run: bool) -> Self {
        self.auto_run = auto_run;
        self
    }

    /// Demo scripts are copied to `<output_dir>/<row index>/`.
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Runs until every paper finishes or Ctrl-C arrives.
    pub async fn run(&self, entries: Vec<BatchEntry>) -> BatchReport {
        self.run_until(entries, async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler; never cancel.
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs until every paper finishes or `shutdown` resolves. In-flight runs
    /// are aborted on shutdown; dropping their futures drops the workspace
    /// guards, which removes the ephemeral roots. Unfinished rows are
    /// reported as cancelled. Rows keep input order.
    pub async fn run_until<F>(&self, entries: Vec<BatchEntry>, shutdown: F) -> BatchReport
    where
        F: Future<Output = ()>,
    {
        info!(papers = entries.len(), jobs = self.jobs, "Starting batch");
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut slots: Vec<Option<RunReport>> = vec![None; entries.len()];
        let mut tasks = JoinSet::new();

        for (idx, entry) in entries.iter().enumerate() {
            let pipeline = self.pipeline.clone();
            let semaphore = semaphore.clone();
            let request = self.request_for(idx, entry);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, RunReport::cancelled(&request.paper));
                };
                debug!(paper = %request.paper, "Batch slot acquired");
                (idx, pipeline.run(&request).await)
            });
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((idx, report))) => slots[idx] = Some(report),
                    Some(Err(e)) => warn!(error = %e, "Batch task failed to complete"),
                    None => break,
                },
                _ = &mut shutdown => {
                    warn!(remaining = tasks.len(), "Batch cancelled; aborting in-flight runs");
                    semaphore.close();
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        let runs = slots
            .into_iter()
            .zip(&entries)
            .map(|(slot, entry)| slot.unwrap_or_else(|| RunReport::cancelled(&entry.paper)))
            .collect();
        BatchReport::new(runs)
    }

    fn request_for(&self, idx: usize, entry: &BatchEntry) -> RunRequest {
        let mut request = RunRequest::new(&entry.paper).with_auto_run(self.auto_run);
        request.repository = entry.repository.clone();
        if let Some(dir) = &self.output_dir {
            request.output_dir = Some(dir.join(idx.to_string()));
        }
        request
    }
}
