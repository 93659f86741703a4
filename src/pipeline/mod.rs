//! The end-to-end flow for one paper and for a batch of papers.

pub mod batch;
pub mod config;
pub mod report;
pub mod resolve;
pub mod run;

pub use batch::{parse_batch, parse_batch_file, BatchEntry, BatchParseError, BatchRunner};
pub use config::PipelineConfig;
pub use report::{BatchReport, BatchRow, BatchSummary};
pub use resolve::{resolve_requirements, Resolution};
pub use run::{ExecutionReport, Inspection, Pipeline, RunOutcome, RunReport, RunRequest, DEMO_FILE};
