//! reprobox - reproduce the software environment of a research paper's code
//!
//! Given a paper and its repository, reprobox clones the code, works out
//! which Python packages it needs from manifests and from the imports in its
//! source, picks an interpreter version every pinned package supports, and
//! provisions an isolated virtual environment. Packages that cannot be
//! installed are reported rather than aborting the run, unless the entry
//! point imports them.
//!
//! # Core Concepts
//!
//! - **Requirement**: a package name with an optional version constraint and
//!   the place it was declared or inferred
//! - **Requirement Set**: one merged requirement per package, plus the
//!   conflicts resolved along the way
//! - **Runtime Selection**: the newest supported Python that satisfies the
//!   declared range and has a release of every pinned package
//! - **Workspace**: an ephemeral or persistent directory a run owns exclusively
//!
//! # Example Usage
//!
//! ```ignore
//! use reprobox::{Pipeline, ReproboxConfig, RunRequest};
//!
//! async fn reproduce(url: &str) -> anyhow::Result<()> {
//!     let config = ReproboxConfig::default();
//!     let pipeline = Pipeline::from_config(&config)?;
//!     let report = pipeline.run(&RunRequest::new(url)).await;
//!     println!("{}: {}", report.paper, report.outcome);
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`manifest`], [`imports`], [`merge`]: what a repository needs
//! - [`index`], [`runtime`]: which Python it can run on
//! - [`provision`], [`workspace`]: where and how it gets installed
//! - [`pipeline`]: single runs and batches

pub mod cli;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod imports;
pub mod index;
pub mod manifest;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod provision;
pub mod requirement;
pub mod runtime;
pub mod snapshot;
pub mod util;
pub mod workspace;

pub use config::{ConfigError, ReproboxConfig};
pub use error::{ErrorCode, RunError};
pub use merge::{RequirementMerger, RequirementSet};
pub use pipeline::{BatchReport, BatchRunner, Pipeline, PipelineConfig, RunOutcome, RunReport, RunRequest};
pub use provision::{Provisioner, ResolvedEnvironment};
pub use requirement::{PackageName, Requirement};
pub use runtime::{select_runtime, RuntimeCatalog, RuntimeVersion};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};
pub use workspace::{Workspace, WorkspaceGuard, WorkspaceManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_reprobox() {
        assert_eq!(NAME, "reprobox");
    }
}
