//! Collaborators at the edges of a run: cloning, repository lookup, demo
//! generation and demo execution.

mod cloner;
mod demo;
mod executor;
mod locator;

pub use cloner::{looks_like_repository, repository_name, CloneError, GitCloner, RepositoryCloner};
pub use demo::{CommandDemoGenerator, DemoError, DemoGenerator};
pub use executor::{ExecutionError, ExecutionOutcome, ScriptExecutor, VenvScriptExecutor};
pub use locator::{OverrideLocator, RepositoryLocator};
