pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BatchArgs, CleanupArgs, CliArgs, Commands, InspectArgs, RunArgs};
pub use output::{OutputFormat, OutputFormatter};
