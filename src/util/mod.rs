//! Utility modules for reprobox
//!
//! - Structured logging setup and configuration
//! - Subprocess execution with timeouts

pub mod logging;
pub mod process;

// Re-export commonly used items
pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
pub use process::{run_with_timeout, CommandOutput, ProcessError};
