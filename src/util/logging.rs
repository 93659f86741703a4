//! Structured logging setup for reprobox
//!
//! Logs always go to stderr so that reports written to stdout stay
//! machine-readable. Output is either human-readable or JSON, filtered by
//! `RUST_LOG` when set and by the configured level otherwise.
//!
//! ```no_run
//! use reprobox::util::logging;
//! use tracing::info;
//!
//! logging::init_from_env();
//! info!(paper = "paper.pdf", "Starting run");
//! ```

use std::env;
use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

/// Dependencies whose debug output drowns ours unless `RUST_LOG` asks for it.
const NOISY_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for reprobox's own events
    pub level: Level,

    /// Emit one JSON object per event
    pub use_json: bool,

    /// Include the module target (e.g., reprobox::provision) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread ID and name in logs
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with full metadata, for batch runs collected by a log shipper.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }

    /// Reads `REPROBOX_LOG_LEVEL` and `REPROBOX_LOG_JSON`.
    pub fn from_env() -> Self {
        let level = env::var("REPROBOX_LOG_LEVEL")
            .map(|v| parse_level(&v))
            .unwrap_or(Level::INFO);
        let use_json = env::var("REPROBOX_LOG_JSON")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            level,
            use_json,
            ..Default::default()
        }
    }
}

/// Parses a log level, case-insensitively. Unknown values fall back to INFO.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn build_filter(level: Level, honour_rust_log: bool) -> EnvFilter {
    let mut filter = if honour_rust_log {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("warn")
    };
    if let Ok(directive) = format!("reprobox={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    if !honour_rust_log {
        for target in NOISY_TARGETS {
            if let Ok(directive) = format!("{}=warn", target).parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level, env::var("RUST_LOG").is_ok());

        let layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_thread_names(config.include_thread_ids);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        } else {
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from `REPROBOX_LOG_LEVEL`, `REPROBOX_LOG_JSON` and `RUST_LOG`.
pub fn init_from_env() {
    init_logging(LoggingConfig::from_env());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("info"), Level::INFO);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_case_insensitive() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
    }

    #[test]
    fn test_parse_level_invalid() {
        assert_eq!(parse_level("loud"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_presets() {
        let production = LoggingConfig::production();
        assert!(production.use_json);
        assert!(production.include_location);

        let development = LoggingConfig::development();
        assert_eq!(development.level, Level::DEBUG);
        assert!(!development.use_json);

        assert_eq!(LoggingConfig::with_level(Level::WARN).level, Level::WARN);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("REPROBOX_LOG_LEVEL", "debug");
        env::set_var("REPROBOX_LOG_JSON", "true");
        let config = LoggingConfig::from_env();
        env::remove_var("REPROBOX_LOG_LEVEL");
        env::remove_var("REPROBOX_LOG_JSON");

        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        env::remove_var("REPROBOX_LOG_LEVEL");
        env::remove_var("REPROBOX_LOG_JSON");
        let config = LoggingConfig::from_env();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
    }

    #[test]
    fn test_filter_caps_noisy_targets() {
        let rendered = build_filter(Level::DEBUG, false).to_string();
        assert!(rendered.contains("reprobox=debug"));
        assert!(rendered.contains("hyper=warn"));
    }
}
