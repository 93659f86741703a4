//! Configuration management for reprobox
//!
//! Settings load from environment variables with sensible defaults. CLI flags
//! override them afterwards.
//!
//! # Environment Variables
//!
//! - `REPROBOX_WORKSPACE_DIR`: persistent workspace roots - default: "./workspace"
//! - `REPROBOX_TMP_DIR`: ephemeral workspace roots - default: system temp dir + "reprobox"
//! - `REPROBOX_INSTALL_RETRIES`: attempts per package - default: "3"
//! - `REPROBOX_RETRY_BASE_MS`: first retry backoff - default: "1000"
//! - `REPROBOX_INSTALL_TIMEOUT`: seconds per pip invocation - default: "600"
//! - `REPROBOX_CLONE_TIMEOUT`: seconds for `git clone` - default: "300"
//! - `REPROBOX_EXEC_TIMEOUT`: seconds for demo generation and execution - default: "600"
//! - `REPROBOX_INDEX_TIMEOUT`: seconds per package index request - default: "30"
//! - `REPROBOX_MAX_CONCURRENT_RUNS`: batch worker pool size - default: "2"
//! - `REPROBOX_DOWNLOAD_CONCURRENCY`: parallel downloads per run - default: "4"
//! - `REPROBOX_INDEX_URL`: package index JSON API - default: "https://pypi.org/pypi"
//! - `REPROBOX_OFFLINE`: skip index lookups (true|false) - default: "false"
//! - `REPROBOX_DEMO_COMMAND`: external demo generator command - optional
//! - `REPROBOX_LOG_LEVEL`: logging level - default: "info"
//!
//! Paths starting with `~/` are expanded to the home directory.

use crate::index::DEFAULT_INDEX_URL;
use crate::provision::RetryPolicy;
use crate::workspace::WorkspaceManager;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_WORKSPACE_DIR: &str = "./workspace";
const DEFAULT_INSTALL_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 1000;
const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;
const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 600;
const DEFAULT_INDEX_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_RUNS: usize = 2;
const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound for the batch worker pool.
pub const MAX_CONCURRENT_RUNS: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReproboxConfig {
    pub workspace_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub install_retries: u32,
    pub retry_base_ms: u64,
    pub install_timeout_secs: u64,
    pub clone_timeout_secs: u64,
    pub exec_timeout_secs: u64,
    pub index_timeout_secs: u64,
    pub max_concurrent_runs: usize,
    pub download_concurrency: usize,
    pub index_url: String,
    pub offline: bool,
    pub demo_command: Option<String>,
    pub log_level: String,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| expand_home(&v))
}

/// Expands a leading `~/` using the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl Default for ReproboxConfig {
    /// Loads from `REPROBOX_*` environment variables, falling back to defaults
    /// for anything missing or unparsable.
    fn default() -> Self {
        Self {
            workspace_dir: env_path("REPROBOX_WORKSPACE_DIR")
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE_DIR)),
            tmp_dir: env_path("REPROBOX_TMP_DIR").unwrap_or_else(|| env::temp_dir().join("reprobox")),
            install_retries: env_parse("REPROBOX_INSTALL_RETRIES").unwrap_or(DEFAULT_INSTALL_RETRIES),
            retry_base_ms: env_parse("REPROBOX_RETRY_BASE_MS").unwrap_or(DEFAULT_RETRY_BASE_MS),
            install_timeout_secs: env_parse("REPROBOX_INSTALL_TIMEOUT")
                .unwrap_or(DEFAULT_INSTALL_TIMEOUT_SECS),
            clone_timeout_secs: env_parse("REPROBOX_CLONE_TIMEOUT").unwrap_or(DEFAULT_CLONE_TIMEOUT_SECS),
            exec_timeout_secs: env_parse("REPROBOX_EXEC_TIMEOUT").unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS),
            index_timeout_secs: env_parse("REPROBOX_INDEX_TIMEOUT").unwrap_or(DEFAULT_INDEX_TIMEOUT_SECS),
            max_concurrent_runs: env_parse("REPROBOX_MAX_CONCURRENT_RUNS")
                .unwrap_or(DEFAULT_MAX_CONCURRENT_RUNS),
            download_concurrency: env_parse("REPROBOX_DOWNLOAD_CONCURRENCY")
                .unwrap_or(DEFAULT_DOWNLOAD_CONCURRENCY),
            index_url: env::var("REPROBOX_INDEX_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string()),
            offline: env_parse("REPROBOX_OFFLINE").unwrap_or(false),
            demo_command: env::var("REPROBOX_DEMO_COMMAND")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_level: env::var("REPROBOX_LOG_LEVEL")
                .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
        }
    }
}

impl ReproboxConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.install_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "Install retries must be at least 1".to_string(),
            ));
        }
        if self.install_retries > 10 {
            return Err(ConfigError::ValidationFailed(
                "Install retries cannot exceed 10".to_string(),
            ));
        }

        for (name, secs) in [
            ("Install timeout", self.install_timeout_secs),
            ("Clone timeout", self.clone_timeout_secs),
            ("Execution timeout", self.exec_timeout_secs),
            ("Index timeout", self.index_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be at least 1 second",
                    name
                )));
            }
        }

        if !(1..=MAX_CONCURRENT_RUNS).contains(&self.max_concurrent_runs) {
            return Err(ConfigError::ValidationFailed(format!(
                "Concurrent runs must be between 1 and {}",
                MAX_CONCURRENT_RUNS
            )));
        }
        if self.download_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "Download concurrency must be at least 1".to_string(),
            ));
        }

        if !self.index_url.starts_with("http://") && !self.index_url.starts_with("https://") {
            return Err(ConfigError::ParseError {
                field: "REPROBOX_INDEX_URL".to_string(),
                error: format!("'{}' is not an http(s) URL", self.index_url),
            });
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.install_retries, Duration::from_millis(self.retry_base_ms))
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }

    pub fn workspace_manager(&self) -> WorkspaceManager {
        WorkspaceManager::new(&self.tmp_dir, &self.workspace_dir)
    }

    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("workspace_dir".to_string(), self.workspace_dir.display().to_string());
        map.insert("tmp_dir".to_string(), self.tmp_dir.display().to_string());
        map.insert("install_retries".to_string(), self.install_retries.to_string());
        map.insert("retry_base_ms".to_string(), self.retry_base_ms.to_string());
        map.insert("install_timeout_secs".to_string(), self.install_timeout_secs.to_string());
        map.insert("clone_timeout_secs".to_string(), self.clone_timeout_secs.to_string());
        map.insert("exec_timeout_secs".to_string(), self.exec_timeout_secs.to_string());
        map.insert("index_timeout_secs".to_string(), self.index_timeout_secs.to_string());
        map.insert("max_concurrent_runs".to_string(), self.max_concurrent_runs.to_string());
        map.insert("download_concurrency".to_string(), self.download_concurrency.to_string());
        map.insert("index_url".to_string(), self.index_url.clone());
        map.insert("offline".to_string(), self.offline.to_string());
        if let Some(ref command) = self.demo_command {
            map.insert("demo_command".to_string(), command.clone());
        }
        map.insert("log_level".to_string(), self.log_level.clone());
        map
    }
}

impl fmt::Display for ReproboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reprobox Configuration:")?;
        for (key, value) in self.to_display_map() {
            writeln!(f, "  {}: {}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = vec![
            EnvGuard::unset("REPROBOX_WORKSPACE_DIR"),
            EnvGuard::unset("REPROBOX_INSTALL_RETRIES"),
            EnvGuard::unset("REPROBOX_MAX_CONCURRENT_RUNS"),
            EnvGuard::unset("REPROBOX_INDEX_URL"),
            EnvGuard::unset("REPROBOX_OFFLINE"),
            EnvGuard::unset("REPROBOX_DEMO_COMMAND"),
            EnvGuard::unset("REPROBOX_LOG_LEVEL"),
        ];

        let config = ReproboxConfig::default();

        assert_eq!(config.workspace_dir, PathBuf::from(DEFAULT_WORKSPACE_DIR));
        assert_eq!(config.install_retries, DEFAULT_INSTALL_RETRIES);
        assert_eq!(config.max_concurrent_runs, DEFAULT_MAX_CONCURRENT_RUNS);
        assert_eq!(config.index_url, DEFAULT_INDEX_URL);
        assert!(!config.offline);
        assert!(config.demo_command.is_none());
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _guards = vec![
            EnvGuard::set("REPROBOX_WORKSPACE_DIR", "/data/ws"),
            EnvGuard::set("REPROBOX_TMP_DIR", "/scratch"),
            EnvGuard::set("REPROBOX_INSTALL_RETRIES", "5"),
            EnvGuard::set("REPROBOX_RETRY_BASE_MS", "250"),
            EnvGuard::set("REPROBOX_MAX_CONCURRENT_RUNS", "4"),
            EnvGuard::set("REPROBOX_OFFLINE", "true"),
            EnvGuard::set("REPROBOX_DEMO_COMMAND", "gen-demo --fast"),
            EnvGuard::set("REPROBOX_LOG_LEVEL", "DEBUG"),
        ];

        let config = ReproboxConfig::default();

        assert_eq!(config.workspace_dir, PathBuf::from("/data/ws"));
        assert_eq!(config.tmp_dir, PathBuf::from("/scratch"));
        assert_eq!(config.install_retries, 5);
        assert_eq!(config.max_concurrent_runs, 4);
        assert!(config.offline);
        assert_eq!(config.demo_command.as_deref(), Some("gen-demo --fast"));
        assert_eq!(config.log_level, "debug");

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn test_unparsable_values_fall_back() {
        let _guards = vec![
            EnvGuard::set("REPROBOX_INSTALL_RETRIES", "many"),
            EnvGuard::set("REPROBOX_OFFLINE", "yes please"),
        ];

        let config = ReproboxConfig::default();
        assert_eq!(config.install_retries, DEFAULT_INSTALL_RETRIES);
        assert!(!config.offline);
    }

    #[test]
    #[serial]
    fn test_validation_rejects_bad_values() {
        let base = ReproboxConfig::default();

        let mut config = base.clone();
        config.install_retries = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.max_concurrent_runs = MAX_CONCURRENT_RUNS + 1;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.clone_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.index_url = "ftp://mirror".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ParseError { .. })));

        let mut config = base;
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/ws"), home.join("ws"));
        }
    }

    #[test]
    #[serial]
    fn test_config_display() {
        let config = ReproboxConfig::default();
        let display = format!("{}", config);
        assert!(display.contains("Reprobox Configuration:"));
        assert!(display.contains("index_url"));
    }
}
