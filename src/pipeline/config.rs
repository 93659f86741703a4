use crate::config::ReproboxConfig;
use crate::provision::RetryPolicy;
use std::time::Duration;

/// Settings shared by every run a [`super::Pipeline`] executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub download_concurrency: usize,
    pub index_concurrency: usize,
    pub index_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            download_concurrency: 4,
            index_concurrency: 8,
            index_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ReproboxConfig) -> Self {
        Self::new()
            .with_retry_policy(config.retry_policy())
            .with_download_concurrency(config.download_concurrency)
            .with_index_timeout(config.index_timeout())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_download_concurrency(mut self, download_concurrency: usize) -> Self {
        self.download_concurrency = download_concurrency.max(1);
        self
    }

    pub fn with_index_concurrency(mut self, index_concurrency: usize) -> Self {
        self.index_concurrency = index_concurrency.max(1);
        self
    }

    pub fn with_index_timeout(mut self, index_timeout: Duration) -> Self {
        self.index_timeout = index_timeout;
        self
    }
}
