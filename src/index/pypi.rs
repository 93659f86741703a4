//! PyPI JSON API client

use super::{IndexError, PackageIndex, Release};
use crate::requirement::{PackageName, SpecifierSet, Version};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    releases: BTreeMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    #[serde(default)]
    requires_python: Option<String>,
    #[serde(default)]
    yanked: bool,
}

/// Reads `GET {base_url}/{name}/json`.
///
/// Shares one connection pool across lookups; safe to use behind an `Arc`.
pub struct PyPiIndex {
    base_url: String,
    http_client: Client,
    timeout: Duration,
}

impl PyPiIndex {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IndexError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reprobox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IndexError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            timeout,
        })
    }

    fn project_url(&self, package: &PackageName) -> String {
        format!("{}/{}/json", self.base_url, package)
    }
}

#[async_trait]
impl PackageIndex for PyPiIndex {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn releases(&self, package: &PackageName) -> Result<Vec<Release>, IndexError> {
        let url = self.project_url(package);
        debug!("Fetching release metadata from {}", url);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                IndexError::Timeout(self.timeout)
            } else {
                IndexError::Network {
                    message: e.to_string(),
                }
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(IndexError::NotFound(package.to_string())),
            status if !status.is_success() => {
                return Err(IndexError::Network {
                    message: format!("{} returned HTTP {}", url, status),
                })
            }
            _ => {}
        }

        let body: ProjectResponse =
            response
                .json()
                .await
                .map_err(|e| IndexError::InvalidResponse {
                    message: e.to_string(),
                })?;
        Ok(convert_releases(body))
    }
}

/// Drops releases without files or with non-PEP 440 version strings.
fn convert_releases(body: ProjectResponse) -> Vec<Release> {
    let mut releases: Vec<Release> = body
        .releases
        .into_iter()
        .filter(|(_, files)| !files.is_empty())
        .filter_map(|(version, files)| {
            let version = version.parse::<Version>().ok()?;
            let requires_python = files
                .iter()
                .filter_map(|f| f.requires_python.as_deref())
                .map(str::trim)
                .find(|r| !r.is_empty())
                .and_then(|r| r.parse::<SpecifierSet>().ok());
            Some(Release {
                version,
                requires_python,
                yanked: files.iter().all(|f| f.yanked),
            })
        })
        .collect();
    releases.sort_by(|a, b| a.version.cmp(&b.version));
    releases
}
