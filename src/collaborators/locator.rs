use super::cloner::looks_like_repository;
use async_trait::async_trait;

/// Finds the code repository that belongs to a paper.
#[async_trait]
pub trait RepositoryLocator: Send + Sync {
    async fn locate(&self, paper: &str) -> Option<String>;
}

/// Uses an explicit repository URL, or the paper source itself when that is
/// already a repository URL. Paper text is never parsed.
#[derive(Debug, Clone, Default)]
pub struct OverrideLocator {
    repository: Option<String>,
}

impl OverrideLocator {
    pub fn new(repository: Option<String>) -> Self {
        Self {
            repository: repository.filter(|r| !r.trim().is_empty()),
        }
    }
}

#[async_trait]
impl RepositoryLocator for OverrideLocator {
    async fn locate(&self, paper: &str) -> Option<String> {
        if let Some(url) = &self.repository {
            return Some(url.trim().to_string());
        }
        looks_like_repository(paper).then(|| paper.trim().to_string())
    }
}
