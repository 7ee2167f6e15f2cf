use crate::error::{PipelineError, Result};
use crate::models::RawContent;
use crate::source::{AccessMethod, SourceDescriptor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One access path: turns a source descriptor into raw content.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    /// Returns the access method this scraper serves
    fn method(&self) -> AccessMethod;

    /// Fetch raw content for `source`
    async fn fetch(&self, source: &SourceDescriptor) -> Result<RawContent>;

    /// Release any resources held across sources
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Registry of access paths keyed by access method
pub struct ScraperRegistry {
    scrapers: HashMap<AccessMethod, Arc<dyn SourceScraper>>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self {
            scrapers: HashMap::new(),
        }
    }

    pub fn register(&mut self, scraper: Arc<dyn SourceScraper>) {
        let method = scraper.method();
        if self.scrapers.insert(method, scraper).is_some() {
            tracing::warn!("Replaced scraper for {} access", method.as_str());
        }
    }

    pub fn get(&self, method: AccessMethod) -> Result<&Arc<dyn SourceScraper>> {
        self.scrapers
            .get(&method)
            .ok_or_else(|| PipelineError::Fetch(format!("No scraper registered for {} access", method.as_str())))
    }

    /// Run every scraper's cleanup, returning the first failure after all ran.
    pub async fn cleanup_all(&self) -> Result<()> {
        let mut first_error = None;
        for scraper in self.scrapers.values() {
            if let Err(e) = scraper.cleanup().await {
                tracing::error!("Cleanup of {} scraper failed: {}", scraper.method().as_str(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn list_methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.scrapers.keys().map(|m| m.as_str()).collect();
        methods.sort();
        methods
    }
}

impl Default for ScraperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticScraper;

    #[tokio::test]
    async fn test_register_and_get() {
        let mut registry = ScraperRegistry::new();
        registry.register(Arc::new(StaticScraper::new(AccessMethod::Http)));

        assert!(registry.get(AccessMethod::Http).is_ok());
        assert!(registry.get(AccessMethod::AsyncJob).is_err());
        assert_eq!(registry.list_methods(), vec!["http"]);
    }

    #[tokio::test]
    async fn test_cleanup_all_reports_failure_after_running_everything() {
        let failing = Arc::new(StaticScraper::new(AccessMethod::Interactive).failing_cleanup());
        let ok = Arc::new(StaticScraper::new(AccessMethod::Http));
        let mut registry = ScraperRegistry::new();
        registry.register(failing.clone());
        registry.register(ok.clone());

        assert!(registry.cleanup_all().await.is_err());
        assert_eq!(failing.cleanups(), 1);
        assert_eq!(ok.cleanups(), 1);
    }
}
