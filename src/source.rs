use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// How a source's content is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    /// Rendered in a browser session (navigate, settle, read the DOM).
    Interactive,
    /// Single request/response fetch.
    Http,
    /// Hosted job: submit, poll, fetch dataset.
    AsyncJob,
}

impl AccessMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethod::Interactive => "interactive",
            AccessMethod::Http => "http",
            AccessMethod::AsyncJob => "async_job",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    pub requests_per_window: u32,
    pub window_ms: u64,
}

impl RateLimit {
    /// Minimum spacing between requests implied by the hint.
    pub fn min_interval(&self) -> Duration {
        if self.requests_per_window == 0 {
            return Duration::from_millis(self.window_ms);
        }
        Duration::from_millis(self.window_ms / self.requests_per_window as u64)
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_window: 1,
            window_ms: 10_000,
        }
    }
}

/// Per-source rules for the structured extraction strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredRule {
    /// CSS selectors over an HTML document. Field selectors are relative to `item`.
    Selectors {
        item: String,
        tag: String,
        #[serde(default)]
        popularity: Option<String>,
        #[serde(default)]
        category: Option<String>,
    },
    /// Dotted field paths over a JSON document or dataset items.
    JsonFields {
        /// Path to the array of items inside a JSON document. Ignored for dataset items.
        #[serde(default)]
        items_path: Option<String>,
        tag: String,
        #[serde(default)]
        popularity: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        region: Option<String>,
    },
    /// No structured rules; only the fallback strategies apply.
    #[default]
    None,
}

/// Hosted-job parameters for `AccessMethod::AsyncJob` sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    pub actor: String,
    #[serde(default)]
    pub input: Value,
}

/// Static definition of one trend source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    pub access: AccessMethod,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub wait_selector: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub extractor: StructuredRule,
    #[serde(default)]
    pub job: Option<JobSpec>,
}

impl SourceDescriptor {
    pub fn new(name: &str, url: &str, access: AccessMethod) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            access,
            rate_limit: RateLimit::default(),
            wait_selector: None,
            region: None,
            category: None,
            extractor: StructuredRule::None,
            job: None,
        }
    }

    pub fn with_extractor(mut self, extractor: StructuredRule) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_job(mut self, actor: &str, input: Value) -> Self {
        self.job = Some(JobSpec {
            actor: actor.to_string(),
            input,
        });
        self
    }

    /// Matches a platform filter entry case-insensitively.
    pub fn matches_platform(&self, platform: &str) -> bool {
        self.name.eq_ignore_ascii_case(platform.trim())
    }
}

/// Narrow `sources` to those named in `filter`. An empty filter keeps everything.
pub fn filter_sources<'a, S>(sources: &'a [S], filter: &[String]) -> Vec<&'a S>
where
    S: AsRef<SourceDescriptor>,
{
    if filter.is_empty() {
        return sources.iter().collect();
    }
    sources
        .iter()
        .filter(|s| filter.iter().any(|p| s.as_ref().matches_platform(p)))
        .collect()
}

impl AsRef<SourceDescriptor> for SourceDescriptor {
    fn as_ref(&self) -> &SourceDescriptor {
        self
    }
}
