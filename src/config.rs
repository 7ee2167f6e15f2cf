use crate::cascade::CascadeConfig;
use crate::job_client::PollPolicy;
use crate::orchestrator::DelayRange;
use crate::source::{AccessMethod, RateLimit, SourceDescriptor, StructuredRule};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_PATH: &str = "data/config.yaml";
pub const PLACEHOLDER_APIFY_TOKEN: &str = "YOUR_APIFY_TOKEN";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_cookies_path")]
    pub cookies_path: String,
    #[serde(default)]
    pub inter_source_delay: DelayConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Platform filter applied to every run. Empty runs all sources.
    #[serde(default)]
    pub platforms: Vec<String>,
    pub sources: Vec<Arc<SourceDescriptor>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DelayConfig {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_ms: 10_000,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    pub apify_token: String,
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            apify_token: String::new(),
            base_url: "https://api.apify.com/v2".to_string(),
            poll_interval_ms: 5_000,
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browserless endpoint, e.g. `http://localhost:3000`.
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub settle_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            settle_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Without a key, records get neutral annotations.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_database_path() -> String {
    "data/trends.db".to_string()
}

fn default_cookies_path() -> String {
    "data/cookies.json".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_str = fs::read_to_string(CONFIG_PATH)
            .with_context(|| format!("Failed to read {}", CONFIG_PATH))?;
        let mut config = Self::from_yaml(&config_str)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse config")
    }

    /// Apply environment overrides; `lookup` is `env::var` outside tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("TRACING_LEVEL") {
            self.tracing_level = level;
        }
        if let Some(user_agent) = lookup("USER_AGENT") {
            self.user_agent = user_agent;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database_path = path;
        }
        if let Some(token) = lookup("APIFY_TOKEN") {
            self.job.apify_token = token;
        }
        if let Some(url) = lookup("APIFY_BASE_URL") {
            self.job.base_url = url;
        }
        if let Some(attempts) = lookup("JOB_MAX_ATTEMPTS") {
            self.job.max_attempts = attempts
                .parse()
                .context("Failed to parse JOB_MAX_ATTEMPTS environment variable")?;
        }
        if let Some(url) = lookup("BROWSERLESS_URL") {
            self.browser.base_url = Some(url);
        }
        if let Some(token) = lookup("BROWSERLESS_TOKEN") {
            self.browser.token = Some(token);
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.enrichment.api_key = Some(key);
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.enrichment.base_url = Some(url);
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.enrichment.model = Some(model);
        }
        if let Some(platforms) = lookup("PLATFORMS") {
            // comma-separated platform names
            self.platforms = platforms
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            anyhow::bail!("At least one source is required in {}", CONFIG_PATH);
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.to_lowercase()) {
                anyhow::bail!("Duplicate source name '{}'", source.name);
            }
            match source.access {
                AccessMethod::AsyncJob => {
                    if source.job.is_none() {
                        anyhow::bail!("Source '{}' uses async_job access but has no job block", source.name);
                    }
                    if self.job.apify_token.is_empty() {
                        anyhow::bail!(
                            "Source '{}' needs job.apify_token (set via {} or APIFY_TOKEN env var)",
                            source.name,
                            CONFIG_PATH
                        );
                    }
                }
                AccessMethod::Interactive => {
                    if self.browser.base_url.is_none() {
                        anyhow::bail!(
                            "Source '{}' needs browser.base_url (set via {} or BROWSERLESS_URL env var)",
                            source.name,
                            CONFIG_PATH
                        );
                    }
                }
                AccessMethod::Http => {}
            }
        }

        if self.inter_source_delay.min_ms > self.inter_source_delay.max_ms {
            anyhow::bail!(
                "inter_source_delay.min_ms ({}) must not exceed max_ms ({})",
                self.inter_source_delay.min_ms,
                self.inter_source_delay.max_ms
            );
        }
        if self.job.max_attempts == 0 {
            anyhow::bail!("job.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            poll_interval: Duration::from_millis(self.job.poll_interval_ms),
            max_attempts: self.job.max_attempts,
        }
    }

    pub fn delay_range(&self) -> DelayRange {
        DelayRange::new(
            Duration::from_millis(self.inter_source_delay.min_ms),
            Duration::from_millis(self.inter_source_delay.max_ms),
        )
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.settle_timeout_ms)
    }

    pub fn has_access(&self, access: AccessMethod) -> bool {
        self.sources.iter().any(|s| s.access == access)
    }

    /// Sources shared with the orchestrator. Only the `Arc` handles are cloned.
    pub fn shared_sources(&self) -> Vec<Arc<SourceDescriptor>> {
        self.sources.clone()
    }

    pub fn create_default() -> Result<()> {
        std::fs::create_dir_all("data")?;

        let default_config = Config {
            tracing_level: default_tracing_level(),
            user_agent: default_user_agent(),
            database_path: default_database_path(),
            cookies_path: default_cookies_path(),
            inter_source_delay: DelayConfig::default(),
            job: JobConfig {
                apify_token: PLACEHOLDER_APIFY_TOKEN.to_string(),
                ..JobConfig::default()
            },
            browser: BrowserConfig {
                base_url: Some("http://localhost:3000".to_string()),
                ..BrowserConfig::default()
            },
            cascade: CascadeConfig::default(),
            enrichment: EnrichmentConfig::default(),
            platforms: vec![],
            sources: default_sources(),
        };

        let config_str = serde_yaml::to_string(&default_config)?;
        fs::write(CONFIG_PATH, config_str)?;
        Ok(())
    }
}

fn default_sources() -> Vec<Arc<SourceDescriptor>> {
    let mut reddit = SourceDescriptor::new("Reddit", "https://www.reddit.com/r/popular.json", AccessMethod::Http)
        .with_extractor(StructuredRule::JsonFields {
            items_path: Some("data.children".to_string()),
            tag: "data.title".to_string(),
            popularity: Some("data.score".to_string()),
            category: Some("data.subreddit".to_string()),
            region: None,
        });
    reddit.rate_limit = RateLimit {
        requests_per_window: 1,
        window_ms: 15_000,
    };

    let mut tiktok = SourceDescriptor::new(
        "TikTok",
        "https://ads.tiktok.com/business/creativecenter/inspiration/popular/hashtag/pc/en",
        AccessMethod::Interactive,
    )
    .with_extractor(StructuredRule::Selectors {
        item: "div[class*='CardPc_container']".to_string(),
        tag: "span[class*='CardPc_titleText']".to_string(),
        popularity: Some("span[class*='CardPc_itemValue']".to_string()),
        category: None,
    });
    tiktok.wait_selector = Some("div[class*='CardPc_container']".to_string());

    let x = SourceDescriptor::new("X", "https://x.com/explore/tabs/trending", AccessMethod::AsyncJob)
        .with_job("apify~twitter-trends-scraper", json!({"country": "united-states"}))
        .with_extractor(StructuredRule::JsonFields {
            items_path: None,
            tag: "name".to_string(),
            popularity: Some("tweet_volume".to_string()),
            category: Some("category".to_string()),
            region: None,
        });

    let mut google = SourceDescriptor::new(
        "Google Trends",
        "https://trends.google.com/trending?geo=US",
        AccessMethod::Http,
    );
    google.region = Some("US".to_string());

    vec![reddit, tiktok, x, google].into_iter().map(Arc::new).collect()
}
