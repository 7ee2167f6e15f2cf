use crate::error::{PipelineError, Result};
use crate::models::RawContent;
use crate::scraper_trait::SourceScraper;
use crate::source::{AccessMethod, SourceDescriptor};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// An exclusive, open browser session.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    /// Wait for the page to settle, optionally until `wait_selector` appears.
    async fn settle(&mut self, wait_selector: Option<&str>, timeout: Duration) -> Result<()>;
    async fn content(&mut self) -> Result<String>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>>;
    /// Tear down browser resources at the end of a run.
    async fn shutdown(&self) -> Result<()>;
}

/// Browserless-backed browser. Only one session may be open at a time.
pub struct BrowserlessBrowser {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    permits: Arc<Semaphore>,
    open_sessions: Arc<AtomicUsize>,
}

impl BrowserlessBrowser {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            permits: Arc::new(Semaphore::new(1)),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Browser for BrowserlessBrowser {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Browser("browser has been shut down".to_string()))?;
        self.open_sessions.fetch_add(1, Ordering::AcqRel);

        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={}", urlencoding::encode(token)));
        }

        Ok(Box::new(BrowserlessSession {
            client: self.client.clone(),
            endpoint,
            permit: Some(permit),
            open_sessions: self.open_sessions.clone(),
            target: None,
            wait_selector: None,
            timeout: Duration::from_secs(15),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let open = self.open_sessions.load(Ordering::Acquire);
        if open > 0 {
            return Err(PipelineError::Cleanup(format!("{} browser session(s) were never closed", open)));
        }
        tracing::debug!("Browser shut down cleanly");
        Ok(())
    }
}

/// Browserless renders a page in one stateless call, so navigation and
/// settle conditions are collected and sent together when content is read.
struct BrowserlessSession {
    client: reqwest::Client,
    endpoint: String,
    permit: Option<OwnedSemaphorePermit>,
    open_sessions: Arc<AtomicUsize>,
    target: Option<String>,
    wait_selector: Option<String>,
    timeout: Duration,
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let parsed = url::Url::parse(url).map_err(|e| PipelineError::Browser(format!("invalid URL {}: {}", url, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(PipelineError::Browser(format!(
                "Only http/https URLs allowed, got: {}",
                parsed.scheme()
            )));
        }
        self.target = Some(url.to_string());
        Ok(())
    }

    async fn settle(&mut self, wait_selector: Option<&str>, timeout: Duration) -> Result<()> {
        self.wait_selector = wait_selector.map(str::to_string);
        self.timeout = timeout;
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        let url = self
            .target
            .as_deref()
            .ok_or_else(|| PipelineError::Browser("content requested before navigate".to_string()))?;
        let timeout_ms = self.timeout.as_millis() as u64;

        let mut body = json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2", "timeout": timeout_ms },
        });
        if let Some(selector) = &self.wait_selector {
            body["waitForSelector"] = json!({ "selector": selector, "timeout": timeout_ms });
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Browser(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Browser(format!(
                "render failed (status {}): {}",
                status.as_u16(),
                message
            )));
        }

        resp.text().await.map_err(|e| PipelineError::Browser(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.permit.take().is_some() {
            self.open_sessions.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

/// Interactive access path: navigate, settle, read the rendered DOM.
pub struct BrowserScraper {
    browser: Arc<dyn Browser>,
    settle_timeout: Duration,
}

impl BrowserScraper {
    pub fn new(browser: Arc<dyn Browser>, settle_timeout: Duration) -> Self {
        Self {
            browser,
            settle_timeout,
        }
    }

    async fn render(&self, session: &mut dyn BrowserSession, source: &SourceDescriptor) -> Result<String> {
        session.navigate(&source.url).await?;
        session.settle(source.wait_selector.as_deref(), self.settle_timeout).await?;
        session.content().await
    }
}

#[async_trait]
impl SourceScraper for BrowserScraper {
    fn method(&self) -> AccessMethod {
        AccessMethod::Interactive
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<RawContent> {
        let mut session = self.browser.open().await?;
        tracing::debug!(source = %source.name, "Browser session opened");

        let rendered = self.render(session.as_mut(), source).await;

        // the session is released before the next source regardless of outcome
        if let Err(e) = session.close().await {
            tracing::warn!(source = %source.name, "Failed to close browser session: {}", e);
        }

        let html = rendered?;
        tracing::debug!(source = %source.name, bytes = html.len(), "Rendered page");
        Ok(RawContent::Html(html))
    }

    async fn cleanup(&self) -> Result<()> {
        self.browser.shutdown().await
    }
}
