use crate::error::{PipelineError, Result};
use crate::http_client;
use crate::models::RawContent;
use crate::scraper_trait::SourceScraper;
use crate::source::{AccessMethod, SourceDescriptor};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use std::sync::Arc;

/// Direct request/response access path.
pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new(user_agent: &str, cookie_jar: Option<Arc<Jar>>) -> Self {
        let client = http_client::create_http_client_with_cookies(user_agent, cookie_jar)
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to a default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl SourceScraper for HttpScraper {
    fn method(&self) -> AccessMethod {
        AccessMethod::Http
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<RawContent> {
        tracing::debug!(source = %source.name, "Fetching {}", source.url);

        let response = self.client.get(&source.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Fetch(format!(
                "{} returned status {}",
                source.url,
                status.as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        tracing::debug!(source = %source.name, bytes = body.len(), "Fetched content");

        let lower = body.to_lowercase();
        if lower.contains("captcha") || lower.contains("cf-browser-verification") {
            tracing::warn!(source = %source.name, "Response looks like an anti-bot challenge page");
        }

        Ok(RawContent::from_body(body, content_type.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_json_api() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/r/popular.json")
            .with_status(200)
            .with_header("content-type", "application/json; charset=utf-8")
            .with_body(r#"{"data": {"children": []}}"#)
            .create_async()
            .await;

        let scraper = HttpScraper::new("Mozilla/5.0 (Test Agent)", None);
        let source = SourceDescriptor::new(
            "Reddit",
            &format!("{}/r/popular.json", server.url()),
            AccessMethod::Http,
        );

        let content = scraper.fetch(&source).await.unwrap();
        assert!(matches!(content, RawContent::Json(_)));
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/trending")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><p>#rust</p></body></html>")
            .create_async()
            .await;

        let scraper = HttpScraper::new("Mozilla/5.0 (Test Agent)", None);
        let source = SourceDescriptor::new("Site", &format!("{}/trending", server.url()), AccessMethod::Http);

        match scraper.fetch(&source).await.unwrap() {
            RawContent::Html(html) => assert!(html.contains("#rust")),
            other => panic!("expected html, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/blocked")
            .with_status(403)
            .create_async()
            .await;

        let scraper = HttpScraper::new("Mozilla/5.0 (Test Agent)", None);
        let source = SourceDescriptor::new("Site", &format!("{}/blocked", server.url()), AccessMethod::Http);

        let err = scraper.fetch(&source).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(ref msg) if msg.contains("403")));
    }
}
