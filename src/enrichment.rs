use crate::error::{PipelineError, Result};
use crate::models::{Annotation, RawRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A trend name proposed by the analyzer from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedTrend {
    pub tag: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub popularity: Option<String>,
}

/// External enrichment collaborator. Callers treat every error as "no
/// annotation" and fall back to neutral defaults.
#[async_trait]
pub trait TrendAnalyzer: Send + Sync {
    /// Annotations keyed by `tag + "_" + platform`. Empty input yields an empty map.
    async fn analyze_trends(&self, records: &[RawRecord]) -> Result<HashMap<String, Annotation>>;

    /// Short narrative over a whole run.
    async fn summarize(&self, records: &[RawRecord]) -> Result<String>;

    /// Constrained extraction of trend names from a content snippet.
    async fn extract_trends(&self, snippet: &str, platform: &str) -> Result<Vec<SuggestedTrend>>;
}

/// Used when no LLM is configured: annotates nothing and extracts nothing.
pub struct NeutralAnalyzer;

#[async_trait]
impl TrendAnalyzer for NeutralAnalyzer {
    async fn analyze_trends(&self, _records: &[RawRecord]) -> Result<HashMap<String, Annotation>> {
        Ok(HashMap::new())
    }

    async fn summarize(&self, records: &[RawRecord]) -> Result<String> {
        Ok(format!("{} trends collected (no analyzer configured)", records.len()))
    }

    async fn extract_trends(&self, _snippet: &str, _platform: &str) -> Result<Vec<SuggestedTrend>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnnotatedItem {
    tag: String,
    platform: String,
    #[serde(flatten)]
    annotation: Annotation,
}

#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    #[serde(default)]
    trends: Vec<AnnotatedItem>,
}

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    trends: Vec<SuggestedTrend>,
}

/// OpenAI-compatible chat-completions analyzer.
pub struct LlmAnalyzer {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmAnalyzer {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: OPENAI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, system: &str, user: String, json_mode: bool) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
            response_format: json_mode.then(|| json!({"type": "json_object"})),
        };

        tracing::debug!(model = %self.model, "LLM chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Enrichment(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::Enrichment("No response from LLM".to_string()))
    }

    fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T> {
        serde_json::from_str(strip_code_blocks(raw)).map_err(|e| PipelineError::Enrichment(e.to_string()))
    }
}

#[async_trait]
impl TrendAnalyzer for LlmAnalyzer {
    async fn analyze_trends(&self, records: &[RawRecord]) -> Result<HashMap<String, Annotation>> {
        if records.is_empty() {
            return Ok(HashMap::new());
        }

        let listing: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "tag": r.tag,
                    "platform": r.platform_name,
                    "popularity": r.popularity_label,
                    "category": r.category,
                })
            })
            .collect();

        let system = "You analyze social media trends for businesses. Respond with JSON \
            {\"trends\": [{\"tag\", \"platform\", \"insights\", \"sentiment\" (positive|neutral|negative), \
            \"predictedGrowth\" (increasing|stable|declining), \"businessOpportunities\" [string], \
            \"relatedTrends\" [string], \"confidence\" (0..1)}]}. Echo tag and platform exactly.";
        let raw = self
            .chat(system, serde_json::to_string(&listing).unwrap_or_default(), true)
            .await?;
        let payload: AnalysisPayload = Self::parse_json(&raw)?;

        Ok(payload
            .trends
            .into_iter()
            .map(|item| (crate::models::join_key(&item.tag, &item.platform), item.annotation.clamped()))
            .collect())
    }

    async fn summarize(&self, records: &[RawRecord]) -> Result<String> {
        let tags: Vec<String> = records
            .iter()
            .map(|r| format!("{} ({})", r.tag, r.platform_name))
            .collect();
        let system = "Summarize today's cross-platform trends for a business audience in at most five sentences.";
        let summary = self.chat(system, tags.join("\n"), false).await?;
        Ok(summary.trim().to_string())
    }

    async fn extract_trends(&self, snippet: &str, platform: &str) -> Result<Vec<SuggestedTrend>> {
        let system = "Extract currently trending topics or hashtags from page text. Only return names \
            that appear in the text. Respond with JSON {\"trends\": [{\"tag\", \"confidence\" (0..1), \
            \"popularity\" (optional string)}]}. Return an empty list when unsure.";
        let user = format!("Platform: {}\n\n{}", platform, snippet);
        let raw = self.chat(system, user, true).await?;
        let payload: ExtractionPayload = Self::parse_json(&raw)?;
        Ok(payload.trends)
    }
}

/// Strip markdown code fences some models wrap JSON in.
fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Annotation for `record`, or the neutral default when the analyzer had none.
pub fn annotation_for(annotations: &HashMap<String, Annotation>, record: &RawRecord) -> Annotation {
    annotations
        .get(&record.join_key())
        .cloned()
        .unwrap_or_else(Annotation::neutral)
}
