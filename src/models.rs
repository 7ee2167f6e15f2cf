use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One candidate trend observation produced by extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    pub tag: String,
    pub popularity_label: Option<String>,
    pub category: Option<String>,
    pub platform_name: String,
    pub region: Option<String>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl RawRecord {
    pub fn new(tag: impl Into<String>, platform_name: impl Into<String>) -> Self {
        Self {
            tag: tag.into().trim().to_string(),
            popularity_label: None,
            category: None,
            platform_name: platform_name.into(),
            region: None,
            captured_at: Utc::now(),
            attributes: Map::new(),
        }
    }

    pub fn with_popularity(mut self, label: Option<String>) -> Self {
        self.popularity_label = label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Case-insensitive identity used for de-duplication. A leading `#` is
    /// ignored so `#Trend` and `trend` collapse to the same entry.
    pub fn dedup_key(&self) -> String {
        normalize_tag(&self.tag)
    }

    /// Key the enrichment collaborator uses for its annotation map.
    pub fn join_key(&self) -> String {
        join_key(&self.tag, &self.platform_name)
    }
}

pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

pub fn join_key(tag: &str, platform: &str) -> String {
    format!("{}_{}", tag, platform)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Growth {
    Increasing,
    #[default]
    Stable,
    Declining,
}

impl Growth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Growth::Increasing => "increasing",
            Growth::Stable => "stable",
            Growth::Declining => "declining",
        }
    }
}

/// Enrichment metadata attached to a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(default)]
    pub insights: String,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub predicted_growth: Growth,
    #[serde(default)]
    pub business_opportunities: Vec<String>,
    #[serde(default)]
    pub related_trends: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

impl Annotation {
    /// Applied whenever the enrichment collaborator has nothing for a record.
    pub fn neutral() -> Self {
        Self {
            insights: String::new(),
            sentiment: Sentiment::Neutral,
            predicted_growth: Growth::Stable,
            business_opportunities: Vec::new(),
            related_trends: Vec::new(),
            confidence: default_confidence(),
        }
    }

    pub fn clamped(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

impl Default for Annotation {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Raw content fetched for one source, before extraction.
#[derive(Debug, Clone)]
pub enum RawContent {
    Html(String),
    Json(Value),
    /// Dataset items returned by an async job.
    Items(Vec<Value>),
}

impl RawContent {
    /// Build from an HTTP body, trusting the content type first and falling back
    /// to sniffing for a JSON document.
    pub fn from_body(body: String, content_type: Option<&str>) -> Self {
        let looks_json = content_type.map(|ct| ct.contains("json")).unwrap_or(false)
            || matches!(body.trim_start().chars().next(), Some('{') | Some('['));

        if looks_json {
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                return RawContent::Json(value);
            }
        }
        RawContent::Html(body)
    }

    /// Whether the fallback cascade can re-parse this content.
    pub fn is_document(&self) -> bool {
        !matches!(self, RawContent::Items(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RawContent::Html(html) => html.trim().is_empty(),
            RawContent::Json(value) => value.is_null(),
            RawContent::Items(items) => items.is_empty(),
        }
    }

    pub fn len_hint(&self) -> usize {
        match self {
            RawContent::Html(html) => html.len(),
            RawContent::Json(value) => value.to_string().len(),
            RawContent::Items(items) => items.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_ignores_case_and_hash() {
        let a = RawRecord::new("#Trend", "X");
        let b = RawRecord::new("trend", "TikTok");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_join_key_format() {
        let record = RawRecord::new("AI Agents", "Reddit");
        assert_eq!(record.join_key(), "AI Agents_Reddit");
    }

    #[test]
    fn test_record_trims_tag_and_drops_blank_labels() {
        let record = RawRecord::new("  #rustlang  ", "X")
            .with_popularity(Some("   ".to_string()))
            .with_category(Some("Tech".to_string()));
        assert_eq!(record.tag, "#rustlang");
        assert_eq!(record.popularity_label, None);
        assert_eq!(record.category.as_deref(), Some("Tech"));
    }

    #[test]
    fn test_neutral_annotation() {
        let annotation = Annotation::neutral();
        assert_eq!(annotation.sentiment, Sentiment::Neutral);
        assert_eq!(annotation.predicted_growth, Growth::Stable);
        assert!(annotation.business_opportunities.is_empty());
    }

    #[test]
    fn test_annotation_deserializes_with_missing_fields() {
        let annotation: Annotation =
            serde_json::from_str(r#"{"sentiment":"positive","confidence":1.7}"#).unwrap();
        assert_eq!(annotation.sentiment, Sentiment::Positive);
        assert_eq!(annotation.predicted_growth, Growth::Stable);
        assert_eq!(annotation.clamped().confidence, 1.0);
    }

    #[test]
    fn test_raw_content_from_body_sniffs_json() {
        let content = RawContent::from_body(r#"{"data": []}"#.to_string(), None);
        assert!(matches!(content, RawContent::Json(_)));

        let content = RawContent::from_body("<html></html>".to_string(), Some("text/html"));
        assert!(matches!(content, RawContent::Html(_)));

        let content = RawContent::from_body("[not json".to_string(), Some("application/json"));
        assert!(matches!(content, RawContent::Html(_)));
    }

    #[test]
    fn test_items_are_not_documents() {
        assert!(!RawContent::Items(vec![]).is_document());
        assert!(RawContent::Html(String::new()).is_document());
    }
}
