use super::{source_record, text_segments, CascadeConfig, Strategy};
use crate::enrichment::TrendAnalyzer;
use crate::error::Result;
use crate::models::{RawContent, RawRecord};
use crate::source::SourceDescriptor;

/// Last resort: hand a truncated snippet to the analyzer and keep the
/// suggestions it is confident about.
pub async fn extract(
    analyzer: &dyn TrendAnalyzer,
    config: &CascadeConfig,
    raw: &RawContent,
    source: &SourceDescriptor,
) -> Result<Vec<RawRecord>> {
    let text = text_segments(raw).join("\n");
    let snippet = truncate_to_char_boundary(&text, config.assisted_snippet_chars);
    if snippet.trim().is_empty() {
        tracing::debug!(source = %source.name, "No text for assisted extraction");
        return Ok(Vec::new());
    }

    let suggestions = analyzer.extract_trends(snippet, &source.name).await?;
    let total = suggestions.len();

    let records: Vec<RawRecord> = suggestions
        .into_iter()
        .filter(|s| s.confidence >= config.assisted_confidence)
        .map(|s| {
            source_record(&s.tag, source, Strategy::Assisted)
                .with_popularity(s.popularity)
                .with_attribute("confidence", s.confidence as f64)
        })
        .collect();

    tracing::info!(
        source = %source.name,
        suggested = total,
        accepted = records.len(),
        "Assisted extraction finished"
    );
    Ok(records)
}

/// Truncate to at most `max_bytes` bytes on a character boundary.
pub(crate) fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::AccessMethod;
    use crate::testing::RecordingAnalyzer;

    #[test]
    fn test_truncate_to_char_boundary() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
        assert_eq!(truncate_to_char_boundary("Hello", 100), "Hello");
    }

    #[tokio::test]
    async fn test_snippet_is_truncated_before_delegating() {
        let analyzer = RecordingAnalyzer::default();
        let config = CascadeConfig {
            assisted_snippet_chars: 20,
            ..CascadeConfig::default()
        };
        let html = format!("<p>{}</p>", "word ".repeat(100));
        let source = SourceDescriptor::new("YouTube", "https://youtube.com", AccessMethod::Http);

        extract(&analyzer, &config, &RawContent::Html(html), &source).await.unwrap();

        let snippets = analyzer.snippets();
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].len() <= 20);
    }

    #[tokio::test]
    async fn test_script_only_page_skips_the_analyzer() {
        let analyzer = RecordingAnalyzer::default().with_suggestions(vec![("Ghost", 0.99)]);
        let source = SourceDescriptor::new("YouTube", "https://youtube.com", AccessMethod::Http);
        let html = "<html><script>var a=1;</script></html>".to_string();

        let records = extract(&analyzer, &CascadeConfig::default(), &RawContent::Html(html), &source)
            .await
            .unwrap();

        assert!(records.is_empty());
        assert_eq!(analyzer.extract_calls(), 0);
    }

    #[tokio::test]
    async fn test_records_carry_confidence() {
        let analyzer = RecordingAnalyzer::default().with_suggestions(vec![("Stanley Cup", 0.95)]);
        let source = SourceDescriptor::new("YouTube", "https://youtube.com", AccessMethod::Http);

        let records = extract(
            &analyzer,
            &CascadeConfig::default(),
            &RawContent::Html("<p>cups</p>".to_string()),
            &source,
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attributes["strategy"], "assisted");
        assert!(records[0].attributes["confidence"].as_f64().unwrap() > 0.9);
    }
}
