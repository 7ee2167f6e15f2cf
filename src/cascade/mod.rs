pub mod assisted;
pub mod patterns;
pub mod structured;
pub mod url_pattern;

use crate::enrichment::TrendAnalyzer;
use crate::error::Result;
use crate::models::{RawContent, RawRecord};
use crate::source::SourceDescriptor;
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Extraction strategies in the order the cascade tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Source-specific selector/field rules.
    Structured,
    /// Hashtag-grammar scan over flattened text.
    HashtagPattern,
    /// Text located near "trending"-style markers.
    TrendingProximity,
    /// Search/explore/hashtag shaped link paths.
    UrlPattern,
    /// Delegates a snippet to the enrichment collaborator. The only strategy doing I/O.
    Assisted,
}

impl Strategy {
    pub const FALLBACKS: [Strategy; 3] = [
        Strategy::HashtagPattern,
        Strategy::TrendingProximity,
        Strategy::UrlPattern,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Structured => "structured",
            Strategy::HashtagPattern => "hashtag_pattern",
            Strategy::TrendingProximity => "trending_proximity",
            Strategy::UrlPattern => "url_pattern",
            Strategy::Assisted => "assisted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CascadeConfig {
    /// Structured results at or above this count end the cascade.
    pub primary_min: usize,
    /// Pooled results at or above this count end the pattern fallbacks.
    pub fallback_stop_min: usize,
    /// The assisted strategy only runs when fewer than this many records were pooled.
    pub assisted_below: usize,
    pub max_results: usize,
    pub hashtag_top_n: usize,
    pub assisted_confidence: f32,
    pub assisted_snippet_chars: usize,
    /// How many text nodes after a marker are considered by the proximity scan.
    pub proximity_window: usize,
    pub trending_markers: Vec<String>,
    pub denylist: Vec<String>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            primary_min: 1,
            fallback_stop_min: 3,
            assisted_below: 2,
            max_results: 10,
            hashtag_top_n: 10,
            assisted_confidence: 0.7,
            assisted_snippet_chars: 4000,
            proximity_window: 8,
            trending_markers: ["trend", "popular", "viral", "rising", "hot topics"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            denylist: [
                "home", "explore", "search", "login", "log in", "sign up", "sign in", "settings",
                "notifications", "messages", "more", "see all", "see more", "show more",
                "view all", "for you", "following", "menu", "privacy", "terms", "help", "about",
                "cookies", "accept", "close", "next", "previous", "load more", "get app",
                "download the app", "share", "back",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// What one cascade run produced and which strategies contributed.
#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub records: Vec<RawRecord>,
    pub contributions: Vec<(Strategy, usize)>,
    pub assisted_invoked: bool,
}

/// Running, de-duplicated result set of one cascade run.
#[derive(Default)]
struct Accumulator {
    seen: HashSet<String>,
    records: Vec<RawRecord>,
}

impl Accumulator {
    fn absorb(&mut self, records: Vec<RawRecord>) -> usize {
        let before = self.records.len();
        for record in records {
            if record.tag.is_empty() {
                continue;
            }
            if self.seen.insert(record.dedup_key()) {
                self.records.push(record);
            }
        }
        self.records.len() - before
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn finish(mut self, max: usize) -> Vec<RawRecord> {
        self.records.truncate(max);
        self.records
    }
}

pub struct ExtractionCascade {
    config: CascadeConfig,
    analyzer: Arc<dyn TrendAnalyzer>,
}

impl ExtractionCascade {
    pub fn new(config: CascadeConfig, analyzer: Arc<dyn TrendAnalyzer>) -> Self {
        Self { config, analyzer }
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Structured strategy alone, de-duplicated and capped.
    pub fn primary(&self, raw: &RawContent, source: &SourceDescriptor) -> Vec<RawRecord> {
        let mut acc = Accumulator::default();
        if let Some(records) = self.attempt(Strategy::Structured, raw, source) {
            acc.absorb(records);
        }
        acc.finish(self.config.max_results)
    }

    /// Try every strategy in priority order until one yields enough.
    pub async fn run(&self, raw: &RawContent, source: &SourceDescriptor) -> CascadeOutcome {
        let mut acc = Accumulator::default();
        let mut outcome = CascadeOutcome::default();
        let max = self.config.max_results;

        if let Some(records) = self.attempt(Strategy::Structured, raw, source) {
            let added = acc.absorb(records);
            outcome.contributions.push((Strategy::Structured, added));
        }
        if acc.len() >= self.config.primary_min.max(1) {
            outcome.records = acc.finish(max);
            return outcome;
        }

        for strategy in Strategy::FALLBACKS {
            if let Some(records) = self.attempt(strategy, raw, source) {
                let added = acc.absorb(records);
                tracing::debug!(source = %source.name, strategy = strategy.name(), added, "Fallback strategy finished");
                outcome.contributions.push((strategy, added));
            }
            if acc.len() >= self.config.fallback_stop_min {
                outcome.records = acc.finish(max);
                return outcome;
            }
        }

        if acc.len() < self.config.assisted_below {
            outcome.assisted_invoked = true;
            match assisted::extract(self.analyzer.as_ref(), &self.config, raw, source).await {
                Ok(records) => {
                    let added = acc.absorb(records);
                    outcome.contributions.push((Strategy::Assisted, added));
                }
                Err(e) => {
                    tracing::warn!(source = %source.name, "Assisted extraction failed: {}", e);
                }
            }
        }

        outcome.records = acc.finish(max);
        tracing::info!(
            source = %source.name,
            records = outcome.records.len(),
            assisted = outcome.assisted_invoked,
            "Cascade finished"
        );
        outcome
    }

    /// Run one pure strategy, absorbing its failure as "no records".
    fn attempt(
        &self,
        strategy: Strategy,
        raw: &RawContent,
        source: &SourceDescriptor,
    ) -> Option<Vec<RawRecord>> {
        let result: Result<Vec<RawRecord>> = match strategy {
            Strategy::Structured => structured::extract(raw, source),
            Strategy::HashtagPattern => {
                patterns::hashtags(raw, source, self.config.hashtag_top_n)
            }
            Strategy::TrendingProximity => patterns::near_markers(raw, source, &self.config),
            Strategy::UrlPattern => url_pattern::extract(raw, source),
            Strategy::Assisted => return None,
        };

        match result {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(source = %source.name, strategy = strategy.name(), "Strategy failed: {}", e);
                None
            }
        }
    }
}

/// Visible text of the content, one entry per text node (or JSON string leaf).
pub(crate) fn text_segments(raw: &RawContent) -> Vec<String> {
    match raw {
        RawContent::Html(html) => {
            let document = Html::parse_document(html);
            document
                .root_element()
                .descendants()
                .filter_map(|node| {
                    let text = node.value().as_text()?;
                    let hidden = node
                        .parent()
                        .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
                        .map(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "template"))
                        .unwrap_or(false);
                    if hidden {
                        return None;
                    }
                    let collapsed = collapse_whitespace(text);
                    (!collapsed.is_empty()).then_some(collapsed)
                })
                .collect()
        }
        RawContent::Json(value) => {
            let mut out = Vec::new();
            string_leaves(value, &mut out);
            out
        }
        RawContent::Items(items) => {
            let mut out = Vec::new();
            for item in items {
                string_leaves(item, &mut out);
            }
            out
        }
    }
}

/// Outbound link targets of the content.
pub(crate) fn link_targets(raw: &RawContent) -> Vec<String> {
    match raw {
        RawContent::Html(html) => {
            let document = Html::parse_document(html);
            document
                .root_element()
                .descendants()
                .filter_map(|node| match node.value() {
                    Node::Element(el) if el.name() == "a" => el.attr("href").map(str::to_string),
                    _ => None,
                })
                .collect()
        }
        other => text_segments(other)
            .into_iter()
            .filter(|s| s.starts_with("http://") || s.starts_with("https://") || s.starts_with('/'))
            .collect(),
    }
}

fn string_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let collapsed = collapse_whitespace(s);
            if !collapsed.is_empty() {
                out.push(collapsed);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| string_leaves(v, out)),
        _ => {}
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Record stamped with the source's platform and default region/category.
pub(crate) fn source_record(tag: &str, source: &SourceDescriptor, strategy: Strategy) -> RawRecord {
    RawRecord::new(tag, source.name.clone())
        .with_region(source.region.clone())
        .with_category(source.category.clone())
        .with_attribute("strategy", strategy.name())
}
