use super::{link_targets, source_record, Strategy};
use crate::error::Result;
use crate::models::{RawContent, RawRecord};
use crate::source::SourceDescriptor;
use url::Url;

const MAX_TAG_CHARS: usize = 60;

/// Path segments that introduce a hashtag/topic name in the next segment.
const TAG_PATH_MARKERS: &[&str] = &["hashtag", "hashtags", "tag", "tags", "topic", "topics", "trending", "discover"];

/// Query parameters carrying a search term on search/explore pages.
const SEARCH_PARAMS: &[&str] = &["q", "query", "keyword", "keywords", "term", "hashtag"];

/// Parse outbound links for search/explore/hashtag URL shapes.
pub fn extract(raw: &RawContent, source: &SourceDescriptor) -> Result<Vec<RawRecord>> {
    let base = Url::parse(&source.url).ok();
    let mut records = Vec::new();

    for href in link_targets(raw) {
        let parsed = match &base {
            Some(base) => base.join(&href),
            None => Url::parse(&href),
        };
        let Ok(url) = parsed else {
            tracing::trace!(href = %href, "Unparseable link, skipping");
            continue;
        };

        if let Some(tag) = tag_from_url(&url) {
            records.push(
                source_record(&tag, source, Strategy::UrlPattern).with_attribute("url", url.to_string()),
            );
        }
    }

    Ok(records)
}

fn tag_from_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();

    for window in segments.windows(2) {
        let marker = window[0].to_lowercase();
        if TAG_PATH_MARKERS.contains(&marker.as_str()) {
            if let Some(name) = decode(window[1]) {
                let is_hashtag = marker.starts_with("hashtag") || marker.starts_with("tag");
                return Some(if is_hashtag && !name.starts_with('#') {
                    format!("#{}", name)
                } else {
                    name
                });
            }
        }
    }

    let searchy = segments
        .iter()
        .any(|s| matches!(s.to_lowercase().as_str(), "search" | "explore" | "results"));
    if searchy {
        for (key, value) in url.query_pairs() {
            if SEARCH_PARAMS.contains(&key.to_lowercase().as_str()) {
                let value = value.trim().to_string();
                if valid_tag(&value) {
                    return Some(value);
                }
            }
        }
    }

    None
}

fn decode(segment: &str) -> Option<String> {
    let decoded = urlencoding::decode(segment).ok()?;
    let name = decoded.replace(&['-', '_', '+'][..], " ");
    let name = name.trim().to_string();
    valid_tag(&name).then_some(name)
}

fn valid_tag(tag: &str) -> bool {
    let chars = tag.chars().count();
    chars >= 2 && chars <= MAX_TAG_CHARS && tag.chars().any(char::is_alphanumeric)
}
