use super::{source_record, text_segments, CascadeConfig, Strategy};
use crate::error::{PipelineError, Result};
use crate::models::{RawContent, RawRecord};
use crate::source::SourceDescriptor;
use regex::Regex;
use std::collections::HashMap;

/// Hashtag grammar: `#` not glued to a preceding word, a letter, then
/// letters, digits or underscores. The whole token is matched so that
/// over-long tags can be rejected rather than cut.
const HASHTAG_PATTERN: &str = r"(?:^|[^\p{L}\p{N}_&/#])#(\p{L}[\p{L}\p{N}_]*)";

const MIN_HASHTAG_CHARS: usize = 2;
const MAX_HASHTAG_CHARS: usize = 50;

/// Popularity-looking labels such as `12.3K posts` or `1,204 searches`.
const COUNT_PATTERN: &str = r"(?i)^\d[\d.,]*\s*[kmb]?\+?(\s+\p{L}+)?$";

const MAX_CANDIDATE_CHARS: usize = 50;
const MAX_CANDIDATE_WORDS: usize = 5;

/// Scan flattened text for hashtags, keeping the `top_n` most frequent.
pub fn hashtags(raw: &RawContent, source: &SourceDescriptor, top_n: usize) -> Result<Vec<RawRecord>> {
    let re = Regex::new(HASHTAG_PATTERN).map_err(|e| PipelineError::extraction("hashtag_pattern", e))?;

    // lowercased tag -> (first spelling seen, occurrences, first position)
    let mut counts: HashMap<String, (String, usize, usize)> = HashMap::new();
    let mut position = 0;
    for segment in text_segments(raw) {
        for caps in re.captures_iter(&segment) {
            let Some(m) = caps.get(1) else { continue };
            if !(MIN_HASHTAG_CHARS..=MAX_HASHTAG_CHARS).contains(&m.as_str().chars().count()) {
                continue;
            }
            let entry = counts
                .entry(m.as_str().to_lowercase())
                .or_insert_with(|| (m.as_str().to_string(), 0, position));
            entry.1 += 1;
            position += 1;
        }
    }

    let mut ranked: Vec<_> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    Ok(ranked
        .into_iter()
        .take(top_n)
        .map(|(tag, occurrences, _)| {
            source_record(&format!("#{}", tag), source, Strategy::HashtagPattern)
                .with_attribute("occurrences", occurrences as u64)
        })
        .collect())
}

/// Pick short text nodes that follow a "trending"-style marker, skipping
/// navigation chrome and count labels.
pub fn near_markers(
    raw: &RawContent,
    source: &SourceDescriptor,
    config: &CascadeConfig,
) -> Result<Vec<RawRecord>> {
    let count_re = Regex::new(COUNT_PATTERN).map_err(|e| PipelineError::extraction("trending_proximity", e))?;
    let segments = text_segments(raw);
    let markers: Vec<String> = config.trending_markers.iter().map(|m| m.to_lowercase()).collect();
    let has_marker = |text: &str| {
        let lower = text.to_lowercase();
        markers.iter().any(|m| lower.contains(m.as_str()))
    };

    let mut records = Vec::new();
    let mut taken = vec![false; segments.len()];

    for (i, segment) in segments.iter().enumerate() {
        if !has_marker(segment) {
            continue;
        }

        let window_end = (i + 1 + config.proximity_window).min(segments.len());
        for j in (i + 1)..window_end {
            let candidate = &segments[j];
            if taken[j] || has_marker(candidate) || !is_candidate(candidate, &config.denylist) {
                continue;
            }
            if count_re.is_match(candidate) {
                continue;
            }
            taken[j] = true;

            let popularity = segments
                .get(j + 1)
                .filter(|next| count_re.is_match(next))
                .cloned();
            records.push(
                source_record(candidate, source, Strategy::TrendingProximity)
                    .with_popularity(popularity)
                    .with_attribute("marker", segment.clone()),
            );
        }
    }

    Ok(records)
}

fn is_candidate(text: &str, denylist: &[String]) -> bool {
    let chars = text.chars().count();
    if !(2..=MAX_CANDIDATE_CHARS).contains(&chars) {
        return false;
    }
    if text.split_whitespace().count() > MAX_CANDIDATE_WORDS {
        return false;
    }
    if !text.chars().any(char::is_alphabetic) {
        return false;
    }
    !denylist.iter().any(|d| d.eq_ignore_ascii_case(text))
}
