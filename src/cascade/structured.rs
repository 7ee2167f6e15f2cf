use super::{collapse_whitespace, source_record, Strategy};
use crate::error::{PipelineError, Result};
use crate::models::{RawContent, RawRecord};
use crate::source::{SourceDescriptor, StructuredRule};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

const NAME: &str = "structured";

/// Apply the source's own structured rules.
pub fn extract(raw: &RawContent, source: &SourceDescriptor) -> Result<Vec<RawRecord>> {
    match (&source.extractor, raw) {
        (StructuredRule::None, _) => Ok(Vec::new()),
        (
            StructuredRule::Selectors {
                item,
                tag,
                popularity,
                category,
            },
            RawContent::Html(html),
        ) => from_selectors(html, item, tag, popularity.as_deref(), category.as_deref(), source),
        (StructuredRule::Selectors { .. }, _) => Ok(Vec::new()),
        (StructuredRule::JsonFields { items_path, .. }, RawContent::Json(value)) => {
            let items = match items_path {
                Some(path) => lookup(value, path),
                None => Some(value),
            };
            match items {
                Some(Value::Array(items)) => Ok(from_items(items, source)),
                Some(_) | None => {
                    tracing::debug!(source = %source.name, "No item array found in JSON document");
                    Ok(Vec::new())
                }
            }
        }
        (StructuredRule::JsonFields { .. }, RawContent::Items(items)) => Ok(from_items(items, source)),
        (StructuredRule::JsonFields { .. }, RawContent::Html(_)) => Ok(Vec::new()),
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| PipelineError::extraction(NAME, format!("invalid selector '{}': {}", selector, e)))
}

fn first_text(element: &ElementRef, selector: Option<&Selector>) -> Option<String> {
    let text = match selector {
        Some(sel) => element
            .select(sel)
            .next()
            .map(|el| el.text().collect::<String>())?,
        None => element.text().collect::<String>(),
    };
    let text = collapse_whitespace(&text);
    (!text.is_empty()).then_some(text)
}

fn from_selectors(
    html: &str,
    item: &str,
    tag: &str,
    popularity: Option<&str>,
    category: Option<&str>,
    source: &SourceDescriptor,
) -> Result<Vec<RawRecord>> {
    let item_sel = parse_selector(item)?;
    let tag_sel = parse_selector(tag)?;
    let popularity_sel = popularity.map(parse_selector).transpose()?;
    let category_sel = category.map(parse_selector).transpose()?;

    let document = Html::parse_document(html);
    let mut records = Vec::new();

    for (index, element) in document.select(&item_sel).enumerate() {
        let Some(tag_text) = first_text(&element, Some(&tag_sel)) else {
            tracing::trace!(source = %source.name, "Item #{} has no tag text, skipping", index + 1);
            continue;
        };

        let mut record = source_record(&tag_text, source, Strategy::Structured)
            .with_popularity(popularity_sel.as_ref().and_then(|s| first_text(&element, Some(s))));
        if let Some(sel) = category_sel.as_ref() {
            if let Some(cat) = first_text(&element, Some(sel)) {
                record = record.with_category(Some(cat));
            }
        }
        if let Some(href) = element
            .value()
            .attr("href")
            .or_else(|| {
                Selector::parse("a[href]")
                    .ok()
                    .and_then(|a| element.select(&a).next())
                    .and_then(|a| a.value().attr("href"))
            })
        {
            record = record.with_attribute("href", href);
        }
        records.push(record);
    }

    tracing::debug!(source = %source.name, count = records.len(), "Selector extraction finished");
    Ok(records)
}

fn from_items(items: &[Value], source: &SourceDescriptor) -> Vec<RawRecord> {
    let StructuredRule::JsonFields {
        tag,
        popularity,
        category,
        region,
        ..
    } = &source.extractor
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let tag_text = lookup(item, tag).and_then(scalar_text)?;
            let mut record = source_record(&tag_text, source, Strategy::Structured).with_popularity(
                popularity
                    .as_deref()
                    .and_then(|p| lookup(item, p))
                    .and_then(scalar_text),
            );
            if let Some(cat) = category.as_deref().and_then(|c| lookup(item, c)).and_then(scalar_text) {
                record = record.with_category(Some(cat));
            }
            if let Some(reg) = region.as_deref().and_then(|r| lookup(item, r)).and_then(scalar_text) {
                record = record.with_region(Some(reg));
            }
            if let Value::Object(map) = item {
                for (key, value) in map {
                    if key != tag && !value.is_object() && !value.is_array() && !value.is_null() {
                        record = record.with_attribute(key, value.clone());
                    }
                }
            }
            Some(record)
        })
        .collect()
}

/// Resolve a dotted path (`data.trends.0.name`) inside a JSON value.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => collapse_whitespace(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
