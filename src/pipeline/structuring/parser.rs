use serde_json::Value;

use super::ParseError;
use crate::models::{ExtractedRecord, RecordCategory};

/// Remove an optional leading ```` ```json ```` / ```` ``` ```` fence and a
/// trailing ```` ``` ````. Purely textual; inner content is untouched.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut clean = raw.trim();
    if let Some(rest) = clean.strip_prefix("```json") {
        clean = rest;
    } else if let Some(rest) = clean.strip_prefix("```") {
        clean = rest;
    }
    if let Some(rest) = clean.strip_suffix("```") {
        clean = rest;
    }
    clean
}

/// Items removed during validation, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DroppedCounts {
    /// Not an object, or `text` missing / not a string.
    pub malformed: usize,
    pub unknown_category: usize,
    pub too_short: usize,
}

impl DroppedCounts {
    pub fn total(&self) -> usize {
        self.malformed + self.unknown_category + self.too_short
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecords {
    pub records: Vec<ExtractedRecord>,
    pub dropped: DroppedCounts,
}

/// Parse model output into validated records.
///
/// The whole output must be a JSON array; individual bad items are dropped
/// and counted rather than failing the document.
pub fn parse_records(raw: &str, min_chars: usize) -> Result<ParsedRecords, ParseError> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let Value::Array(items) = value else {
        return Err(ParseError::NotAnArray);
    };

    let mut dropped = DroppedCounts::default();
    let mut records = Vec::with_capacity(items.len());

    for item in items {
        let Value::Object(map) = item else {
            dropped.malformed += 1;
            continue;
        };
        let Some(text) = map.get("text").and_then(Value::as_str) else {
            dropped.malformed += 1;
            continue;
        };
        let Some(category) = map
            .get("type")
            .and_then(Value::as_str)
            .and_then(RecordCategory::parse_lenient)
        else {
            dropped.unknown_category += 1;
            continue;
        };
        if !ExtractedRecord::meets_min_length(text, min_chars) {
            dropped.too_short += 1;
            continue;
        }
        let reasoning = map
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        records.push(ExtractedRecord {
            text: text.to_string(),
            category,
            reasoning,
        });
    }

    Ok(ParsedRecords { records, dropped })
}
