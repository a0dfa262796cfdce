use serde::{Deserialize, Serialize};

use super::enums::RecordCategory;

/// Records shorter than this are treated as extraction noise.
pub const MIN_RECORD_TEXT_CHARS: usize = 5;

/// One logical unit pulled out of a document by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub text: String,
    #[serde(rename = "type")]
    pub category: RecordCategory,
    #[serde(default)]
    pub reasoning: String,
}

impl ExtractedRecord {
    /// Length check is in characters, not bytes.
    pub fn meets_min_length(text: &str, min_chars: usize) -> bool {
        !text.is_empty() && text.chars().count() >= min_chars
    }
}

/// Provenance block of an artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Raw document file name the records came from.
    pub source: String,
    /// Model identifier that produced the records.
    pub model: String,
    /// Completion time, Unix seconds.
    pub time: f64,
}

/// Durable output of one processor run: `<stem>_processed.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedArtifact {
    pub meta: ArtifactMeta,
    pub data: Vec<ExtractedRecord>,
}

impl ProcessedArtifact {
    pub fn new(source: &str, model: &str, data: Vec<ExtractedRecord>) -> Self {
        let now = chrono::Utc::now();
        Self {
            meta: ArtifactMeta {
                source: source.to_string(),
                model: model.to_string(),
                time: now.timestamp_millis() as f64 / 1000.0,
            },
            data,
        }
    }
}
