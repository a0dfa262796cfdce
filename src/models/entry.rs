use serde::{Deserialize, Serialize};

use super::enums::Provenance;

/// Metadata stored next to each knowledge entry; `source_type` is the filter key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub source_type: Provenance,
    /// Artifact file name, e.g. `abc_processed.json`.
    pub filename: String,
    pub category: String,
    /// Artifact name without the `.json` extension.
    pub origin_source: String,
}

/// One retrievable unit in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub document: String,
    pub metadata: EntryMetadata,
}

/// A knowledge entry returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    pub id: String,
    pub document: String,
    pub metadata: EntryMetadata,
    /// Cosine distance, lower is closer.
    pub distance: f32,
}
