use std::sync::Arc;

use serde::Serialize;

use super::RetrievalError;
use crate::models::{EntryMetadata, Provenance, ScoredEntry};
use crate::pipeline::storage::VectorStore;

pub const DEFAULT_RESULT_COUNT: usize = 5;

/// Ranked results, parallel lists in ascending distance order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub documents: Vec<String>,
    pub metadatas: Vec<EntryMetadata>,
    pub distances: Vec<f32>,
}

impl Retrieval {
    fn from_scored(entries: Vec<ScoredEntry>) -> Self {
        let mut out = Self::default();
        for e in entries {
            out.documents.push(e.document);
            out.metadatas.push(e.metadata);
            out.distances.push(e.distance);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    Ranked(Retrieval),
    NoRelevantData,
}

/// Institutional and retail results for the same query.
#[derive(Debug, Clone, PartialEq)]
pub struct DualRetrieval {
    pub institutional: RetrievalOutcome,
    pub retail: RetrievalOutcome,
}

pub struct RetrievalService {
    store: Arc<dyn VectorStore>,
}

impl RetrievalService {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Top `n` entries for `query`, restricted to `provenance` when given.
    pub fn retrieve(
        &self,
        query: &str,
        provenance: Option<Provenance>,
        n: usize,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let scored = self.store.query(query, n, provenance).map_err(|e| {
            tracing::error!(error = %e, "Vector store query failed");
            RetrievalError::StoreUnavailable
        })?;

        tracing::debug!(
            filter = provenance.map(|p| p.as_str()).unwrap_or("none"),
            hits = scored.len(),
            "Retrieved context"
        );

        if scored.is_empty() {
            return Ok(RetrievalOutcome::NoRelevantData);
        }
        Ok(RetrievalOutcome::Ranked(Retrieval::from_scored(scored)))
    }

    pub fn retrieve_dual(&self, query: &str, n: usize) -> Result<DualRetrieval, RetrievalError> {
        Ok(DualRetrieval {
            institutional: self.retrieve(query, Some(Provenance::Institutional), n)?,
            retail: self.retrieve(query, Some(Provenance::Retail), n)?,
        })
    }
}

/// `- [SOURCE | CATEGORY] text` lines for a downstream synthesiser.
pub fn format_context(outcome: &RetrievalOutcome) -> String {
    match outcome {
        RetrievalOutcome::NoRelevantData => "No relevant data found.".to_string(),
        RetrievalOutcome::Ranked(r) => r
            .documents
            .iter()
            .zip(&r.metadatas)
            .map(|(doc, meta)| {
                format!(
                    "- [{} | {}] {}\n",
                    meta.source_type.as_str().to_uppercase(),
                    meta.category.to_uppercase(),
                    doc
                )
            })
            .collect(),
    }
}
