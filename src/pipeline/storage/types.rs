use super::StorageError;
use crate::models::{KnowledgeEntry, Provenance, ScoredEntry};

/// Embedding model abstraction
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StorageError>;
    fn name(&self) -> &str;
}

/// Vector store abstraction. Embeddings are computed by the store.
pub trait VectorStore: Send + Sync {
    /// Insert or replace entries by id. Returns the number written.
    fn upsert(&self, entries: &[KnowledgeEntry]) -> Result<usize, StorageError>;

    /// Nearest `n` entries to `text`, ascending distance, optionally
    /// restricted to one provenance.
    fn query(
        &self,
        text: &str,
        n: usize,
        filter: Option<Provenance>,
    ) -> Result<Vec<ScoredEntry>, StorageError>;

    fn count(&self) -> Result<usize, StorageError>;
}
