//! Knowledge store writer: artifact file → knowledge entries → vector store.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::types::VectorStore;
use super::StorageError;
use crate::config::ARTIFACT_EXTENSION;
use crate::models::{EntryMetadata, ExtractedRecord, IdScheme, KnowledgeEntry, Provenance};

/// Category recorded when a record carries no `type`.
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Cannot read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid artifact {path}: {reason}")]
    Schema { path: String, reason: String },

    #[error("Knowledge store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}

pub struct KnowledgeWriter {
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    min_text_len: usize,
    id_scheme: IdScheme,
}

impl KnowledgeWriter {
    pub fn new(store: Arc<dyn VectorStore>, batch_size: usize, min_text_len: usize, id_scheme: IdScheme) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            min_text_len,
            id_scheme,
        }
    }

    /// Ingest one artifact file. Returns the number of entries upserted.
    pub fn ingest(&self, artifact_path: &Path, provenance: Provenance) -> Result<usize, IngestError> {
        let path_str = artifact_path.display().to_string();
        let bytes = std::fs::read(artifact_path).map_err(|e| IngestError::Read {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| IngestError::Schema {
            path: path_str.clone(),
            reason: format!("not JSON: {e}"),
        })?;
        let items = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| IngestError::Schema {
                path: path_str.clone(),
                reason: "'data' is missing or not a list".into(),
            })?;

        let filename = artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entries = self.build_entries(&filename, items, provenance);

        let mut written = 0;
        for batch in entries.chunks(self.batch_size) {
            written += self.store.upsert(batch)?;
            tracing::debug!(file = %filename, batch = batch.len(), "Upserted batch");
        }

        if written == 0 {
            tracing::warn!(file = %filename, "Artifact yielded no entries");
        } else {
            tracing::info!(file = %filename, provenance = %provenance, entries = written, "Ingested artifact");
        }
        Ok(written)
    }

    fn build_entries(&self, filename: &str, items: &[Value], provenance: Provenance) -> Vec<KnowledgeEntry> {
        let origin_source = filename.replace(".json", "");
        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let text = item.get("text").and_then(Value::as_str)?;
                if !ExtractedRecord::meets_min_length(text, self.min_text_len) {
                    return None;
                }
                let category = item
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_CATEGORY);
                Some(KnowledgeEntry {
                    id: self.entry_id(provenance, filename, index),
                    document: text.to_string(),
                    metadata: EntryMetadata {
                        source_type: provenance,
                        filename: filename.to_string(),
                        category: category.to_string(),
                        origin_source: origin_source.clone(),
                    },
                })
            })
            .collect()
    }

    /// `<provenance>/<filename>-<uuid>`. Both scrapers may emit the same file
    /// name, so the provenance is part of the key.
    fn entry_id(&self, provenance: Provenance, filename: &str, index: usize) -> String {
        let suffix = match self.id_scheme {
            IdScheme::Deterministic => Uuid::new_v5(
                &Uuid::NAMESPACE_URL,
                format!("{provenance}/{filename}#{index}").as_bytes(),
            ),
            IdScheme::Random => Uuid::new_v4(),
        };
        format!("{provenance}/{filename}-{suffix}")
    }

    /// Ingest every `*.json` in `dir`. Per-file failures are logged and skipped.
    pub fn ingest_directory(&self, dir: &Path, provenance: Provenance) -> Result<usize, IngestError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping missing directory");
                return Ok(0);
            }
        };

        let mut files: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION))
            .collect();
        files.sort();

        let mut total = 0;
        for file in files {
            match self.ingest(&file, provenance) {
                Ok(n) => total += n,
                // A dead store will fail every file the same way.
                Err(IngestError::StoreUnavailable(e)) => return Err(IngestError::StoreUnavailable(e)),
                Err(e) => tracing::error!(file = %file.display(), error = %e, "Ingest failed"),
            }
        }
        Ok(total)
    }

    /// Ingest both processed directories.
    pub fn ingest_all(&self, dirs: &crate::config::PipelineDirs) -> Result<usize, IngestError> {
        let mut total = 0;
        for provenance in Provenance::ALL {
            total += self.ingest_directory(dirs.processed(provenance), provenance)?;
        }
        tracing::info!(total, "Ingestion complete");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoredEntry;
    use crate::pipeline::storage::{EmbeddingModel, InMemoryVectorStore, MockEmbedder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn writer(scheme: IdScheme, batch: usize) -> (KnowledgeWriter, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(MockEmbedder::new())));
        (KnowledgeWriter::new(store.clone(), batch, 5, scheme), store)
    }

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    const ARTIFACT: &str = r#"{
        "meta": {"source": "abc.txt", "model": "m", "time": 1.0},
        "data": [
            {"text": "Revenue grew 12% year over year", "type": "FACT", "reasoning": "r"},
            {"text": "abc", "type": "FACT"},
            {"text": "", "type": "OPINION"},
            "stray string",
            {"text": "Stay diversified"}
        ]
    }"#;

    #[test]
    fn ingests_valid_records_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "abc_processed.json", ARTIFACT);
        let (w, store) = writer(IdScheme::Deterministic, 100);

        assert_eq!(w.ingest(&path, Provenance::Institutional).unwrap(), 2);
        let entries = store.entries();
        assert_eq!(entries[0].metadata.source_type, Provenance::Institutional);
        assert_eq!(entries[0].metadata.filename, "abc_processed.json");
        assert_eq!(entries[0].metadata.origin_source, "abc_processed");
        assert_eq!(entries[0].metadata.category, "FACT");
        assert_eq!(entries[1].metadata.category, UNKNOWN_CATEGORY);
        assert!(entries[0].id.starts_with("institutional/abc_processed.json-"));
    }

    #[test]
    fn deterministic_ids_make_reingest_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "abc_processed.json", ARTIFACT);
        let (w, store) = writer(IdScheme::Deterministic, 100);

        w.ingest(&path, Provenance::Retail).unwrap();
        w.ingest(&path, Provenance::Retail).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn random_ids_duplicate_on_reingest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "abc_processed.json", ARTIFACT);
        let (w, store) = writer(IdScheme::Random, 100);

        w.ingest(&path, Provenance::Retail).unwrap();
        w.ingest(&path, Provenance::Retail).unwrap();
        assert_eq!(store.count().unwrap(), 4);
    }

    #[test]
    fn missing_data_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "x_processed.json", r#"{"meta": {}}"#);
        let (w, store) = writer(IdScheme::Deterministic, 100);

        assert!(matches!(w.ingest(&path, Provenance::Retail), Err(IngestError::Schema { .. })));
        let path = write(dir.path(), "y_processed.json", r#"{"data": {"text": "abcdef"}}"#);
        assert!(matches!(w.ingest(&path, Provenance::Retail), Err(IngestError::Schema { .. })));
        let path = write(dir.path(), "z_processed.json", "not json");
        assert!(matches!(w.ingest(&path, Provenance::Retail), Err(IngestError::Schema { .. })));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn unreadable_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let (w, _) = writer(IdScheme::Deterministic, 100);
        let err = w.ingest(&dir.path().join("gone.json"), Provenance::Retail).unwrap_err();
        assert!(matches!(err, IngestError::Read { .. }));
    }

    #[test]
    fn empty_data_is_zero_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "e_processed.json", r#"{"data": []}"#);
        let (w, _) = writer(IdScheme::Deterministic, 100);
        assert_eq!(w.ingest(&path, Provenance::Retail).unwrap(), 0);
    }

    #[test]
    fn batches_flush_partial_tail() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<String> = (0..7)
            .map(|i| format!(r#"{{"text": "record number {i}", "type": "FACT"}}"#))
            .collect();
        let path = write(
            dir.path(),
            "many_processed.json",
            &format!(r#"{{"data": [{}]}}"#, records.join(",")),
        );
        let (w, store) = writer(IdScheme::Deterministic, 3);
        assert_eq!(w.ingest(&path, Provenance::Retail).unwrap(), 7);
        assert_eq!(store.count().unwrap(), 7);
    }

    #[test]
    fn directory_ingest_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good_processed.json", ARTIFACT);
        write(dir.path(), "bad_processed.json", "{");
        write(dir.path(), "notes.txt", "ignored");
        let (w, store) = writer(IdScheme::Deterministic, 100);

        assert_eq!(w.ingest_directory(dir.path(), Provenance::Retail).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(w.ingest_directory(&dir.path().join("absent"), Provenance::Retail).unwrap(), 0);
    }

    #[test]
    fn same_name_in_both_provenances_keeps_both() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "abc_processed.json", ARTIFACT);
        let (w, store) = writer(IdScheme::Deterministic, 100);

        w.ingest(&path, Provenance::Retail).unwrap();
        w.ingest(&path, Provenance::Institutional).unwrap();
        assert_eq!(store.count().unwrap(), 4);
        let retail = store
            .entries()
            .iter()
            .filter(|e| e.metadata.source_type == Provenance::Retail)
            .count();
        assert_eq!(retail, 2);
    }

    struct BrokenEmbedder;

    impl EmbeddingModel for BrokenEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, StorageError> {
            Err(StorageError::EmbeddingUnavailable("connection refused".into()))
        }
        fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, StorageError> {
            Err(StorageError::EmbeddingUnavailable("connection refused".into()))
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    /// Fails every upsert and counts the attempts.
    #[derive(Default)]
    struct DeadStore {
        upserts: AtomicUsize,
    }

    impl VectorStore for DeadStore {
        fn upsert(&self, _entries: &[KnowledgeEntry]) -> Result<usize, StorageError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::VectorDb("disk I/O error".into()))
        }
        fn query(
            &self,
            _text: &str,
            _n: usize,
            _filter: Option<Provenance>,
        ) -> Result<Vec<ScoredEntry>, StorageError> {
            Err(StorageError::VectorDb("disk I/O error".into()))
        }
        fn count(&self) -> Result<usize, StorageError> {
            Err(StorageError::VectorDb("disk I/O error".into()))
        }
    }

    #[test]
    fn embedding_failure_surfaces_as_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "abc_processed.json", ARTIFACT);
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(BrokenEmbedder)));
        let w = KnowledgeWriter::new(store.clone(), 100, 5, IdScheme::Deterministic);

        let err = w.ingest(&path, Provenance::Retail).unwrap_err();
        assert!(matches!(err, IngestError::StoreUnavailable(_)));
        assert!(store.entries().is_empty());
    }

    #[test]
    fn directory_ingest_stops_at_first_store_failure() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a_processed.json", ARTIFACT);
        write(dir.path(), "b_processed.json", ARTIFACT);
        let store = Arc::new(DeadStore::default());
        let w = KnowledgeWriter::new(store.clone(), 100, 5, IdScheme::Deterministic);

        let err = w.ingest_directory(dir.path(), Provenance::Retail).unwrap_err();
        assert!(matches!(err, IngestError::StoreUnavailable(_)));
        assert_eq!(store.upserts.load(Ordering::SeqCst), 1);

        let dirs = crate::config::PipelineDirs::under(dir.path());
        dirs.ensure_exist().unwrap();
        write(dirs.processed(Provenance::Retail), "c_processed.json", ARTIFACT);
        write(dirs.processed(Provenance::Institutional), "d_processed.json", ARTIFACT);
        assert!(matches!(w.ingest_all(&dirs), Err(IngestError::StoreUnavailable(_))));
        assert_eq!(store.upserts.load(Ordering::SeqCst), 2);
    }
}
