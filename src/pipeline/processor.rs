//! Document processor: raw text file → validated records → artifact.
//!
//! The artifact's existence at its deterministic path is the completion
//! marker, so a second run over the same document is a no-op.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::{Provenance, ProcessedArtifact};
use crate::pipeline::artifact::{artifact_path, write_artifact_atomic, WriteOutcome};
use crate::pipeline::model_router::{ModelSelector, SelectionError};
use crate::pipeline::structuring::{parse_records, ExtractionRequest};

/// Characters of raw model output logged at warn level on parse failure.
const MALFORMED_LOG_PREVIEW: usize = 500;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Cannot read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("No usable model produced output (tried: {})", tried.join(", "))]
    ExtractionUnavailable { tried: Vec<String> },

    #[error("Model {model} returned malformed output: {reason}")]
    MalformedOutput { model: String, reason: String },

    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<SelectionError> for ProcessingError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::AllModelsUnavailable { tried } => Self::ExtractionUnavailable { tried },
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ProcessOutcome {
    Processed {
        artifact: ProcessedArtifact,
        path: PathBuf,
    },
    /// Artifact already present; nothing was read or generated.
    Skipped { path: PathBuf },
    Failed(ProcessingError),
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Skipped { .. } => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct DocumentProcessor {
    selector: Arc<ModelSelector>,
    max_input_chars: usize,
    min_text_len: usize,
}

impl DocumentProcessor {
    pub fn new(selector: Arc<ModelSelector>, max_input_chars: usize, min_text_len: usize) -> Self {
        Self {
            selector,
            max_input_chars,
            min_text_len,
        }
    }

    /// Process one document, letting the selector pick the rotation slot.
    pub fn process(&self, raw_path: &Path, provenance: Provenance, output_dir: &Path) -> ProcessOutcome {
        self.run(raw_path, provenance, output_dir, None)
    }

    /// Process one document starting the model rotation at `slot`.
    pub fn process_at(
        &self,
        raw_path: &Path,
        provenance: Provenance,
        output_dir: &Path,
        slot: usize,
    ) -> ProcessOutcome {
        self.run(raw_path, provenance, output_dir, Some(slot))
    }

    fn run(
        &self,
        raw_path: &Path,
        provenance: Provenance,
        output_dir: &Path,
        slot: Option<usize>,
    ) -> ProcessOutcome {
        let Some(out_path) = artifact_path(raw_path, output_dir) else {
            return ProcessOutcome::Failed(ProcessingError::Read {
                path: raw_path.display().to_string(),
                reason: "file name has no usable stem".into(),
            });
        };

        if out_path.exists() {
            tracing::info!(artifact = %out_path.display(), "Artifact exists, skipping");
            return ProcessOutcome::Skipped { path: out_path };
        }

        match self.extract(raw_path, provenance, &out_path, slot) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    file = %raw_path.display(),
                    provenance = %provenance,
                    error = %e,
                    "Document processing failed"
                );
                ProcessOutcome::Failed(e)
            }
        }
    }

    fn extract(
        &self,
        raw_path: &Path,
        provenance: Provenance,
        out_path: &Path,
        slot: Option<usize>,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let raw_text = std::fs::read_to_string(raw_path).map_err(|e| ProcessingError::Read {
            path: raw_path.display().to_string(),
            reason: e.to_string(),
        })?;
        if raw_text.trim().is_empty() {
            return Err(ProcessingError::Read {
                path: raw_path.display().to_string(),
                reason: "document is empty".into(),
            });
        }

        let request = ExtractionRequest::build(&raw_text, provenance, self.max_input_chars);
        tracing::info!(
            file = %raw_path.display(),
            provenance = %provenance,
            chars = request.included_chars,
            truncated = request.truncated,
            "Processing document"
        );

        let generation = match slot {
            Some(slot) => self.selector.generate_from(&request.prompt, slot)?,
            None => self.selector.generate(&request.prompt)?,
        };

        let parsed = parse_records(&generation.text, self.min_text_len).map_err(|e| {
            let preview: String = generation.text.chars().take(MALFORMED_LOG_PREVIEW).collect();
            tracing::warn!(model = %generation.model, output = %preview, "Unparseable model output");
            tracing::debug!(model = %generation.model, output = %generation.text, "Full model output");
            ProcessingError::MalformedOutput {
                model: generation.model.clone(),
                reason: e.to_string(),
            }
        })?;

        if parsed.dropped.total() > 0 {
            tracing::info!(
                malformed = parsed.dropped.malformed,
                unknown_category = parsed.dropped.unknown_category,
                too_short = parsed.dropped.too_short,
                "Dropped invalid records"
            );
        }

        let source = raw_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let artifact = ProcessedArtifact::new(&source, &generation.model, parsed.records);

        let written = write_artifact_atomic(out_path, &artifact).map_err(|e| ProcessingError::Write {
            path: out_path.display().to_string(),
            source: e,
        })?;

        match written {
            WriteOutcome::Written => {
                tracing::info!(
                    artifact = %out_path.display(),
                    model = %generation.model,
                    records = artifact.data.len(),
                    "Saved artifact"
                );
                Ok(ProcessOutcome::Processed {
                    artifact,
                    path: out_path.to_path_buf(),
                })
            }
            WriteOutcome::AlreadyExists => {
                tracing::info!(artifact = %out_path.display(), "Artifact written concurrently, skipping");
                Ok(ProcessOutcome::Skipped {
                    path: out_path.to_path_buf(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordCategory;
    use crate::pipeline::model_router::RetryPolicy;
    use crate::pipeline::sleeper::RecordingSleeper;
    use crate::pipeline::structuring::{GenerationError, MockLlmClient};
    use crate::models::SelectionStrategy;

    const ONE_FACT: &str =
        "```json\n[{\"text\":\"CPI rose 0.4% in March\",\"type\":\"FACT\",\"reasoning\":\"data\"}]\n```";

    fn processor(client: Arc<MockLlmClient>, roster: &[&str], max_chars: usize) -> DocumentProcessor {
        let selector = ModelSelector::new(
            client,
            roster.iter().map(|s| s.to_string()).collect(),
            SelectionStrategy::RoundRobin,
            RetryPolicy::default(),
            Arc::new(RecordingSleeper::new()),
        );
        DocumentProcessor::new(Arc::new(selector), max_chars, 5)
    }

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("scraped");
        let out = dir.path().join("processed");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        (dir, raw, out)
    }

    #[test]
    fn processes_and_writes_artifact() {
        let (_dir, raw, out) = setup();
        let doc = raw.join("abc.txt");
        std::fs::write(&doc, "CPI rose 0.4% in March, said the bureau.").unwrap();

        let client = Arc::new(MockLlmClient::new().with_response("M1", ONE_FACT));
        let p = processor(client, &["M1"], 30_000);

        let ProcessOutcome::Processed { artifact, path } = p.process(&doc, Provenance::Retail, &out) else {
            panic!("expected Processed");
        };
        assert_eq!(path, out.join("abc_processed.json"));
        assert!(path.exists());
        assert_eq!(artifact.meta.source, "abc.txt");
        assert_eq!(artifact.meta.model, "M1");
        assert_eq!(artifact.data[0].category, RecordCategory::Fact);
    }

    #[test]
    fn second_run_skips_without_calling_model() {
        let (_dir, raw, out) = setup();
        let doc = raw.join("abc.txt");
        std::fs::write(&doc, "some text here").unwrap();

        let client = Arc::new(MockLlmClient::new().with_response("M1", ONE_FACT));
        let p = processor(client.clone(), &["M1"], 30_000);

        assert_eq!(p.process(&doc, Provenance::Retail, &out).label(), "processed");
        assert_eq!(p.process(&doc, Provenance::Retail, &out).label(), "skipped");
        assert_eq!(client.calls().len(), 1);
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn prompt_carries_only_leading_chars() {
        let (_dir, raw, out) = setup();
        let doc = raw.join("long.txt");
        std::fs::write(&doc, format!("{}{}", "A".repeat(10), "B".repeat(10))).unwrap();

        let client = Arc::new(MockLlmClient::new().with_response("M1", "[]"));
        let p = processor(client.clone(), &["M1"], 10);
        p.process(&doc, Provenance::Institutional, &out);

        let (_, prompt) = &client.calls()[0];
        assert!(prompt.contains("AAAAAAAAAA"));
        assert!(!prompt.contains('B'));
    }

    #[test]
    fn whitespace_document_fails_without_side_effects() {
        let (_dir, raw, out) = setup();
        let doc = raw.join("blank.txt");
        std::fs::write(&doc, "  \n\t ").unwrap();

        let client = Arc::new(MockLlmClient::new().with_response("M1", ONE_FACT));
        let p = processor(client.clone(), &["M1"], 30_000);

        let outcome = p.process(&doc, Provenance::Retail, &out);
        assert!(matches!(outcome, ProcessOutcome::Failed(ProcessingError::Read { .. })));
        assert!(client.calls().is_empty());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn missing_document_is_read_error() {
        let (_dir, raw, out) = setup();
        let client = Arc::new(MockLlmClient::new());
        let p = processor(client, &["M1"], 30_000);
        let outcome = p.process(&raw.join("gone.txt"), Provenance::Retail, &out);
        assert!(matches!(outcome, ProcessOutcome::Failed(ProcessingError::Read { .. })));
    }

    #[test]
    fn malformed_output_fails_and_writes_nothing() {
        let (_dir, raw, out) = setup();
        let doc = raw.join("abc.txt");
        std::fs::write(&doc, "text").unwrap();

        let client = Arc::new(MockLlmClient::new().with_response("M1", "Here is your JSON: nope"));
        let p = processor(client.clone(), &["M1"], 30_000);

        let outcome = p.process(&doc, Provenance::Retail, &out);
        assert!(matches!(
            outcome,
            ProcessOutcome::Failed(ProcessingError::MalformedOutput { .. })
        ));
        assert_eq!(client.calls().len(), 1);
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn exhausted_roster_is_extraction_unavailable() {
        let (_dir, raw, out) = setup();
        let doc = raw.join("abc.txt");
        std::fs::write(&doc, "text").unwrap();

        let client = Arc::new(
            MockLlmClient::new().with_error("M1", GenerationError::Other("down".into())),
        );
        let p = processor(client, &["M1"], 30_000);

        match p.process(&doc, Provenance::Retail, &out) {
            ProcessOutcome::Failed(ProcessingError::ExtractionUnavailable { tried }) => {
                assert_eq!(tried, vec!["M1"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn slot_selects_starting_model() {
        let (_dir, raw, out) = setup();
        let doc = raw.join("abc.txt");
        std::fs::write(&doc, "text").unwrap();

        let client = Arc::new(
            MockLlmClient::new()
                .with_response("M1", "[]")
                .with_response("M2", "[]"),
        );
        let p = processor(client.clone(), &["M1", "M2"], 30_000);
        let ProcessOutcome::Processed { artifact, .. } = p.process_at(&doc, Provenance::Retail, &out, 3) else {
            panic!("expected Processed");
        };
        assert_eq!(artifact.meta.model, "M2");
    }
}
