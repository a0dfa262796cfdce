//! Sequential batch runs over the scraped directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{PipelineDirs, RAW_EXTENSION};
use crate::models::Provenance;
use crate::pipeline::processor::{DocumentProcessor, ProcessOutcome};
use crate::pipeline::sleeper::Sleeper;

/// Per-file result of a batch run.
#[derive(Debug)]
pub struct BatchItem {
    pub file: PathBuf,
    pub outcome: ProcessOutcome,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub provenance: Option<Provenance>,
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    fn count(&self, label: &str) -> usize {
        self.items.iter().filter(|i| i.outcome.label() == label).count()
    }

    pub fn processed(&self) -> usize {
        self.count("processed")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }
}

pub struct BatchRunner {
    processor: Arc<DocumentProcessor>,
    sleeper: Arc<dyn Sleeper>,
    pause: Duration,
}

impl BatchRunner {
    pub fn new(processor: Arc<DocumentProcessor>, sleeper: Arc<dyn Sleeper>, pause: Duration) -> Self {
        Self {
            processor,
            sleeper,
            pause,
        }
    }

    /// Process every `*.txt` in `input_dir`, file *i* starting at roster slot *i*.
    pub fn run_batch(&self, input_dir: &Path, output_dir: &Path, provenance: Provenance) -> BatchReport {
        let mut report = BatchReport {
            provenance: Some(provenance),
            items: Vec::new(),
        };

        let files = match list_raw_documents(input_dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(dir = %input_dir.display(), error = %e, "Input directory unavailable");
                return report;
            }
        };

        tracing::info!(provenance = %provenance, files = files.len(), "Starting batch");

        let last = files.len().saturating_sub(1);
        for (i, file) in files.into_iter().enumerate() {
            let outcome = self.processor.process_at(&file, provenance, output_dir, i);
            let skipped = matches!(outcome, ProcessOutcome::Skipped { .. });
            report.items.push(BatchItem { file, outcome });

            if i < last && !skipped {
                self.sleeper.sleep(self.pause);
            }
        }

        tracing::info!(
            provenance = %provenance,
            processed = report.processed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Batch complete"
        );
        report
    }

    /// Retail batch, then institutional.
    pub fn run_all(&self, dirs: &PipelineDirs) -> Vec<BatchReport> {
        Provenance::ALL
            .iter()
            .map(|&p| self.run_batch(dirs.raw(p), dirs.processed(p), p))
            .collect()
    }
}

/// `*.txt` files directly under `dir`, sorted by file name.
pub fn list_raw_documents(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == RAW_EXTENSION))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
