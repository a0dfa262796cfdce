//! Routes file events from the four watched directories to the processor
//! or the knowledge writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{PipelineDirs, ARTIFACT_EXTENSION};
use crate::models::Provenance;
use crate::pipeline::processor::{DocumentProcessor, ProcessOutcome};
use crate::pipeline::sleeper::Sleeper;
use crate::pipeline::storage::{IngestError, KnowledgeWriter};

use super::observer::FileEvent;

/// Extensions editors and downloaders use for partial files.
const TEMP_EXTENSIONS: &[&str] = &["swp", "swx", "tmp", "part", "crdownload"];

// ──────────────────────────────────────────────
// Stages
// ──────────────────────────────────────────────

/// Raw document → artifact.
pub trait ExtractStage: Send + Sync {
    fn extract(&self, raw_path: &Path, provenance: Provenance, output_dir: &Path) -> ProcessOutcome;
}

/// Artifact → knowledge store.
pub trait IngestStage: Send + Sync {
    fn ingest(&self, artifact_path: &Path, provenance: Provenance) -> Result<usize, IngestError>;
}

impl ExtractStage for DocumentProcessor {
    fn extract(&self, raw_path: &Path, provenance: Provenance, output_dir: &Path) -> ProcessOutcome {
        self.process(raw_path, provenance, output_dir)
    }
}

impl IngestStage for KnowledgeWriter {
    fn ingest(&self, artifact_path: &Path, provenance: Provenance) -> Result<usize, IngestError> {
        KnowledgeWriter::ingest(self, artifact_path, provenance)
    }
}

// ──────────────────────────────────────────────
// Classification
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    RawRetail,
    RawInstitutional,
    ProcessedRetail,
    ProcessedInstitutional,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::RawRetail,
        Role::RawInstitutional,
        Role::ProcessedRetail,
        Role::ProcessedInstitutional,
    ];

    pub fn provenance(self) -> Provenance {
        match self {
            Role::RawRetail | Role::ProcessedRetail => Provenance::Retail,
            Role::RawInstitutional | Role::ProcessedInstitutional => Provenance::Institutional,
        }
    }

    pub fn is_raw(self) -> bool {
        matches!(self, Role::RawRetail | Role::RawInstitutional)
    }

    fn dir(self, dirs: &PipelineDirs) -> &Path {
        if self.is_raw() {
            dirs.raw(self.provenance())
        } else {
            dirs.processed(self.provenance())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Directory,
    HiddenOrTemp,
    NotJson,
    Unwatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Extract {
        path: PathBuf,
        provenance: Provenance,
        output_dir: PathBuf,
    },
    Ingest {
        path: PathBuf,
        provenance: Provenance,
    },
    Ignored(IgnoreReason),
}

/// Per-root progress of the event currently being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    EventReceived,
    Classified,
    Dispatched,
}

/// Dot-files, Office lock files, editor backups and partial downloads.
pub fn is_hidden_or_temp(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    if name.starts_with('.') || name.starts_with("~$") || name.ends_with('~') {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TEMP_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

// ──────────────────────────────────────────────
// Dispatcher
// ──────────────────────────────────────────────

pub struct WatchDispatcher {
    dirs: PipelineDirs,
    extractor: Arc<dyn ExtractStage>,
    ingester: Arc<dyn IngestStage>,
    sleeper: Arc<dyn Sleeper>,
    debounce: Duration,
    states: HashMap<Role, WatchState>,
}

impl WatchDispatcher {
    pub fn new(
        dirs: PipelineDirs,
        extractor: Arc<dyn ExtractStage>,
        ingester: Arc<dyn IngestStage>,
        sleeper: Arc<dyn Sleeper>,
        debounce: Duration,
    ) -> Self {
        let states = Role::ALL.iter().map(|&r| (r, WatchState::Idle)).collect();
        Self {
            dirs,
            extractor,
            ingester,
            sleeper,
            debounce,
            states,
        }
    }

    pub fn state(&self, role: Role) -> WatchState {
        self.states.get(&role).copied().unwrap_or(WatchState::Idle)
    }

    fn set_state(&mut self, role: Role, state: WatchState) {
        tracing::trace!(?role, ?state, "Watch state");
        self.states.insert(role, state);
    }

    /// Role of the directory directly containing `path`.
    pub fn role_of(&self, path: &Path) -> Option<Role> {
        let parent = path.parent()?;
        Role::ALL
            .into_iter()
            .find(|role| same_dir(parent, role.dir(&self.dirs)))
    }

    /// Decide what to do with `path` without touching any stage.
    pub fn classify(&self, path: &Path) -> Dispatch {
        if path.is_dir() {
            return Dispatch::Ignored(IgnoreReason::Directory);
        }
        if is_hidden_or_temp(path) {
            return Dispatch::Ignored(IgnoreReason::HiddenOrTemp);
        }
        let Some(role) = self.role_of(path) else {
            return Dispatch::Ignored(IgnoreReason::Unwatched);
        };

        let provenance = role.provenance();
        if role.is_raw() {
            return Dispatch::Extract {
                path: path.to_path_buf(),
                provenance,
                output_dir: self.dirs.processed(provenance).to_path_buf(),
            };
        }

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION));
        if !is_json {
            return Dispatch::Ignored(IgnoreReason::NotJson);
        }
        Dispatch::Ingest {
            path: path.to_path_buf(),
            provenance,
        }
    }

    /// Handle one event to completion. Failures are logged, never retried.
    pub fn handle(&mut self, event: &FileEvent) -> Dispatch {
        let path = &event.path;
        if path.is_dir() {
            return Dispatch::Ignored(IgnoreReason::Directory);
        }
        if is_hidden_or_temp(path) {
            tracing::trace!(file = %path.display(), "Ignoring hidden/temp file");
            return Dispatch::Ignored(IgnoreReason::HiddenOrTemp);
        }

        let role = self.role_of(path);
        if let Some(role) = role {
            self.set_state(role, WatchState::EventReceived);
        }

        // Let the writer finish before reading.
        self.sleeper.sleep(self.debounce);

        let dispatch = self.classify(path);
        if let Some(role) = role {
            self.set_state(role, WatchState::Classified);
        }

        match &dispatch {
            Dispatch::Extract {
                path,
                provenance,
                output_dir,
            } => {
                tracing::info!(file = %path.display(), provenance = %provenance, "New raw document");
                let outcome = self.extractor.extract(path, *provenance, output_dir);
                tracing::info!(file = %path.display(), outcome = outcome.label(), "Extraction finished");
            }
            Dispatch::Ingest { path, provenance } => {
                tracing::info!(file = %path.display(), provenance = %provenance, "New artifact");
                match self.ingester.ingest(path, *provenance) {
                    Ok(n) => tracing::info!(file = %path.display(), entries = n, "Ingest finished"),
                    Err(e) => tracing::error!(file = %path.display(), error = %e, "Ingest failed"),
                }
            }
            Dispatch::Ignored(reason) => {
                tracing::debug!(file = %path.display(), ?reason, "Ignoring event");
            }
        }

        if let Some(role) = role {
            self.set_state(role, WatchState::Dispatched);
            self.set_state(role, WatchState::Idle);
        }
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processor::ProcessingError;
    use crate::pipeline::sleeper::RecordingSleeper;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStages {
        extracted: Mutex<Vec<(PathBuf, Provenance, PathBuf)>>,
        ingested: Mutex<Vec<(PathBuf, Provenance)>>,
    }

    impl ExtractStage for RecordingStages {
        fn extract(&self, raw: &Path, provenance: Provenance, out: &Path) -> ProcessOutcome {
            self.extracted
                .lock()
                .unwrap()
                .push((raw.to_path_buf(), provenance, out.to_path_buf()));
            ProcessOutcome::Failed(ProcessingError::ExtractionUnavailable { tried: vec![] })
        }
    }

    impl IngestStage for RecordingStages {
        fn ingest(&self, artifact: &Path, provenance: Provenance) -> Result<usize, IngestError> {
            self.ingested
                .lock()
                .unwrap()
                .push((artifact.to_path_buf(), provenance));
            Ok(1)
        }
    }

    fn setup() -> (tempfile::TempDir, PipelineDirs, Arc<RecordingStages>, Arc<RecordingSleeper>, WatchDispatcher) {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = PipelineDirs::under(tmp.path());
        dirs.ensure_exist().unwrap();
        let stages = Arc::new(RecordingStages::default());
        let sleeper = Arc::new(RecordingSleeper::new());
        let dispatcher = WatchDispatcher::new(
            dirs.clone(),
            stages.clone(),
            stages.clone(),
            sleeper.clone(),
            Duration::from_secs(1),
        );
        (tmp, dirs, stages, sleeper, dispatcher)
    }

    fn event(path: PathBuf) -> FileEvent {
        std::fs::write(&path, "x").unwrap();
        FileEvent { path }
    }

    #[test]
    fn raw_retail_goes_to_processor_only() {
        let (_tmp, dirs, stages, sleeper, mut d) = setup();
        let path = dirs.raw(Provenance::Retail).join("abc.txt");

        let dispatch = d.handle(&event(path.clone()));
        assert!(matches!(dispatch, Dispatch::Extract { provenance: Provenance::Retail, .. }));

        let extracted = stages.extracted.lock().unwrap();
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].0, path);
        assert_eq!(extracted[0].1, Provenance::Retail);
        assert_eq!(extracted[0].2, dirs.processed(Provenance::Retail));
        assert!(stages.ingested.lock().unwrap().is_empty());
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(1)]);
        assert_eq!(d.state(Role::RawRetail), WatchState::Idle);
    }

    #[test]
    fn raw_institutional_uses_institutional_output() {
        let (_tmp, dirs, stages, _, mut d) = setup();
        d.handle(&event(dirs.raw(Provenance::Institutional).join("r.txt")));
        let extracted = stages.extracted.lock().unwrap();
        assert_eq!(extracted[0].1, Provenance::Institutional);
        assert_eq!(extracted[0].2, dirs.processed(Provenance::Institutional));
    }

    #[test]
    fn processed_json_goes_to_writer() {
        let (_tmp, dirs, stages, _, mut d) = setup();
        let path = dirs.processed(Provenance::Institutional).join("r_processed.json");
        d.handle(&event(path.clone()));
        assert_eq!(
            *stages.ingested.lock().unwrap(),
            vec![(path, Provenance::Institutional)]
        );
        assert!(stages.extracted.lock().unwrap().is_empty());
    }

    #[test]
    fn processed_non_json_is_ignored() {
        let (_tmp, dirs, stages, _, mut d) = setup();
        let dispatch = d.handle(&event(dirs.processed(Provenance::Institutional).join("notes.txt")));
        assert_eq!(dispatch, Dispatch::Ignored(IgnoreReason::NotJson));
        assert!(stages.ingested.lock().unwrap().is_empty());
        assert!(stages.extracted.lock().unwrap().is_empty());
    }

    #[test]
    fn hidden_and_temp_names_ignored_without_debounce() {
        let (_tmp, dirs, stages, sleeper, mut d) = setup();
        let raw = dirs.raw(Provenance::Retail);
        for name in [".DS_Store", "~$report.docx", "draft.txt~", "a.swp", "b.crdownload", "c.part"] {
            assert_eq!(
                d.handle(&event(raw.join(name))),
                Dispatch::Ignored(IgnoreReason::HiddenOrTemp),
                "{name}"
            );
        }
        assert!(stages.extracted.lock().unwrap().is_empty());
        assert!(sleeper.slept().is_empty());
    }

    #[test]
    fn directories_ignored() {
        let (_tmp, dirs, stages, _, mut d) = setup();
        let sub = dirs.raw(Provenance::Retail).join("nested");
        std::fs::create_dir(&sub).unwrap();
        assert_eq!(
            d.handle(&FileEvent { path: sub }),
            Dispatch::Ignored(IgnoreReason::Directory)
        );
        assert!(stages.extracted.lock().unwrap().is_empty());
    }

    #[test]
    fn unwatched_location_ignored() {
        let (tmp, _, stages, _, mut d) = setup();
        let dispatch = d.handle(&event(tmp.path().join("stray.txt")));
        assert_eq!(dispatch, Dispatch::Ignored(IgnoreReason::Unwatched));
        assert!(stages.extracted.lock().unwrap().is_empty());
    }

    #[test]
    fn temp_detection() {
        assert!(is_hidden_or_temp(Path::new("/x/.tmpAbc.json")));
        assert!(is_hidden_or_temp(Path::new("/x/file.TMP")));
        assert!(!is_hidden_or_temp(Path::new("/x/report.txt")));
        assert!(!is_hidden_or_temp(Path::new("/x/a_processed.json")));
    }
}
