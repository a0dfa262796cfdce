pub mod dispatcher;
pub mod observer;

pub use dispatcher::*;
pub use observer::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::pipeline::sleeper::Sleeper;

/// Shutdown is checked at least this often while idle.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(250);

/// Poll `observer` and dispatch events one at a time until `shutdown` is set.
pub fn run_watch_loop(
    observer: &mut dyn DirectoryObserver,
    dispatcher: &mut WatchDispatcher,
    sleeper: &dyn Sleeper,
    poll_interval: Duration,
    shutdown: &AtomicBool,
) -> std::io::Result<()> {
    observer.start()?;
    tracing::info!("Pipeline active");

    while !shutdown.load(Ordering::Relaxed) {
        for event in observer.poll() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            dispatcher.handle(&event);
        }

        let mut remaining = poll_interval;
        while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
            let step = remaining.min(SLEEP_GRANULARITY);
            sleeper.sleep(step);
            remaining -= step;
        }
    }

    tracing::info!("Pipeline stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineDirs;
    use crate::models::Provenance;
    use crate::pipeline::processor::ProcessOutcome;
    use crate::pipeline::sleeper::RecordingSleeper;
    use crate::pipeline::storage::IngestError;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    /// Emits a fixed batch on the first poll, then raises the shutdown flag.
    struct ScriptedObserver<'a> {
        batch: Vec<FileEvent>,
        polls: usize,
        shutdown: &'a AtomicBool,
    }

    impl DirectoryObserver for ScriptedObserver<'_> {
        fn start(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn poll(&mut self) -> Vec<FileEvent> {
            self.polls += 1;
            if self.polls >= 2 {
                self.shutdown.store(true, Ordering::Relaxed);
            }
            std::mem::take(&mut self.batch)
        }
    }

    #[derive(Default)]
    struct Counting {
        seen: Mutex<Vec<PathBuf>>,
    }

    impl ExtractStage for Counting {
        fn extract(&self, raw: &Path, _: Provenance, out: &Path) -> ProcessOutcome {
            self.seen.lock().unwrap().push(raw.to_path_buf());
            ProcessOutcome::Skipped {
                path: out.join("x_processed.json"),
            }
        }
    }

    impl IngestStage for Counting {
        fn ingest(&self, artifact: &Path, _: Provenance) -> Result<usize, IngestError> {
            self.seen.lock().unwrap().push(artifact.to_path_buf());
            Ok(0)
        }
    }

    #[test]
    fn loop_dispatches_then_stops_on_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = PipelineDirs::under(tmp.path());
        dirs.ensure_exist().unwrap();
        let a = dirs.raw(Provenance::Retail).join("a.txt");
        let b = dirs.processed(Provenance::Retail).join("a_processed.json");
        std::fs::write(&a, "x").unwrap();
        std::fs::write(&b, "{}").unwrap();

        let stages = Arc::new(Counting::default());
        let sleeper = Arc::new(RecordingSleeper::new());
        let mut dispatcher = WatchDispatcher::new(
            dirs,
            stages.clone(),
            stages.clone(),
            sleeper.clone(),
            Duration::from_secs(1),
        );
        let shutdown = AtomicBool::new(false);
        let mut observer = ScriptedObserver {
            batch: vec![FileEvent { path: a.clone() }, FileEvent { path: b.clone() }],
            polls: 0,
            shutdown: &shutdown,
        };

        run_watch_loop(
            &mut observer,
            &mut dispatcher,
            sleeper.as_ref(),
            Duration::from_secs(1),
            &shutdown,
        )
        .unwrap();

        assert_eq!(*stages.seen.lock().unwrap(), vec![a, b]);
        assert_eq!(observer.polls, 2);
    }

    #[test]
    fn preset_flag_exits_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let stages = Arc::new(Counting::default());
        let sleeper = RecordingSleeper::new();
        let mut dispatcher = WatchDispatcher::new(
            PipelineDirs::under(tmp.path()),
            stages.clone(),
            stages,
            Arc::new(RecordingSleeper::new()),
            Duration::from_secs(1),
        );
        let shutdown = AtomicBool::new(true);
        let mut observer = PollingObserver::new(vec![tmp.path().join("w")]);

        run_watch_loop(&mut observer, &mut dispatcher, &sleeper, Duration::from_secs(1), &shutdown)
            .unwrap();
        assert!(sleeper.slept().is_empty());
    }
}
