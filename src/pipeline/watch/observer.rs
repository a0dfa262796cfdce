use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

/// A path that appeared under a watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
}

/// Source of creation events for the watched roots.
///
/// Delivery is at-least-once; consumers rely on output-path idempotence.
pub trait DirectoryObserver {
    /// Prepare the roots. Called once before the first `poll`.
    fn start(&mut self) -> io::Result<()>;

    /// Events observed since the previous call.
    fn poll(&mut self) -> Vec<FileEvent>;
}

/// Observer that rescans the roots (non-recursively) and diffs against the
/// set of paths it has already seen.
pub struct PollingObserver {
    roots: Vec<PathBuf>,
    known: HashSet<PathBuf>,
    catch_up: bool,
}

impl PollingObserver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            known: HashSet::new(),
            catch_up: false,
        }
    }

    /// Report files already present at start as new.
    pub fn with_catch_up(mut self, catch_up: bool) -> Self {
        self.catch_up = catch_up;
        self
    }

    fn scan(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for root in &self.roots {
            match std::fs::read_dir(root) {
                Ok(entries) => found.extend(entries.flatten().map(|e| e.path())),
                Err(e) => tracing::warn!(root = %root.display(), error = %e, "Cannot scan watched root"),
            }
        }
        found.sort();
        found
    }
}

impl DirectoryObserver for PollingObserver {
    fn start(&mut self) -> io::Result<()> {
        for root in &self.roots {
            std::fs::create_dir_all(root)?;
            tracing::info!(root = %root.display(), "Watching");
        }
        if !self.catch_up {
            self.known = self.scan().into_iter().collect();
            tracing::debug!(existing = self.known.len(), "Primed with existing files");
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<FileEvent> {
        let current = self.scan();
        let events = current
            .iter()
            .filter(|p| !self.known.contains(*p))
            .map(|p| FileEvent { path: p.clone() })
            .collect();
        // Forget removed paths so a re-created file is reported again.
        self.known = current.into_iter().collect();
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_creates_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("retail").join("scraped");
        let mut obs = PollingObserver::new(vec![root.clone()]);
        obs.start().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn existing_files_are_primed_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), "x").unwrap();

        let mut obs = PollingObserver::new(vec![dir.path().to_path_buf()]);
        obs.start().unwrap();
        assert!(obs.poll().is_empty());

        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        assert_eq!(
            obs.poll(),
            vec![FileEvent {
                path: dir.path().join("new.txt")
            }]
        );
        assert!(obs.poll().is_empty());
    }

    #[test]
    fn catch_up_reports_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        let mut obs = PollingObserver::new(vec![dir.path().to_path_buf()]).with_catch_up(true);
        obs.start().unwrap();
        let paths: Vec<_> = obs.poll().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec![dir.path().join("a.txt"), dir.path().join("b.txt")]);
    }

    #[test]
    fn recreated_file_is_reported_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut obs = PollingObserver::new(vec![dir.path().to_path_buf()]);
        obs.start().unwrap();

        let file = dir.path().join("doc.txt");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(obs.poll().len(), 1);
        std::fs::remove_file(&file).unwrap();
        assert!(obs.poll().is_empty());
        std::fs::write(&file, "y").unwrap();
        assert_eq!(obs.poll().len(), 1);
    }

    #[test]
    fn scan_is_not_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let mut obs = PollingObserver::new(vec![dir.path().to_path_buf()]);
        obs.start().unwrap();

        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("deep.txt"), "x").unwrap();
        let paths: Vec<_> = obs.poll().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec![dir.path().join("sub")]);
    }
}
