//! Local filesystem source

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{parse_entries, DataSource, WatchCallback};
use crate::debounce::Debouncer;
use crate::entry::Entry;
use crate::error::SourceError;
use crate::parse::DatabaseFormat;
use crate::worker::ParseWorker;

struct ActiveWatch {
    _watcher: RecommendedWatcher,
    debouncer: Arc<Debouncer>,
}

/// A bibliography file read straight from disk
pub struct LocalFileSource {
    id: String,
    name: String,
    path: PathBuf,
    format: DatabaseFormat,
    worker: ParseWorker,
    debounce: Duration,
    active: Mutex<Option<ActiveWatch>>,
}

impl LocalFileSource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        format: DatabaseFormat,
        worker: ParseWorker,
        debounce: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            format,
            worker,
            debounce,
            active: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Watch the parent directory so a file that is replaced (deleted and
    /// recreated by an exporter) keeps being noticed
    fn create_watcher(
        &self,
        callback: WatchCallback,
        debouncer: Arc<Debouncer>,
    ) -> notify::Result<RecommendedWatcher> {
        let file_name: Option<OsString> = self.path.file_name().map(OsString::from);
        let id = self.id.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_)
                    ) && !matches!(event.kind, EventKind::Modify(ModifyKind::Metadata(_)));

                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(OsString::from) == file_name);

                    if relevant && ours {
                        let callback = callback.clone();
                        let id = id.clone();
                        debouncer.trigger(move || {
                            debug!(source = %id, "File changed, triggering reload");
                            callback();
                        });
                    }
                }
                Err(e) => warn!(source = %id, "Watch error: {}", e),
            }
        })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(watcher)
    }
}

#[async_trait]
impl DataSource for LocalFileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, cancel: &CancellationToken) -> Result<Vec<Entry>, SourceError> {
        // Integrity check before anything reaches the parser
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| SourceError::from_io(e, &self.path))?;
        if metadata.len() == 0 {
            return Err(SourceError::empty(&self.path));
        }

        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::from_io(e, &self.path))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let entries = parse_entries(&self.worker, text, self.format, &self.path, cancel).await?;
        debug!(source = %self.id, count = entries.len(), "Loaded {}", self.path.display());
        Ok(entries)
    }

    fn watch(&self, callback: WatchCallback) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            warn!(source = %self.id, "Watcher already exists, ignoring watch()");
            return;
        }

        let Some(debouncer) = Debouncer::current(self.debounce) else {
            warn!(source = %self.id, "No async runtime, cannot watch {}", self.path.display());
            return;
        };
        let debouncer = Arc::new(debouncer);

        match self.create_watcher(callback, debouncer.clone()) {
            Ok(watcher) => {
                debug!(source = %self.id, "Watching {}", self.path.display());
                *active = Some(ActiveWatch {
                    _watcher: watcher,
                    debouncer,
                });
            }
            Err(e) => warn!(
                source = %self.id,
                "Failed to watch {}: {}",
                self.path.display(),
                e
            ),
        }
    }

    fn is_watching(&self) -> bool {
        self.active
            .lock()
            .map(|active| active.is_some())
            .unwrap_or_else(|e| e.into_inner().is_some())
    }

    fn dispose(&self) {
        let taken = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(watch) = taken {
            watch.debouncer.cancel();
            debug!(source = %self.id, "Disposed watcher");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const CSL: &str = r#"[{"id": "a", "type": "book", "title": "A"},
                          {"id": "b", "type": "book", "title": "B"}]"#;

    fn source(path: PathBuf, format: DatabaseFormat) -> LocalFileSource {
        LocalFileSource::new(
            "source-0",
            "Test",
            path,
            format,
            ParseWorker::spawn(),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_load_csl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(&path, CSL).unwrap();

        let entries = source(path, DatabaseFormat::CslJson)
            .load(&CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_load_biblatex() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.bib");
        std::fs::write(&path, "@book{k, title = {T}, year = 2001}").unwrap();

        let entries = source(path, DatabaseFormat::BibLatex)
            .load(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].year(), Some(2001));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = source(dir.path().join("nope.json"), DatabaseFormat::CslJson)
            .load(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Integrity { .. }));
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bib");
        std::fs::write(&path, "").unwrap();

        let err = source(path, DatabaseFormat::BibLatex)
            .load(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_fatal_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = source(path, DatabaseFormat::CslJson)
            .load(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
        assert!(err.to_string().contains("Failed to load from"));
    }

    #[tokio::test]
    async fn test_second_watch_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(&path, CSL).unwrap();
        let source = source(path, DatabaseFormat::CslJson);

        source.watch(Arc::new(|| {}));
        assert!(source.is_watching());
        source.watch(Arc::new(|| {}));
        assert!(source.is_watching());

        source.dispose();
        assert!(!source.is_watching());
    }

    #[tokio::test]
    async fn test_change_triggers_debounced_callback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(&path, CSL).unwrap();
        let source = source(path.clone(), DatabaseFormat::CslJson);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        source.watch(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..3 {
            std::fs::write(&path, CSL).unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // Let any stray trailing events settle past the debounce window
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        source.dispose();
    }
}
