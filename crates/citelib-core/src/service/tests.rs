use super::*;
use crate::config::LoaderConfig;
use crate::parse::{parse_records, DatabaseFormat};
use crate::source::MemoryVault;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tempfile::TempDir;

enum Behavior {
    Entries(&'static str),
    Fail(&'static str),
    Hang,
    Slow(Duration, &'static str),
}

struct MockSource {
    id: String,
    name: String,
    behavior: Behavior,
    /// Fail regardless of behavior while set
    failing: AtomicBool,
    loads: AtomicUsize,
    disposals: AtomicUsize,
    callback: Mutex<Option<WatchCallback>>,
}

impl MockSource {
    fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: format!("mock-{}", name),
            name: name.to_string(),
            behavior,
            failing: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
            callback: Mutex::new(None),
        })
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn is_watched(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// Simulate a change notification from the watcher
    fn fire(&self) {
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn error(&self, reason: &str) -> SourceError {
        SourceError::Integrity {
            path: PathBuf::from(format!("/data/{}.json", self.name)),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl DataSource for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, _cancel: &CancellationToken) -> Result<Vec<Entry>, SourceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(self.error("not exported yet"));
        }
        match &self.behavior {
            Behavior::Entries(json) => Ok(entries(json)),
            Behavior::Fail(reason) => Err(self.error(reason)),
            Behavior::Hang => std::future::pending().await,
            Behavior::Slow(delay, json) => {
                tokio::time::sleep(*delay).await;
                Ok(entries(json))
            }
        }
    }

    fn watch(&self, callback: WatchCallback) {
        *lock(&self.callback) = Some(callback);
    }

    fn is_watching(&self) -> bool {
        self.is_watched()
    }

    fn dispose(&self) {
        *lock(&self.callback) = None;
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

fn entries(json: &str) -> Vec<Entry> {
    parse_records(json, DatabaseFormat::CslJson)
        .unwrap()
        .records
        .into_iter()
        .map(Entry::from_raw)
        .collect()
}

fn test_config(max_retries: u32) -> Config {
    Config {
        loader: LoaderConfig {
            load_timeout_ms: 1000,
            watch_debounce_ms: 50,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 400,
            max_retries,
        },
        ..Default::default()
    }
}

fn drain(events: &mut Subscription) -> Vec<LibraryEvent> {
    let mut drained = Vec::new();
    while let Some(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

const KNUTH: &str = r#"[{"id": "knuth1984", "type": "book", "title": "Literate Programming",
    "author": [{"given": "Donald", "family": "Knuth"}], "issued": {"date-parts": [[1984]]}}]"#;
const LAMPORT: &str = r#"[{"id": "lamport1994", "type": "book", "title": "LaTeX: A Document Preparation System",
    "author": [{"given": "Leslie", "family": "Lamport"}]}]"#;

#[tokio::test]
async fn test_idle_before_first_load() {
    let service = LibraryService::new(test_config(0));
    assert_eq!(service.state().status, LoadingStatus::Idle);
    assert!(service.library().is_none());
    assert!(service.search("anything").is_empty());
}

#[tokio::test]
async fn test_load_merges_sources_and_builds_index() {
    let service = LibraryService::new(test_config(0));
    let a = MockSource::new("A", Behavior::Entries(KNUTH));
    let b = MockSource::new("B", Behavior::Entries(LAMPORT));
    service.add_source(a.clone());
    service.add_source(b.clone());
    let mut events = service.subscribe();

    let library = service.load().await.unwrap();
    assert_eq!(library.size(), 2);
    assert_eq!(library.get("knuth1984").unwrap().source_database(), Some("A"));

    let state = service.state();
    assert_eq!(state.status, LoadingStatus::Success);
    assert!(state.last_loaded.is_some());
    assert!(state.error.is_none());
    assert!(state.source_errors.is_empty());

    assert_eq!(service.search("literate"), vec!["knuth1984".to_string()]);
    assert_eq!(service.search_limit("lamport", 1), vec!["lamport1994".to_string()]);
    assert!(service.search("").is_empty());

    let events = drain(&mut events);
    assert_eq!(events.first().map(|e| e.name()), Some("library-load-start"));
    assert_eq!(events.last().map(|e| e.name()), Some("library-load-complete"));

    let statuses: Vec<LoadingStatus> = events
        .iter()
        .filter_map(|e| match e {
            LibraryEvent::StateChanged(state) => Some(state.status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.first(), Some(&LoadingStatus::Loading));
    assert_eq!(statuses.last(), Some(&LoadingStatus::Success));

    // Progress is reported as each source settles
    let progress: Vec<Progress> = events
        .iter()
        .filter_map(|e| match e {
            LibraryEvent::StateChanged(state) => state.progress,
            _ => None,
        })
        .collect();
    assert_eq!(progress.last(), Some(&Progress { current: 2, total: 2 }));

    assert!(a.is_watched());
    assert!(b.is_watched());
}

#[tokio::test]
async fn test_colliding_citekeys_across_sources() {
    let service = LibraryService::new(test_config(0));
    service.add_source(MockSource::new(
        "SourceA",
        Behavior::Entries(r#"[{"id": "X", "type": "book", "title": "A"}]"#),
    ));
    service.add_source(MockSource::new(
        "SourceB",
        Behavior::Entries(r#"[{"id": "X", "type": "book", "title": "B"}, {"id": "Y", "type": "book"}]"#),
    ));

    let library = service.load().await.unwrap();
    assert_eq!(library.ids(), vec!["X@SourceA", "X@SourceB", "Y"]);
    assert_eq!(
        library.get("X@SourceB").unwrap().composite_citekey(),
        Some("X@SourceB")
    );
}

#[tokio::test]
async fn test_all_sources_failed() {
    let service = LibraryService::new(test_config(0));
    service.add_source(MockSource::new("A", Behavior::Fail("first broke")));
    service.add_source(MockSource::new("B", Behavior::Fail("second broke")));

    let err = service.load().await.unwrap_err();
    assert!(matches!(
        err.as_ref(),
        LibraryError::AllSourcesFailed { failed: 2, .. }
    ));

    let state = service.state();
    assert_eq!(state.status, LoadingStatus::Error);
    let message = state.error_message().unwrap();
    assert!(message.contains("first broke"));
    assert!(message.contains("'A'"));
    assert!(service.library().is_none());
}

#[tokio::test]
async fn test_failed_load_keeps_previous_library() {
    let service = LibraryService::new(test_config(0));
    let a = MockSource::new("A", Behavior::Entries(KNUTH));
    service.add_source(a.clone());

    service.load().await.unwrap();
    a.failing.store(true, Ordering::SeqCst);
    assert!(service.load().await.is_err());

    assert_eq!(service.state().status, LoadingStatus::Error);
    let library = service.library().unwrap();
    assert!(library.contains("knuth1984"));
    assert_eq!(service.search("knuth"), vec!["knuth1984".to_string()]);
}

#[tokio::test]
async fn test_partial_failure_is_success_with_source_errors() {
    let service = LibraryService::new(test_config(0));
    service.add_source(MockSource::new("Good", Behavior::Entries(KNUTH)));
    service.add_source(MockSource::new("Bad", Behavior::Fail("Library file is empty")));

    let library = service.load().await.unwrap();
    assert_eq!(library.size(), 1);

    let state = service.state();
    assert_eq!(state.status, LoadingStatus::Success);
    assert_eq!(state.source_errors.len(), 1);
    assert_eq!(state.source_errors[0].name, "Bad");
    assert!(state.source_errors[0].message.contains("empty"));
}

#[tokio::test]
async fn test_zero_sources_yields_empty_library() {
    let service = LibraryService::new(test_config(0));
    let library = service.load().await.unwrap();
    assert!(library.is_empty());
    assert_eq!(service.state().status, LoadingStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_source_times_out() {
    let service = LibraryService::new(test_config(0));
    service.add_source(MockSource::new("Fast", Behavior::Entries(KNUTH)));
    service.add_source(MockSource::new("Stuck", Behavior::Hang));

    let started = tokio::time::Instant::now();
    let err = service.load().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err.as_ref(), LibraryError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed < Duration::from_millis(1100));

    let state = service.state();
    assert_eq!(state.status, LoadingStatus::Error);
    assert!(state.error_message().unwrap().contains("Timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_second_load_supersedes_first() {
    let service = Arc::new(LibraryService::new(test_config(0)));
    let slow = MockSource::new("Slow", Behavior::Slow(Duration::from_millis(200), KNUTH));
    service.add_source(slow.clone());
    let mut events = service.subscribe();

    let first = tokio::spawn({
        let service = service.clone();
        async move { service.load().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = service.load().await;
    assert!(second.is_ok());

    let first = first.await.unwrap();
    assert!(matches!(
        first.unwrap_err().as_ref(),
        LibraryError::Cancelled
    ));

    assert_eq!(service.state().status, LoadingStatus::Success);
    assert_eq!(slow.loads(), 2);

    let events = drain(&mut events);
    let count = |name: &str| events.iter().filter(|e| e.name() == name).count();
    assert_eq!(count("library-load-start"), 2);
    assert_eq!(count("library-load-complete"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_failure() {
    let service = LibraryService::new(test_config(3));
    let flaky = MockSource::new("Flaky", Behavior::Entries(KNUTH));
    flaky.failing.store(true, Ordering::SeqCst);
    service.add_source(flaky.clone());

    assert!(service.load().await.is_err());
    flaky.failing.store(false, Ordering::SeqCst);

    let mut state = service.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| s.status == LoadingStatus::Success),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(flaky.loads(), 2);
    assert!(service.library().unwrap().contains("knuth1984"));
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_limit() {
    let service = LibraryService::new(test_config(2));
    let broken = MockSource::new("Broken", Behavior::Fail("corrupt"));
    service.add_source(broken.clone());

    assert!(service.load().await.is_err());
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Initial load plus two retries
    assert_eq!(broken.loads(), 3);
    assert_eq!(service.state().status, LoadingStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_watch_events_collapse_to_one_reload() {
    let service = LibraryService::new(test_config(0));
    let source = MockSource::new("A", Behavior::Entries(KNUTH));
    service.add_source(source.clone());

    service.load().await.unwrap();
    assert_eq!(source.loads(), 1);

    for _ in 0..3 {
        source.fire();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(source.loads(), 2);
    assert_eq!(service.state().status, LoadingStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_change_during_load_schedules_reload() {
    let mut config = test_config(0);
    config.loader.watch_debounce_ms = 500;
    let service = Arc::new(LibraryService::new(config));
    let source = MockSource::new("A", Behavior::Slow(Duration::from_millis(200), KNUTH));
    service.add_source(source.clone());
    service.load().await.unwrap();
    assert!(source.is_watched());

    let reload = tokio::spawn({
        let service = service.clone();
        async move { service.load().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The watcher stays live while the load reads the source
    assert!(source.is_watched());
    source.fire();
    reload.await.unwrap().unwrap();
    assert_eq!(source.loads(), 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.loads(), 3);
    assert_eq!(source.disposals.load(Ordering::SeqCst), 0);
    assert_eq!(service.state().status, LoadingStatus::Success);
}

#[tokio::test]
async fn test_configured_sources_keep_watchers_across_loads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("refs.json");
    std::fs::write(&path, KNUTH).unwrap();

    let mut config = test_config(0);
    config.loader.load_timeout_ms = 10_000;
    config.databases = vec![DatabaseConfig::new("Refs", path, DatabaseFormat::CslJson)];
    let service = LibraryService::new(config);

    service.load().await.unwrap();
    let before = service.sources();
    assert!(before[0].is_watching());

    service.load().await.unwrap();
    let after = service.sources();
    assert!(Arc::ptr_eq(&before[0], &after[0]));
    assert!(after[0].is_watching());
    assert!(service.search_service().is_ready());
    assert_eq!(service.search("knuth"), vec!["knuth1984"]);
}

#[tokio::test]
async fn test_set_databases_rearms_watched_sources() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("refs.json");
    std::fs::write(&path, KNUTH).unwrap();

    let mut config = test_config(0);
    config.databases = vec![DatabaseConfig::new("Refs", &path, DatabaseFormat::CslJson)];
    let service = LibraryService::new(config);

    service.set_databases(vec![DatabaseConfig::new("Refs", &path, DatabaseFormat::CslJson)]);
    assert!(!service.sources()[0].is_watching());

    service.init_watcher();
    let old = service.sources();
    service.set_databases(vec![DatabaseConfig::new("Moved", &path, DatabaseFormat::CslJson)]);
    assert!(!old[0].is_watching());
    assert!(service.sources()[0].is_watching());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_racing_load_start() {
    let service = Arc::new(LibraryService::new(test_config(0)));
    let source = MockSource::new("A", Behavior::Entries(KNUTH));
    service.add_source(source.clone());

    let guard = lock(&service.inner.current);
    let load = tokio::spawn({
        let service = service.clone();
        async move { service.load().await }
    });
    // The load passes its first check and waits for the token lock
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.inner.disposed.store(true, Ordering::SeqCst);
    drop(guard);

    let err = load.await.unwrap().unwrap_err();
    assert!(matches!(err.as_ref(), LibraryError::Disposed));
    assert_eq!(source.loads(), 0);
    assert_eq!(service.state().status, LoadingStatus::Idle);
}

#[tokio::test]
async fn test_init_watcher_arms_sources() {
    let service = LibraryService::new(test_config(0));
    let source = MockSource::new("A", Behavior::Entries(KNUTH));
    service.add_source(source.clone());

    assert!(!source.is_watched());
    service.init_watcher();
    assert!(source.is_watched());
}

#[tokio::test]
async fn test_dispose() {
    let service = LibraryService::new(test_config(0));
    let source = MockSource::new("A", Behavior::Entries(KNUTH));
    service.add_source(source.clone());
    service.load().await.unwrap();

    service.dispose();
    assert!(service.is_disposed());
    assert!(!source.is_watched());
    assert!(source.disposals.load(Ordering::SeqCst) > 0);

    let err = service.load().await.unwrap_err();
    assert!(matches!(err.as_ref(), LibraryError::Disposed));
}

#[tokio::test]
async fn test_configured_files_across_formats() {
    let dir = TempDir::new().unwrap();
    let json_path = dir.path().join("zotero.json");
    let bib_path = dir.path().join("thesis.bib");
    std::fs::write(
        &json_path,
        r#"[{"id": "shared2020", "type": "book", "title": "From Zotero"},
            {"id": "only-json", "type": "book", "title": "Json Only"}]"#,
    )
    .unwrap();
    std::fs::write(
        &bib_path,
        "@book{shared2020, title = {From Thesis}, author = {Doe, Jane}, year = 2020}\n",
    )
    .unwrap();

    let mut config = test_config(0);
    config.vault_dir = Some(dir.path().to_path_buf());
    config.loader.load_timeout_ms = 10_000;
    config.databases = vec![
        DatabaseConfig::new("Zotero", "zotero.json", DatabaseFormat::CslJson),
        DatabaseConfig::new("Thesis", "thesis.bib", DatabaseFormat::BibLatex),
    ];

    let service = LibraryService::new(config);
    let ids: Vec<String> = service.sources().iter().map(|s| s.id().to_string()).collect();
    assert_eq!(ids, vec!["source-0", "source-1"]);

    let library = service.load().await.unwrap();
    assert_eq!(library.ids(), vec!["only-json", "shared2020@Thesis", "shared2020@Zotero"]);
    let thesis = library.get("shared2020@Thesis").unwrap();
    assert_eq!(thesis.title(), Some("From Thesis"));
    assert_eq!(thesis.author_string().as_deref(), Some("Jane Doe"));

    // Narrowing the databases takes effect on the next load
    service.set_databases(vec![DatabaseConfig::new(
        "Zotero",
        json_path.clone(),
        DatabaseFormat::CslJson,
    )]);
    assert_eq!(service.sources().len(), 1);
    let library = service.load().await.unwrap();
    assert_eq!(library.ids(), vec!["only-json", "shared2020"]);
}

#[tokio::test]
async fn test_missing_file_reports_integrity_error() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(0);
    config.databases = vec![DatabaseConfig::new(
        "Gone",
        dir.path().join("missing.json"),
        DatabaseFormat::CslJson,
    )];

    let service = LibraryService::new(config);
    let err = service.load().await.unwrap_err();
    assert!(matches!(
        err.as_ref(),
        LibraryError::AllSourcesFailed {
            source: SourceError::Integrity { .. },
            ..
        }
    ));
    assert!(service
        .state()
        .error_message()
        .unwrap()
        .contains("does not exist"));
}

#[tokio::test]
async fn test_vault_file_database() {
    let vault = Arc::new(MemoryVault::new());
    vault.write(
        "refs/library.json",
        r#"[{"id": "vaulted", "type": "book", "title": "Kept In The Vault"}]"#,
    );

    let mut config = test_config(0);
    config.loader.load_timeout_ms = 10_000;
    let mut db = DatabaseConfig::new("Vault", "refs/library.json", DatabaseFormat::CslJson);
    db.kind = SourceKind::VaultFile;
    config.databases = vec![db];

    let service = LibraryService::with_vault(config, vault.clone());
    let library = service.load().await.unwrap();
    assert!(library.contains("vaulted"));
    assert_eq!(service.search("vault"), vec!["vaulted".to_string()]);
}
