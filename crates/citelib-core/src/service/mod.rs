//! Library orchestrator
//!
//! [`LibraryService`] owns the configured data sources, runs load cycles
//! against them and publishes the resulting [`Library`] and
//! [`LibraryState`]. At most one load is live: starting a new one cancels
//! the previous cycle and its pending retry and reload timers.
//!
//! A load cycle:
//! 1. publish `Loading` and emit `library-load-start`
//! 2. load every source concurrently, within the load timeout
//! 3. merge the sources that succeeded; fail only if all of them failed
//! 4. swap in the new library and search index, publish `Success`
//!
//! Failed cycles publish `Error` and schedule a retry with exponential
//! backoff. Sources are rebuilt when the configured databases change and
//! keep their watchers across cycles; any source without a live watcher is
//! armed after every completed cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::{DateTime, Utc};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DatabaseConfig, SourceKind};
use crate::debounce::Debouncer;
use crate::entry::Entry;
use crate::error::{LibraryError, SourceError};
use crate::library::Library;
use crate::merge::{merge, SourceEntries};
use crate::search::SearchService;
use crate::source::{DataSource, LocalFileSource, Vault, VaultFileSource, WatchCallback};
use crate::state::{LibraryEvent, LibraryState, LoadingStatus, Progress, SourceFailure, Subscription};
use crate::worker::ParseWorker;

#[cfg(test)]
mod tests;

/// Capacity of the event channel; slower subscribers skip ahead
const EVENT_CAPACITY: usize = 64;

/// Outcome of one load cycle
pub type LoadResult = Result<Arc<Library>, Arc<LibraryError>>;

/// What started a load cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Watch,
    Retry,
}

/// Handle to the library orchestrator
///
/// Dropping the handle disposes the service.
pub struct LibraryService {
    inner: Arc<Inner>,
}

struct Inner {
    config: Mutex<Config>,
    vault: Option<Arc<dyn Vault>>,
    runtime: Handle,
    worker: ParseWorker,

    /// One source per configured database, rebuilt when the databases change
    sources: Mutex<Vec<Arc<dyn DataSource>>>,
    /// Sources registered through `add_source`
    extra_sources: Mutex<Vec<Arc<dyn DataSource>>>,

    library: RwLock<Option<Arc<Library>>>,
    search: SearchService,

    state_tx: watch::Sender<LibraryState>,
    events: broadcast::Sender<LibraryEvent>,

    /// Token of the live load; commits happen while holding this lock
    current: Mutex<CancellationToken>,
    retry_count: AtomicU32,
    retry: Debouncer,
    reload: Debouncer,
    disposed: AtomicBool,
}

impl LibraryService {
    /// Create a service for local-file databases
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: Config) -> Self {
        Self::build(config, None)
    }

    /// Create a service whose `vault-file` databases are read from `vault`
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_vault(config: Config, vault: Arc<dyn Vault>) -> Self {
        Self::build(config, Some(vault))
    }

    fn build(config: Config, vault: Option<Arc<dyn Vault>>) -> Self {
        let runtime = Handle::current();
        let (state_tx, _) = watch::channel(LibraryState::idle());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let debounce = config.loader.watch_debounce();

        let inner = Arc::new(Inner {
            vault,
            worker: ParseWorker::spawn(),
            sources: Mutex::new(Vec::new()),
            extra_sources: Mutex::new(Vec::new()),
            library: RwLock::new(None),
            search: SearchService::new(),
            state_tx,
            events,
            current: Mutex::new(CancellationToken::new()),
            retry_count: AtomicU32::new(0),
            retry: Debouncer::new(debounce, runtime.clone()),
            reload: Debouncer::new(debounce, runtime.clone()),
            disposed: AtomicBool::new(false),
            config: Mutex::new(config),
            runtime,
        });
        inner.refresh_sources();

        Self { inner }
    }

    /// Run a load cycle, superseding any load in flight
    ///
    /// Resolves to the new library, or to the error that ended the cycle.
    /// A superseded cycle resolves to [`LibraryError::Cancelled`] and has
    /// no visible effect.
    pub async fn load(&self) -> LoadResult {
        self.inner.run_load(Trigger::Manual).await
    }

    /// Schedule a debounced reload, collapsing bursts into one load
    pub fn request_reload(&self) {
        self.inner.request_reload();
    }

    /// Arm change watchers on every source without loading
    pub fn init_watcher(&self) {
        self.inner.arm_watchers();
    }

    /// Stop watchers, cancel the live load and drop pending timers
    ///
    /// Later calls to [`load`](Self::load) fail with
    /// [`LibraryError::Disposed`].
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Every source that takes part in a load, configured ones first
    pub fn sources(&self) -> Vec<Arc<dyn DataSource>> {
        self.inner.all_sources()
    }

    /// Register an additional source for every following load
    pub fn add_source(&self, source: Arc<dyn DataSource>) {
        debug!(source = source.id(), name = source.name(), "Adding custom source");
        lock(&self.inner.extra_sources).push(source);
    }

    /// Replace the configured databases; takes effect on the next load
    ///
    /// If the old sources were being watched, the new ones are watched
    /// right away.
    pub fn set_databases(&self, databases: Vec<DatabaseConfig>) {
        lock(&self.inner.config).databases = databases;
        if self.inner.refresh_sources() {
            self.inner.arm_watchers();
        }
    }

    pub fn config(&self) -> Config {
        lock(&self.inner.config).clone()
    }

    /// The library from the last successful load
    pub fn library(&self) -> Option<Arc<Library>> {
        self.inner
            .library
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn search_service(&self) -> &SearchService {
        &self.inner.search
    }

    /// Ids of matching entries, best match first
    pub fn search(&self, query: &str) -> Vec<String> {
        self.inner.search.search(query)
    }

    pub fn search_limit(&self, query: &str, limit: usize) -> Vec<String> {
        self.inner.search.search_limit(query, limit)
    }

    /// Snapshot of the current state
    pub fn state(&self) -> LibraryState {
        self.inner.state_tx.borrow().clone()
    }

    /// Subscribe to load events
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.inner.events.subscribe())
    }

    /// Observe state changes, latest value only
    pub fn watch_state(&self) -> watch::Receiver<LibraryState> {
        self.inner.state_tx.subscribe()
    }
}

impl Drop for LibraryService {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl Inner {
    async fn run_load(self: &Arc<Self>, trigger: Trigger) -> LoadResult {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Arc::new(LibraryError::Disposed));
        }

        self.retry.cancel();
        self.reload.cancel();
        if trigger != Trigger::Retry {
            self.retry_count.store(0, Ordering::SeqCst);
        }

        let last_loaded = self.state_tx.borrow().last_loaded;
        let cancel = {
            let mut current = lock(&self.current);
            // dispose() cancels under this lock
            if self.disposed.load(Ordering::SeqCst) {
                return Err(Arc::new(LibraryError::Disposed));
            }
            current.cancel();
            *current = CancellationToken::new();
            self.emit(LibraryEvent::LoadStart);
            self.publish(LibraryState {
                status: LoadingStatus::Loading,
                last_loaded,
                ..Default::default()
            });
            current.clone()
        };
        debug!(?trigger, "Starting library load");

        let config = lock(&self.config).clone();
        let sources = self.all_sources();
        let total = sources.len();

        let mut pending: FuturesUnordered<_> = sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let source = source.clone();
                let cancel = cancel.clone();
                self.runtime
                    .spawn(async move { source.load(&cancel).await })
                    .map(move |joined| (index, joined))
            })
            .collect();

        let collect = async {
            let mut results: Vec<Option<Result<Vec<Entry>, SourceError>>> =
                std::iter::repeat_with(|| None).take(total).collect();
            let mut settled = 0;
            while let Some((index, joined)) = pending.next().await {
                results[index] =
                    Some(joined.unwrap_or_else(|e| Err(SourceError::Task(e.to_string()))));
                settled += 1;
                self.publish_if_current(
                    &cancel,
                    LibraryState {
                        status: LoadingStatus::Loading,
                        progress: Some(Progress {
                            current: settled,
                            total,
                        }),
                        last_loaded,
                        ..Default::default()
                    },
                );
            }
            results
        };

        // Loads still running at the deadline are left to finish; their
        // results are discarded.
        let budget = config.loader.load_timeout();
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Arc::new(LibraryError::Cancelled)),
            outcome = tokio::time::timeout(budget, collect) => match outcome {
                Ok(results) => results,
                Err(_) => {
                    let error = LibraryError::Timeout { after: budget };
                    return Err(self.fail(&cancel, error, last_loaded, &config));
                }
            },
        };
        if cancel.is_cancelled() {
            return Err(Arc::new(LibraryError::Cancelled));
        }

        let mut loaded = Vec::new();
        let mut failures: Vec<(String, SourceError)> = Vec::new();
        for (source, result) in sources.iter().zip(results) {
            match result {
                Some(Ok(entries)) => {
                    debug!(source = source.id(), count = entries.len(), "Source loaded");
                    loaded.push(SourceEntries::new(source.name(), entries));
                }
                Some(Err(e)) => {
                    warn!(source = source.id(), name = source.name(), "Failed to load source: {}", e);
                    failures.push((source.name().to_string(), e));
                }
                None => {}
            }
        }

        if loaded.is_empty() && !failures.is_empty() {
            let failed = failures.len();
            let (source_name, source) = failures.remove(0);
            let error = LibraryError::AllSourcesFailed {
                source_name,
                failed,
                source,
            };
            return Err(self.fail(&cancel, error, last_loaded, &config));
        }

        let sources_loaded = loaded.len();
        let library = Arc::new(merge(loaded, config.merge_strategy));
        let index = match self.search.build(library.entries()) {
            Ok(index) => index,
            Err(e) => return Err(self.fail(&cancel, e.into(), last_loaded, &config)),
        };

        let source_errors: Vec<SourceFailure> = failures
            .into_iter()
            .map(|(name, e)| SourceFailure {
                name,
                message: e.to_string(),
            })
            .collect();

        {
            let _current = lock(&self.current);
            if cancel.is_cancelled() {
                return Err(Arc::new(LibraryError::Cancelled));
            }

            *self.library.write().unwrap_or_else(|e| e.into_inner()) = Some(library.clone());
            self.search.replace(index);
            self.retry_count.store(0, Ordering::SeqCst);

            self.publish(LibraryState {
                status: LoadingStatus::Success,
                last_loaded: Some(Utc::now()),
                source_errors,
                ..Default::default()
            });
            self.emit(LibraryEvent::LoadComplete);
            self.arm_watchers();
        }

        info!(
            entries = library.size(),
            sources = sources_loaded,
            failed = total - sources_loaded,
            "Library loaded"
        );
        Ok(library)
    }

    /// Publish a failed cycle and schedule its retry
    fn fail(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        error: LibraryError,
        last_loaded: Option<DateTime<Utc>>,
        config: &Config,
    ) -> Arc<LibraryError> {
        let _current = lock(&self.current);
        if cancel.is_cancelled() {
            return Arc::new(LibraryError::Cancelled);
        }

        error!("Library load failed: {}", error);
        let error = Arc::new(error);
        self.publish(LibraryState {
            status: LoadingStatus::Error,
            error: Some(error.clone()),
            last_loaded,
            ..Default::default()
        });

        if error.is_retryable() {
            self.schedule_retry(config);
        }
        self.arm_watchers();
        error
    }

    fn schedule_retry(self: &Arc<Self>, config: &Config) {
        let attempt = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > config.loader.max_retries {
            warn!(attempts = attempt - 1, "Giving up on automatic library reload");
            return;
        }

        let delay = config.loader.retry_delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling library reload");
        let weak = Arc::downgrade(self);
        self.retry.trigger_after(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.spawn_load(Trigger::Retry);
            }
        });
    }

    fn spawn_load(self: Arc<Self>, trigger: Trigger) {
        let runtime = self.runtime.clone();
        runtime.spawn(async move {
            // Outcome is published through the state channel
            let _ = self.run_load(trigger).await;
        });
    }

    fn request_reload(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        self.reload.trigger(move || {
            if let Some(inner) = weak.upgrade() {
                inner.spawn_load(Trigger::Watch);
            }
        });
    }

    /// Install a watcher on every source that has none
    ///
    /// Live watchers are left alone so no change event is lost between
    /// cycles.
    fn arm_watchers(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        for source in self.all_sources() {
            if !source.is_watching() {
                source.watch(reload_callback(Arc::downgrade(self)));
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.current).cancel();
        self.retry.cancel();
        self.reload.cancel();
        for source in self.all_sources() {
            source.dispose();
        }
        debug!("Library service disposed");
    }

    fn all_sources(&self) -> Vec<Arc<dyn DataSource>> {
        let mut sources = lock(&self.sources).clone();
        sources.extend(lock(&self.extra_sources).iter().cloned());
        sources
    }

    /// Replace the configured sources with fresh ones
    ///
    /// Returns whether any of the replaced sources was being watched.
    fn refresh_sources(&self) -> bool {
        let config = lock(&self.config).clone();
        let fresh = self.build_sources(&config);
        let stale = std::mem::replace(&mut *lock(&self.sources), fresh);
        let mut watched = false;
        for source in stale {
            watched |= source.is_watching();
            source.dispose();
        }
        watched
    }

    fn build_sources(&self, config: &Config) -> Vec<Arc<dyn DataSource>> {
        let debounce = config.loader.watch_debounce();
        config
            .databases
            .iter()
            .enumerate()
            .map(|(index, db)| {
                let id = format!("source-{}", index);
                match (db.kind, &self.vault) {
                    (SourceKind::VaultFile, Some(vault)) => Arc::new(VaultFileSource::new(
                        id,
                        &db.name,
                        &db.path.to_string_lossy(),
                        db.format,
                        self.worker.clone(),
                        vault.clone(),
                        debounce,
                    )) as Arc<dyn DataSource>,
                    (kind, _) => {
                        if kind == SourceKind::VaultFile {
                            debug!(name = %db.name, "No vault attached, reading vault file from disk");
                        }
                        Arc::new(LocalFileSource::new(
                            id,
                            &db.name,
                            config.resolve_path(&db.path),
                            db.format,
                            self.worker.clone(),
                            debounce,
                        )) as Arc<dyn DataSource>
                    }
                }
            })
            .collect()
    }

    fn publish(&self, state: LibraryState) {
        self.state_tx.send_replace(state.clone());
        self.emit(LibraryEvent::StateChanged(state));
    }

    fn publish_if_current(&self, cancel: &CancellationToken, state: LibraryState) {
        let _current = lock(&self.current);
        if !cancel.is_cancelled() {
            self.publish(state);
        }
    }

    fn emit(&self, event: LibraryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn reload_callback(inner: Weak<Inner>) -> WatchCallback {
    Arc::new(move || {
        if let Some(inner) = inner.upgrade() {
            debug!("Source changed, scheduling reload");
            inner.request_reload();
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
