//! Vault-relative source
//!
//! A vault is a storage root addressed by `/`-separated relative paths that
//! announces its own file changes. [`MemoryVault`] keeps files in memory;
//! [`DirectoryVault`] maps a directory on disk and reports changes seen by
//! a recursive `notify` watcher.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{parse_entries, DataSource, WatchCallback};
use crate::debounce::Debouncer;
use crate::entry::Entry;
use crate::error::SourceError;
use crate::parse::DatabaseFormat;
use crate::worker::ParseWorker;

const EVENT_CAPACITY: usize = 256;

/// A change inside a vault, by vault-relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Created(String),
    Modified(String),
    Deleted(String),
}

impl VaultEvent {
    pub fn path(&self) -> &str {
        match self {
            VaultEvent::Created(p) | VaultEvent::Modified(p) | VaultEvent::Deleted(p) => p,
        }
    }
}

/// Storage addressed by vault-relative paths
#[async_trait]
pub trait Vault: Send + Sync {
    /// Read a file as text; `Ok(None)` when there is no such file
    async fn read(&self, path: &str) -> io::Result<Option<String>>;

    /// Receive change notifications
    fn subscribe(&self) -> broadcast::Receiver<VaultEvent>;
}

/// Strip leading `/` and `./` so equal files compare equal
pub fn normalize_path(path: &str) -> String {
    let mut p = path.trim();
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            return p.to_string();
        }
    }
}

/// In-memory vault
pub struct MemoryVault {
    files: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<VaultEvent>,
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVault {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            files: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create or replace a file
    pub fn write(&self, path: &str, content: impl Into<String>) {
        let path = normalize_path(path);
        let existed = self
            .files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.clone(), content.into())
            .is_some();
        let event = if existed {
            VaultEvent::Modified(path)
        } else {
            VaultEvent::Created(path)
        };
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn remove(&self, path: &str) {
        let path = normalize_path(path);
        let removed = self
            .files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path)
            .is_some();
        if removed {
            let _ = self.events.send(VaultEvent::Deleted(path));
        }
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn read(&self, path: &str) -> io::Result<Option<String>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.get(&normalize_path(path)).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }
}

/// A directory on disk used as a vault
pub struct DirectoryVault {
    root: PathBuf,
    events: broadcast::Sender<VaultEvent>,
    _watcher: Mutex<RecommendedWatcher>,
}

impl DirectoryVault {
    /// Open `root` and start watching it recursively
    pub fn open(root: impl Into<PathBuf>) -> notify::Result<Self> {
        let root: PathBuf = root.into();
        // Watcher events carry absolute, resolved paths
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let tx = events.clone();
        let watch_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for path in &event.paths {
                        let Some(relative) = relative_path(&watch_root, path) else {
                            continue;
                        };
                        let vault_event = match event.kind {
                            EventKind::Create(_) => VaultEvent::Created(relative),
                            EventKind::Modify(_) => VaultEvent::Modified(relative),
                            EventKind::Remove(_) => VaultEvent::Deleted(relative),
                            _ => continue,
                        };
                        let _ = tx.send(vault_event);
                    }
                }
                Err(e) => warn!("Vault watch error: {}", e),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        debug!("Watching vault {}", root.display());

        Ok(Self {
            root,
            events,
            _watcher: Mutex::new(watcher),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[async_trait]
impl Vault for DirectoryVault {
    async fn read(&self, path: &str) -> io::Result<Option<String>> {
        match tokio::fs::read(self.root.join(normalize_path(path))).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }
}

struct ActiveWatch {
    task: JoinHandle<()>,
    debouncer: Arc<Debouncer>,
}

/// A bibliography file inside a [`Vault`]
pub struct VaultFileSource {
    id: String,
    name: String,
    path: String,
    format: DatabaseFormat,
    worker: ParseWorker,
    vault: Arc<dyn Vault>,
    debounce: Duration,
    active: Mutex<Option<ActiveWatch>>,
}

impl VaultFileSource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        path: &str,
        format: DatabaseFormat,
        worker: ParseWorker,
        vault: Arc<dyn Vault>,
        debounce: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: normalize_path(path),
            format,
            worker,
            vault,
            debounce,
            active: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

}

#[async_trait]
impl DataSource for VaultFileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, cancel: &CancellationToken) -> Result<Vec<Entry>, SourceError> {
        let origin = PathBuf::from(&self.path);
        let content = self
            .vault
            .read(&self.path)
            .await
            .map_err(|e| SourceError::from_io(e, &origin))?
            .ok_or_else(|| SourceError::Integrity {
                path: origin.clone(),
                reason: "File not found in vault".to_string(),
            })?;

        if content.is_empty() {
            return Err(SourceError::empty(&origin));
        }

        let entries = parse_entries(&self.worker, content, self.format, &origin, cancel).await?;
        debug!(source = %self.id, count = entries.len(), "Loaded vault file {}", self.path);
        Ok(entries)
    }

    fn watch(&self, callback: WatchCallback) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            warn!(source = %self.id, "Watcher already exists, ignoring watch()");
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(source = %self.id, "No async runtime, cannot watch vault file {}", self.path);
            return;
        };
        let debouncer = Arc::new(Debouncer::new(self.debounce, runtime.clone()));

        let mut events = self.vault.subscribe();
        let path = self.path.clone();
        let id = self.id.clone();
        let task_debouncer = debouncer.clone();

        let task = runtime.spawn(async move {
            loop {
                let changed = match events.recv().await {
                    Ok(VaultEvent::Created(p)) | Ok(VaultEvent::Modified(p)) => p == path,
                    Ok(VaultEvent::Deleted(_)) => false,
                    // Missed events may have included ours
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if changed {
                    let callback = callback.clone();
                    let id = id.clone();
                    task_debouncer.trigger(move || {
                        debug!(source = %id, "Vault file changed, triggering reload");
                        callback();
                    });
                }
            }
        });

        debug!(source = %self.id, "Watching vault file {}", self.path);
        *active = Some(ActiveWatch { task, debouncer });
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
            watch.task.abort();
            watch.debouncer.cancel();
            debug!(source = %self.id, "Disposed watcher");
        }
    }
}
