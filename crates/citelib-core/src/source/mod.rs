//! Data sources
//!
//! A [`DataSource`] pairs one bibliography location with its format and the
//! shared [`ParseWorker`]. It can load its entries once and report changes
//! through a debounced callback. Implementations:
//!
//! - [`LocalFileSource`]: a file on the local filesystem
//! - [`VaultFileSource`]: a file inside a [`Vault`] storage abstraction

mod local;
mod vault;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::entry::Entry;
use crate::error::SourceError;
use crate::parse::DatabaseFormat;
use crate::worker::{ParseWorker, WorkerError};

pub use local::LocalFileSource;
pub use vault::{DirectoryVault, MemoryVault, Vault, VaultEvent, VaultFileSource};

/// Called (after debouncing) when a source's underlying data changes
pub type WatchCallback = Arc<dyn Fn() + Send + Sync>;

/// A loadable, watchable bibliography source
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Unique identifier within one service
    fn id(&self) -> &str;

    /// Database name, used to build composite keys
    fn name(&self) -> &str;

    /// Load every entry the source currently holds
    ///
    /// Fails on a missing or empty file, a read error, or a fatal parse
    /// error. Per-record parse problems are logged and skipped.
    async fn load(&self, cancel: &CancellationToken) -> Result<Vec<Entry>, SourceError>;

    /// Install the change watcher
    ///
    /// A source owns at most one watcher; a second call without
    /// [`dispose`](Self::dispose) logs a warning and is ignored.
    fn watch(&self, callback: WatchCallback);

    /// Whether a watcher is currently installed
    fn is_watching(&self) -> bool;

    /// Stop watching and drop any pending debounced callback
    fn dispose(&self);
}

/// Parse `text` on the worker and adapt every record into an [`Entry`]
pub(crate) async fn parse_entries(
    worker: &ParseWorker,
    text: String,
    format: DatabaseFormat,
    origin: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<Entry>, SourceError> {
    let output = worker
        .parse(text, format, cancel)
        .await
        .map_err(|e| match e {
            WorkerError::Parse(source) => SourceError::Parse {
                path: origin.to_path_buf(),
                source,
            },
            WorkerError::Cancelled => SourceError::Cancelled,
            WorkerError::Stopped => SourceError::WorkerStopped,
        })?;

    for warning in &output.warnings {
        warn!(path = %origin.display(), "Skipped {} record: {}", format.label(), warning);
    }

    Ok(output.records.into_iter().map(Entry::from_raw).collect())
}
