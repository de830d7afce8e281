//! Library loading state and events
//!
//! [`LibraryState`] is replaced, never mutated, on every transition and
//! published to subscribers as a [`LibraryEvent`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::LibraryError;

/// Where the library is in its load cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl LoadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingStatus::Idle => "idle",
            LoadingStatus::Loading => "loading",
            LoadingStatus::Success => "success",
            LoadingStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for LoadingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sources settled so far in the current load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// A source that failed while others succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub name: String,
    pub message: String,
}

/// Snapshot of the library's load state
#[derive(Debug, Clone, Default)]
pub struct LibraryState {
    pub status: LoadingStatus,
    pub progress: Option<Progress>,
    pub error: Option<Arc<LibraryError>>,
    pub last_loaded: Option<DateTime<Utc>>,
    /// Sources excluded from the last successful load
    pub source_errors: Vec<SourceFailure>,
}

impl LibraryState {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Whether a library is usable right now
    pub fn is_ready(&self) -> bool {
        self.status == LoadingStatus::Success
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

impl PartialEq for LibraryState {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.progress == other.progress
            && self.error_message() == other.error_message()
            && self.last_loaded == other.last_loaded
            && self.source_errors == other.source_errors
    }
}

/// Events published by the library service
#[derive(Debug, Clone)]
pub enum LibraryEvent {
    /// A load cycle started
    LoadStart,
    /// A load cycle finished and a new library is in place
    LoadComplete,
    StateChanged(LibraryState),
}

impl LibraryEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            LibraryEvent::LoadStart => "library-load-start",
            LibraryEvent::LoadComplete => "library-load-complete",
            LibraryEvent::StateChanged(_) => "library-state-changed",
        }
    }
}

/// Handle to a stream of [`LibraryEvent`]s
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// ends the subscription.
pub struct Subscription {
    rx: broadcast::Receiver<LibraryEvent>,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<LibraryEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the service is gone
    ///
    /// A slow subscriber skips events it fell behind on.
    pub async fn recv(&mut self) -> Option<LibraryEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Library event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<LibraryEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
