//! Watch command handler

use anyhow::Result;
use tracing::warn;

use citelib_core::{Config, LibraryEvent, LoadingStatus};

use super::open_service;
use crate::output::Output;

/// Load, then keep reloading on database changes until interrupted
pub async fn watch(config: Config, output: &Output) -> Result<()> {
    let service = open_service(config)?;
    let mut events = service.subscribe();

    // Failures are reported through the event stream and retried
    if let Err(e) = service.load().await {
        warn!("Initial load failed: {}", e);
    }
    service.init_watcher();
    output.message("Watching for changes (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(LibraryEvent::StateChanged(state)) => {
                    if state.status != LoadingStatus::Loading || state.progress.is_none() {
                        output.print_state(&state);
                    }
                }
                Some(LibraryEvent::LoadComplete) => {
                    if let Some(library) = service.library() {
                        output.print_load_summary(&library, &service.state());
                    }
                }
                Some(LibraryEvent::LoadStart) => {}
                None => break,
            },
        }
    }

    service.dispose();
    output.success("Stopped watching");
    Ok(())
}
