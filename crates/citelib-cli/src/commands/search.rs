//! Search command handler

use anyhow::{Context, Result};

use citelib_core::Config;

use super::open_service;
use crate::output::Output;

/// Load the library and print the best matches for `query`
pub async fn search(config: Config, query: &str, limit: usize, output: &Output) -> Result<()> {
    let service = open_service(config)?;
    let library = service.load().await.context("Failed to load library")?;

    let ids = service.search_limit(query, limit);
    let entries: Vec<_> = ids.iter().filter_map(|id| library.get(id)).collect();
    output.print_entries(&entries);

    service.dispose();
    Ok(())
}
