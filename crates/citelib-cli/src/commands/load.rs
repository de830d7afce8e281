//! Load command handler

use anyhow::{Context, Result};

use citelib_core::Config;

use super::open_service;
use crate::output::Output;

/// Load every configured database once
pub async fn load(config: Config, output: &Output) -> Result<()> {
    if config.databases.is_empty() {
        output.message("No databases configured. Add [[databases]] to the config file.");
    }

    let service = open_service(config)?;
    let library = service.load().await.context("Failed to load library")?;
    output.print_load_summary(&library, &service.state());

    service.dispose();
    Ok(())
}
