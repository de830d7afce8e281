//! Show command handler

use anyhow::{bail, Context, Result};

use citelib_core::{Config, Library};

use super::open_service;
use crate::output::Output;

/// Print one entry by id
pub async fn show(config: Config, id: &str, output: &Output) -> Result<()> {
    let service = open_service(config)?;
    let library = service.load().await.context("Failed to load library")?;
    service.dispose();

    match library.get(id) {
        Some(entry) => {
            output.print_entry(entry);
            Ok(())
        }
        None => {
            let candidates = composite_candidates(&library, id);
            if candidates.is_empty() {
                bail!("No entry found with id: {}", id);
            }
            bail!(
                "Citekey '{}' exists in several databases, use one of: {}",
                id,
                candidates.join(", ")
            );
        }
    }
}

/// Composite ids whose citekey is `citekey`
fn composite_candidates<'a>(library: &'a Library, citekey: &str) -> Vec<&'a str> {
    library
        .ids()
        .into_iter()
        .filter(|id| {
            id.strip_prefix(citekey)
                .is_some_and(|rest| rest.starts_with('@'))
        })
        .collect()
}
