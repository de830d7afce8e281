//! Command handlers

pub mod config;
pub mod load;
pub mod search;
pub mod show;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};

use citelib_core::{Config, DirectoryVault, LibraryService, SourceKind};

/// Create the library service for `config`
///
/// A directory vault is attached when a database is read through the vault.
pub fn open_service(config: Config) -> Result<LibraryService> {
    let needs_vault = config
        .databases
        .iter()
        .any(|db| db.kind == SourceKind::VaultFile);

    match config.vault_root() {
        Some(root) if needs_vault => {
            let vault = DirectoryVault::open(root.clone())
                .with_context(|| format!("Failed to open vault at {:?}", root))?;
            Ok(LibraryService::with_vault(config, Arc::new(vault)))
        }
        _ => Ok(LibraryService::new(config)),
    }
}
