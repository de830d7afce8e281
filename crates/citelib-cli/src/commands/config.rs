//! Config command handlers

use std::path::Path;

use anyhow::Result;

use citelib_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config: &Config, config_path: &Path, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "vault_dir": config.vault_dir,
                    "databases": config.databases,
                    "merge_strategy": config.merge_strategy,
                    "log_level": config.log_level,
                    "loader": config.loader,
                })
            );
        }
        OutputFormat::Quiet => {
            for db in &config.databases {
                println!("{}", db.name);
            }
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!(
                "  vault_dir:      {}",
                config
                    .vault_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  merge_strategy: {}", config.merge_strategy);
            println!("  log_level:      {}", config.log_level);
            println!("  load_timeout:   {}ms", config.loader.load_timeout_ms);
            println!("  watch_debounce: {}ms", config.loader.watch_debounce_ms);
            println!(
                "  retries:        {} (base {}ms, max {}ms)",
                config.loader.max_retries,
                config.loader.retry_base_delay_ms,
                config.loader.retry_max_delay_ms
            );
            println!();
            if config.databases.is_empty() {
                println!("Databases: (none configured)");
            } else {
                println!("Databases:");
                for db in &config.databases {
                    println!(
                        "  {} [{}] {}",
                        db.name,
                        db.format,
                        config.resolve_path(&db.path).display()
                    );
                }
            }
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Print the config file path
pub fn path(config_path: &Path, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "config_file": config_path }));
        }
        _ => println!("{}", config_path.display()),
    }
    Ok(())
}
