//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::{json, Value};

use citelib_core::{Entry, Library, LibraryState};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single entry with all known fields
    pub fn print_entry(&self, entry: &Entry) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:        {}", entry.id());
                if entry.composite_citekey().is_some() {
                    println!("Citekey:   {}", entry.citekey());
                }
                println!("Type:      {}", entry.entry_type());
                if let Some(title) = entry.title() {
                    println!("Title:     {}", title);
                }
                if let Some(authors) = entry.author_string() {
                    println!("Authors:   {}", authors);
                }
                if let Some(year) = entry.year() {
                    println!("Year:      {}", year);
                }
                if let Some(container) = entry.container_title() {
                    println!("In:        {}", container);
                }
                if let Some(doi) = entry.doi() {
                    println!("DOI:       {}", doi);
                }
                if let Some(url) = entry.url() {
                    println!("URL:       {}", url);
                }
                let keywords = entry.keywords();
                if !keywords.is_empty() {
                    println!("Keywords:  {}", keywords.join(", "));
                }
                if let Some(source) = entry.source_database() {
                    println!("Database:  {} ({})", source, entry.format().label());
                }
                if let Some(note) = entry.note() {
                    println!();
                    println!("── Note ──");
                    println!("{}", note);
                }
            }
            OutputFormat::Json => print_json(&entry.to_json()),
            OutputFormat::Quiet => {
                println!("{}", entry.id());
            }
        }
    }

    /// Print a list of entries, in the given order
    pub fn print_entries(&self, entries: &[&Entry]) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("No entries found.");
                    return;
                }
                for entry in entries {
                    let year = entry
                        .year()
                        .map(|y| y.to_string())
                        .unwrap_or_else(|| "n.d.".to_string());
                    println!(
                        "{} | {} | {} | {}",
                        truncate(entry.id(), 28),
                        year,
                        truncate(&entry.author_string().unwrap_or_default(), 25),
                        truncate(entry.title().unwrap_or("(untitled)"), 45)
                    );
                }
                println!("\n{} entry(ies)", entries.len());
            }
            OutputFormat::Json => {
                let values: Vec<Value> = entries.iter().map(|e| e.to_json()).collect();
                print_json(&Value::Array(values));
            }
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.id());
                }
            }
        }
    }

    /// Print the outcome of a load
    pub fn print_load_summary(&self, library: &Library, state: &LibraryState) {
        match self.format {
            OutputFormat::Human => {
                println!("✓ Loaded {} entry(ies)", library.size());
                if let Some(loaded) = state.last_loaded {
                    println!("  at {}", loaded.format("%Y-%m-%d %H:%M:%S"));
                }
                for failure in &state.source_errors {
                    println!("⚠ Skipped {}: {}", failure.name, failure.message);
                }
            }
            OutputFormat::Json => print_json(&state_json(state, Some(library))),
            OutputFormat::Quiet => {
                println!("{}", library.size());
            }
        }
    }

    /// Print one state transition
    pub fn print_state(&self, state: &LibraryState) {
        match self.format {
            OutputFormat::Human => {
                let mut line = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), state.status);
                if let Some(progress) = state.progress {
                    line.push_str(&format!(" ({}/{})", progress.current, progress.total));
                }
                if let Some(error) = state.error_message() {
                    line.push_str(&format!(": {}", error));
                }
                println!("{}", line);
            }
            OutputFormat::Json => {
                println!("{}", state_json(state, None));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!("{}", json!({"status": "success", "message": message}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn state_json(state: &LibraryState, library: Option<&Library>) -> Value {
    let mut value = json!({
        "status": state.status.as_str(),
        "progress": state.progress,
        "error": state.error_message(),
        "last_loaded": state.last_loaded.map(|t| t.to_rfc3339()),
        "source_errors": state.source_errors,
    });
    if let (Some(library), Some(map)) = (library, value.as_object_mut()) {
        map.insert("entries".to_string(), json!(library.size()));
    }
    value
}

fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
