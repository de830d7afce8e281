//! Reconciliation of entries from several sources
//!
//! Citekeys that occur more than once across all sources are rewritten to
//! `"<citekey>@<source>"`, so no reference is silently dropped. Every entry
//! is tagged with the name of its source. The [`MergeStrategy`] only decides
//! between entries whose final keys still collide, which can happen when a
//! single source repeats a citekey.

use std::collections::hash_map::Entry as Slot;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::Entry;
use crate::library::Library;

/// Policy for residual key collisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Later sources (and later entries) replace earlier ones
    #[default]
    LastWins,
    /// The first occurrence is kept
    FirstWins,
    /// Newest source data wins; behaves as `LastWins` until sources report
    /// modification times
    MostRecent,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::LastWins => "last-wins",
            MergeStrategy::FirstWins => "first-wins",
            MergeStrategy::MostRecent => "most-recent",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-wins" => Ok(MergeStrategy::LastWins),
            "first-wins" => Ok(MergeStrategy::FirstWins),
            "most-recent" => Ok(MergeStrategy::MostRecent),
            other => Err(format!("Unknown merge strategy: {}", other)),
        }
    }
}

/// Entries loaded from one named source
#[derive(Debug, Clone)]
pub struct SourceEntries {
    pub source: String,
    pub entries: Vec<Entry>,
}

impl SourceEntries {
    pub fn new(source: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            source: source.into(),
            entries,
        }
    }
}

/// Merge per-source entries into one library
///
/// `sources` should be in configuration order; the strategy's notion of
/// "first" and "last" follows it.
pub fn merge(sources: Vec<SourceEntries>, strategy: MergeStrategy) -> Library {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    for source in &sources {
        for entry in &source.entries {
            *occurrences.entry(entry.id().to_string()).or_default() += 1;
        }
    }

    if strategy == MergeStrategy::MostRecent {
        debug!("most-recent merge strategy has no timestamps yet, using last-wins");
    }

    let mut merged: HashMap<String, Entry> = HashMap::new();
    let mut composite = 0usize;

    for SourceEntries { source, entries } in sources {
        for entry in entries {
            let collides = occurrences.get(entry.id()).copied().unwrap_or(0) > 1;
            let entry = if collides {
                composite += 1;
                entry.into_composite(&source)
            } else {
                entry.with_source(source.as_str())
            };

            match merged.entry(entry.id().to_string()) {
                Slot::Vacant(slot) => {
                    slot.insert(entry);
                }
                Slot::Occupied(mut slot) => {
                    debug!(id = %slot.key(), strategy = %strategy, "Residual key collision");
                    if strategy != MergeStrategy::FirstWins {
                        slot.insert(entry);
                    }
                }
            }
        }
    }

    if composite > 0 {
        debug!(count = composite, "Assigned composite keys to colliding entries");
    }

    Library::new(merged)
}
