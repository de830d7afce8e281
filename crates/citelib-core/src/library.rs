//! The merged library
//!
//! A [`Library`] is built once per successful load and never mutated; a
//! reload replaces it wholesale.

use std::collections::HashMap;

use crate::entry::Entry;

/// Immutable mapping from entry id to entry
#[derive(Debug, Clone, Default)]
pub struct Library {
    entries: HashMap<String, Entry>,
}

impl Library {
    /// Build a library keyed by each entry's id
    pub fn new(entries: HashMap<String, Entry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Entry ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl FromIterator<Entry> for Library {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|entry| (entry.id().to_string(), entry))
                .collect(),
        )
    }
}
