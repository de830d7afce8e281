//! CSL-JSON adapter

use chrono::NaiveDate;

use super::{calendar_date, join_names, Author, Reference};
use crate::parse::{CslName, CslRecord};

fn display_name(name: &CslName) -> String {
    if let Some(literal) = name.literal.as_deref().filter(|l| !l.is_empty()) {
        return literal.to_string();
    }
    format!(
        "{} {}",
        name.given.as_deref().unwrap_or(""),
        name.family.as_deref().unwrap_or("")
    )
    .trim()
    .to_string()
}

impl Reference for CslRecord {
    fn citekey(&self) -> &str {
        &self.id
    }

    fn entry_type(&self) -> &str {
        &self.kind
    }

    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn title_short(&self) -> Option<&str> {
        self.title_short.as_deref()
    }

    fn authors(&self) -> Vec<Author> {
        self.author
            .iter()
            .flatten()
            .map(|name| Author {
                given: name.given.clone(),
                family: name.family.clone(),
                literal: name.literal.clone(),
            })
            .collect()
    }

    fn author_string(&self) -> Option<String> {
        if let Some(authors) = &self.author {
            return Some(join_names(authors.iter().map(display_name), false));
        }
        self.editor
            .as_ref()
            .map(|editors| join_names(editors.iter().map(display_name), true))
    }

    // Only the year component is consulted; month and day never affect it
    fn year(&self) -> Option<i32> {
        self.issued
            .as_ref()?
            .first_tuple()?
            .first()?
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
    }

    fn issued_date(&self) -> Option<NaiveDate> {
        let parts = self.issued.as_ref()?.first_tuple()?;
        let year = parts.first()?.as_i64()?;
        let month = parts.get(1).and_then(|p| p.as_i64());
        let day = parts.get(2).and_then(|p| p.as_i64());
        calendar_date(year, month, day)
    }

    fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    fn container_title(&self) -> Option<String> {
        self.container_title.clone()
    }

    fn doi(&self) -> Option<&str> {
        self.doi.as_deref()
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn notes(&self) -> Vec<&str> {
        self.note.as_deref().into_iter().collect()
    }

    fn publisher(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    fn publisher_place(&self) -> Option<&str> {
        self.publisher_place.as_deref()
    }

    fn page(&self) -> Option<&str> {
        self.page.as_deref()
    }

    fn volume(&self) -> Option<&str> {
        self.volume.as_deref()
    }

    fn series(&self) -> Option<&str> {
        self.collection_title.as_deref()
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn event_place(&self) -> Option<&str> {
        self.event_place.as_deref()
    }

    fn keywords(&self) -> Vec<String> {
        self.keyword
            .as_deref()
            .map(|k| {
                k.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn zotero_id(&self) -> Option<&str> {
        self.zotero_key.as_deref()
    }

    fn eprint(&self) -> Option<&str> {
        None
    }

    fn eprinttype(&self) -> Option<&str> {
        None
    }

    fn files(&self) -> Vec<String> {
        Vec::new()
    }
}
