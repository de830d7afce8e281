//! BibLaTeX adapter

use chrono::NaiveDate;

use super::{calendar_date, join_names, Author, Reference};
use crate::parse::csl::leading_int;
use crate::parse::BibLatexRecord;

impl BibLatexRecord {
    fn date(&self) -> Option<&str> {
        self.field("date")
    }
}

impl Reference for BibLatexRecord {
    fn citekey(&self) -> &str {
        &self.key
    }

    fn entry_type(&self) -> &str {
        &self.entry_type
    }

    fn title(&self) -> Option<&str> {
        self.field("title")
    }

    fn title_short(&self) -> Option<&str> {
        self.field("shorttitle")
    }

    fn authors(&self) -> Vec<Author> {
        self.creators("author")
            .unwrap_or_default()
            .iter()
            .map(|name| Author {
                given: name.first_name.clone(),
                family: name.last_name.clone(),
                literal: name.literal.clone(),
            })
            .collect()
    }

    fn author_string(&self) -> Option<String> {
        if let Some(authors) = self.creators("author") {
            return Some(join_names(authors.iter().map(|n| n.display()), false));
        }
        if let Some(editors) = self.creators("editor") {
            return Some(join_names(editors.iter().map(|n| n.display()), true));
        }
        // Unstructured author text, if creators could not be split
        self.field_values("author").map(|raw| raw.join(", "))
    }

    fn year(&self) -> Option<i32> {
        if let Some(year) = self.field("year") {
            return leading_int(year).and_then(|y| i32::try_from(y).ok());
        }
        let date = self.date()?;
        date.get(..4)
            .filter(|prefix| prefix.chars().all(|c| c.is_ascii_digit()))
            .and_then(|prefix| prefix.parse().ok())
    }

    fn issued_date(&self) -> Option<NaiveDate> {
        // ISO 8601 with optional month and day; ranges use their start
        let start = self.date()?.split('/').next()?.trim();
        let mut parts = start.splitn(3, '-');
        let year = parts.next()?.parse::<i64>().ok()?;
        let month = parts.next().and_then(leading_int);
        let day = parts.next().and_then(leading_int);
        calendar_date(year, month, day)
    }

    fn abstract_text(&self) -> Option<&str> {
        self.field("abstract")
    }

    fn container_title(&self) -> Option<String> {
        let named = ["booktitle", "journal", "journaltitle"]
            .into_iter()
            .find_map(|name| self.field(name).filter(|v| !v.is_empty()));
        if let Some(title) = named {
            return Some(title.to_string());
        }

        let eprint = self.eprint()?;
        let prefix = self
            .eprinttype()
            .map(|kind| format!("{}:", kind))
            .unwrap_or_default();
        let suffix = self
            .field("primaryclass")
            .map(|class| format!(" [{}]", class))
            .unwrap_or_default();
        Some(format!("{}{}{}", prefix, eprint, suffix))
    }

    fn doi(&self) -> Option<&str> {
        self.field("doi")
    }

    fn url(&self) -> Option<&str> {
        self.field("url")
    }

    fn notes(&self) -> Vec<&str> {
        self.field_values("note")
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .collect()
    }

    fn publisher(&self) -> Option<&str> {
        self.field("publisher")
    }

    fn publisher_place(&self) -> Option<&str> {
        self.field("location")
    }

    fn page(&self) -> Option<&str> {
        self.field("pages")
    }

    fn volume(&self) -> Option<&str> {
        self.field("volume")
    }

    fn series(&self) -> Option<&str> {
        self.field("series")
    }

    fn language(&self) -> Option<&str> {
        self.field("language")
    }

    fn source(&self) -> Option<&str> {
        self.field("source")
    }

    fn event_place(&self) -> Option<&str> {
        self.field("venue").or_else(|| self.field("location"))
    }

    fn keywords(&self) -> Vec<String> {
        self.field_values("keywords")
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    fn zotero_id(&self) -> Option<&str> {
        self.field("zotero-key")
    }

    fn eprint(&self) -> Option<&str> {
        self.field("eprint")
    }

    fn eprinttype(&self) -> Option<&str> {
        self.field("eprinttype")
            .or_else(|| self.field("archiveprefix"))
    }

    fn files(&self) -> Vec<String> {
        ["file", "files"]
            .into_iter()
            .filter_map(|name| self.field_values(name))
            .flatten()
            .flat_map(|value| value.split(';'))
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(String::from)
            .collect()
    }
}
