//! Normalized bibliographic entries
//!
//! An [`Entry`] wraps one raw record (CSL-JSON or BibLaTeX) and exposes a
//! single read-only contract over both. Derived fields are computed on
//! access from the record the entry owns; nothing is precomputed or cached.
//!
//! Each raw format implements [`Reference`], the capability set the
//! adapters provide. `Entry` adds the reconciliation tags (`id`, source
//! database, composite key) on top.

mod biblatex;
mod csl;
pub mod note;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::parse::{BibLatexRecord, CslRecord, DatabaseFormat, RawRecord};

/// A structured author name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
}

/// Fields every raw record format can answer
///
/// Missing or unparseable values are `None` (or empty), never an error.
pub trait Reference {
    /// Key assigned by the originating source
    fn citekey(&self) -> &str;
    fn entry_type(&self) -> &str;
    fn title(&self) -> Option<&str>;
    fn title_short(&self) -> Option<&str>;
    fn authors(&self) -> Vec<Author>;
    /// Comma-separated author names, falling back to `"<editors> (Eds.)"`
    fn author_string(&self) -> Option<String>;
    fn year(&self) -> Option<i32>;
    /// Date of issue; missing month and day default to 1
    fn issued_date(&self) -> Option<NaiveDate>;
    fn abstract_text(&self) -> Option<&str>;
    fn container_title(&self) -> Option<String>;
    fn doi(&self) -> Option<&str>;
    fn url(&self) -> Option<&str>;
    /// Raw note values, before link conversion
    fn notes(&self) -> Vec<&str>;
    fn publisher(&self) -> Option<&str>;
    fn publisher_place(&self) -> Option<&str>;
    fn page(&self) -> Option<&str>;
    fn volume(&self) -> Option<&str>;
    fn series(&self) -> Option<&str>;
    fn language(&self) -> Option<&str>;
    fn source(&self) -> Option<&str>;
    fn event_place(&self) -> Option<&str>;
    fn keywords(&self) -> Vec<String>;
    fn zotero_id(&self) -> Option<&str>;
    fn eprint(&self) -> Option<&str>;
    fn eprinttype(&self) -> Option<&str>;
    fn files(&self) -> Vec<String>;
}

/// The raw record an entry was built from
#[derive(Debug, Clone, PartialEq)]
pub enum EntryData {
    Csl(CslRecord),
    BibLatex(BibLatexRecord),
}

/// One normalized reference
///
/// `id` is fixed at construction. Reconciliation that needs a composite key
/// consumes the entry and builds a new one (see [`Entry::into_composite`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    id: String,
    source_database: Option<String>,
    composite_citekey: Option<String>,
    data: EntryData,
}

impl Entry {
    pub fn from_raw(raw: RawRecord) -> Self {
        match raw {
            RawRecord::Csl(record) => Self::from_csl(record),
            RawRecord::BibLatex(record) => Self::from_biblatex(record),
        }
    }

    pub fn from_csl(record: CslRecord) -> Self {
        Self::new(EntryData::Csl(record))
    }

    pub fn from_biblatex(record: BibLatexRecord) -> Self {
        Self::new(EntryData::BibLatex(record))
    }

    fn new(data: EntryData) -> Self {
        let mut entry = Self {
            id: String::new(),
            source_database: None,
            composite_citekey: None,
            data,
        };
        entry.id = entry.reference().citekey().to_string();
        entry
    }

    /// Tag the entry with the database it came from
    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_database = Some(source_name.into());
        self
    }

    /// Rebuild the entry under the key `"<citekey>@<source>"`
    pub fn into_composite(self, source_name: &str) -> Self {
        let key = format!("{}@{}", self.citekey(), source_name);
        Self {
            id: key.clone(),
            source_database: Some(source_name.to_string()),
            composite_citekey: Some(key),
            data: self.data,
        }
    }

    /// Key under which the entry is stored in a library
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_database(&self) -> Option<&str> {
        self.source_database.as_deref()
    }

    /// Set only when the citekey collided across sources
    pub fn composite_citekey(&self) -> Option<&str> {
        self.composite_citekey.as_deref()
    }

    pub fn format(&self) -> DatabaseFormat {
        match self.data {
            EntryData::Csl(_) => DatabaseFormat::CslJson,
            EntryData::BibLatex(_) => DatabaseFormat::BibLatex,
        }
    }

    pub fn data(&self) -> &EntryData {
        &self.data
    }

    fn reference(&self) -> &dyn Reference {
        match &self.data {
            EntryData::Csl(record) => record,
            EntryData::BibLatex(record) => record,
        }
    }

    pub fn citekey(&self) -> &str {
        self.reference().citekey()
    }

    pub fn entry_type(&self) -> &str {
        self.reference().entry_type()
    }

    pub fn title(&self) -> Option<&str> {
        self.reference().title()
    }

    pub fn title_short(&self) -> Option<&str> {
        self.reference().title_short()
    }

    pub fn authors(&self) -> Vec<Author> {
        self.reference().authors()
    }

    pub fn author_string(&self) -> Option<String> {
        self.reference().author_string()
    }

    pub fn year(&self) -> Option<i32> {
        self.reference()
            .year()
            .or_else(|| self.issued_date().map(|date| date.year()))
    }

    pub fn issued_date(&self) -> Option<NaiveDate> {
        self.reference().issued_date()
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.reference().abstract_text()
    }

    pub fn container_title(&self) -> Option<String> {
        self.reference().container_title()
    }

    pub fn doi(&self) -> Option<&str> {
        self.reference().doi()
    }

    pub fn url(&self) -> Option<&str> {
        self.reference().url()
    }

    /// Notes with embedded links rewritten as Markdown
    pub fn note(&self) -> Option<String> {
        note::render_notes(self.reference().notes())
    }

    pub fn publisher(&self) -> Option<&str> {
        self.reference().publisher()
    }

    pub fn publisher_place(&self) -> Option<&str> {
        self.reference().publisher_place()
    }

    pub fn page(&self) -> Option<&str> {
        self.reference().page()
    }

    pub fn volume(&self) -> Option<&str> {
        self.reference().volume()
    }

    pub fn series(&self) -> Option<&str> {
        self.reference().series()
    }

    pub fn language(&self) -> Option<&str> {
        self.reference().language()
    }

    pub fn source(&self) -> Option<&str> {
        self.reference().source()
    }

    pub fn event_place(&self) -> Option<&str> {
        self.reference().event_place()
    }

    pub fn keywords(&self) -> Vec<String> {
        self.reference().keywords()
    }

    pub fn zotero_id(&self) -> Option<&str> {
        self.reference().zotero_id()
    }

    pub fn eprint(&self) -> Option<&str> {
        self.reference().eprint()
    }

    pub fn eprinttype(&self) -> Option<&str> {
        self.reference().eprinttype()
    }

    pub fn files(&self) -> Vec<String> {
        self.reference().files()
    }

    /// URI that opens this entry in the Zotero client
    pub fn zotero_select_uri(&self) -> String {
        format!("zotero://select/items/@{}", self.citekey())
    }

    /// All public fields as a JSON object, absent values omitted
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                obj.insert(key.to_string(), value);
            }
        };
        let text = |s: Option<&str>| s.map(Value::from);
        let list = |items: Vec<String>| (!items.is_empty()).then(|| Value::from(items));

        put("id", Some(self.id().into()));
        put("citekey", Some(self.citekey().into()));
        put("type", Some(self.entry_type().into()));
        put("title", text(self.title()));
        put("titleShort", text(self.title_short()));
        put("authorString", self.author_string().map(Value::from));
        let authors = self.authors();
        if !authors.is_empty() {
            put("author", serde_json::to_value(authors).ok());
        }
        put("year", self.year().map(Value::from));
        put(
            "issuedDate",
            self.issued_date()
                .map(|date| date.format("%Y-%m-%d").to_string().into()),
        );
        put("abstract", text(self.abstract_text()));
        put("containerTitle", self.container_title().map(Value::from));
        put("DOI", text(self.doi()));
        put("URL", text(self.url()));
        put("note", self.note().map(Value::from));
        put("publisher", text(self.publisher()));
        put("publisherPlace", text(self.publisher_place()));
        put("page", text(self.page()));
        put("volume", text(self.volume()));
        put("series", text(self.series()));
        put("language", text(self.language()));
        put("source", text(self.source()));
        put("eventPlace", text(self.event_place()));
        put("keywords", list(self.keywords()));
        put("zoteroId", text(self.zotero_id()));
        put("zoteroSelectURI", Some(self.zotero_select_uri().into()));
        put("eprint", text(self.eprint()));
        put("eprinttype", text(self.eprinttype()));
        put("files", list(self.files()));
        put("_sourceDatabase", text(self.source_database()));
        put("_compositeCitekey", text(self.composite_citekey()));

        Value::Object(obj)
    }
}

/// Join names as `"a, b"`, with `" (Eds.)"` appended for editors
fn join_names(names: impl IntoIterator<Item = String>, editors: bool) -> String {
    let joined = names.into_iter().collect::<Vec<_>>().join(", ");
    if editors {
        format!("{} (Eds.)", joined)
    } else {
        joined
    }
}

/// Date from year plus optional month/day, where 0 or missing means 1
fn calendar_date(year: i64, month: Option<i64>, day: Option<i64>) -> Option<NaiveDate> {
    let year = i32::try_from(year).ok()?;
    let month = month.filter(|m| *m > 0).unwrap_or(1);
    let day = day.filter(|d| *d > 0).unwrap_or(1);
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}
