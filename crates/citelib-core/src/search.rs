//! Full-text search over a library
//!
//! Every load builds a fresh in-RAM tantivy index over each entry's title,
//! author string, year and id. A query term matches index terms exactly,
//! by prefix, or within a small edit distance; exact matches are scored by
//! BM25 and every field carries a boost, title matches counting the most.
//!
//! An index is never written to after it is built. [`SearchService`] swaps
//! in a freshly built index after every load, so a query never sees a
//! half-built one.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer, TokenStream};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, warn};

use crate::entry::Entry;
use crate::error::SearchError;

const TOKENIZER: &str = "citelib";

/// Writer arena; tantivy's per-thread minimum
const WRITER_MEMORY: usize = 15_000_000;

/// Edit distance allowed per query-term character
const FUZZY: f32 = 0.2;
const MAX_DISTANCE: u8 = 2;
const PREFIX_WEIGHT: f32 = 0.375;
const FUZZY_WEIGHT: f32 = 0.45;

#[derive(Debug, Clone, Copy)]
struct Fields {
    id: Field,
    title: Field,
    author_string: Field,
    year: Field,
}

impl Fields {
    fn boosted(&self) -> [(Field, f32); 4] {
        [
            (self.title, 2.0),
            (self.author_string, 1.5),
            (self.year, 1.0),
            (self.id, 1.0),
        ]
    }
}

fn schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let text = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqs),
    );

    let fields = Fields {
        id: builder.add_text_field("id", text.clone().set_stored()),
        title: builder.add_text_field("title", text.clone()),
        author_string: builder.add_text_field("author_string", text.clone()),
        year: builder.add_text_field("year", text),
    };
    (builder.build(), fields)
}

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .build()
}

/// Split text into lowercase alphanumeric terms, as the index does
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}

/// Edit distance allowed for a query term
fn fuzzy_distance(term: &str) -> u8 {
    let distance = (term.chars().count() as f32 * FUZZY).round() as u8;
    distance.min(MAX_DISTANCE)
}

fn should(query: impl Query + 'static, boost: f32) -> (Occur, Box<dyn Query>) {
    (Occur::Should, Box::new(BoostQuery::new(Box::new(query), boost)))
}

/// Immutable in-memory index
pub struct SearchIndex {
    reader: IndexReader,
    fields: Fields,
    documents: usize,
}

impl fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchIndex")
            .field("documents", &self.documents)
            .finish()
    }
}

impl SearchIndex {
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Result<Self, SearchError> {
        let (schema, fields) = schema();
        let index = Index::create_in_ram(schema);
        index.tokenizers().register(TOKENIZER, analyzer());

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY)?;
        let mut documents = 0;
        for entry in entries {
            let mut doc = TantivyDocument::default();
            doc.add_text(fields.id, entry.id());
            doc.add_text(fields.title, entry.title().unwrap_or_default());
            doc.add_text(fields.author_string, entry.author_string().unwrap_or_default());
            if let Some(year) = entry.year() {
                doc.add_text(fields.year, year.to_string());
            }
            writer.add_document(doc)?;
            documents += 1;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            reader,
            fields,
            documents,
        })
    }

    pub fn len(&self) -> usize {
        self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }

    /// Ids of matching entries, best match first
    pub fn search(&self, query: &str) -> Result<Vec<String>, SearchError> {
        let terms = tokenize(query);
        if terms.is_empty() || self.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let hits = searcher.search(&self.query(&terms), &TopDocs::with_limit(self.documents))?;

        let mut ranked = Vec::with_capacity(hits.len());
        for (score, address) in hits {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_str()) {
                ranked.push((score, id.to_string()));
            }
        }
        ranked.sort_by(|(a_score, a_id), (b_score, b_id)| {
            b_score.total_cmp(a_score).then_with(|| a_id.cmp(b_id))
        });
        Ok(ranked.into_iter().map(|(_, id)| id).collect())
    }

    /// Any term in any field; exact, prefix and fuzzy matches add up
    fn query(&self, terms: &[String]) -> BooleanQuery {
        let mut clauses = Vec::new();
        for text in terms {
            let distance = fuzzy_distance(text);
            for (field, boost) in self.fields.boosted() {
                let term = Term::from_field_text(field, text);
                clauses.push(should(
                    TermQuery::new(term.clone(), IndexRecordOption::WithFreqs),
                    boost,
                ));
                clauses.push(should(
                    FuzzyTermQuery::new_prefix(term.clone(), 0, true),
                    boost * PREFIX_WEIGHT,
                ));
                if distance > 0 {
                    clauses.push(should(
                        FuzzyTermQuery::new(term, distance, true),
                        boost * FUZZY_WEIGHT,
                    ));
                }
            }
        }
        BooleanQuery::new(clauses)
    }
}

/// Shared handle to the current search index
#[derive(Debug, Default)]
pub struct SearchService {
    index: RwLock<Option<Arc<SearchIndex>>>,
    builds: AtomicUsize,
}

/// Marks an index build in progress until dropped
struct Building<'a>(&'a AtomicUsize);

impl Drop for Building<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SearchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index without publishing it
    ///
    /// [`is_ready`](Self::is_ready) reports false while the build runs.
    pub fn build<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a Entry>,
    ) -> Result<SearchIndex, SearchError> {
        let _building = self.building();
        let index = SearchIndex::build(entries)?;
        debug!(documents = index.len(), "Built search index");
        Ok(index)
    }

    /// Rebuild the index from scratch and swap it in
    pub fn build_index<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a Entry>,
    ) -> Result<(), SearchError> {
        let index = self.build(entries)?;
        self.replace(index);
        Ok(())
    }

    /// Swap in an index built elsewhere
    pub fn replace(&self, index: SearchIndex) {
        let mut current = self.index.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(Arc::new(index));
    }

    fn building(&self) -> Building<'_> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Building(&self.builds)
    }

    fn current(&self) -> Option<Arc<SearchIndex>> {
        self.index.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ids of matching entries, best match first; empty for an empty query
    pub fn search(&self, query: &str) -> Vec<String> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let Some(index) = self.current() else {
            return Vec::new();
        };
        match index.search(query) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Search failed: {}", e);
                Vec::new()
            }
        }
    }

    pub fn search_limit(&self, query: &str, limit: usize) -> Vec<String> {
        let mut results = self.search(query);
        results.truncate(limit);
        results
    }

    /// False while an index build is in progress
    pub fn is_ready(&self) -> bool {
        self.builds.load(Ordering::SeqCst) == 0
    }

    pub fn len(&self) -> usize {
        self.current().map_or(0, |index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
