//! One generation of a project's index structures.
//!
//! A snapshot is built off to the side and published whole; after that only document fields
//! change (one document at a time, under that document's own lock). Token structures are never
//! touched after the build.

use crate::config::EngineConfig;
use crate::document::Document;
use crate::index::{InvertedIndex, Weight};
use crate::ngram::NGramIndex;
use crate::tokenizer::{normalize, Analyzer};
use crate::trie::{SuggestionPayload, SuggestionTrie, Terminal};
use crate::DocId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

pub struct IndexSnapshot {
    generation: u64,
    built_at: String,
    documents: HashMap<DocId, RwLock<Document>>,
    inverted: InvertedIndex,
    ngrams: NGramIndex,
    /// Normalized product names, for product suggestions.
    catalog: SuggestionTrie,
    /// Category path -> number of products in it.
    categories: BTreeMap<String, u32>,
}

/// Persisted form of one generation, as read back from the store.
pub struct SnapshotParts {
    pub generation: u64,
    pub built_at: String,
    pub documents: Vec<(Document, u32)>,
    pub postings: Vec<(String, HashMap<DocId, Weight>)>,
    pub grams: Vec<(String, HashSet<String>)>,
    pub suggestions: Vec<(String, Terminal)>,
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

impl IndexSnapshot {
    pub fn empty(config: &EngineConfig) -> Self {
        Self {
            generation: 0,
            built_at: now_rfc3339(),
            documents: HashMap::new(),
            inverted: InvertedIndex::new(),
            ngrams: NGramIndex::new(config.ngram.n),
            catalog: SuggestionTrie::new(config.suggest.max_visit),
            categories: BTreeMap::new(),
        }
    }

    /// Analyze and index `documents` into a fresh generation. The first record wins when
    /// ids repeat.
    pub fn build(generation: u64, documents: Vec<Document>, analyzer: &Analyzer, config: &EngineConfig) -> Self {
        let mut snapshot = Self::empty(config);
        snapshot.generation = generation;
        for mut doc in documents {
            if snapshot.documents.contains_key(&doc.id) {
                continue;
            }
            let analyzed = doc.derive(analyzer, &config.ranking);
            snapshot.insert(doc, &analyzed.weights, analyzed.length);
        }
        debug!(
            generation,
            docs = snapshot.documents.len(),
            tokens = snapshot.inverted.num_tokens(),
            grams = snapshot.ngrams.num_grams(),
            "snapshot built"
        );
        snapshot
    }

    /// `build` only inserts unseen ids, so indexing never retires a token here.
    fn insert(&mut self, doc: Document, weights: &HashMap<String, Weight>, length: u32) {
        let vocabulary = self.inverted.index(&doc.id, weights, length);
        for token in &vocabulary.added {
            self.ngrams.index_token(token);
        }
        self.catalog.insert(&normalize(&doc.name), SuggestionPayload::Product { id: doc.id.clone() }, 1.0);
        if let Some(category) = &doc.category {
            *self.categories.entry(category.clone()).or_insert(0) += 1;
        }
        self.documents.insert(doc.id.clone(), RwLock::new(doc));
    }

    /// Reassemble a persisted generation without re-analyzing any text.
    pub fn from_parts(parts: SnapshotParts, config: &EngineConfig) -> Self {
        let mut doc_lengths = HashMap::with_capacity(parts.documents.len());
        let mut documents = HashMap::with_capacity(parts.documents.len());
        let mut categories = BTreeMap::new();
        for (doc, length) in parts.documents {
            doc_lengths.insert(doc.id.clone(), length);
            if let Some(category) = &doc.category {
                *categories.entry(category.clone()).or_insert(0) += 1;
            }
            documents.insert(doc.id.clone(), RwLock::new(doc));
        }
        Self {
            generation: parts.generation,
            built_at: parts.built_at,
            documents,
            inverted: InvertedIndex::from_entries(parts.postings, doc_lengths),
            ngrams: NGramIndex::from_entries(config.ngram.n, parts.grams),
            catalog: SuggestionTrie::from_entries(config.suggest.max_visit, parts.suggestions),
            categories,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> &str {
        &self.built_at
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.documents.contains_key(doc_id)
    }

    pub fn document(&self, doc_id: &str) -> Option<Document> {
        self.documents.get(doc_id).map(|d| d.read().clone())
    }

    pub fn read_document<R>(&self, doc_id: &str, f: impl FnOnce(&Document) -> R) -> Option<R> {
        self.documents.get(doc_id).map(|d| f(&d.read()))
    }

    /// Mutate one document in place under its own write lock.
    pub fn update_document<R>(&self, doc_id: &str, f: impl FnOnce(&mut Document) -> R) -> Option<R> {
        self.documents.get(doc_id).map(|d| f(&mut d.write()))
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &DocId> {
        self.documents.keys()
    }

    pub fn inverted(&self) -> &InvertedIndex {
        &self.inverted
    }

    pub fn ngrams(&self) -> &NGramIndex {
        &self.ngrams
    }

    pub fn catalog(&self) -> &SuggestionTrie {
        &self.catalog
    }

    pub fn categories(&self) -> &BTreeMap<String, u32> {
        &self.categories
    }
}
