use crate::DocId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Posting weight for one (token, document) pair: the field-boosted term frequency.
pub type Weight = f32;

/// Vocabulary change caused by one index or remove call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VocabularyDelta {
    /// Tokens that now exist in the index and did not before.
    pub added: Vec<String>,
    /// Tokens that no longer have any document.
    pub retired: Vec<String>,
}

/// token -> (document id -> weight), plus the per-document bookkeeping BM25 needs.
///
/// A document id is present under a token iff the token occurs in that document's analyzed
/// text. Weights and lengths are fixed at index time; corpus statistics (document frequency,
/// average length) are read at query time.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    postings: HashMap<String, HashMap<DocId, Weight>>,
    doc_tokens: HashMap<DocId, HashSet<String>>,
    doc_lengths: HashMap<DocId, u32>,
    total_length: u64,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Index `doc_id` with pre-weighted tokens. Re-indexing replaces the previous entry, so
    /// indexing the same content twice leaves the same state as indexing it once.
    pub fn index(&mut self, doc_id: &str, weighted: &HashMap<String, Weight>, length: u32) -> VocabularyDelta {
        let mut orphaned = self.remove(doc_id).retired;
        let mut fresh = Vec::new();
        let mut tokens = HashSet::with_capacity(weighted.len());
        for (token, weight) in weighted {
            if *weight <= 0.0 {
                continue;
            }
            let entry = self.postings.entry(token.clone()).or_insert_with(|| {
                fresh.push(token.clone());
                HashMap::new()
            });
            entry.insert(doc_id.to_string(), *weight);
            tokens.insert(token.clone());
        }
        // a token retired by the removal and re-added above is neither added nor retired
        fresh.retain(|t| !orphaned.contains(t));
        orphaned.retain(|t| !tokens.contains(t));
        if !tokens.is_empty() {
            self.doc_tokens.insert(doc_id.to_string(), tokens);
            self.doc_lengths.insert(doc_id.to_string(), length);
            self.total_length += length as u64;
        }
        VocabularyDelta { added: fresh, retired: orphaned }
    }

    /// Remove `doc_id` from every token entry it touched. Tokens left with no documents are
    /// dropped and reported as retired so the caller can drop them from dependent structures.
    pub fn remove(&mut self, doc_id: &str) -> VocabularyDelta {
        let Some(tokens) = self.doc_tokens.remove(doc_id) else { return VocabularyDelta::default() };
        if let Some(len) = self.doc_lengths.remove(doc_id) {
            self.total_length = self.total_length.saturating_sub(len as u64);
        }
        let mut orphaned = Vec::new();
        for token in tokens {
            let empty = match self.postings.get_mut(&token) {
                Some(docs) => {
                    docs.remove(doc_id);
                    docs.is_empty()
                }
                None => false,
            };
            if empty {
                self.postings.remove(&token);
                orphaned.push(token);
            }
        }
        VocabularyDelta { added: Vec::new(), retired: orphaned }
    }

    pub fn lookup(&self, token: &str) -> Option<&HashMap<DocId, Weight>> {
        self.postings.get(token)
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.postings.contains_key(token)
    }

    pub fn contains_doc(&self, doc_id: &str) -> bool {
        self.doc_tokens.contains_key(doc_id)
    }

    pub fn doc_frequency(&self, token: &str) -> usize {
        self.postings.get(token).map_or(0, HashMap::len)
    }

    pub fn doc_length(&self, doc_id: &str) -> u32 {
        self.doc_lengths.get(doc_id).copied().unwrap_or(0)
    }

    pub fn num_docs(&self) -> usize {
        self.doc_tokens.len()
    }

    pub fn num_tokens(&self) -> usize {
        self.postings.len()
    }

    pub fn avg_doc_length(&self) -> f32 {
        if self.doc_lengths.is_empty() {
            return 0.0;
        }
        self.total_length as f32 / self.doc_lengths.len() as f32
    }

    pub fn tokens(&self) -> impl Iterator<Item = &String> {
        self.postings.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &HashMap<DocId, Weight>)> {
        self.postings.iter()
    }

    /// Rebuild from persisted token entries and document lengths.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, HashMap<DocId, Weight>)>,
        doc_lengths: HashMap<DocId, u32>,
    ) -> Self {
        let mut index = Self::new();
        for (token, docs) in entries {
            for doc_id in docs.keys() {
                index.doc_tokens.entry(doc_id.clone()).or_default().insert(token.clone());
            }
            index.postings.insert(token, docs);
        }
        index.total_length = doc_lengths.values().map(|l| *l as u64).sum();
        index.doc_lengths = doc_lengths;
        index
    }
}
