//! Character n-gram index over the token vocabulary.
//!
//! Tokens are padded with `n - 1` boundary markers on both sides, so even a one-char token
//! produces n-grams: with n = 3, `"mx"` yields `__m`, `_mx`, `mx_`, `x__`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

const BOUNDARY: char = '_';

/// Distinct padded n-grams of `token`.
pub fn ngrams(token: &str, n: usize) -> HashSet<String> {
    let n = n.max(1);
    let pad = std::iter::repeat(BOUNDARY).take(n - 1);
    let padded: Vec<char> = pad.clone().chain(token.chars()).chain(pad).collect();
    if padded.len() < n {
        return HashSet::new();
    }
    padded.windows(n).map(|w| w.iter().collect()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub token: String,
    /// Shared n-grams divided by the candidate's own n-gram count.
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NGramIndex {
    n: usize,
    grams: HashMap<String, HashSet<String>>,
    /// Distinct n-gram count per indexed token.
    sizes: HashMap<String, usize>,
}

impl Default for NGramIndex {
    fn default() -> Self {
        Self::new(3)
    }
}

impl NGramIndex {
    pub fn new(n: usize) -> Self {
        Self { n: n.max(1), grams: HashMap::new(), sizes: HashMap::new() }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn index_token(&mut self, token: &str) {
        if self.sizes.contains_key(token) {
            return;
        }
        let grams = ngrams(token, self.n);
        self.sizes.insert(token.to_string(), grams.len());
        for gram in grams {
            self.grams.entry(gram).or_default().insert(token.to_string());
        }
    }

    /// Drop `token` from every n-gram set; sets left empty are removed.
    pub fn remove_token(&mut self, token: &str) {
        if self.sizes.remove(token).is_none() {
            return;
        }
        for gram in ngrams(token, self.n) {
            let empty = match self.grams.get_mut(&gram) {
                Some(tokens) => {
                    tokens.remove(token);
                    tokens.is_empty()
                }
                None => false,
            };
            if empty {
                self.grams.remove(&gram);
            }
        }
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.sizes.contains_key(token)
    }

    pub fn tokens_for(&self, gram: &str) -> Option<&HashSet<String>> {
        self.grams.get(gram)
    }

    pub fn num_grams(&self) -> usize {
        self.grams.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &HashSet<String>)> {
        self.grams.iter()
    }

    /// Tokens sharing n-grams with `partial`, by descending overlap ratio, ties by token.
    pub fn expand(&self, partial: &str) -> Vec<Candidate> {
        let mut overlap: HashMap<&str, usize> = HashMap::new();
        for gram in ngrams(partial, self.n) {
            if let Some(tokens) = self.grams.get(&gram) {
                for token in tokens {
                    *overlap.entry(token.as_str()).or_insert(0) += 1;
                }
            }
        }
        let mut candidates: Vec<Candidate> = overlap
            .into_iter()
            .filter(|(token, _)| *token != partial)
            .map(|(token, shared)| {
                let own = self.sizes.get(token).copied().unwrap_or(1).max(1);
                Candidate { token: token.to_string(), similarity: shared as f32 / own as f32 }
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.token.cmp(&b.token))
        });
        candidates
    }

    pub fn from_entries(n: usize, entries: impl IntoIterator<Item = (String, HashSet<String>)>) -> Self {
        let mut index = Self::new(n);
        for (gram, tokens) in entries {
            for token in &tokens {
                index.sizes.entry(token.clone()).or_insert_with(|| ngrams(token, n).len());
            }
            index.grams.insert(gram, tokens);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tokens_still_produce_grams() {
        let g = ngrams("a", 3);
        assert_eq!(g.len(), 3);
        assert!(g.contains("__a") && g.contains("_a_") && g.contains("a__"));
    }

    #[test]
    fn typo_expands_to_indexed_token() {
        let mut idx = NGramIndex::new(3);
        for t in ["air", "max", "nike", "90"] {
            idx.index_token(t);
        }
        let candidates = idx.expand("mx");
        assert_eq!(candidates[0].token, "max");
        assert!((candidates[0].similarity - 0.4).abs() < 1e-6);
    }

    #[test]
    fn longer_tokens_are_not_favored() {
        let mut idx = NGramIndex::new(3);
        idx.index_token("max");
        idx.index_token("maximilian");
        let candidates = idx.expand("max");
        // exact token is excluded; the long token is penalised by its own gram count
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].similarity < 0.5);
    }

    #[test]
    fn remove_token_clears_gram_sets() {
        let mut idx = NGramIndex::new(3);
        idx.index_token("max");
        idx.index_token("mat");
        idx.remove_token("max");
        assert!(!idx.contains_token("max"));
        assert!(idx.entries().all(|(_, tokens)| !tokens.contains("max")));
        assert!(idx.tokens_for("max").is_none());
        assert!(idx.tokens_for("_ma").unwrap().contains("mat"));
    }
}
