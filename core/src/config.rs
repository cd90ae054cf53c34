//! Engine configuration.
//!
//! Every field has a default so a partial TOML table deserializes cleanly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub ranking: RankingConfig,
    pub ngram: NGramConfig,
    pub suggest: SuggestConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Replaces the built-in English + Russian stop-word lists when set.
    pub stopwords: Option<Vec<String>>,
    /// Index a Latin<->Cyrillic transliterated variant of document text.
    pub transliterate: bool,
    /// Tokens shorter than this (in chars) are dropped.
    pub min_token_chars: usize,
    pub stemming: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self { stopwords: None, transliterate: true, min_token_chars: 2, stemming: true }
    }
}

/// BM25 constants and business-signal weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub k1: f32,
    pub b: f32,
    pub text_weight: f32,
    pub stock_weight: f32,
    pub popularity_weight: f32,
    pub commercial_weight: f32,
    /// Portion of the commercial signal given to discount size; the rest goes to inverse price.
    pub discount_share: f32,
    /// Multiplier stored on out-of-stock documents.
    pub out_of_stock_multiplier: f32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            text_weight: 0.4,
            stock_weight: 0.2,
            popularity_weight: 0.2,
            commercial_weight: 0.2,
            discount_share: 0.5,
            out_of_stock_multiplier: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NGramConfig {
    pub n: usize,
    /// Minimum overlap ratio for a candidate to count as a correction.
    pub min_similarity: f32,
    pub max_expansions: usize,
}

impl Default for NGramConfig {
    fn default() -> Self {
        Self { n: 3, min_similarity: 0.3, max_expansions: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestConfig {
    pub decay_factor: f64,
    /// Upper bound on trie nodes visited by one prefix search.
    pub max_visit: usize,
    pub min_prefix_chars: usize,
    pub default_limit: usize,
    pub products_limit: usize,
    pub categories_limit: usize,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.9,
            max_visit: 10_000,
            min_prefix_chars: 2,
            default_limit: 10,
            products_limit: 4,
            categories_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub search_ttl_secs: u64,
    pub suggest_ttl_secs: u64,
    /// TTL for queries whose all-time count reached `popular_threshold`.
    pub popular_ttl_secs: u64,
    pub popular_threshold: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_ttl_secs: 60,
            suggest_ttl_secs: 30,
            popular_ttl_secs: 300,
            popular_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub timeout_ms: u64,
    /// The as-typed query is retried with corrected tokens when it matches this many documents or fewer.
    pub near_zero_hits: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { default_limit: 20, max_limit: 100, timeout_ms: 200, near_zero_hits: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_like_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"ranking":{"k1":1.2}}"#).unwrap();
        assert_eq!(cfg.ranking.k1, 1.2);
        assert_eq!(cfg.ranking.b, 0.75);
        assert_eq!(cfg.ngram.n, 3);
        assert_eq!(cfg.cache.search_ttl_secs, 60);
    }
}
