//! Relevance ranking: BM25 text score blended with stock, popularity and commercial signals.

use crate::config::RankingConfig;
use crate::document::Document;
use crate::DocId;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// `ln(1 + (N - df + 0.5) / (df + 0.5))`, always positive.
pub fn idf(num_docs: usize, doc_freq: usize) -> f32 {
    let n = num_docs as f32;
    let df = (doc_freq as f32).min(n);
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// One query token's BM25 contribution for one document.
pub fn bm25(tf: f32, idf: f32, doc_len: f32, avg_doc_len: f32, k1: f32, b: f32) -> f32 {
    if tf <= 0.0 {
        return 0.0;
    }
    let rel_len = if avg_doc_len > 0.0 { doc_len / avg_doc_len } else { 1.0 };
    idf * tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * rel_len))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Relevance,
    PriceAsc,
    PriceDesc,
    Popular,
}

/// Boolean post-filter applied to candidates before the final sort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    /// Case-insensitive substring of the category path.
    pub category: Option<String>,
    /// Case-insensitive exact brand.
    pub brand: Option<String>,
    /// `Some(true)` keeps only in-stock documents.
    pub in_stock: Option<bool>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Filters::default()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if self.in_stock == Some(true) && !doc.in_stock {
            return false;
        }
        if self.price_min.is_some_and(|min| doc.price < min) {
            return false;
        }
        if self.price_max.is_some_and(|max| doc.price > max) {
            return false;
        }
        if let Some(wanted) = &self.category {
            let wanted = wanted.to_lowercase();
            match &doc.category {
                Some(c) if c.to_lowercase().contains(&wanted) => {}
                _ => return false,
            }
        }
        if let Some(wanted) = &self.brand {
            match &doc.brand {
                Some(b) if b.eq_ignore_ascii_case(wanted) || b.to_lowercase() == wanted.to_lowercase() => {}
                _ => return false,
            }
        }
        true
    }
}

/// Per-document inputs to the final score.
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    pub id: DocId,
    pub text: f32,
    pub price: f64,
    pub discount_percent: Option<u32>,
    pub in_stock: bool,
    pub stock_multiplier: f32,
    pub popularity: f32,
}

impl Signals {
    pub fn from_document(doc: &Document, text: f32, popularity: f32) -> Self {
        Self {
            id: doc.id.clone(),
            text,
            price: doc.price,
            discount_percent: doc.discount_percent,
            in_stock: doc.in_stock,
            stock_multiplier: doc.stock_multiplier,
            popularity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub id: DocId,
    pub score: f32,
    pub price: f64,
    pub popularity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Ranker {
    config: RankingConfig,
}

impl Ranker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Blend signals into final scores and order by `sort`. Ties always break by id.
    pub fn rank(&self, candidates: Vec<Signals>, sort: SortOrder) -> Vec<Ranked> {
        let max_text = candidates.iter().map(|s| s.text).fold(0.0f32, f32::max);
        let max_pop = candidates.iter().map(|s| s.popularity).fold(0.0f32, f32::max);
        let max_price = candidates.iter().map(|s| s.price).fold(0.0f64, f64::max);

        let mut ranked: Vec<Ranked> = candidates
            .into_iter()
            .map(|s| {
                let score = self.final_score(&s, max_text, max_pop, max_price);
                Ranked { id: s.id, score, price: s.price, popularity: s.popularity }
            })
            .collect();

        let by_score = |a: &Ranked, b: &Ranked| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal);
        ranked.sort_by(|a, b| {
            let primary = match sort {
                SortOrder::Relevance => by_score(a, b),
                SortOrder::PriceAsc => a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal),
                SortOrder::PriceDesc => b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal),
                SortOrder::Popular => b
                    .popularity
                    .partial_cmp(&a.popularity)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| by_score(a, b)),
            };
            primary.then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }

    fn final_score(&self, s: &Signals, max_text: f32, max_pop: f32, max_price: f64) -> f32 {
        let c = &self.config;
        let text = if max_text > 0.0 { s.text / max_text } else { 0.0 };
        let popularity = if max_pop > 0.0 { s.popularity / max_pop } else { 0.0 };
        let stock = if s.in_stock { 1.0 } else { 0.0 };
        let discount = s.discount_percent.map_or(0.0, |d| d as f32 / 100.0);
        let inverse_price = if max_price > 0.0 { (1.0 - s.price / max_price) as f32 } else { 0.0 };
        let commercial = c.discount_share * discount + (1.0 - c.discount_share) * inverse_price;

        let blended = c.text_weight * text
            + c.stock_weight * stock
            + c.popularity_weight * popularity
            + c.commercial_weight * commercial;
        blended * s.stock_multiplier
    }
}

/// Wrap every case-insensitive occurrence of `terms` in `text` with `<em>`.
pub fn highlight(text: &str, terms: &[String]) -> String {
    let mut terms: Vec<&str> = terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
    if terms.is_empty() {
        return text.to_string();
    }
    // longest first so the alternation prefers whole words over their stems
    terms.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));
    terms.dedup();
    let pattern = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.replace_all(text, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string(),
        Err(_) => text.to_string(),
    }
}
