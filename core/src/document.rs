use crate::config::RankingConfig;
use crate::index::Weight;
use crate::tokenizer::Analyzer;
use crate::DocId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const NAME_BOOST: Weight = 2.0;
const BRAND_BOOST: Weight = 1.5;
const CATEGORY_BOOST: Weight = 1.0;
const ATTRIBUTE_BOOST: Weight = 0.5;
const DESCRIPTION_BOOST: Weight = 0.5;
const DESCRIPTION_TOKEN_CAP: usize = 50;
const ATTRIBUTE_TOKEN_CAP: usize = 10;

/// A catalog product as held by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub name: String,
    pub description: String,
    pub url: String,
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub price: f64,
    pub old_price: Option<f64>,
    pub currency: String,
    pub in_stock: bool,
    pub quantity: Option<i64>,
    /// Category path, `Parent / Child`.
    pub category: Option<String>,
    pub brand: Option<String>,
    pub vendor_code: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    pub discount_percent: Option<u32>,
    pub search_text: String,
    /// Distinct analyzed tokens.
    pub tokens: Vec<String>,
    /// Business-score multiplier; lowered in place when the product goes out of stock.
    pub stock_multiplier: f32,
}

/// Field-weighted analysis of one document, ready for the inverted index.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedDocument {
    pub weights: HashMap<String, Weight>,
    pub length: u32,
}

/// Sparse price/stock change carried by a delta feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub id: DocId,
    pub price: Option<f64>,
    pub old_price: Option<f64>,
    pub in_stock: Option<bool>,
    pub quantity: Option<i64>,
}

pub fn discount_percent(price: f64, old_price: Option<f64>) -> Option<u32> {
    match old_price {
        Some(old) if old > price && price > 0.0 => Some(((1.0 - price / old) * 100.0).round() as u32),
        _ => None,
    }
}

impl Document {
    pub fn new(id: impl Into<DocId>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            url: url.into(),
            image: None,
            images: Vec::new(),
            price: 0.0,
            old_price: None,
            currency: "RUB".to_string(),
            in_stock: true,
            quantity: None,
            category: None,
            brand: None,
            vendor_code: None,
            attributes: BTreeMap::new(),
            discount_percent: None,
            search_text: String::new(),
            tokens: Vec::new(),
            stock_multiplier: 1.0,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_old_price(mut self, old_price: f64) -> Self {
        self.old_price = Some(old_price);
        self
    }

    pub fn with_stock(mut self, in_stock: bool) -> Self {
        self.in_stock = in_stock;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Fill the derived fields (`search_text`, `tokens`, discount, stock multiplier) and
    /// return the weighted token map for indexing.
    pub fn derive(&mut self, analyzer: &Analyzer, ranking: &RankingConfig) -> AnalyzedDocument {
        self.discount_percent = discount_percent(self.price, self.old_price);
        self.stock_multiplier = stock_multiplier(self.in_stock, ranking);

        let mut parts: Vec<&str> = vec![&self.name];
        parts.extend(self.brand.as_deref());
        parts.extend(self.category.as_deref());
        if !self.description.is_empty() {
            parts.push(&self.description);
        }
        parts.extend(self.attributes.values().map(String::as_str));
        self.search_text = parts.join(" ");

        let analyzed = self.analyze(analyzer);
        let distinct: BTreeSet<&String> = analyzed.weights.keys().collect();
        self.tokens = distinct.into_iter().cloned().collect();
        analyzed
    }

    /// Field-boosted term frequencies. Pure function of the document's text fields.
    pub fn analyze(&self, analyzer: &Analyzer) -> AnalyzedDocument {
        let mut weights: HashMap<String, Weight> = HashMap::new();
        let mut length = 0u32;
        let mut add = |tokens: Vec<String>, boost: Weight, cap: usize| {
            for token in tokens.into_iter().take(cap) {
                *weights.entry(token).or_insert(0.0) += boost;
                length += 1;
            }
        };
        add(analyzer.analyze_with_variants(&self.name), NAME_BOOST, usize::MAX);
        if let Some(brand) = &self.brand {
            add(analyzer.analyze_with_variants(brand), BRAND_BOOST, usize::MAX);
        }
        if let Some(category) = &self.category {
            add(analyzer.analyze_with_variants(category), CATEGORY_BOOST, usize::MAX);
        }
        if !self.description.is_empty() {
            add(analyzer.analyze_with_variants(&self.description), DESCRIPTION_BOOST, DESCRIPTION_TOKEN_CAP);
        }
        for value in self.attributes.values() {
            add(analyzer.analyze_with_variants(value), ATTRIBUTE_BOOST, ATTRIBUTE_TOKEN_CAP);
        }
        AnalyzedDocument { weights, length }
    }

    /// Apply the price/stock fields of `update`. Returns whether anything changed.
    pub fn apply(&mut self, update: &StockUpdate, ranking: &RankingConfig) -> bool {
        let mut changed = false;
        if let Some(price) = update.price {
            if price != self.price {
                self.price = price;
                changed = true;
            }
        }
        if update.old_price.is_some() && update.old_price != self.old_price {
            self.old_price = update.old_price;
            changed = true;
        }
        if let Some(in_stock) = update.in_stock {
            if in_stock != self.in_stock {
                self.in_stock = in_stock;
                changed = true;
            }
        }
        if update.quantity.is_some() && update.quantity != self.quantity {
            self.quantity = update.quantity;
            changed = true;
        }
        if changed {
            self.discount_percent = discount_percent(self.price, self.old_price);
            self.stock_multiplier = stock_multiplier(self.in_stock, ranking);
        }
        changed
    }
}

fn stock_multiplier(in_stock: bool, ranking: &RankingConfig) -> f32 {
    if in_stock { 1.0 } else { ranking.out_of_stock_multiplier }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_fills_search_text_and_tokens() {
        let analyzer = Analyzer::default();
        let mut doc = Document::new("A", "Nike Air Max 90", "/a")
            .with_brand("Nike")
            .with_price(12990.0)
            .with_old_price(15990.0);
        let analyzed = doc.derive(&analyzer, &RankingConfig::default());
        assert_eq!(doc.search_text, "Nike Air Max 90 Nike");
        assert!(doc.tokens.contains(&"max".to_string()));
        assert_eq!(doc.discount_percent, Some(19));
        // name + brand occurrences of "nike"
        assert_eq!(analyzed.weights["nike"], NAME_BOOST + BRAND_BOOST);
    }

    #[test]
    fn description_tokens_are_capped() {
        let analyzer = Analyzer::default();
        let long = (0..200).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let doc = Document::new("A", "x", "/a").with_description(long);
        let analyzed = doc.analyze(&analyzer);
        assert!(analyzed.length as usize <= DESCRIPTION_TOKEN_CAP * 2 + 4);
    }

    #[test]
    fn out_of_stock_lowers_multiplier_in_place() {
        let ranking = RankingConfig::default();
        let analyzer = Analyzer::default();
        let mut doc = Document::new("B", "Nike Air Max 95", "/b").with_price(14990.0);
        doc.derive(&analyzer, &ranking);
        let tokens_before = doc.tokens.clone();

        let changed = doc.apply(&StockUpdate { id: "B".into(), in_stock: Some(false), ..Default::default() }, &ranking);
        assert!(changed);
        assert_eq!(doc.stock_multiplier, ranking.out_of_stock_multiplier);
        assert_eq!(doc.tokens, tokens_before);

        let unchanged = doc.apply(&StockUpdate { id: "B".into(), in_stock: Some(false), ..Default::default() }, &ranking);
        assert!(!unchanged);
    }
}
