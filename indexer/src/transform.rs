//! Raw records to canonical documents and stock updates, collecting per-record rejections.

use crate::error::ValidationError;
use crate::format::FieldMapping;
use crate::parse::RawRecord;
use scraper::Html;
use shop_core::{Document, StockUpdate};
use std::collections::HashSet;

const DEFAULT_CURRENCY: &str = "RUB";

#[derive(Debug)]
pub struct Transformed<T> {
    pub items: Vec<T>,
    pub rejected: Vec<ValidationError>,
}

impl<T> Default for Transformed<T> {
    fn default() -> Self {
        Self { items: Vec::new(), rejected: Vec::new() }
    }
}

/// Lenient number parsing for prices: `12 990,50 руб.`, `1990.00 RUB`, `12,990.00`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let kept: String = raw.chars().filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-')).collect();
    let kept = kept.trim_matches(|c| c == '.' || c == ',');
    let normalized = match (kept.contains(','), kept.contains('.')) {
        (true, true) => kept.replace(',', ""),
        (true, false) => kept.replace(',', "."),
        _ => kept.to_string(),
    };
    normalized.parse::<f64>().ok().filter(|p| p.is_finite() && *p >= 0.0)
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "available" | "in stock" | "in_stock" | "в наличии" | "есть" => Some(true),
        "false" | "0" | "no" | "n" | "out of stock" | "out_of_stock" | "нет" | "нет в наличии" => Some(false),
        _ => None,
    }
}

fn parse_quantity(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| raw.parse::<f64>().ok().filter(|q| q.is_finite()).map(|q| q as i64))
}

/// Three-letter currency code trailing a price, as in Google's `1990.00 RUB`.
fn currency_suffix(raw: &str) -> Option<String> {
    let suffix = raw.trim().rsplit(' ').next()?;
    (suffix.len() == 3 && suffix.chars().all(|c| c.is_ascii_alphabetic())).then(|| suffix.to_ascii_uppercase())
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn strip_html(raw: &str) -> String {
    let text = if raw.contains('<') {
        let fragment = Html::parse_fragment(raw);
        fragment.root_element().text().collect::<Vec<_>>().join(" ")
    } else {
        raw.to_string()
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First present category field; several values are path segments, `>` separators become `/`.
fn category(record: &RawRecord, mapping: &FieldMapping) -> Option<String> {
    let field = mapping.category.iter().find(|name| record.has_any(&[**name]))?;
    let parts: Vec<String> = record.all(&[*field]).into_iter().map(|p| p.replace(" > ", " / ")).collect();
    Some(parts.join(" / "))
}

fn stock(record: &RawRecord, mapping: &FieldMapping) -> (Option<bool>, Option<i64>) {
    let quantity = record.first(mapping.quantity).and_then(parse_quantity);
    let in_stock = record.first(mapping.in_stock).and_then(parse_flag).or(quantity.map(|q| q > 0));
    (in_stock, quantity)
}

/// `(price, old_price)`, applying a sale price when the format has one.
fn prices(record: &RawRecord, mapping: &FieldMapping) -> (Option<f64>, Option<f64>) {
    let regular = record.first(mapping.price).and_then(parse_price);
    let old = record.first(mapping.old_price).and_then(parse_price);
    match record.first(mapping.sale_price).and_then(parse_price) {
        Some(sale) => (Some(sale), regular.or(old)),
        None => (regular, old),
    }
}

fn to_document(record: &RawRecord, mapping: &FieldMapping) -> Result<Document, Vec<String>> {
    let mut reasons = Vec::new();
    let id = record.first(mapping.id);
    let name = record.first(mapping.name).map(str::to_string).or_else(|| {
        let parts = record.all(mapping.name_parts);
        (!parts.is_empty()).then(|| parts.join(" "))
    });
    let url = record.first(mapping.url);
    let (price, old_price) = prices(record, mapping);

    if id.is_none() {
        reasons.push("missing id".to_string());
    }
    if name.is_none() {
        reasons.push("missing name".to_string());
    }
    if url.is_none() {
        reasons.push("missing url".to_string());
    }
    if price.is_none() {
        match record.first(mapping.sale_price).or_else(|| record.first(mapping.price)) {
            Some(raw) => reasons.push(format!("price is not a number: {raw}")),
            None => reasons.push("missing price".to_string()),
        }
    }
    let (Some(id), Some(name), Some(url), Some(price)) = (id, name, url, price) else {
        return Err(reasons);
    };

    let (in_stock, quantity) = stock(record, mapping);
    let mut doc = Document::new(id, name, url).with_price(price).with_stock(in_stock.unwrap_or(true));
    doc.old_price = old_price;
    doc.quantity = quantity;
    doc.images = record.all(mapping.images).into_iter().map(str::to_string).collect();
    doc.image = doc.images.first().cloned();
    doc.description = record.first(mapping.description).map(strip_html).unwrap_or_default();
    doc.currency = record
        .first(mapping.currency)
        .map(str::to_uppercase)
        .or_else(|| record.first(mapping.price).and_then(currency_suffix))
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    doc.category = category(record, mapping);
    doc.brand = record.first(mapping.brand).map(str::to_string);
    doc.vendor_code = record.first(mapping.vendor_code).map(str::to_string);
    doc.attributes = record.attributes.clone();
    Ok(doc)
}

/// Validate and convert full-feed records. Later duplicates of an id are rejected.
pub fn to_documents(records: &[RawRecord], mapping: &FieldMapping) -> Transformed<Document> {
    let mut out = Transformed::default();
    let mut seen = HashSet::new();
    for (index, record) in records.iter().enumerate() {
        let id = record.first(mapping.id).map(str::to_string);
        match to_document(record, mapping) {
            Ok(doc) if !seen.insert(doc.id.clone()) => {
                out.rejected.push(ValidationError { index, id, reasons: vec!["duplicate id".to_string()] });
            }
            Ok(doc) => out.items.push(doc),
            Err(reasons) => out.rejected.push(ValidationError { index, id, reasons }),
        }
    }
    out
}

/// Validate and convert delta-feed records. Only id plus price/stock fields are read.
pub fn to_updates(records: &[RawRecord], mapping: &FieldMapping) -> Transformed<StockUpdate> {
    let mut out = Transformed::default();
    for (index, record) in records.iter().enumerate() {
        let id = record.first(mapping.id).map(str::to_string);
        let Some(doc_id) = id.clone() else {
            out.rejected.push(ValidationError { index, id, reasons: vec!["missing id".to_string()] });
            continue;
        };
        let mut reasons = Vec::new();
        if let Some(raw) = record.first(mapping.price) {
            if parse_price(raw).is_none() {
                reasons.push(format!("price is not a number: {raw}"));
            }
        }
        let (price, old_price) = prices(record, mapping);
        let (in_stock, quantity) = stock(record, mapping);
        if reasons.is_empty() && price.is_none() && old_price.is_none() && in_stock.is_none() && quantity.is_none() {
            reasons.push("no price or stock fields".to_string());
        }
        if !reasons.is_empty() {
            out.rejected.push(ValidationError { index, id, reasons });
            continue;
        }
        out.items.push(StockUpdate { id: doc_id, price, old_price, in_stock, quantity });
    }
    out
}
