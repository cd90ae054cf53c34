//! Declared feed formats and the field-mapping table each one resolves to.

use crate::error::FeedError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// Yandex Market `yml_catalog` XML.
    Yml,
    /// Google Merchant RSS/Atom with `g:` fields.
    Google,
    Json,
    #[serde(alias = "ndjson")]
    Jsonl,
}

/// Source field names for each canonical document field, tried in order.
#[derive(Debug)]
pub struct FieldMapping {
    /// XML element names (or JSON container keys) that hold one product each.
    pub records: &'static [&'static str],
    pub id: &'static [&'static str],
    pub name: &'static [&'static str],
    /// Joined with spaces when no `name` field is present.
    pub name_parts: &'static [&'static str],
    pub description: &'static [&'static str],
    pub url: &'static [&'static str],
    pub images: &'static [&'static str],
    pub price: &'static [&'static str],
    /// Overrides `price` when present; the regular price then becomes the old price.
    pub sale_price: &'static [&'static str],
    pub old_price: &'static [&'static str],
    pub currency: &'static [&'static str],
    pub category: &'static [&'static str],
    pub brand: &'static [&'static str],
    pub in_stock: &'static [&'static str],
    pub quantity: &'static [&'static str],
    pub vendor_code: &'static [&'static str],
    /// Key of the free-form attribute map (JSON) or name of the `<param name="..">` element (XML).
    pub attributes: &'static [&'static str],
}

static YML: FieldMapping = FieldMapping {
    records: &["offer"],
    id: &["@id"],
    name: &["name"],
    name_parts: &["typePrefix", "vendor", "model"],
    description: &["description"],
    url: &["url"],
    images: &["picture"],
    price: &["price"],
    sale_price: &[],
    old_price: &["oldprice"],
    currency: &["currencyId"],
    category: &["category"],
    brand: &["vendor"],
    in_stock: &["@available"],
    quantity: &["count", "quantity"],
    vendor_code: &["vendorCode"],
    attributes: &["param"],
};

static GOOGLE: FieldMapping = FieldMapping {
    records: &["item", "entry"],
    id: &["g:id", "id"],
    name: &["g:title", "title"],
    name_parts: &[],
    description: &["g:description", "description"],
    url: &["g:link", "link"],
    images: &["g:image_link", "g:additional_image_link"],
    price: &["g:price", "price"],
    sale_price: &["g:sale_price"],
    old_price: &[],
    currency: &[],
    category: &["g:product_type", "g:google_product_category"],
    brand: &["g:brand", "brand"],
    in_stock: &["g:availability", "availability"],
    quantity: &["g:quantity"],
    vendor_code: &["g:mpn", "g:gtin"],
    attributes: &[],
};

static JSON: FieldMapping = FieldMapping {
    records: &["products", "items", "offers", "data"],
    id: &["id", "product_id", "sku"],
    name: &["name", "title"],
    name_parts: &[],
    description: &["description"],
    url: &["url", "link"],
    images: &["image", "images", "picture", "pictures", "image_url"],
    price: &["price"],
    sale_price: &["sale_price"],
    old_price: &["old_price", "oldprice", "compare_at_price"],
    currency: &["currency", "currencyId"],
    category: &["category", "category_path"],
    brand: &["brand", "vendor"],
    in_stock: &["in_stock", "available", "availability"],
    quantity: &["quantity", "stock", "count"],
    vendor_code: &["vendor_code", "vendorCode", "article"],
    attributes: &["attributes", "params"],
};

impl FeedFormat {
    pub fn mapping(self) -> &'static FieldMapping {
        match self {
            FeedFormat::Yml => &YML,
            FeedFormat::Google => &GOOGLE,
            FeedFormat::Json | FeedFormat::Jsonl => &JSON,
        }
    }

    pub fn is_xml(self) -> bool {
        matches!(self, FeedFormat::Yml | FeedFormat::Google)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedFormat::Yml => "yml",
            FeedFormat::Google => "google",
            FeedFormat::Json => "json",
            FeedFormat::Jsonl => "jsonl",
        }
    }

    /// Guess from a file extension; `.xml` is taken as YML.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "yml" | "xml" => Some(FeedFormat::Yml),
            "json" => Some(FeedFormat::Json),
            "jsonl" | "ndjson" => Some(FeedFormat::Jsonl),
            _ => None,
        }
    }
}

impl FromStr for FeedFormat {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yml" | "yandex" => Ok(FeedFormat::Yml),
            "google" | "gmc" | "merchant" => Ok(FeedFormat::Google),
            "json" => Ok(FeedFormat::Json),
            "jsonl" | "ndjson" => Ok(FeedFormat::Jsonl),
            _ => Err(FeedError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
