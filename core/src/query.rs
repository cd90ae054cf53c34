//! Request and response shapes of the query contract.

use crate::ranker::{Filters, SortOrder};
use crate::DocId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: String,
    /// Page size; the engine's default applies when unset and the maximum always caps it.
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: SortOrder,
    pub filters: Filters,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: DocId,
    pub name: String,
    pub url: String,
    pub image: Option<String>,
    pub price: f64,
    pub old_price: Option<f64>,
    pub in_stock: bool,
    pub category: Option<String>,
    pub brand: Option<String>,
    /// Product name with matched words wrapped in `<em>`.
    pub highlight: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facets {
    pub categories: Vec<FacetCount>,
    pub brands: Vec<FacetCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,
    pub items: Vec<SearchItem>,
    pub took_ms: u64,
    pub query_corrected: bool,
    pub corrected_query: Option<String>,
    /// The query deadline expired; `items` holds whatever scoring had completed.
    pub partial: bool,
    pub facets: Facets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySuggestion {
    pub text: String,
    pub count: u64,
    pub highlight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySuggestion {
    pub name: String,
    pub count: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSuggestion {
    pub id: DocId,
    pub name: String,
    pub image: Option<String>,
    pub price: f64,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub queries: Vec<QuerySuggestion>,
    pub categories: Vec<CategorySuggestion>,
    pub products: Vec<ProductSuggestion>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopularPeriod {
    Day,
    #[default]
    Week,
    Month,
    All,
}

impl PopularPeriod {
    /// Number of trailing days counted, `None` for all-time.
    pub fn days(self) -> Option<i64> {
        match self {
            PopularPeriod::Day => Some(1),
            PopularPeriod::Week => Some(7),
            PopularPeriod::Month => Some(30),
            PopularPeriod::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularQuery {
    pub text: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularResponse {
    pub queries: Vec<PopularQuery>,
}
