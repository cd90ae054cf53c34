//! Catalog search core: text analysis, index structures, ranking, caching and the query engine.

pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod ngram;
pub mod persist;
pub mod query;
pub mod ranker;
pub mod registry;
pub mod snapshot;
pub mod tokenizer;
pub mod trie;

/// External product identifier, as given by the feed.
pub type DocId = String;

pub use cache::{CacheKey, CacheScope, CachedResult, MemoryCache, ResultCache};
pub use config::EngineConfig;
pub use document::{Document, StockUpdate};
pub use engine::{DeltaOutcome, ProjectStats, PublishOutcome, SearchEngine};
pub use error::{CacheError, EngineError, StoreError};
pub use persist::SnapshotStore;
pub use query::{PopularPeriod, PopularResponse, SearchRequest, SearchResponse, SuggestResponse};
pub use ranker::{Filters, SortOrder};
