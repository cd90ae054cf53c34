use shop_core::cache::{CacheKey, CachedResult, MemoryCache, ResultCache};
use shop_core::query::PopularPeriod;
use shop_core::{
    CacheError, Document, EngineConfig, EngineError, Filters, SearchEngine, SearchRequest, SnapshotStore, SortOrder,
    StockUpdate,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

const PROJECT: &str = "shop";

fn sneakers() -> Vec<Document> {
    vec![
        Document::new("A", "Nike Air Max 90", "/p/a")
            .with_price(12990.0)
            .with_brand("Nike")
            .with_category("Обувь / Кроссовки"),
        Document::new("B", "Nike Air Max 95", "/p/b")
            .with_price(14990.0)
            .with_brand("Nike")
            .with_category("Обувь / Кроссовки"),
        Document::new("C", "Adidas Ultraboost", "/p/c")
            .with_price(17990.0)
            .with_brand("Adidas")
            .with_category("Обувь / Кроссовки"),
        Document::new("D", "Кроссовки беговые", "/p/d")
            .with_price(4990.0)
            .with_category("Обувь / Кроссовки"),
        Document::new("E", "Nike Cap", "/p/e")
            .with_price(1990.0)
            .with_brand("Nike")
            .with_category("Аксессуары / Кепки"),
    ]
}

fn engine_with(config: EngineConfig, docs: Vec<Document>) -> SearchEngine {
    let engine = SearchEngine::new(config);
    engine.publish(PROJECT, docs).unwrap();
    engine
}

fn engine() -> SearchEngine {
    engine_with(EngineConfig::default(), sneakers())
}

fn ids(engine: &SearchEngine, query: &str) -> Vec<String> {
    let response = engine.search(PROJECT, &SearchRequest::new(query)).unwrap();
    response.items.into_iter().map(|i| i.id).collect()
}

fn stock(id: &str, in_stock: bool) -> StockUpdate {
    StockUpdate { id: id.into(), in_stock: Some(in_stock), ..Default::default() }
}

#[test]
fn in_stock_product_ranks_first() {
    let docs = vec![
        Document::new("A", "Nike Air Max 90", "/a").with_price(12990.0),
        Document::new("B", "Nike Air Max 95", "/b").with_price(14990.0).with_stock(false),
    ];
    let engine = engine_with(EngineConfig::default(), docs);
    let response = engine.search(PROJECT, &SearchRequest::new("air max")).unwrap();
    assert_eq!(response.total, 2);
    assert_eq!(response.items[0].id, "A");
    assert_eq!(response.items[1].id, "B");
    assert!(response.items[0].score > response.items[1].score);
    assert!(!response.query_corrected);
    assert_eq!(response.items[0].highlight, "Nike <em>Air</em> <em>Max</em> 90");
}

#[test]
fn typo_is_corrected_through_ngrams() {
    let docs = vec![
        Document::new("A", "Nike Air Max 90", "/a").with_price(12990.0),
        Document::new("B", "Nike Air Max 95", "/b").with_price(14990.0).with_stock(false),
    ];
    let engine = engine_with(EngineConfig::default(), docs);
    let exact = engine.search(PROJECT, &SearchRequest::new("air max")).unwrap();
    let typo = engine.search(PROJECT, &SearchRequest::new("air mx")).unwrap();

    let exact_ids: Vec<_> = exact.items.iter().map(|i| &i.id).collect();
    let typo_ids: Vec<_> = typo.items.iter().map(|i| &i.id).collect();
    assert_eq!(exact_ids, typo_ids);
    assert!(typo.query_corrected);
    assert_eq!(typo.corrected_query.as_deref(), Some("air max"));
}

#[test]
fn filters_emptying_the_result_do_not_rewrite_known_words() {
    let docs = vec![
        Document::new("A", "Nike Air Max 90", "/a").with_price(12990.0),
        Document::new("C", "Nikon camera", "/c").with_price(100.0),
    ];
    let engine = engine_with(EngineConfig::default(), docs);
    let filters = Filters { price_max: Some(500.0), ..Default::default() };
    let response = engine.search(PROJECT, &SearchRequest::new("nike").with_filters(filters)).unwrap();
    assert!(response.items.is_empty());
    assert_eq!(response.total, 0);
    assert!(!response.query_corrected);
    assert_eq!(response.corrected_query, None);
}

#[test]
fn frequent_queries_suggest_first() {
    let engine = engine();
    for _ in 0..5 {
        engine.search(PROJECT, &SearchRequest::new("кроссовки")).unwrap();
    }
    engine.search(PROJECT, &SearchRequest::new("кроссовки детские")).unwrap();

    let response = engine.suggest(PROJECT, "кро", None).unwrap();
    let texts: Vec<&str> = response.queries.iter().map(|q| q.text.as_str()).collect();
    assert_eq!(texts, vec!["кроссовки", "кроссовки детские"]);
    assert_eq!(response.queries[0].count, 5);
    assert!(response.queries[0].highlight.starts_with("<em>кро</em>"));
}

#[test]
fn delta_out_of_stock_demotes_without_reindexing() {
    let docs = vec![
        Document::new("A", "Nike Air Max 90", "/a").with_price(12990.0),
        Document::new("B", "Nike Air Max 95", "/b").with_price(14990.0),
    ];
    let engine = engine_with(EngineConfig::default(), docs);
    for _ in 0..10 {
        engine.record_click(PROJECT, "B").unwrap();
    }
    assert_eq!(ids(&engine, "air max"), vec!["B", "A"]);

    let project = engine.registry().get(PROJECT).unwrap();
    let before = project.snapshot().inverted().clone();
    let outcome = engine.apply_updates(PROJECT, None, &[stock("B", false)]).unwrap();
    assert_eq!(outcome.updated, 1);

    assert_eq!(ids(&engine, "air max"), vec!["A", "B"]);
    assert_eq!(project.snapshot().inverted(), &before);
}

#[test]
fn delta_evicts_only_dependent_cache_entries() {
    let cache = Arc::new(MemoryCache::new());
    let engine = SearchEngine::new(EngineConfig::default()).with_cache(cache.clone());
    engine.publish(PROJECT, sneakers()).unwrap();

    engine.search(PROJECT, &SearchRequest::new("air max")).unwrap();
    engine.search(PROJECT, &SearchRequest::new("ultraboost")).unwrap();
    assert_eq!(cache.len(), 2);

    let update = StockUpdate { id: "B".into(), price: Some(9990.0), ..Default::default() };
    engine.apply_updates(PROJECT, None, &[update]).unwrap();

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.dependents(PROJECT, "B"), 0);
    assert_eq!(cache.dependents(PROJECT, "C"), 1);

    let fresh = engine.search(PROJECT, &SearchRequest::new("air max")).unwrap();
    let b = fresh.items.iter().find(|i| i.id == "B").unwrap();
    assert_eq!(b.price, 9990.0);
}

#[test]
fn readers_never_see_a_mixed_rebuild() {
    let mut config = EngineConfig::default();
    config.cache.enabled = false;
    config.query.timeout_ms = 60_000;
    let alpha: Vec<Document> = (0..40).map(|i| Document::new(format!("alpha-{i}"), format!("Nike Alpha {i}"), "/a")).collect();
    let beta: Vec<Document> = (0..40).map(|i| Document::new(format!("beta-{i}"), format!("Nike Beta {i}"), "/b")).collect();
    let engine = engine_with(config, alpha.clone());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let response = engine.search(PROJECT, &SearchRequest::new("nike").with_limit(100)).unwrap();
                    assert_eq!(response.total, 40);
                    let alphas = response.items.iter().filter(|i| i.id.starts_with("alpha")).count();
                    assert!(alphas == 0 || alphas == 40, "mixed generations: {alphas} alpha items");
                }
            });
        }
        for round in 0..10 {
            let docs = if round % 2 == 0 { beta.clone() } else { alpha.clone() };
            engine.publish(PROJECT, docs).unwrap();
        }
    });
}

#[test]
fn filters_sorting_and_facets() {
    let engine = engine();
    let request = SearchRequest::new("nike").with_sort(SortOrder::PriceAsc);
    let response = engine.search(PROJECT, &request).unwrap();
    let ids: Vec<&str> = response.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["E", "A", "B"]);
    assert_eq!(response.facets.brands[0].value, "Nike");
    assert_eq!(response.facets.brands[0].count, 3);

    let filters = Filters { category: Some("кроссовки".into()), price_max: Some(13000.0), ..Default::default() };
    let response = engine.search(PROJECT, &SearchRequest::new("nike").with_filters(filters)).unwrap();
    assert_eq!(response.total, 1);
    assert_eq!(response.items[0].id, "A");
}

#[test]
fn pagination_slices_the_sorted_list() {
    let engine = engine();
    let all = engine.search(PROJECT, &SearchRequest::new("nike").with_sort(SortOrder::PriceAsc)).unwrap();
    let page = engine
        .search(PROJECT, &SearchRequest::new("nike").with_sort(SortOrder::PriceAsc).with_limit(1).with_offset(1))
        .unwrap();
    assert_eq!(page.total, all.total);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, all.items[1].id);
}

#[test]
fn expired_deadline_returns_partial_results() {
    let mut config = EngineConfig::default();
    config.query.timeout_ms = 0;
    let engine = engine_with(config, sneakers());
    let response = engine.search(PROJECT, &SearchRequest::new("air max")).unwrap();
    assert!(response.partial);
}

struct DownCache;

impl ResultCache for DownCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CachedResult>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn put(&self, _: CacheKey, _: CachedResult, _: &[String], _: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn invalidate_for_document(&self, _: &str, _: &str) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn invalidate_project(&self, _: &str) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

#[test]
fn unavailable_cache_degrades_to_the_index() {
    let engine = SearchEngine::new(EngineConfig::default()).with_cache(Arc::new(DownCache));
    engine.publish(PROJECT, sneakers()).unwrap();
    assert_eq!(ids(&engine, "ultraboost"), vec!["C"]);
    let outcome = engine.apply_updates(PROJECT, None, &[stock("C", false)]).unwrap();
    assert_eq!(outcome.updated, 1);
    assert!(!engine.suggest(PROJECT, "ad", None).unwrap().products.is_empty());
}

#[test]
fn suggest_returns_products_and_categories() {
    let engine = engine();
    let response = engine.suggest(PROJECT, "nik", None).unwrap();
    let products: Vec<&str> = response.products.iter().map(|p| p.id.as_str()).collect();
    assert!(products.contains(&"A") && products.contains(&"B"));
    assert!(products.len() <= 4);

    let response = engine.suggest(PROJECT, "кросс", None).unwrap();
    assert_eq!(response.categories[0].name, "Обувь / Кроссовки");
    assert_eq!(response.categories[0].count, 4);
    assert_eq!(response.categories[0].url, "/category/кроссовки");

    assert_eq!(engine.suggest(PROJECT, "n", None).unwrap(), Default::default());
}

#[test]
fn popular_counts_first_page_searches() {
    let engine = engine();
    for _ in 0..3 {
        engine.search(PROJECT, &SearchRequest::new("Nike")).unwrap();
    }
    engine.search(PROJECT, &SearchRequest::new("adidas")).unwrap();
    engine.search(PROJECT, &SearchRequest::new("adidas").with_offset(20)).unwrap();
    engine.search(PROJECT, &SearchRequest::new("zzzzqqq")).unwrap();

    let popular = engine.popular(PROJECT, 10, PopularPeriod::Week).unwrap();
    let pairs: Vec<(&str, u64)> = popular.queries.iter().map(|q| (q.text.as_str(), q.count)).collect();
    assert_eq!(pairs, vec![("nike", 3), ("adidas", 1)]);
    assert_eq!(engine.popular(PROJECT, 1, PopularPeriod::All).unwrap().queries.len(), 1);
}

#[test]
fn similar_stays_in_category_and_price_band() {
    let engine = engine();
    let items = engine.similar(PROJECT, "A", 5).unwrap().unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["B"]);
    assert!(engine.similar(PROJECT, "missing", 5).unwrap().is_none());
}

#[test]
fn clicks_and_unknown_projects() {
    let engine = engine();
    assert!(engine.record_click(PROJECT, "A").unwrap());
    assert!(!engine.record_click(PROJECT, "nope").unwrap());
    assert!(matches!(
        engine.search("other", &SearchRequest::new("nike")),
        Err(EngineError::ProjectNotFound(_))
    ));
}

#[test]
fn rebuild_drops_absent_documents() {
    let engine = engine();
    let outcome = engine.publish(PROJECT, sneakers().into_iter().take(2).collect()).unwrap();
    assert_eq!(outcome.generation, 2);
    assert_eq!(outcome.removed, 3);
    assert!(engine.document(PROJECT, "C").unwrap().is_none());
    assert!(ids(&engine, "ultraboost").is_empty());
}

#[test]
fn stale_deltas_are_ignored() {
    let engine = engine();
    engine.apply_updates(PROJECT, Some(200), &[stock("A", false)]).unwrap();
    let outcome = engine.apply_updates(PROJECT, Some(100), &[stock("A", true)]).unwrap();
    assert!(outcome.stale);
    assert!(!engine.document(PROJECT, "A").unwrap().unwrap().in_stock);

    let outcome = engine.apply_updates(PROJECT, Some(300), &[stock("missing", true)]).unwrap();
    assert_eq!(outcome.skipped, 1);
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = SnapshotStore::open(dir.path()).unwrap();
        let engine = SearchEngine::new(EngineConfig::default()).with_store(store);
        engine.publish(PROJECT, sneakers()).unwrap();
        engine.publish(PROJECT, sneakers()).unwrap();
        engine.apply_updates(PROJECT, Some(42), &[stock("B", false)]).unwrap();
        engine.store().unwrap().flush().unwrap();
    }
    let store = SnapshotStore::open(dir.path()).unwrap();
    let engine = SearchEngine::new(EngineConfig::default()).with_store(store);
    assert_eq!(engine.reload().unwrap(), 1);

    let stats = engine.stats(PROJECT).unwrap();
    assert_eq!(stats.generation, 2);
    assert_eq!(stats.documents, 5);
    assert_eq!(stats.delta_generation, Some(42));
    assert!(!engine.document(PROJECT, "B").unwrap().unwrap().in_stock);
    assert_eq!(ids(&engine, "ultraboost"), vec!["C"]);
}

/// Applies a price change to "A" the first time a result is stored, i.e. after the search has
/// read the documents but before its result lands in the cache.
struct RacingCache {
    inner: MemoryCache,
    engine: OnceLock<Weak<SearchEngine>>,
    fired: AtomicBool,
}

impl ResultCache for RacingCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>, CacheError> {
        self.inner.get(key)
    }

    fn put(&self, key: CacheKey, value: CachedResult, depends_on: &[String], ttl: Duration) -> Result<(), CacheError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                let update = StockUpdate { id: "A".into(), price: Some(1.0), ..Default::default() };
                engine.apply_updates(PROJECT, None, &[update]).unwrap();
            }
        }
        self.inner.put(key, value, depends_on, ttl)
    }

    fn invalidate_for_document(&self, project: &str, doc_id: &str) -> Result<usize, CacheError> {
        self.inner.invalidate_for_document(project, doc_id)
    }

    fn invalidate_project(&self, project: &str) -> Result<usize, CacheError> {
        self.inner.invalidate_project(project)
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.inner.remove(key)
    }
}

#[test]
fn delta_landing_mid_search_is_not_served_from_cache() {
    let cache = Arc::new(RacingCache { inner: MemoryCache::new(), engine: OnceLock::new(), fired: AtomicBool::new(false) });
    let engine = Arc::new(SearchEngine::new(EngineConfig::default()).with_cache(cache.clone()));
    let _ = cache.engine.set(Arc::downgrade(&engine));
    engine.publish(PROJECT, sneakers()).unwrap();

    let first = engine.search(PROJECT, &SearchRequest::new("ultraboost nike")).unwrap();
    assert!(first.items.iter().any(|i| i.id == "A"));
    assert!(cache.inner.is_empty());

    let second = engine.search(PROJECT, &SearchRequest::new("ultraboost nike")).unwrap();
    let a = second.items.iter().find(|i| i.id == "A").unwrap();
    assert_eq!(a.price, 1.0);
    assert_eq!(engine.document(PROJECT, "A").unwrap().unwrap().price, 1.0);
}

#[test]
fn every_index_write_moves_the_epoch() {
    let cache = Arc::new(MemoryCache::new());
    let engine = SearchEngine::new(EngineConfig::default()).with_cache(cache.clone());
    engine.publish(PROJECT, sneakers()).unwrap();
    let project = engine.registry().get(PROJECT).unwrap();

    let before = project.epoch();
    engine.publish(PROJECT, sneakers()).unwrap();
    assert!(project.epoch() > before);
    engine.apply_updates(PROJECT, None, &[stock("A", false)]).unwrap();
    assert!(project.epoch() > before + 1);
    assert!(cache.is_empty());
}
