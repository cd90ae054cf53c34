//! Query engine: the read path (search, suggest, popular, similar) and the two write paths
//! (whole-snapshot publish, in-place stock updates) over the per-project registry.

use crate::cache::{CacheKey, CacheScope, CachedResult, MemoryCache, ResultCache};
use crate::config::EngineConfig;
use crate::document::{Document, StockUpdate};
use crate::error::EngineError;
use crate::ngram::Candidate;
use crate::persist::SnapshotStore;
use crate::query::{
    CategorySuggestion, FacetCount, Facets, PopularPeriod, PopularQuery, PopularResponse, ProductSuggestion,
    QuerySuggestion, SearchItem, SearchRequest, SearchResponse, SuggestResponse,
};
use crate::ranker::{bm25, highlight, idf, Filters, Ranked, Ranker, Signals, SortOrder};
use crate::registry::{today, Project, ProjectRegistry};
use crate::snapshot::IndexSnapshot;
use crate::tokenizer::{normalize, Analyzer};
use crate::trie::SuggestionPayload;
use crate::DocId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const WRITER_WAIT: Duration = Duration::from_secs(30);
const FACET_LIMIT: usize = 10;
const SIMILAR_PRICE_BAND: f64 = 0.3;
/// Deadline is checked once per this many candidate documents.
const DEADLINE_STRIDE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub generation: u64,
    pub documents: usize,
    /// Live documents absent from the new snapshot.
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeltaOutcome {
    pub updated: usize,
    pub unchanged: usize,
    /// Updates naming documents the live index does not hold.
    pub skipped: usize,
    /// The whole run was older than the last applied delta and was ignored.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectStats {
    pub project: String,
    pub generation: u64,
    pub built_at: String,
    pub documents: usize,
    pub tokens: usize,
    pub ngrams: usize,
    pub categories: usize,
    pub delta_generation: Option<u64>,
}

#[derive(Default)]
struct Matched {
    scores: HashMap<DocId, f32>,
    /// (typed token, replacement) for every token answered through the n-gram index.
    corrections: Vec<(String, String)>,
    partial: bool,
}

#[derive(Default)]
struct Ranking {
    ranked: Vec<Ranked>,
    /// Every text-matched document, before filtering. Cached results depend on all of them.
    candidates: Vec<DocId>,
    corrections: Vec<(String, String)>,
    facets: Facets,
    partial: bool,
}

pub struct SearchEngine {
    config: Arc<EngineConfig>,
    analyzer: Analyzer,
    ranker: Ranker,
    registry: ProjectRegistry,
    cache: Option<Arc<dyn ResultCache>>,
    store: Option<SnapshotStore>,
}

impl SearchEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let cache = if config.cache.enabled {
            Some(Arc::new(MemoryCache::new()) as Arc<dyn ResultCache>)
        } else {
            None
        };
        Self {
            analyzer: Analyzer::new(&config.analyzer),
            ranker: Ranker::new(config.ranking.clone()),
            registry: ProjectRegistry::new(config.clone()),
            cache,
            store: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn store(&self) -> Option<&SnapshotStore> {
        self.store.as_ref()
    }

    fn project(&self, id: &str) -> Result<Arc<Project>, EngineError> {
        self.registry.get(id).ok_or_else(|| EngineError::ProjectNotFound(id.to_string()))
    }

    /// Serve every project the store holds a live generation for. Returns how many were loaded.
    pub fn reload(&self) -> Result<usize, EngineError> {
        let Some(store) = &self.store else { return Ok(0) };
        let mut loaded = 0;
        for id in store.projects()? {
            let Some(snapshot) = store.load(&id, &self.config)? else { continue };
            let project = self.registry.get_or_create(&id);
            project.publish(snapshot);
            if let Some(generation) = store.delta_generation(&id)? {
                project.set_delta_generation(generation);
            }
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Build a new generation from `documents` and make it live in one swap. Readers see
    /// either the old or the new generation, never a mix. On error the live index is untouched.
    pub fn publish(&self, project_id: &str, documents: Vec<Document>) -> Result<PublishOutcome, EngineError> {
        let started = Instant::now();
        let project = self.registry.get_or_create(project_id);
        let _writer = project
            .lock_writer(WRITER_WAIT)
            .ok_or_else(|| EngineError::WriterBusy(project_id.to_string()))?;

        let current = project.snapshot();
        let generation = current.generation() + 1;
        let snapshot = IndexSnapshot::build(generation, documents, &self.analyzer, &self.config);
        let removed = current.document_ids().filter(|id| !snapshot.contains(id)).count();

        if let Some(store) = &self.store {
            // leftovers of an earlier attempt at the same generation
            store.drop_generation(project_id, generation)?;
            if let Err(err) = store.write_generation(project_id, &snapshot).and_then(|_| store.promote(project_id, generation)) {
                if let Err(cleanup) = store.drop_generation(project_id, generation) {
                    warn!(project = project_id, generation, error = %cleanup, "failed to drop unpublished generation");
                }
                return Err(err.into());
            }
        }

        let documents = snapshot.len();
        let previous = project.publish(snapshot);
        project.bump_epoch();
        if let Some(store) = &self.store {
            if previous.generation() > 0 {
                if let Err(err) = store.drop_generation(project_id, previous.generation()) {
                    warn!(project = project_id, generation = previous.generation(), error = %err, "failed to drop replaced generation");
                }
            }
        }
        self.evict_project(project_id);
        info!(
            project = project_id,
            generation,
            documents,
            removed,
            took_ms = started.elapsed().as_millis() as u64,
            "snapshot published"
        );
        Ok(PublishOutcome { generation, documents, removed })
    }

    /// Apply price/stock updates to live documents in place. Token structures are not touched;
    /// every changed document has its dependent cache entries evicted.
    pub fn apply_updates(
        &self,
        project_id: &str,
        generation: Option<u64>,
        updates: &[StockUpdate],
    ) -> Result<DeltaOutcome, EngineError> {
        let project = self.project(project_id)?;
        let _writer = project
            .lock_writer(WRITER_WAIT)
            .ok_or_else(|| EngineError::WriterBusy(project_id.to_string()))?;

        if let (Some(incoming), Some(applied)) = (generation, project.delta_generation()) {
            if incoming <= applied {
                info!(project = project_id, incoming, applied, "stale delta skipped");
                return Ok(DeltaOutcome { stale: true, ..Default::default() });
            }
        }

        let snapshot = project.snapshot();
        let mut outcome = DeltaOutcome::default();
        for update in updates {
            let changed = snapshot.update_document(&update.id, |doc| {
                doc.apply(update, &self.config.ranking).then(|| doc.clone())
            });
            match changed {
                None => outcome.skipped += 1,
                Some(None) => outcome.unchanged += 1,
                Some(Some(doc)) => {
                    outcome.updated += 1;
                    project.bump_epoch();
                    self.invalidate_document(project_id, &doc.id);
                    if let Some(store) = &self.store {
                        let length = snapshot.inverted().doc_length(&doc.id);
                        store.put_document(project_id, snapshot.generation(), &doc, length)?;
                    }
                }
            }
        }

        if let Some(generation) = generation {
            project.set_delta_generation(generation);
            if let Some(store) = &self.store {
                store.set_delta_generation(project_id, generation)?;
            }
        }
        info!(
            project = project_id,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "delta applied"
        );
        Ok(outcome)
    }

    pub fn search(&self, project_id: &str, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.query.timeout_ms);
        let project = self.project(project_id)?;
        let epoch = project.epoch();
        let canonical = normalize(&request.query);
        let limit = request.limit.unwrap_or(self.config.query.default_limit).clamp(1, self.config.query.max_limit);

        let key = CacheKey::new(
            project_id,
            CacheScope::Search,
            &format!("{canonical}|{limit}|{}|{:?}|{:?}", request.offset, request.sort, request.filters),
        );
        if let Some(CachedResult::Search(cached)) = self.cache_get(&key) {
            let mut response = (*cached).clone();
            response.took_ms = started.elapsed().as_millis() as u64;
            self.record_search(&project, &canonical, request.offset, response.total);
            return Ok(response);
        }

        let snapshot = project.snapshot();
        let ranking = self.run_query(&project, &snapshot, &canonical, &request.filters, request.sort, deadline);

        let mut terms: Vec<String> = canonical.split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect();
        terms.extend(ranking.corrections.iter().map(|(_, to)| to.clone()));
        let items: Vec<SearchItem> = ranking
            .ranked
            .iter()
            .skip(request.offset)
            .take(limit)
            .filter_map(|r| self.item(&snapshot, r, &terms))
            .collect();

        let response = SearchResponse {
            total: ranking.ranked.len(),
            items,
            took_ms: started.elapsed().as_millis() as u64,
            query_corrected: !ranking.corrections.is_empty(),
            corrected_query: self.corrected_query(&canonical, &ranking.corrections),
            partial: ranking.partial,
            facets: ranking.facets,
        };

        if response.partial {
            warn!(project = project_id, query = %canonical, "query deadline expired, returning partial results");
        } else {
            let ttl = if project.query_count(&canonical) >= self.config.cache.popular_threshold {
                self.config.cache.popular_ttl_secs
            } else {
                self.config.cache.search_ttl_secs
            };
            self.cache_put(&project, epoch, key, CachedResult::Search(Arc::new(response.clone())), &ranking.candidates, ttl);
        }
        self.record_search(&project, &canonical, request.offset, response.total);
        debug!(project = project_id, query = %canonical, total = response.total, took_ms = response.took_ms, "search");
        Ok(response)
    }

    fn record_search(&self, project: &Project, canonical: &str, offset: usize, total: usize) {
        if offset == 0 && total > 0 {
            project.record_query(canonical, today());
        }
    }

    pub fn suggest(&self, project_id: &str, prefix: &str, limit: Option<usize>) -> Result<SuggestResponse, EngineError> {
        let project = self.project(project_id)?;
        let epoch = project.epoch();
        let canonical = normalize(prefix);
        if canonical.chars().count() < self.config.suggest.min_prefix_chars {
            return Ok(SuggestResponse::default());
        }
        let limit = limit.unwrap_or(self.config.suggest.default_limit).clamp(1, self.config.query.max_limit);
        let key = CacheKey::new(project_id, CacheScope::Suggest, &format!("{canonical}|{limit}"));
        if let Some(CachedResult::Suggest(cached)) = self.cache_get(&key) {
            return Ok((*cached).clone());
        }

        let snapshot = project.snapshot();
        let highlight_terms = [canonical.clone()];
        let queries = project
            .suggest_queries(&canonical, limit)
            .into_iter()
            .map(|(text, _)| QuerySuggestion {
                count: project.query_count(&text),
                highlight: highlight(&text, &highlight_terms),
                text,
            })
            .collect();

        let mut categories: Vec<(&String, u32)> = snapshot
            .categories()
            .iter()
            .filter(|(name, _)| normalize(name).contains(&canonical))
            .map(|(name, count)| (name, *count))
            .collect();
        categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let categories = categories
            .into_iter()
            .take(self.config.suggest.categories_limit)
            .map(|(name, count)| CategorySuggestion { name: name.clone(), count, url: format!("/category/{}", slug(name)) })
            .collect();

        let wanted = self.config.suggest.products_limit;
        let mut product_ids: Vec<DocId> = Vec::with_capacity(wanted);
        for suggestion in snapshot.catalog().search_prefix(&canonical, wanted) {
            for payload in suggestion.payloads {
                if let SuggestionPayload::Product { id } = payload {
                    if product_ids.len() < wanted && !product_ids.contains(&id) {
                        product_ids.push(id);
                    }
                }
            }
        }
        if product_ids.len() < wanted {
            let deadline = Instant::now() + Duration::from_millis(self.config.query.timeout_ms);
            let ranking = self.run_query(&project, &snapshot, &canonical, &Filters::default(), SortOrder::Relevance, deadline);
            for ranked in ranking.ranked {
                if product_ids.len() >= wanted {
                    break;
                }
                if !product_ids.contains(&ranked.id) {
                    product_ids.push(ranked.id);
                }
            }
        }
        let products = product_ids
            .iter()
            .filter_map(|id| {
                snapshot.read_document(id, |doc| ProductSuggestion {
                    id: doc.id.clone(),
                    name: doc.name.clone(),
                    image: doc.image.clone(),
                    price: doc.price,
                    url: doc.url.clone(),
                })
            })
            .collect();

        let response = SuggestResponse { queries, categories, products };
        self.cache_put(
            &project,
            epoch,
            key,
            CachedResult::Suggest(Arc::new(response.clone())),
            &product_ids,
            self.config.cache.suggest_ttl_secs,
        );
        Ok(response)
    }

    pub fn popular(&self, project_id: &str, limit: usize, period: PopularPeriod) -> Result<PopularResponse, EngineError> {
        let project = self.project(project_id)?;
        let mut counts = project.query_counts(period.days(), today());
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(limit);
        Ok(PopularResponse { queries: counts.into_iter().map(|(text, count)| PopularQuery { text, count }).collect() })
    }

    /// Count a click on `doc_id`. Returns whether the document exists.
    pub fn record_click(&self, project_id: &str, doc_id: &str) -> Result<bool, EngineError> {
        let project = self.project(project_id)?;
        if !project.snapshot().contains(doc_id) {
            return Ok(false);
        }
        project.record_click(doc_id);
        Ok(true)
    }

    pub fn document(&self, project_id: &str, doc_id: &str) -> Result<Option<Document>, EngineError> {
        Ok(self.project(project_id)?.snapshot().document(doc_id))
    }

    /// Products of the same brand (or category) in the same category within ±30% of the price.
    /// `None` when `doc_id` is unknown.
    pub fn similar(&self, project_id: &str, doc_id: &str, limit: usize) -> Result<Option<Vec<SearchItem>>, EngineError> {
        let project = self.project(project_id)?;
        let snapshot = project.snapshot();
        let Some(doc) = snapshot.document(doc_id) else { return Ok(None) };

        let leaf = doc.category.as_deref().and_then(|c| c.rsplit(" / ").next());
        let query = doc.brand.as_deref().or(leaf).unwrap_or(&doc.name);
        let filters = Filters {
            category: doc.category.clone(),
            price_min: (doc.price > 0.0).then(|| doc.price * (1.0 - SIMILAR_PRICE_BAND)),
            price_max: (doc.price > 0.0).then(|| doc.price * (1.0 + SIMILAR_PRICE_BAND)),
            ..Default::default()
        };
        let deadline = Instant::now() + Duration::from_millis(self.config.query.timeout_ms);
        let ranking = self.run_query(&project, &snapshot, &normalize(query), &filters, SortOrder::Relevance, deadline);
        let items = ranking
            .ranked
            .iter()
            .filter(|r| r.id != doc_id)
            .take(limit)
            .filter_map(|r| self.item(&snapshot, r, &[]))
            .collect();
        Ok(Some(items))
    }

    pub fn stats(&self, project_id: &str) -> Result<ProjectStats, EngineError> {
        let project = self.project(project_id)?;
        let snapshot = project.snapshot();
        Ok(ProjectStats {
            project: project_id.to_string(),
            generation: snapshot.generation(),
            built_at: snapshot.built_at().to_string(),
            documents: snapshot.len(),
            tokens: snapshot.inverted().num_tokens(),
            ngrams: snapshot.ngrams().num_grams(),
            categories: snapshot.categories().len(),
            delta_generation: project.delta_generation(),
        })
    }

    /// One decay step for every project's query suggestions.
    pub fn decay_suggestions(&self) {
        self.registry.decay_all(self.config.suggest.decay_factor);
    }

    fn run_query(
        &self,
        project: &Project,
        snapshot: &IndexSnapshot,
        canonical: &str,
        filters: &Filters,
        sort: SortOrder,
        deadline: Instant,
    ) -> Ranking {
        let mut tokens: Vec<String> = Vec::new();
        for token in self.analyzer.tokenize(canonical) {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        if tokens.is_empty() {
            return Ranking::default();
        }

        let matched = self.match_tokens(snapshot, &tokens, deadline);
        let ranking = self.filter_and_rank(project, snapshot, matched, filters, sort, deadline);
        if ranking.partial || ranking.candidates.len() > self.config.query.near_zero_hits {
            return ranking;
        }

        // near-zero text matches: retry with every unindexed token swapped for its closest
        // indexed neighbour; indexed words stay as typed
        let retry: Vec<String> = tokens
            .iter()
            .map(|t| {
                if snapshot.inverted().contains_token(t) {
                    return t.clone();
                }
                snapshot
                    .ngrams()
                    .expand(t)
                    .into_iter()
                    .find(|c| snapshot.inverted().contains_token(&c.token))
                    .map_or_else(|| t.clone(), |c| c.token)
            })
            .collect();
        if retry == tokens {
            return ranking;
        }
        let matched = self.match_tokens(snapshot, &retry, deadline);
        let mut retried = self.filter_and_rank(project, snapshot, matched, filters, sort, deadline);
        if retried.candidates.len() <= ranking.candidates.len() {
            return ranking;
        }
        retried.corrections = tokens.into_iter().zip(retry).filter(|(from, to)| from != to).collect();
        retried
    }

    fn match_tokens(&self, snapshot: &IndexSnapshot, tokens: &[String], deadline: Instant) -> Matched {
        let mut matched = Matched::default();
        for token in tokens {
            if Instant::now() >= deadline {
                matched.partial = true;
                break;
            }
            if snapshot.inverted().contains_token(token) {
                self.accumulate(snapshot, token, 1.0, &mut matched.scores);
                continue;
            }
            let candidates = self.expansions(snapshot, token);
            if let Some(best) = candidates.first() {
                matched.corrections.push((token.clone(), best.token.clone()));
            }
            for candidate in &candidates {
                self.accumulate(snapshot, &candidate.token, candidate.similarity, &mut matched.scores);
            }
        }
        matched
    }

    fn expansions(&self, snapshot: &IndexSnapshot, token: &str) -> Vec<Candidate> {
        let ngram = &self.config.ngram;
        snapshot
            .ngrams()
            .expand(token)
            .into_iter()
            .filter(|c| c.similarity >= ngram.min_similarity && snapshot.inverted().contains_token(&c.token))
            .take(ngram.max_expansions)
            .collect()
    }

    fn accumulate(&self, snapshot: &IndexSnapshot, token: &str, factor: f32, scores: &mut HashMap<DocId, f32>) {
        let inverted = snapshot.inverted();
        let Some(postings) = inverted.lookup(token) else { return };
        let idf = idf(inverted.num_docs(), postings.len());
        let avg = inverted.avg_doc_length();
        let c = self.ranker.config();
        for (doc_id, tf) in postings {
            let score = bm25(*tf, idf, inverted.doc_length(doc_id) as f32, avg, c.k1, c.b);
            *scores.entry(doc_id.clone()).or_insert(0.0) += score * factor;
        }
    }

    fn filter_and_rank(
        &self,
        project: &Project,
        snapshot: &IndexSnapshot,
        matched: Matched,
        filters: &Filters,
        sort: SortOrder,
        deadline: Instant,
    ) -> Ranking {
        let mut partial = matched.partial;
        let mut signals = Vec::with_capacity(matched.scores.len());
        let mut categories: HashMap<String, usize> = HashMap::new();
        let mut brands: HashMap<String, usize> = HashMap::new();
        for (i, (doc_id, text)) in matched.scores.iter().enumerate() {
            if i % DEADLINE_STRIDE == DEADLINE_STRIDE - 1 && Instant::now() >= deadline {
                partial = true;
                break;
            }
            let popularity = project.popularity(doc_id) as f32;
            let kept = snapshot.read_document(doc_id, |doc| {
                if !filters.matches(doc) {
                    return None;
                }
                if let Some(c) = &doc.category {
                    *categories.entry(c.clone()).or_insert(0) += 1;
                }
                if let Some(b) = &doc.brand {
                    *brands.entry(b.clone()).or_insert(0) += 1;
                }
                Some(Signals::from_document(doc, *text, popularity))
            });
            if let Some(Some(s)) = kept {
                signals.push(s);
            }
        }
        Ranking {
            ranked: self.ranker.rank(signals, sort),
            candidates: matched.scores.into_keys().collect(),
            corrections: matched.corrections,
            facets: Facets { categories: top_counts(categories), brands: top_counts(brands) },
            partial,
        }
    }

    fn item(&self, snapshot: &IndexSnapshot, ranked: &Ranked, terms: &[String]) -> Option<SearchItem> {
        snapshot.read_document(&ranked.id, |doc| SearchItem {
            id: doc.id.clone(),
            name: doc.name.clone(),
            url: doc.url.clone(),
            image: doc.image.clone(),
            price: doc.price,
            old_price: doc.old_price,
            in_stock: doc.in_stock,
            category: doc.category.clone(),
            brand: doc.brand.clone(),
            highlight: highlight(&doc.name, terms),
            score: ranked.score,
        })
    }

    /// The canonical query with every corrected word replaced.
    fn corrected_query(&self, canonical: &str, corrections: &[(String, String)]) -> Option<String> {
        if corrections.is_empty() {
            return None;
        }
        let replaced: HashMap<&str, &str> = corrections.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let words: Vec<String> = canonical
            .split(' ')
            .map(|word| {
                let tokens = self.analyzer.tokenize(word);
                match tokens.as_slice() {
                    [token] => replaced.get(token.as_str()).map_or_else(|| word.to_string(), |t| t.to_string()),
                    _ => word.to_string(),
                }
            })
            .collect();
        let corrected = words.join(" ");
        (corrected != canonical).then_some(corrected)
    }

    fn cache_get(&self, key: &CacheKey) -> Option<CachedResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(key) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(error = %err, "cache read failed, serving from the index");
                None
            }
        }
    }

    /// Store a result computed from what the project held at `epoch`. If a write landed since,
    /// its invalidation may already have run, so the entry is taken back out.
    fn cache_put(
        &self,
        project: &Project,
        epoch: u64,
        key: CacheKey,
        value: CachedResult,
        depends_on: &[DocId],
        ttl_secs: u64,
    ) {
        let Some(cache) = &self.cache else { return };
        if project.epoch() != epoch {
            return;
        }
        if let Err(err) = cache.put(key.clone(), value, depends_on, Duration::from_secs(ttl_secs)) {
            warn!(error = %err, "cache write failed");
            return;
        }
        if project.epoch() != epoch {
            debug!(project = project.id(), "index changed while computing, dropping cached result");
            if let Err(err) = cache.remove(&key) {
                warn!(error = %err, "cache removal failed");
            }
        }
    }

    fn invalidate_document(&self, project: &str, doc_id: &str) {
        let Some(cache) = &self.cache else { return };
        match cache.invalidate_for_document(project, doc_id) {
            Ok(evicted) if evicted > 0 => debug!(project, doc_id, evicted, "cache entries invalidated"),
            Ok(_) => {}
            Err(err) => warn!(project, doc_id, error = %err, "cache invalidation failed"),
        }
    }

    fn evict_project(&self, project: &str) {
        let Some(cache) = &self.cache else { return };
        if let Err(err) = cache.invalidate_project(project) {
            warn!(project, error = %err, "cache eviction failed");
        }
    }
}

fn top_counts(counts: HashMap<String, usize>) -> Vec<FacetCount> {
    let mut out: Vec<FacetCount> = counts.into_iter().map(|(value, count)| FacetCount { value, count }).collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    out.truncate(FACET_LIMIT);
    out
}

/// URL slug of the last segment of a category path.
pub fn slug(category: &str) -> String {
    let leaf = category.rsplit(" / ").next().unwrap_or(category);
    normalize(leaf).replace(' ', "-")
}
