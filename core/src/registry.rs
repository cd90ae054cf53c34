//! Per-project state: the live snapshot pointer, the writer lock and the usage counters.

use crate::config::EngineConfig;
use crate::snapshot::IndexSnapshot;
use crate::trie::{SuggestionPayload, SuggestionTrie};
use crate::DocId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Days of per-query history kept for `popular`.
pub const WINDOW_DAYS: usize = 30;

const SECONDS_PER_DAY: i64 = 86_400;

pub fn today() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp().div_euclid(SECONDS_PER_DAY)
}

/// Day number in the high 32 bits, that day's count in the low 32 bits, so a day flip and
/// the increments around it are a single atomic word update.
#[derive(Default)]
struct DayBucket(AtomicU64);

impl DayBucket {
    fn unpack(word: u64) -> (i64, u64) {
        ((word >> 32) as i64, word & u64::from(u32::MAX))
    }

    fn pack(day: i64, count: u64) -> u64 {
        ((day as u64) << 32) | count.min(u64::from(u32::MAX))
    }

    fn increment(&self, day: i64) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
            let (seen, count) = Self::unpack(word);
            match seen.cmp(&day) {
                std::cmp::Ordering::Equal => Some(Self::pack(day, count + 1)),
                std::cmp::Ordering::Less => Some(Self::pack(day, 1)),
                // a newer day already owns the slot
                std::cmp::Ordering::Greater => None,
            }
        });
    }

    fn load(&self) -> (i64, u64) {
        Self::unpack(self.0.load(Ordering::Acquire))
    }
}

/// Lock-free search counter for one normalized query: an all-time total, a ring of daily
/// buckets and a decaying suggestion popularity. A bucket is recycled when a new day lands on
/// its slot.
pub struct QueryStats {
    total: AtomicU64,
    days: [DayBucket; WINDOW_DAYS],
    /// `f64` bits.
    popularity: AtomicU64,
}

impl Default for QueryStats {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            days: std::array::from_fn(|_| DayBucket::default()),
            popularity: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl QueryStats {
    pub fn record(&self, day: i64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.update_popularity(|p| p + 1.0);
        self.days[day.rem_euclid(WINDOW_DAYS as i64) as usize].increment(day);
    }

    /// Suggestion weight: one per search, scaled down by every decay step.
    pub fn popularity(&self) -> f64 {
        f64::from_bits(self.popularity.load(Ordering::Acquire))
    }

    pub fn decay(&self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        self.update_popularity(|p| p * factor);
    }

    fn update_popularity(&self, f: impl Fn(f64) -> f64) {
        let _ = self
            .popularity
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| Some(f(f64::from_bits(bits)).to_bits()));
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Searches in the `days` days ending with `today`, or all-time when `days` is `None`.
    pub fn count(&self, days: Option<i64>, today: i64) -> u64 {
        let Some(days) = days else { return self.total() };
        let first = today - days + 1;
        self.days
            .iter()
            .map(DayBucket::load)
            .filter(|(d, _)| *d >= first && *d <= today)
            .map(|(_, count)| count)
            .sum()
    }
}

/// One tenant's index and usage state.
pub struct Project {
    id: String,
    live: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
    queries: DashMap<String, QueryStats>,
    /// Every query text ever recorded. Written once per new query; ranking reads `queries`.
    query_trie: RwLock<SuggestionTrie>,
    clicks: DashMap<DocId, AtomicU64>,
    delta_generation: AtomicU64,
    /// Bumped after every change to live documents, so a reader can tell its results may be stale.
    epoch: AtomicU64,
}

impl Project {
    pub fn new(id: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            id: id.into(),
            live: RwLock::new(Arc::new(IndexSnapshot::empty(config))),
            writer: Mutex::new(()),
            queries: DashMap::new(),
            query_trie: RwLock::new(SuggestionTrie::new(config.suggest.max_visit)),
            clicks: DashMap::new(),
            delta_generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The live snapshot. Holders keep reading it even after a newer one is published.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.live.read().clone()
    }

    /// Replace the live snapshot, returning the one it replaced.
    pub fn publish(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let next = Arc::new(snapshot);
        std::mem::replace(&mut *self.live.write(), next)
    }

    /// Exclusive right to mutate this project's index, waiting up to `wait`.
    pub fn lock_writer(&self, wait: Duration) -> Option<MutexGuard<'_, ()>> {
        self.writer.try_lock_for(wait)
    }

    pub fn record_query(&self, canonical: &str, day: i64) {
        if canonical.is_empty() {
            return;
        }
        if let Some(stats) = self.queries.get(canonical) {
            stats.record(day);
            return;
        }
        let first_seen = match self.queries.entry(canonical.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().record(day);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(QueryStats::default()).record(day);
                true
            }
        };
        if first_seen {
            self.query_trie
                .write()
                .insert(canonical, SuggestionPayload::Query { text: canonical.to_string() }, 0.0);
        }
    }

    pub fn query_count(&self, canonical: &str) -> u64 {
        self.queries.get(canonical).map_or(0, |s| s.total())
    }

    /// `(query, count)` for every query searched inside the window, unordered.
    pub fn query_counts(&self, days: Option<i64>, today: i64) -> Vec<(String, u64)> {
        self.queries
            .iter()
            .map(|e| (e.key().clone(), e.value().count(days, today)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Recorded queries starting with `prefix`, most popular first (ties by text).
    pub fn suggest_queries(&self, prefix: &str, limit: usize) -> Vec<(String, f64)> {
        let texts = self.query_trie.read().search_prefix(prefix, usize::MAX);
        let mut found: Vec<(String, f64)> = texts
            .into_iter()
            .map(|s| {
                let popularity = self.queries.get(&s.text).map_or(0.0, |q| q.popularity());
                (s.text, popularity)
            })
            .collect();
        found.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        found.truncate(limit);
        found
    }

    pub fn decay_queries(&self, factor: f64) {
        for entry in self.queries.iter() {
            entry.value().decay(factor);
        }
    }

    pub fn record_click(&self, doc_id: &str) -> u64 {
        if let Some(counter) = self.clicks.get(doc_id) {
            return counter.fetch_add(1, Ordering::Relaxed) + 1;
        }
        self.clicks.entry(doc_id.to_string()).or_default().fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn popularity(&self, doc_id: &str) -> u64 {
        self.clicks.get(doc_id).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn delta_generation(&self) -> Option<u64> {
        match self.delta_generation.load(Ordering::Acquire) {
            0 => None,
            g => Some(g),
        }
    }

    pub fn set_delta_generation(&self, generation: u64) {
        self.delta_generation.fetch_max(generation, Ordering::AcqRel);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Call after the change is visible to readers and before evicting cache entries for it.
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

/// Owns every project. Projects are created on first publish and isolated from one another.
pub struct ProjectRegistry {
    config: Arc<EngineConfig>,
    projects: DashMap<String, Arc<Project>>,
}

impl ProjectRegistry {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config, projects: DashMap::new() }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Project>> {
        self.projects.get(id).map(|p| p.value().clone())
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Project> {
        if let Some(project) = self.get(id) {
            return project;
        }
        self.projects
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Project::new(id, &self.config)))
            .value()
            .clone()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.projects.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Apply one decay step to every project's query suggestions.
    pub fn decay_all(&self, factor: f64) {
        for entry in self.projects.iter() {
            entry.value().decay_queries(factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::tokenizer::Analyzer;

    #[test]
    fn query_stats_windows() {
        let stats = QueryStats::default();
        stats.record(100);
        stats.record(100);
        stats.record(95);
        stats.record(60);
        assert_eq!(stats.total(), 4);
        assert_eq!(stats.count(Some(1), 100), 2);
        assert_eq!(stats.count(Some(7), 100), 3);
        assert_eq!(stats.count(Some(30), 100), 3);
        assert_eq!(stats.count(None, 100), 4);
    }

    #[test]
    fn buckets_recycle_after_the_window() {
        let stats = QueryStats::default();
        stats.record(10);
        stats.record(10 + WINDOW_DAYS as i64);
        assert_eq!(stats.count(Some(1), 10 + WINDOW_DAYS as i64), 1);
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn concurrent_counters_do_not_lose_increments() {
        let project = Arc::new(Project::new("p", &EngineConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let project = project.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        project.record_click("A");
                        project.record_query("nike", 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(project.popularity("A"), 4000);
        assert_eq!(project.query_count("nike"), 4000);
    }

    #[test]
    fn day_flip_keeps_concurrent_increments() {
        let stats = Arc::new(QueryStats::default());
        for _ in 0..3 {
            stats.record(10);
        }
        let next = 10 + WINDOW_DAYS as i64;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        stats.record(next);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.count(Some(1), next), 4000);
        assert_eq!(stats.total(), 4003);
    }

    #[test]
    fn query_suggestions_rank_by_decaying_counters() {
        let project = Project::new("p", &EngineConfig::default());
        for _ in 0..3 {
            project.record_query("кроссовки", 1);
        }
        project.record_query("кроссовки детские", 1);
        project.record_query("куртка", 1);

        let found = project.suggest_queries("кро", 10);
        assert_eq!(found, vec![("кроссовки".to_string(), 3.0), ("кроссовки детские".to_string(), 1.0)]);
        assert_eq!(project.query_trie.read().len(), 3);

        project.decay_queries(0.5);
        let found = project.suggest_queries("кро", 1);
        assert_eq!(found, vec![("кроссовки".to_string(), 1.5)]);
        assert_eq!(project.query_count("кроссовки"), 3);
    }

    #[test]
    fn publish_swaps_whole_snapshots() {
        let config = EngineConfig::default();
        let project = Project::new("p", &config);
        let held = project.snapshot();
        let next = IndexSnapshot::build(1, vec![Document::new("A", "Nike", "/a")], &Analyzer::default(), &config);
        let previous = project.publish(next);
        assert_eq!(previous.generation(), 0);
        assert!(held.is_empty());
        assert!(project.snapshot().contains("A"));
    }

    #[test]
    fn delta_generation_only_moves_forward() {
        let project = Project::new("p", &EngineConfig::default());
        assert_eq!(project.delta_generation(), None);
        project.set_delta_generation(5);
        project.set_delta_generation(3);
        assert_eq!(project.delta_generation(), Some(5));
    }

    #[test]
    fn registry_isolates_projects() {
        let registry = ProjectRegistry::new(Arc::new(EngineConfig::default()));
        let a = registry.get_or_create("a");
        registry.get_or_create("b");
        a.record_query("nike", 1);
        assert_eq!(registry.get("b").unwrap().query_count("nike"), 0);
        assert_eq!(registry.ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
