//! Result cache with a reverse index from document id to dependent keys.
//!
//! Every write records its key under each contributing document, and every eviction removes
//! the key from both maps, so the two directions never disagree.

use crate::error::CacheError;
use crate::query::{SearchResponse, SuggestResponse};
use crate::DocId;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    Search,
    Suggest,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project: String,
    pub scope: CacheScope,
    /// SHA-1 of the canonical request.
    pub digest: String,
}

impl CacheKey {
    pub fn new(project: &str, scope: CacheScope, canonical_request: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(canonical_request.as_bytes());
        Self { project: project.to_string(), scope, digest: format!("{:x}", hasher.finalize()) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    Search(Arc<SearchResponse>),
    Suggest(Arc<SuggestResponse>),
}

/// Memoizes query results. Implementations may be remote; callers treat every `Err` as a miss.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>, CacheError>;

    /// Store `value` and register `key` under every id in `depends_on`.
    fn put(&self, key: CacheKey, value: CachedResult, depends_on: &[DocId], ttl: Duration) -> Result<(), CacheError>;

    /// Evict every key that depended on `doc_id`. Returns the number evicted.
    fn invalidate_for_document(&self, project: &str, doc_id: &str) -> Result<usize, CacheError>;

    fn invalidate_project(&self, project: &str) -> Result<usize, CacheError>;

    /// Drop one key. Returns whether it was present. Caches without single-key removal fall
    /// back to evicting the whole project.
    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.invalidate_project(&key.project).map(|evicted| evicted > 0)
    }
}

struct Entry {
    value: CachedResult,
    inserted: Instant,
    ttl: Duration,
    depends_on: Vec<DocId>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.inserted.elapsed() >= self.ttl
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    reverse: HashMap<(String, DocId), HashSet<CacheKey>>,
}

impl Inner {
    fn evict(&mut self, key: &CacheKey) -> bool {
        let Some(entry) = self.entries.remove(key) else { return false };
        for doc_id in entry.depends_on {
            let reverse_key = (key.project.clone(), doc_id);
            let empty = match self.reverse.get_mut(&reverse_key) {
                Some(keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if empty {
                self.reverse.remove(&reverse_key);
            }
        }
        true
    }
}

/// In-process cache. One lock guards both maps so a write updates them together.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently registered under `doc_id`.
    pub fn dependents(&self, project: &str, doc_id: &str) -> usize {
        self.inner
            .lock()
            .reverse
            .get(&(project.to_string(), doc_id.to_string()))
            .map_or(0, HashSet::len)
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>, CacheError> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.evict(key);
        }
        Ok(None)
    }

    fn put(&self, key: CacheKey, value: CachedResult, depends_on: &[DocId], ttl: Duration) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        inner.evict(&key);
        for doc_id in depends_on {
            inner
                .reverse
                .entry((key.project.clone(), doc_id.clone()))
                .or_default()
                .insert(key.clone());
        }
        let entry = Entry { value, inserted: Instant::now(), ttl, depends_on: depends_on.to_vec() };
        inner.entries.insert(key, entry);
        Ok(())
    }

    fn invalidate_for_document(&self, project: &str, doc_id: &str) -> Result<usize, CacheError> {
        let mut inner = self.inner.lock();
        let Some(keys) = inner.reverse.remove(&(project.to_string(), doc_id.to_string())) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|key| inner.evict(key)).count())
    }

    fn invalidate_project(&self, project: &str) -> Result<usize, CacheError> {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| key.project != project);
        inner.reverse.retain(|(p, _), _| p != project);
        Ok(before - inner.entries.len())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.inner.lock().evict(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(total: usize) -> CachedResult {
        CachedResult::Search(Arc::new(SearchResponse { total, ..Default::default() }))
    }

    fn ids(ids: &[&str]) -> Vec<DocId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keys_hash_the_request() {
        let a = CacheKey::new("p", CacheScope::Search, "air max");
        let b = CacheKey::new("p", CacheScope::Search, "air max");
        let c = CacheKey::new("p", CacheScope::Suggest, "air max");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.digest.len(), 40);
    }

    #[test]
    fn invalidation_evicts_only_dependents() {
        let cache = MemoryCache::new();
        let with_d = CacheKey::new("p", CacheScope::Search, "q1");
        let without_d = CacheKey::new("p", CacheScope::Search, "q2");
        cache.put(with_d.clone(), result(2), &ids(&["A", "D"]), Duration::from_secs(60)).unwrap();
        cache.put(without_d.clone(), result(1), &ids(&["A"]), Duration::from_secs(60)).unwrap();

        assert_eq!(cache.invalidate_for_document("p", "D").unwrap(), 1);
        assert!(cache.get(&with_d).unwrap().is_none());
        assert!(cache.get(&without_d).unwrap().is_some());
        // the evicted key no longer lingers under its other document
        assert_eq!(cache.dependents("p", "A"), 1);
        assert_eq!(cache.dependents("p", "D"), 0);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("p", CacheScope::Search, "q");
        cache.put(key.clone(), result(1), &ids(&["A"]), Duration::ZERO).unwrap();
        assert!(cache.get(&key).unwrap().is_none());
        assert_eq!(cache.dependents("p", "A"), 0);
    }

    #[test]
    fn overwrite_replaces_dependencies() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("p", CacheScope::Search, "q");
        cache.put(key.clone(), result(1), &ids(&["A"]), Duration::from_secs(60)).unwrap();
        cache.put(key.clone(), result(1), &ids(&["B"]), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.dependents("p", "A"), 0);
        assert_eq!(cache.invalidate_for_document("p", "B").unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn project_eviction_is_scoped() {
        let cache = MemoryCache::new();
        cache.put(CacheKey::new("p", CacheScope::Search, "q"), result(1), &ids(&["A"]), Duration::from_secs(60)).unwrap();
        cache.put(CacheKey::new("other", CacheScope::Search, "q"), result(1), &ids(&["A"]), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.invalidate_project("p").unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.dependents("other", "A"), 1);
    }
}
