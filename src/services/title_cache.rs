// src/services/title_cache.rs
//
// Title Cache - per-session memo of title searches.
//
// CRITICAL RULES:
// - Owned by one ResolutionService; two services never share entries
// - Concurrent lookups of one key share a single in-flight search
// - A failed search caches nothing, the next caller searches again
// - Entries expire after `ttl`; the oldest entry is evicted past `max_entries`

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;

use crate::domain::media::Media;
use crate::error::AppResult;

struct CacheSlot {
    cell: Arc<OnceCell<Option<Media>>>,
    created_at: Instant,
}

pub struct TitleCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheSlot>>,
}

impl TitleCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheSlot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &str) -> Arc<OnceCell<Option<Media>>> {
        let mut entries = self.lock();
        let now = Instant::now();

        if let Some(slot) = entries.get(key) {
            if now.duration_since(slot.created_at) < self.ttl {
                return slot.cell.clone();
            }
        }

        entries.retain(|_, slot| now.duration_since(slot.created_at) < self.ttl);
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, slot)| slot.created_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }

        let cell = Arc::new(OnceCell::new());
        entries.insert(
            key.to_string(),
            CacheSlot {
                cell: cell.clone(),
                created_at: now,
            },
        );
        cell
    }

    /// Cached value for `key`, running `search` once if there is none.
    pub async fn get_or_search<F, Fut>(&self, key: &str, search: F) -> AppResult<Option<Media>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Option<Media>>>,
    {
        let cell = self.slot(key);
        cell.get_or_try_init(search).await.cloned()
    }

    /// Store a result obtained elsewhere (batch search). An existing value
    /// for the key is kept.
    pub fn prime(&self, key: &str, media: Option<Media>) {
        let cell = self.slot(key);
        let _ = cell.set(media);
    }

    /// True if a finished lookup for `key` is cached.
    pub fn contains(&self, key: &str) -> bool {
        let entries = self.lock();
        entries.get(key).is_some_and(|slot| {
            slot.cell.initialized() && slot.created_at.elapsed() < self.ttl
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything; the next lookup starts a new session.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::AppError;

    fn cache() -> TitleCache {
        TitleCache::new(Duration::from_secs(60), 16)
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_search() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_search("Frieren", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Some(Media::new(1, "Sousou no Frieren")))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(lookups).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap().as_ref().unwrap().id == 1));
    }

    #[tokio::test]
    async fn test_failed_search_is_not_cached() {
        let cache = cache();
        let err = cache
            .get_or_search("Key", || async { Err(AppError::Catalog("down".to_string())) })
            .await;
        assert!(err.is_err());
        assert!(!cache.contains("Key"));

        let ok = cache
            .get_or_search("Key", || async { Ok(None) })
            .await
            .unwrap();
        assert!(ok.is_none());
        assert!(cache.contains("Key"));
    }

    #[tokio::test]
    async fn test_prime_keeps_first_value() {
        let cache = cache();
        cache.prime("Key", Some(Media::new(1, "First")));
        cache.prime("Key", Some(Media::new(2, "Second")));
        let media = cache
            .get_or_search("Key", || async { Ok(Some(Media::new(3, "Searched"))) })
            .await
            .unwrap();
        assert_eq!(media.map(|m| m.id), Some(1));
    }

    #[tokio::test]
    async fn test_expired_entries_are_searched_again() {
        let cache = TitleCache::new(Duration::from_millis(10), 16);
        cache.prime("Key", Some(Media::new(1, "Old")));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!cache.contains("Key"));

        let media = cache
            .get_or_search("Key", || async { Ok(Some(Media::new(2, "New"))) })
            .await
            .unwrap();
        assert_eq!(media.map(|m| m.id), Some(2));
    }

    #[test]
    fn test_max_entries_and_clear() {
        let cache = TitleCache::new(Duration::from_secs(60), 2);
        cache.prime("a", None);
        cache.prime("b", None);
        cache.prime("c", None);
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));

        cache.clear();
        assert!(cache.is_empty());
    }
}
