//! In-memory cache of query results, dropped on identity or relay change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use nostr::Event;
use tokio::time::Instant;

use crate::error::Result;
use crate::filter::Filter;

struct CacheEntry {
    events: Vec<Event>,
    stored_at: Instant,
}

/// Query results keyed by their filters.
///
/// Every `reset` bumps a generation counter; results fetched under an older
/// generation are discarded instead of stored.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    generation: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a set of filters.
    pub fn key(filters: &[Filter]) -> Result<String> {
        Ok(serde_json::to_string(filters)?)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cached events for `key` if stored less than `stale_time` ago.
    pub fn get(&self, key: &str, stale_time: Duration) -> Option<Vec<Event>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < stale_time)
            .map(|entry| entry.events.clone())
    }

    /// Store `events` fetched while `generation` was current. Returns false
    /// when a reset happened in between.
    pub fn insert(&self, generation: u64, key: String, events: Vec<Event>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if generation != self.generation() {
            return false;
        }
        entries.insert(
            key,
            CacheEntry {
                events,
                stored_at: Instant::now(),
            },
        );
        true
    }

    pub fn reset(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            created_at: 10,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_stale_time() -> Result<()> {
        let cache = QueryCache::new();
        let key = QueryCache::key(&[Filter::new().kinds([1]).limit(20)])?;
        assert!(cache.insert(cache.generation(), key.clone(), vec![event("a")]));

        assert_eq!(
            cache.get(&key, Duration::from_secs(30)).map(|events| events.len()),
            Some(1)
        );
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get(&key, Duration::from_secs(30)).is_none());
        Ok(())
    }

    #[test]
    fn reset_discards_entries_and_late_results() {
        let cache = QueryCache::new();
        let before = cache.generation();
        assert!(cache.insert(before, "k".to_string(), vec![event("a")]));

        cache.reset();
        assert!(cache.is_empty());
        assert!(!cache.insert(before, "k".to_string(), vec![event("b")]));
        assert!(cache.get("k", Duration::from_secs(60)).is_none());
    }

    #[test]
    fn key_depends_on_filter_contents() -> Result<()> {
        let first = QueryCache::key(&[Filter::new().kinds([1]).until(100)])?;
        let second = QueryCache::key(&[Filter::new().kinds([1]).until(99)])?;
        assert_ne!(first, second);
        Ok(())
    }
}
