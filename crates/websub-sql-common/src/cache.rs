//! In-memory topic content cache
//!
//! Only the client-server backend uses this: delivery fan-out reads the same
//! topic payload once per subscriber, and a round-trip per read adds up.
//! Entries are evicted solely by change notifications (there is no TTL), so
//! the cache must stay disabled unless a live notification listener is
//! keeping it honest. Connection loss disables and clears it.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;
use websub_common::topic::TopicContent;
use websub_common::util::unix_time;

/// A cached payload with usage counters for observability
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// When the entry was inserted
    pub added: u64,
    /// How many reads it served
    pub hits: u64,
    /// When it last served a read
    pub last_hit: u64,
    /// The cached payload
    pub data: TopicContent,
}

#[derive(Debug, Default)]
struct Inner {
    enabled: bool,
    entries: HashMap<Uuid, CacheEntry>,
}

/// Notification-driven topic content cache
#[derive(Debug, Default)]
pub struct ContentCache {
    inner: Mutex<Inner>,
}

impl ContentCache {
    /// Creates a disabled cache; the notification listener enables it once
    /// it is connected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether reads currently consult the cache
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().map(|i| i.enabled).unwrap_or(false)
    }

    /// Enable the cache (listener connected)
    pub fn enable(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.enabled = true;
        }
    }

    /// Disable and clear the cache (listener lost)
    pub fn disable(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.enabled = false;
            inner.entries.clear();
        }
    }

    /// Look up a topic's payload
    pub fn get(&self, topic_id: &Uuid) -> Option<TopicContent> {
        let mut inner = self.inner.lock().ok()?;
        if !inner.enabled {
            return None;
        }

        let entry = inner.entries.get_mut(topic_id)?;
        entry.hits += 1;
        entry.last_hit = unix_time();
        Some(entry.data.clone())
    }

    /// Store a topic's payload; ignored while disabled
    pub fn insert(&self, topic_id: Uuid, data: TopicContent) {
        if let Ok(mut inner) = self.inner.lock() {
            if !inner.enabled {
                return;
            }

            inner.entries.insert(
                topic_id,
                CacheEntry {
                    added: unix_time(),
                    hits: 0,
                    last_hit: 0,
                    data,
                },
            );
        }
    }

    /// Evict one topic, driven by a change notification
    pub fn invalidate(&self, topic_id: &Uuid) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.remove(topic_id);
        }
    }

    /// Entry count, for logging
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    /// Whether the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(topic_id: Uuid) -> TopicContent {
        TopicContent {
            topic_id,
            content: b"payload".to_vec(),
            content_type: Some("text/plain".to_owned()),
            content_hash: None,
            content_updated: Some(unix_time()),
        }
    }

    #[test]
    fn disabled_cache_serves_nothing() {
        let cache = ContentCache::new();
        let id = Uuid::new_v4();
        cache.insert(id, content(id));
        assert_eq!(cache.get(&id), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn enabled_cache_round_trips_and_counts_hits() {
        let cache = ContentCache::new();
        cache.enable();

        let id = Uuid::new_v4();
        cache.insert(id, content(id));
        assert!(cache.get(&id).is_some());
        assert!(cache.get(&id).is_some());

        let inner = cache.inner.lock().expect("lock");
        assert_eq!(inner.entries.get(&id).expect("entry").hits, 2);
    }

    #[test]
    fn invalidation_evicts_one_entry() {
        let cache = ContentCache::new();
        cache.enable();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.insert(a, content(a));
        cache.insert(b, content(b));

        cache.invalidate(&a);
        assert_eq!(cache.get(&a), None);
        assert!(cache.get(&b).is_some());
    }

    #[test]
    fn disable_clears_everything() {
        let cache = ContentCache::new();
        cache.enable();

        let id = Uuid::new_v4();
        cache.insert(id, content(id));
        cache.disable();
        cache.enable();
        assert_eq!(cache.get(&id), None);
    }
}
