//! Response cache keyed by normalized query text.
//!
//! Entries live in an [`LruCache`]: at capacity the least recently used
//! answer is dropped. Entries also expire after a fixed TTL; an expired
//! entry is removed when it is read, and [`ResponseCache::spawn_sweeper`]
//! purges the rest in the background so an idle cache does not hold stale
//! answers.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use phaply_core::Answer;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;

struct Entry {
    answer: Answer,
    created_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.capacity)
    }

    pub fn get(&self, query: &str) -> Option<Answer> {
        let key = normalize_query(query);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => Some(entry.answer.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, query: &str, answer: Answer) {
        let entry = Entry {
            answer,
            created_at: Instant::now(),
        };
        if let Some((evicted, _)) = self.entries.lock().push(normalize_query(query), entry) {
            tracing::trace!(query = %evicted, "cache entry replaced or evicted");
        }
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.created_at.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically purge expired entries until the handle is aborted.
    pub fn spawn_sweeper(cache: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "purged expired cache entries");
                }
            }
        })
    }
}

/// Lowercase and collapse runs of whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
