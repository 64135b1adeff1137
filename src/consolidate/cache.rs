//! Records cache
//!
//! Parsed records kept by file hash so an import that was rejected can be
//! re-run (for example with `force_import`) without parsing the file again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::database::config::CacheSection;
use crate::models::Record;

#[derive(Debug)]
struct CacheEntry {
    records: Arc<Vec<Record>>,
    inserted_at: Instant,
    last_used: Instant,
}

/// TTL- and capacity-bounded cache of parsed records
///
/// When full, expired entries are evicted first, then the least recently
/// used one. A zero TTL expires entries immediately.
#[derive(Debug)]
pub struct RecordsCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RecordsCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_section(section: &CacheSection) -> Self {
        Self::new(Duration::from_secs(section.ttl_secs), section.max_entries)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }

    /// Cache records under a file hash, replacing any previous entry
    pub fn insert(&self, file_hash: impl Into<String>, records: Arc<Vec<Record>>) {
        if self.max_entries == 0 || self.ttl.is_zero() {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let now = Instant::now();
        let file_hash = file_hash.into();

        if !entries.contains_key(&file_hash) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| !self.is_expired(entry, now));
            if entries.len() >= self.max_entries
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(hash, _)| hash.clone())
            {
                tracing::debug!("Evicting cached records for {}", oldest);
                entries.remove(&oldest);
            }
        }

        entries.insert(
            file_hash,
            CacheEntry {
                records,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    /// Cached records for a hash, if present and not expired
    pub fn get(&self, file_hash: &str) -> Option<Arc<Vec<Record>>> {
        let mut entries = self.entries.lock().ok()?;
        let now = Instant::now();
        let expired = self.is_expired(entries.get(file_hash)?, now);
        if expired {
            entries.remove(file_hash);
            return None;
        }
        let entry = entries.get_mut(file_hash)?;
        entry.last_used = now;
        Some(entry.records.clone())
    }

    pub fn remove(&self, file_hash: &str) -> Option<Arc<Vec<Record>>> {
        self.entries
            .lock()
            .ok()?
            .remove(file_hash)
            .map(|entry| entry.records)
    }

    /// Entries held, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(email: &str) -> Arc<Vec<Record>> {
        Arc::new(vec![Record::new().with("email", email)])
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = RecordsCache::new(Duration::from_secs(10), 4);
        cache.insert("a", records("a@x.com"));
        assert!(cache.get("a").is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_caches_nothing() {
        let cache = RecordsCache::new(Duration::ZERO, 4);
        cache.insert("a", records("a@x.com"));
        assert!(cache.get("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_least_recently_used_is_evicted() {
        let cache = RecordsCache::new(Duration::from_secs(60), 2);
        cache.insert("a", records("a@x.com"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("b", records("b@x.com"));
        tokio::time::advance(Duration::from_secs(1)).await;
        // touch a so b becomes the eviction candidate
        assert!(cache.get("a").is_some());
        cache.insert("c", records("c@x.com"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_evicted_first() {
        let cache = RecordsCache::new(Duration::from_secs(5), 2);
        cache.insert("old", records("a@x.com"));
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.insert("recent", records("b@x.com"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("recent").is_some());

        cache.insert("new", records("c@x.com"));
        assert!(cache.get("recent").is_some());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_remove() {
        let cache = RecordsCache::from_section(&CacheSection::default());
        cache.insert("a", records("a@x.com"));
        assert_eq!(cache.remove("a").map(|r| r.len()), Some(1));
        assert!(cache.get("a").is_none());
    }
}
