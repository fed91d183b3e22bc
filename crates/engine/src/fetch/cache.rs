use std::collections::HashMap;
use std::time::{Duration, Instant};

/// In-memory TTL cache of distilled fetch results, consulted before any
/// Scheduler resource is acquired (§2a of the expanded spec — a cache hit
/// short-circuits strategy dispatch entirely).
pub struct FetchCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

struct CacheEntry {
    text: String,
    inserted_at: Instant,
}

impl FetchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, url: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(url) {
            if entry.inserted_at.elapsed() < self.ttl {
                metrics::counter!("fetch.cache.hit").increment(1);
                return Some(entry.text.clone());
            }
        }
        metrics::counter!("fetch.cache.miss").increment(1);
        None
    }

    pub fn insert(&mut self, url: String, text: String) {
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        self.entries.insert(
            url,
            CacheEntry {
                text,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_then_miss_after_expiry() {
        let mut cache = FetchCache::new(Duration::from_millis(1));
        assert!(cache.get("https://example.com").is_none());

        cache.insert("https://example.com".into(), "body".into());
        assert_eq!(cache.get("https://example.com").as_deref(), Some("body"));

        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("https://example.com").is_none());
    }
}
