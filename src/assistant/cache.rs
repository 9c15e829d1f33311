//! Cache of validated translations
//!
//! Keys are blake3 hashes of the normalised question, the schema
//! fingerprint and the requested row bound, so a schema change or a
//! different limit never reuses stale SQL.

use crate::config::CacheConfig;
use crate::sql::SqlCandidate;
use moka::sync::Cache;
use std::time::Duration;

pub struct QueryCache {
    cache: Cache<String, SqlCandidate>,
}

impl QueryCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// `None` when caching is disabled
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_entries, Duration::from_secs(config.ttl_secs)))
    }

    pub fn key(question: &str, schema_fingerprint: &str, requested_rows: Option<u64>) -> String {
        let normalized = question.split_whitespace().collect::<Vec<_>>().join(" ");

        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized.as_bytes());
        hasher.update(&[0]);
        hasher.update(schema_fingerprint.as_bytes());
        hasher.update(&[0]);
        if let Some(rows) = requested_rows {
            hasher.update(&rows.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn get(&self, key: &str) -> Option<SqlCandidate> {
        self.cache.get(key)
    }

    pub fn insert(&self, key: String, candidate: SqlCandidate) {
        self.cache.insert(key, candidate);
    }

    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalizes_whitespace() {
        let a = QueryCache::key("  total   sales ", "fp", None);
        let b = QueryCache::key("total sales", "fp", None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_key_depends_on_schema_and_rows() {
        let base = QueryCache::key("total sales", "fp-1", None);
        assert_ne!(base, QueryCache::key("total sales", "fp-2", None));
        assert_ne!(base, QueryCache::key("total sales", "fp-1", Some(10)));
        assert_ne!(base, QueryCache::key("Total sales", "fp-1", None));
    }

    #[test]
    fn test_disabled_config() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        assert!(QueryCache::from_config(&config).is_none());
        assert!(QueryCache::from_config(&CacheConfig::default()).is_some());
    }

    #[test]
    fn miss_returns_none() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        assert!(cache.get("nothing").is_none());
    }
}
