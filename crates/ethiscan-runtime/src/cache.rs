//! Response cache for oracle calls.
//!
//! Identical (model, system prompt, user prompt) triples return the cached
//! answer instead of calling the provider again. Useful when re-running a
//! diagnosis over the same corpus.

use moka::future::Cache;
use std::time::Duration;

/// Cache key for an oracle question: a blake3 digest of the
/// length-prefixed (model, system, user) triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn new(model: &str, system: &str, user: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [model, system, user] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

/// Oracle answer cache using moka.
#[derive(Clone)]
pub struct ResponseCache {
    cache: Cache<CacheKey, String>,
}

impl ResponseCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, answer: String) {
        self.cache.insert(key, answer).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = ResponseCache::default();
        let key = CacheKey::new("gpt-4o-mini", "system", "user");

        assert!(cache.get(&key).await.is_none());

        cache.insert(key, "answer".to_string()).await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("answer"));
    }

    #[test]
    fn test_key_depends_on_every_part() {
        let base = CacheKey::new("m", "s", "u");
        assert_eq!(base, CacheKey::new("m", "s", "u"));
        assert_ne!(base, CacheKey::new("m2", "s", "u"));
        assert_ne!(base, CacheKey::new("m", "s2", "u"));
        assert_ne!(base, CacheKey::new("m", "s", "u2"));
    }

    #[tokio::test]
    async fn test_shifted_boundaries_do_not_share_an_answer() {
        let cache = ResponseCache::default();
        let first = CacheKey::new("gpt-4o-mini", "ab", "c");
        let second = CacheKey::new("gpt-4o-mini", "a", "bc");
        assert_ne!(first, second);

        cache.insert(first, "first".to_string()).await;
        assert!(cache.get(&second).await.is_none());
    }
}
