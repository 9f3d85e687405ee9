use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::models::StockSnapshot;
use crate::provider::StockProvider;
use crate::utils::error::ProviderError;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory cache with per-entry TTL and lazy expiry: entries past their
/// TTL are treated as absent and dropped on the next read. Size is
/// unbounded, which is fine at tracked-item cardinality (tens of entries);
/// a bounded policy would be the first addition if that ever changed.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Returns the value if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Drops every expired entry and returns how many were removed. Lazy
    /// expiry makes this optional; it keeps long-idle maps tidy.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of non-expired entries.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memoizes successful provider fetches so duplicate lookups within the TTL
/// collapse into one upstream call: several trackers on the same product, or
/// a dashboard-triggered manual refresh racing the scheduler.
pub struct CachedProvider {
    inner: Arc<dyn StockProvider>,
    cache: TtlCache<(String, String), StockSnapshot>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn StockProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }
}

#[async_trait]
impl StockProvider for CachedProvider {
    async fn fetch(
        &self,
        product_ref: &str,
        region: &str,
    ) -> Result<StockSnapshot, ProviderError> {
        let key = (product_ref.to_string(), region.to_string());
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(product_ref, region, "serving snapshot from cache");
            return Ok(hit);
        }

        // Failures are not cached; the caller's retry policy decides.
        let snapshot = self.inner.fetch(product_ref, region).await?;
        self.cache.put(key, snapshot.clone());
        Ok(snapshot)
    }
}
