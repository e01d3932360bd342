//! TTL-bounded, single-flight cache of aggregate results.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::models::AggregateResult;

/// Configuration for [`ResponseCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 1000,
        }
    }
}

/// Result that is handed to every waiter but never stored.
#[derive(Debug)]
struct Uncached(Arc<AggregateResult>);

/// Process-wide response cache keyed by query signature.
///
/// Concurrent lookups of a missing key are coalesced: one caller computes,
/// the others wait and receive the same `Arc`. An aggregate in which every
/// source failed is shared with the waiters of that computation but not
/// kept, so the next request tries the sources again.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Cache<String, Arc<AggregateResult>>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self { entries }
    }

    /// Cached aggregate for `key`, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<Arc<AggregateResult>> {
        self.entries.get(key).await
    }

    /// Return the cached aggregate for `key`, computing it at most once
    /// across concurrent callers when absent.
    pub async fn get_or_compute<F>(&self, key: String, compute: F) -> Arc<AggregateResult>
    where
        F: Future<Output = AggregateResult>,
    {
        let init = async move {
            let result = Arc::new(compute.await);
            if result.all_failed() {
                Err(Uncached(result))
            } else {
                Ok(result)
            }
        };

        match self.entries.entry(key).or_try_insert_with(init).await {
            Ok(entry) => {
                tracing::debug!(key = %entry.key(), fresh = entry.is_fresh(), "Cache lookup");
                entry.into_value()
            }
            Err(uncached) => {
                tracing::debug!("Every source failed, result not cached");
                Arc::clone(&uncached.0)
            }
        }
    }

    /// Drop every entry. Lookups issued after this call never see an older entry.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate number of live entries.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::error::SourceError;
    use crate::models::{SearchQuery, SourceResult};
    use crate::testutil::record;

    fn aggregate(success: bool) -> AggregateResult {
        let result = if success {
            SourceResult::success("amazon", vec![record("amazon", 10.0)], Duration::ZERO)
        } else {
            SourceResult::failure("amazon", &SourceError::Network("down".into()), Duration::ZERO)
        };
        AggregateResult {
            query: SearchQuery {
                term: "mouse".into(),
                barcode: None,
                sources: vec!["amazon".into()],
                max_results: 5,
            },
            best: None,
            results: vec![result],
            search_time_ms: 1,
            cached_at: Utc::now(),
        }
    }

    fn counting(calls: &Arc<AtomicUsize>, success: bool) -> impl Future<Output = AggregateResult> {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            aggregate(success)
        }
    }

    #[tokio::test]
    async fn hit_skips_computation() {
        let cache = ResponseCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get_or_compute("k".into(), counting(&calls, true)).await;
        let second = cache.get_or_compute("k".into(), counting(&calls, true)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.get("k").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_computation() {
        let cache = ResponseCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..8).map(|_| cache.get_or_compute("k".into(), counting(&calls, true)));
        let results = futures::future::join_all(lookups).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let cache = ResponseCache::new(&CacheConfig {
            ttl: Duration::from_millis(100),
            max_entries: 10,
        });
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_compute("k".into(), counting(&calls, true)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.get("k").await.is_none());

        cache.get_or_compute("k".into(), counting(&calls, true)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_forces_recomputation() {
        let cache = ResponseCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_compute("k".into(), counting(&calls, true)).await;
        cache.clear();
        assert!(cache.get("k").await.is_none());

        cache.get_or_compute("k".into(), counting(&calls, true)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn total_failure_is_shared_but_not_stored() {
        let cache = ResponseCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..4).map(|_| cache.get_or_compute("k".into(), counting(&calls, false)));
        let results = futures::future::join_all(lookups).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.all_failed()));

        assert!(cache.get("k").await.is_none());
        cache.get_or_compute("k".into(), counting(&calls, false)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
