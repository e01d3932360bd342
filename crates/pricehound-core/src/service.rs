use std::sync::Arc;

use tokio::time::Instant;

use crate::aggregate::ResultAggregator;
use crate::cache::ResponseCache;
use crate::catalog::{AMAZON, EPRICE, SourceCatalog, TROVAPREZZI};
use crate::config::EngineConfig;
use crate::dispatch::QueryDispatcher;
use crate::error::AppError;
use crate::models::{AggregateResult, SearchQuery, SearchRequest};
use crate::session_pool::SessionPool;
use crate::throttle::RateLimiter;
use crate::traits::{SessionBackend, SourceAdapter};

/// Sources used by a quick search when the caller names none.
pub const QUICK_SOURCES: &[&str] = &[AMAZON, EPRICE, TROVAPREZZI];

/// Results per source for a quick search.
pub const QUICK_MAX_RESULTS: usize = 5;

/// Entry point of the discovery engine: validation, cache, dispatch, ranking.
pub struct PriceSearchService {
    catalog: SourceCatalog,
    dispatcher: QueryDispatcher,
    aggregator: ResultAggregator,
    cache: ResponseCache,
}

impl PriceSearchService {
    pub fn new(
        catalog: SourceCatalog,
        dispatcher: QueryDispatcher,
        aggregator: ResultAggregator,
        cache: ResponseCache,
    ) -> Self {
        Self {
            catalog,
            dispatcher,
            aggregator,
            cache,
        }
    }

    /// Wire the engine from configuration, a session backend and the adapters.
    pub fn from_config(
        config: &EngineConfig,
        backend: Arc<dyn SessionBackend>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Self {
        let catalog = SourceCatalog::default();
        let pool = Arc::new(SessionPool::new(backend, config.pool.clone()));
        let limiter = Arc::new(RateLimiter::new(config.throttle.clone()));

        let mut dispatcher = QueryDispatcher::new(pool, limiter, config.dispatch.clone());
        for adapter in adapters {
            dispatcher.register(adapter);
        }

        let aggregator =
            ResultAggregator::from_catalog(&catalog).with_priority(&config.source_priority);
        let cache = ResponseCache::new(&config.cache);

        Self::new(catalog, dispatcher, aggregator, cache)
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn session_pool(&self) -> &SessionPool {
        self.dispatcher.pool()
    }

    /// Search every requested source for the product and rank the offers.
    ///
    /// Only an invalid request is an error. Source failures, including all
    /// sources failing, come back inside the aggregate.
    pub async fn search_prices(
        &self,
        request: SearchRequest,
    ) -> Result<Arc<AggregateResult>, AppError> {
        let query = SearchQuery::from_request(request, &self.catalog)?;
        let key = query.signature();
        let query = Arc::new(query);

        let dispatch_query = Arc::clone(&query);
        let aggregate = self
            .cache
            .get_or_compute(key, async move {
                let started = Instant::now();
                let results = self.dispatcher.dispatch(Arc::clone(&dispatch_query)).await;
                let aggregate =
                    self.aggregator
                        .aggregate(&dispatch_query, results, started.elapsed());
                tracing::info!(
                    term = %dispatch_query.search_term(),
                    succeeded = aggregate.successful_sources(),
                    sources = aggregate.results.len(),
                    best = ?aggregate.best.as_ref().map(|b| b.price.value()),
                    search_time_ms = aggregate.search_time_ms,
                    "Search completed"
                );
                aggregate
            })
            .await;

        Ok(self.fit_to_caller(aggregate, &query))
    }

    /// Search a term or a barcode on a small default set of sources.
    pub async fn quick_search(
        &self,
        term: &str,
        barcode: Option<String>,
        sources: Option<Vec<String>>,
    ) -> Result<Arc<AggregateResult>, AppError> {
        let sources =
            sources.unwrap_or_else(|| QUICK_SOURCES.iter().map(|s| s.to_string()).collect());
        self.search_prices(SearchRequest {
            query: term.to_string(),
            barcode,
            sources,
            max_results_per_source: QUICK_MAX_RESULTS,
        })
        .await
    }

    /// Evict every cached aggregate.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Response cache cleared");
    }

    /// Stop accepting new sessions. Searches in flight finish with what they hold.
    pub fn shutdown(&self) {
        self.dispatcher.pool().close();
    }

    /// A cached aggregate may have been computed for another caller: same
    /// source set, but possibly another order or a larger `max_results`.
    /// Present it in this caller's order, capped at this caller's limit.
    fn fit_to_caller(
        &self,
        aggregate: Arc<AggregateResult>,
        query: &SearchQuery,
    ) -> Arc<AggregateResult> {
        if aggregate.query.sources == query.sources
            && aggregate.query.max_results == query.max_results
        {
            return aggregate;
        }

        let mut fitted = (*aggregate).clone();
        fitted.results.sort_by_key(|r| {
            query
                .sources
                .iter()
                .position(|s| *s == r.source)
                .unwrap_or(usize::MAX)
        });
        for result in &mut fitted.results {
            result.records.truncate(query.max_results);
        }
        fitted.best = self.aggregator.best(&fitted.results);
        fitted.query = query.clone();
        Arc::new(fitted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::{SourceError, SourceErrorKind};
    use crate::testutil::{MockAdapter, MockBackend, record};
    use crate::throttle::ThrottleConfig;

    fn config() -> EngineConfig {
        EngineConfig {
            throttle: ThrottleConfig::new(Duration::ZERO),
            ..Default::default()
        }
    }

    fn service(config: &EngineConfig, adapters: Vec<MockAdapter>) -> PriceSearchService {
        let adapters = adapters
            .into_iter()
            .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>)
            .collect();
        PriceSearchService::from_config(config, Arc::new(MockBackend::new()), adapters)
    }

    fn request(query: &str, sources: &[&str]) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            barcode: None,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            max_results_per_source: 10,
        }
    }

    #[tokio::test]
    async fn cheapest_source_wins() {
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 79.99)]);
        let eprice = MockAdapter::new("eprice", vec![record("eprice", 84.50)]);
        let svc = service(&config(), vec![amazon, eprice]);

        let result = svc
            .search_prices(request("Mouse Logitech MX Master 3", &["amazon", "eprice"]))
            .await
            .unwrap();

        let best = result.best.as_ref().unwrap();
        assert_eq!(best.price.value(), 79.99);
        assert_eq!(best.source, "amazon");
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn total_failure_is_a_normal_response() {
        let err = SourceError::Network("connection refused".into());
        let svc = service(
            &config(),
            vec![
                MockAdapter::with_error("amazon", err.clone()),
                MockAdapter::with_error("eprice", err.clone()),
                MockAdapter::with_error("unieuro", err),
            ],
        );

        let result = svc
            .search_prices(request("mouse", &["amazon", "eprice", "unieuro"]))
            .await
            .unwrap();

        assert!(result.best.is_none());
        assert_eq!(result.results.len(), 3);
        for r in &result.results {
            assert!(!r.success);
            assert_eq!(r.error_kind, Some(SourceErrorKind::NetworkError));
        }
    }

    #[tokio::test]
    async fn invalid_request_never_dispatches() {
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 1.0)]);
        let svc = service(&config(), vec![amazon.clone()]);

        let err = svc.search_prices(request("mouse", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(amazon.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_dispatch_once() {
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 12.0)])
            .with_delay(Duration::from_millis(50));
        let svc = service(&config(), vec![amazon.clone()]);

        let searches = (0..10).map(|_| svc.search_prices(request("ssd 1tb", &["amazon"])));
        let results = futures::future::join_all(searches).await;

        assert_eq!(amazon.calls(), 1);
        let first = results[0].as_ref().unwrap();
        for r in &results {
            assert_eq!(r.as_ref().unwrap().as_ref(), first.as_ref());
        }
    }

    #[tokio::test]
    async fn clear_cache_forces_redispatch() {
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 12.0)]);
        let svc = service(&config(), vec![amazon.clone()]);

        svc.search_prices(request("ssd", &["amazon"])).await.unwrap();
        svc.search_prices(request("ssd", &["amazon"])).await.unwrap();
        assert_eq!(amazon.calls(), 1);

        svc.clear_cache();
        svc.search_prices(request("ssd", &["amazon"])).await.unwrap();
        assert_eq!(amazon.calls(), 2);
    }

    #[tokio::test]
    async fn expired_entry_triggers_fresh_dispatch() {
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 12.0)]);
        let config = EngineConfig {
            cache: CacheConfig {
                ttl: Duration::from_millis(100),
                max_entries: 10,
            },
            ..config()
        };
        let svc = service(&config, vec![amazon.clone()]);

        svc.search_prices(request("ssd", &["amazon"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        svc.search_prices(request("ssd", &["amazon"])).await.unwrap();

        assert_eq!(amazon.calls(), 2);
    }

    #[tokio::test]
    async fn cached_result_follows_each_callers_source_order() {
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 20.0)]);
        let eprice = MockAdapter::new("eprice", vec![record("eprice", 30.0)]);
        let svc = service(&config(), vec![amazon.clone(), eprice]);

        let first = svc
            .search_prices(request("tv", &["amazon", "eprice"]))
            .await
            .unwrap();
        let second = svc
            .search_prices(request("tv", &["eprice", "amazon"]))
            .await
            .unwrap();

        assert_eq!(amazon.calls(), 1);
        assert_eq!(first.results[0].source, "amazon");
        assert_eq!(second.results[0].source, "eprice");
        assert_eq!(second.results[1].source, "amazon");
        assert_eq!(first.best, second.best);
    }

    #[tokio::test]
    async fn quick_search_uses_default_sources() {
        let svc = service(
            &config(),
            vec![
                MockAdapter::new("amazon", vec![record("amazon", 5.0)]),
                MockAdapter::new("eprice", vec![record("eprice", 4.0)]),
                MockAdapter::new("trovaprezzi", vec![record("trovaprezzi", 6.0)]),
            ],
        );

        let result = svc.quick_search("cuffie", None, None).await.unwrap();

        let sources: Vec<_> = result.results.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, QUICK_SOURCES);
        assert_eq!(result.query.max_results, QUICK_MAX_RESULTS);
        assert_eq!(result.best.as_ref().unwrap().source, "eprice");
    }

    #[tokio::test]
    async fn quick_search_accepts_a_barcode() {
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 5.0)]);
        let svc = service(&config(), vec![amazon.clone()]);

        let result = svc
            .quick_search("", Some("5099206085800".into()), Some(vec!["amazon".into()]))
            .await
            .unwrap();

        assert_eq!(result.query.barcode.as_deref(), Some("5099206085800"));
        assert_eq!(result.query.search_term(), "5099206085800");
        assert_eq!(amazon.calls(), 1);
    }

    #[tokio::test]
    async fn cached_result_is_capped_at_each_callers_limit() {
        let many: Vec<_> = (0..10).map(|i| record("amazon", 20.0 - i as f64)).collect();
        let amazon = MockAdapter::new("amazon", many);
        let svc = service(&config(), vec![amazon.clone()]);

        let full = svc.search_prices(request("tv", &["amazon"])).await.unwrap();
        let quick = svc
            .quick_search("tv", None, Some(vec!["amazon".into()]))
            .await
            .unwrap();

        assert_eq!(amazon.calls(), 1);
        assert_eq!(full.results[0].records.len(), 10);
        assert_eq!(quick.results[0].records.len(), QUICK_MAX_RESULTS);
        assert_eq!(quick.query.max_results, QUICK_MAX_RESULTS);

        // The best offer is recomputed over what this caller actually sees.
        let best = quick.best.as_ref().unwrap();
        assert!(quick.results[0].records.contains(best));
        assert_eq!(best.price.value(), 16.0);
    }
}
