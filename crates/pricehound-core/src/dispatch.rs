//! Parallel fan-out of one query across its requested sources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::models::{PriceRecord, SearchQuery, SourceResult};
use crate::session_pool::SessionPool;
use crate::throttle::{RateLimiter, ThrottledSession};
use crate::traits::SourceAdapter;

/// How long aborted source tasks get to unwind and hand back their sessions.
const ABORT_GRACE: Duration = Duration::from_millis(250);

/// Configuration for [`QueryDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on a whole dispatch, across every source.
    pub deadline: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(45),
        }
    }
}

/// Runs one task per requested source and collects exactly one
/// [`SourceResult`] per source, in the requested order.
///
/// Each task leases a session, waits for its rate-limiter slot, and runs
/// the adapter under the adapter's own timeout. Every further page load the
/// adapter makes (retries) goes through the limiter again. Nothing one source does can
/// delay or fail another; only the global deadline cuts a dispatch short.
pub struct QueryDispatcher {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
    pool: Arc<SessionPool>,
    limiter: Arc<RateLimiter>,
    config: DispatchConfig,
}

impl QueryDispatcher {
    pub fn new(pool: Arc<SessionPool>, limiter: Arc<RateLimiter>, config: DispatchConfig) -> Self {
        Self {
            adapters: HashMap::new(),
            pool,
            limiter,
            config,
        }
    }

    /// Register an adapter under its own source id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters
            .insert(adapter.source_id().to_string(), adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn has_adapter(&self, source: &str) -> bool {
        self.adapters.contains_key(source)
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn deadline(&self) -> Duration {
        self.config.deadline
    }

    /// Fan `query` out to its sources and wait for all of them, or for the deadline.
    ///
    /// Sources still running at the deadline are aborted (their sessions go
    /// back to the pool) and reported as [`SourceError::DispatchTimeout`].
    /// Dropping the returned future aborts every outstanding source task.
    pub async fn dispatch(&self, query: Arc<SearchQuery>) -> Vec<SourceResult> {
        let started = Instant::now();
        let deadline = started + self.config.deadline;

        tracing::info!(
            term = %query.search_term(),
            sources = query.sources.len(),
            deadline_ms = %self.config.deadline.as_millis(),
            "Dispatching query"
        );

        let mut results: Vec<Option<SourceResult>> = query.sources.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();
        let mut index_of = HashMap::new();

        for (index, source) in query.sources.iter().enumerate() {
            match self.adapters.get(source) {
                Some(adapter) => {
                    let handle = tasks.spawn(run_source(
                        Arc::clone(adapter),
                        Arc::clone(&self.pool),
                        Arc::clone(&self.limiter),
                        Arc::clone(&query),
                    ));
                    index_of.insert(handle.id(), index);
                }
                None => {
                    let err = SourceError::Unavailable(format!("no adapter registered for {source}"));
                    tracing::warn!(source = %source, error = %err, "Skipping source");
                    results[index] = Some(SourceResult::failure(source, &err, Duration::ZERO));
                }
            }
        }

        while !tasks.is_empty() {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, result)))) => {
                    if let Some(&index) = index_of.get(&id) {
                        results[index] = Some(result);
                    }
                }
                Ok(Some(Err(join_err))) => {
                    if let Some(&index) = index_of.get(&join_err.id()) {
                        let source = &query.sources[index];
                        let err = SourceError::Unavailable(format!("source task failed: {join_err}"));
                        tracing::error!(source = %source, error = %err, "Source task died");
                        results[index] =
                            Some(SourceResult::failure(source, &err, started.elapsed()));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        outstanding = tasks.len(),
                        deadline_ms = %self.config.deadline.as_millis(),
                        "Dispatch deadline reached, aborting outstanding sources"
                    );
                    tasks.abort_all();
                    let _ = tokio::time::timeout(ABORT_GRACE, async {
                        while tasks.join_next().await.is_some() {}
                    })
                    .await;
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        results
            .into_iter()
            .zip(query.sources.iter())
            .map(|(result, source)| {
                result.unwrap_or_else(|| {
                    SourceResult::failure(
                        source,
                        &SourceError::DispatchTimeout(self.config.deadline),
                        elapsed,
                    )
                })
            })
            .collect()
    }
}

async fn run_source(
    adapter: Arc<dyn SourceAdapter>,
    pool: Arc<SessionPool>,
    limiter: Arc<RateLimiter>,
    query: Arc<SearchQuery>,
) -> SourceResult {
    let source = adapter.source_id();
    let started = Instant::now();
    let outcome = search_source(adapter.as_ref(), &pool, &limiter, &query).await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(records) => {
            tracing::info!(
                source = %source,
                records = records.len(),
                elapsed_ms = %elapsed.as_millis(),
                "Source completed"
            );
            SourceResult::success(source, records, elapsed)
        }
        Err(err) => {
            tracing::warn!(
                source = %source,
                kind = %err.kind(),
                error = %err,
                elapsed_ms = %elapsed.as_millis(),
                "Source failed"
            );
            SourceResult::failure(source, &err, elapsed)
        }
    }
}

async fn search_source(
    adapter: &dyn SourceAdapter,
    pool: &SessionPool,
    limiter: &RateLimiter,
    query: &SearchQuery,
) -> Result<Vec<PriceRecord>, SourceError> {
    let source = adapter.source_id();
    let lease = pool.acquire(source).await?;

    // The slot is stamped when the call actually starts, not while a
    // session is still being waited for.
    limiter.acquire(source).await;
    let session = ThrottledSession::new(lease.session(), limiter, source);

    let timeout = adapter.timeout();
    let outcome = tokio::time::timeout(
        timeout,
        adapter.search(&session, query, query.max_results),
    )
    .await;
    lease.release().await;

    let mut records = outcome.map_err(|_| SourceError::AdapterTimeout(timeout))??;
    records.truncate(query.max_results);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceCatalog;
    use crate::error::SourceErrorKind;
    use crate::models::SearchRequest;
    use crate::session_pool::SessionPoolConfig;
    use crate::testutil::{MockAdapter, MockBackend, record};
    use crate::throttle::ThrottleConfig;

    fn query(sources: &[&str]) -> Arc<SearchQuery> {
        let request = SearchRequest {
            query: "Mouse Logitech MX Master 3".into(),
            barcode: None,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            max_results_per_source: 10,
        };
        Arc::new(SearchQuery::from_request(request, &SourceCatalog::default()).unwrap())
    }

    fn dispatcher(backend: &MockBackend, deadline: Duration) -> QueryDispatcher {
        dispatcher_with_pool(backend, deadline, SessionPoolConfig::default())
    }

    fn dispatcher_with_pool(
        backend: &MockBackend,
        deadline: Duration,
        pool_config: SessionPoolConfig,
    ) -> QueryDispatcher {
        let pool = Arc::new(SessionPool::new(Arc::new(backend.clone()), pool_config));
        let limiter = Arc::new(RateLimiter::new(ThrottleConfig::new(Duration::from_millis(100))));
        QueryDispatcher::new(pool, limiter, DispatchConfig { deadline })
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_requested_order() {
        let backend = MockBackend::new();
        let d = dispatcher(&backend, Duration::from_secs(5))
            .with_adapter(Arc::new(
                MockAdapter::new("amazon", vec![record("amazon", 79.99)])
                    .with_delay(Duration::from_millis(300)),
            ))
            .with_adapter(Arc::new(MockAdapter::new("eprice", vec![record("eprice", 84.50)])))
            .with_adapter(Arc::new(
                MockAdapter::new("unieuro", vec![record("unieuro", 82.00)])
                    .with_delay(Duration::from_millis(100)),
            ));

        let results = d.dispatch(query(&["amazon", "eprice", "unieuro"])).await;

        let order: Vec<_> = results.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(order, vec!["amazon", "eprice", "unieuro"]);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(backend.opened(), 3);
        assert_eq!(backend.closed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_times_out_without_affecting_siblings() {
        let backend = MockBackend::new();
        let deadline = Duration::from_millis(500);
        let d = dispatcher(&backend, deadline)
            .with_adapter(Arc::new(MockAdapter::new("amazon", vec![record("amazon", 79.99)])))
            .with_adapter(Arc::new(
                MockAdapter::hanging("eprice").with_timeout(Duration::from_secs(60)),
            ));

        let started = Instant::now();
        let results = d.dispatch(query(&["amazon", "eprice"])).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].records.len(), 1);
        assert!(!results[1].success);
        assert_eq!(results[1].error_kind, Some(SourceErrorKind::DispatchTimeout));
        assert!(elapsed <= deadline + ABORT_GRACE);

        // The aborted task handed its session back.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(d.pool().in_use(), 0);
        assert_eq!(backend.closed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_adapter_hits_its_own_timeout() {
        let backend = MockBackend::new();
        let d = dispatcher(&backend, Duration::from_secs(5)).with_adapter(Arc::new(
            MockAdapter::new("unieuro", vec![record("unieuro", 10.0)])
                .with_delay(Duration::from_secs(2))
                .with_timeout(Duration::from_millis(200)),
        ));

        let results = d.dispatch(query(&["unieuro"])).await;

        assert_eq!(results[0].error_kind, Some(SourceErrorKind::AdapterTimeout));
        assert!(results[0].records.is_empty());
        assert_eq!(d.pool().in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_source_is_unavailable() {
        let backend = MockBackend::new();
        let d = dispatcher(&backend, Duration::from_secs(5))
            .with_adapter(Arc::new(MockAdapter::new("amazon", vec![record("amazon", 5.0)])));

        let results = d.dispatch(query(&["mediaworld", "amazon"])).await;

        assert_eq!(results[0].source, "mediaworld");
        assert_eq!(results[0].error_kind, Some(SourceErrorKind::Unavailable));
        assert!(results[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_adapter_is_reported_not_propagated() {
        let backend = MockBackend::new();
        let d = dispatcher(&backend, Duration::from_secs(5))
            .with_adapter(Arc::new(MockAdapter::panicking("eprice")))
            .with_adapter(Arc::new(MockAdapter::new("amazon", vec![record("amazon", 5.0)])));

        let results = d.dispatch(query(&["eprice", "amazon"])).await;

        assert_eq!(results[0].error_kind, Some(SourceErrorKind::Unavailable));
        assert!(results[0].error.as_deref().unwrap().contains("source task failed"));
        assert!(results[1].success);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(d.pool().in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_errors_are_captured_per_source() {
        let backend = MockBackend::new();
        let d = dispatcher(&backend, Duration::from_secs(5))
            .with_adapter(Arc::new(MockAdapter::with_error(
                "amazon",
                SourceError::Blocked("captcha page".into()),
            )))
            .with_adapter(Arc::new(MockAdapter::new("eprice", vec![record("eprice", 84.5)])));

        let results = d.dispatch(query(&["amazon", "eprice"])).await;

        assert_eq!(results[0].error_kind, Some(SourceErrorKind::BlockedError));
        assert!(results[0].records.is_empty());
        assert!(results[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_dispatches_respect_source_spacing() {
        let backend = MockBackend::new();
        let adapter = MockAdapter::new("amazon", vec![record("amazon", 1.0)]);
        let d = dispatcher(&backend, Duration::from_secs(5)).with_adapter(Arc::new(adapter.clone()));

        for _ in 0..3 {
            d.dispatch(query(&["amazon"])).await;
        }

        let times = adapter.call_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_holds_when_sessions_are_scarce() {
        let backend = MockBackend::new();
        let amazon = MockAdapter::new("amazon", vec![record("amazon", 1.0)]);
        let d = dispatcher_with_pool(
            &backend,
            Duration::from_secs(5),
            SessionPoolConfig {
                max_sessions: 1,
                ..Default::default()
            },
        )
        .with_adapter(Arc::new(
            MockAdapter::new("eprice", vec![record("eprice", 2.0)])
                .with_delay(Duration::from_millis(150)),
        ))
        .with_adapter(Arc::new(amazon.clone()));

        // The second dispatch is admitted while the first still waits for
        // the only session; both amazon calls must stay spaced apart.
        let (first, second) = tokio::join!(d.dispatch(query(&["eprice", "amazon"])), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            d.dispatch(query(&["amazon"])).await
        });

        assert!(first.iter().all(|r| r.success));
        assert!(second[0].success);
        let times = amazon.call_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn records_are_capped_at_max_results() {
        let backend = MockBackend::new();
        let many: Vec<_> = (0..20).map(|i| record("eprice", i as f64)).collect();
        let d = dispatcher(&backend, Duration::from_secs(5))
            .with_adapter(Arc::new(MockAdapter::new("eprice", many)));

        let results = d.dispatch(query(&["eprice"])).await;
        assert_eq!(results[0].records.len(), 10);
    }
}
