//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability, so
//! clones share their recorded calls with the test that created them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::models::{Availability, Price, PriceRecord, SearchQuery};
use crate::traits::{PageRequest, PageSession, SessionBackend, SessionProfile, SourceAdapter};

/// In-stock EUR record for `source` at `price`.
pub fn record(source: &str, price: f64) -> PriceRecord {
    PriceRecord::new(source, Price::new(price).unwrap())
        .with_title(format!("{source} offer"))
        .with_availability(Availability::InStock)
}

// ---------------------------------------------------------------------------
// MockAdapter
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Behavior {
    Respond,
    Hang,
    Panic,
}

/// Mock adapter with a scripted outcome and a call log.
#[derive(Clone)]
pub struct MockAdapter {
    source: &'static str,
    /// Queue of outcomes. Each call pops the first element; the last one repeats.
    responses: Arc<Mutex<Vec<Result<Vec<PriceRecord>, SourceError>>>>,
    behavior: Behavior,
    delay: Duration,
    timeout: Duration,
    calls: Arc<AtomicUsize>,
    call_times: Arc<Mutex<Vec<Instant>>>,
}

impl MockAdapter {
    fn with_behavior(
        source: &'static str,
        behavior: Behavior,
        responses: Vec<Result<Vec<PriceRecord>, SourceError>>,
    ) -> Self {
        Self {
            source,
            responses: Arc::new(Mutex::new(responses)),
            behavior,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
            calls: Arc::new(AtomicUsize::new(0)),
            call_times: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns `records` on every call.
    pub fn new(source: &'static str, records: Vec<PriceRecord>) -> Self {
        Self::with_behavior(source, Behavior::Respond, vec![Ok(records)])
    }

    /// Fails with `error` on every call.
    pub fn with_error(source: &'static str, error: SourceError) -> Self {
        Self::with_behavior(source, Behavior::Respond, vec![Err(error)])
    }

    pub fn with_responses(
        source: &'static str,
        responses: Vec<Result<Vec<PriceRecord>, SourceError>>,
    ) -> Self {
        Self::with_behavior(source, Behavior::Respond, responses)
    }

    /// Never returns.
    pub fn hanging(source: &'static str) -> Self {
        Self::with_behavior(source, Behavior::Hang, Vec::new())
    }

    /// Panics inside `search`.
    pub fn panicking(source: &'static str) -> Self {
        Self::with_behavior(source, Behavior::Panic, Vec::new())
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of times `search` was entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instants at which `search` was entered.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    fn next_response(&self) -> Result<Vec<PriceRecord>, SourceError> {
        let mut responses = self.responses.lock().unwrap();
        match responses.len() {
            0 => Ok(Vec::new()),
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}

impl SourceAdapter for MockAdapter {
    fn source_id(&self) -> &'static str {
        self.source
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn search<'a>(
        &'a self,
        _session: &'a dyn PageSession,
        _query: &'a SearchQuery,
        max_results: usize,
    ) -> BoxFuture<'a, Result<Vec<PriceRecord>, SourceError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().unwrap().push(Instant::now());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.behavior {
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("mock adapter for {} panicked", self.source),
                Behavior::Respond => self.next_response().map(|mut records| {
                    records.truncate(max_results);
                    records
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// MockBackend / MockSession
// ---------------------------------------------------------------------------

/// Mock session backend that counts opened and closed sessions.
#[derive(Clone)]
pub struct MockBackend {
    html: Arc<Mutex<String>>,
    open_error: Option<SourceError>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    profiles: Arc<Mutex<Vec<SessionProfile>>>,
    loads: Arc<Mutex<Vec<PageRequest>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_html("<html><body>default</body></html>")
    }

    /// Every session's `load` returns `html`.
    pub fn with_html(html: &str) -> Self {
        Self {
            html: Arc::new(Mutex::new(html.to_string())),
            open_error: None,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            profiles: Arc::new(Mutex::new(Vec::new())),
            loads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `open` always fails with `error`.
    pub fn failing(error: SourceError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn profiles(&self) -> Vec<SessionProfile> {
        self.profiles.lock().unwrap().clone()
    }

    /// Requests passed to `load`, across all sessions.
    pub fn loads(&self) -> Vec<PageRequest> {
        self.loads.lock().unwrap().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for MockBackend {
    fn open<'a>(
        &'a self,
        profile: &'a SessionProfile,
    ) -> BoxFuture<'a, Result<Box<dyn PageSession>, SourceError>> {
        Box::pin(async move {
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.profiles.lock().unwrap().push(profile.clone());
            Ok(Box::new(MockSession {
                html: self.html.lock().unwrap().clone(),
                closed: Arc::clone(&self.closed),
                loads: Arc::clone(&self.loads),
            }) as Box<dyn PageSession>)
        })
    }
}

/// Session handed out by [`MockBackend`].
pub struct MockSession {
    html: String,
    closed: Arc<AtomicUsize>,
    loads: Arc<Mutex<Vec<PageRequest>>>,
}

impl MockSession {
    /// A standalone session, for driving an adapter without a pool.
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            closed: Arc::new(AtomicUsize::new(0)),
            loads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Requests passed to `load`.
    pub fn loads(&self) -> Vec<PageRequest> {
        self.loads.lock().unwrap().clone()
    }
}

impl PageSession for MockSession {
    fn load<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<String, SourceError>> {
        Box::pin(async move {
            self.loads.lock().unwrap().push(request.clone());
            Ok(self.html.clone())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}
