//! Per-source request throttling for polite scraping.
//!
//! A single [`RateLimiter`] is shared by every dispatch in the process, so
//! the spacing between two requests to the same site holds no matter which
//! caller issued them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use pricehound_core::throttle::{RateLimiter, ThrottleConfig};
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(
//!     ThrottleConfig::new(Duration::from_secs(1)).with_jitter(Duration::from_millis(250)),
//! );
//! limiter.acquire("amazon").await;
//! // ... request to amazon ...
//! limiter.acquire("amazon").await; // suspends for at least one second
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::traits::{PageRequest, PageSession};

/// Configuration for the per-source throttle.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same source.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    ///
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,

    /// Source-specific spacing that replaces `delay`.
    pub overrides: HashMap<String, Duration>,
}

impl ThrottleConfig {
    /// Create a new config with the given per-source delay and no jitter.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
            overrides: HashMap::new(),
        }
    }

    /// Add random jitter (uniform [0, jitter]) on top of the base delay.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Use a different spacing for one source.
    pub fn with_override(mut self, source: impl Into<String>, delay: Duration) -> Self {
        self.overrides.insert(source.into(), delay);
        self
    }

    /// Compute the effective spacing for a single wait (delay + random jitter).
    fn effective_delay(&self, source: &str) -> Duration {
        let base = self.overrides.get(source).copied().unwrap_or(self.delay);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

impl Default for ThrottleConfig {
    /// One request per second per source, no jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Last admission time of one source, behind a fair (FIFO) async mutex.
type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Process-wide, per-source minimum-interval throttle.
///
/// Waiters for the same source queue on a fair mutex, so they are admitted
/// in arrival order. The slot is held while sleeping; a waiter that gets
/// cancelled simply drops its place in the queue without recording an
/// admission.
pub struct RateLimiter {
    config: ThrottleConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, source: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter map");
            poisoned.into_inner()
        });
        slots
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Wait until `source` may be contacted again, then record the admission.
    pub async fn acquire(&self, source: &str) {
        let slot = self.slot(source);
        let mut last = slot.lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + self.config.effective_delay(source);
            let now = Instant::now();
            if ready_at > now {
                tracing::debug!(
                    source = %source,
                    sleep_ms = %(ready_at - now).as_millis(),
                    "Throttling request"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

/// A leased session whose page loads are admitted by a [`RateLimiter`].
///
/// The first load uses the slot the caller already took before starting the
/// adapter; every later load (a retry, a second results page) waits for a
/// fresh one.
pub struct ThrottledSession<'a> {
    inner: &'a dyn PageSession,
    limiter: &'a RateLimiter,
    source: &'a str,
    admitted: AtomicBool,
}

impl<'a> ThrottledSession<'a> {
    pub fn new(inner: &'a dyn PageSession, limiter: &'a RateLimiter, source: &'a str) -> Self {
        Self {
            inner,
            limiter,
            source,
            admitted: AtomicBool::new(true),
        }
    }
}

impl PageSession for ThrottledSession<'_> {
    fn load<'b>(&'b self, request: &'b PageRequest) -> BoxFuture<'b, Result<String, SourceError>> {
        Box::pin(async move {
            if !self.admitted.swap(false, Ordering::SeqCst) {
                self.limiter.acquire(self.source).await;
            }
            self.inner.load(request).await
        })
    }

    /// The wrapped session belongs to its lease; closing the wrapper is a no-op.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

// ---------------------------------------------------------------------------
// Jitter: xorshift seeded from the current time.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
