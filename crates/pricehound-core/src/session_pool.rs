//! Bounded pool of isolated browsing sessions.
//!
//! Every acquisition opens a brand-new session from the configured
//! [`SessionBackend`] and tears it down on release, so cookies and storage
//! never cross from one source domain to another. At most
//! `max_sessions` leases exist at any time; further callers suspend until
//! one is returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SourceError;
use crate::traits::{PageRequest, PageSession, ResourceType, SessionBackend, SessionProfile};

/// Realistic browser User-Agent strings, rotated per session.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Configuration for [`SessionPool`].
#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    pub max_sessions: usize,
    pub viewport: (u32, u32),
    pub locale: String,
    /// Fixed User-Agent; `None` rotates through a built-in list.
    pub user_agent: Option<String>,
    pub blocked_resources: Vec<ResourceType>,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            viewport: (1920, 1080),
            locale: "it-IT".to_string(),
            user_agent: None,
            blocked_resources: vec![ResourceType::Image, ResourceType::Font, ResourceType::Media],
        }
    }
}

/// Process-wide session pool. Share it behind an `Arc`.
pub struct SessionPool {
    backend: Arc<dyn SessionBackend>,
    permits: Arc<Semaphore>,
    config: SessionPoolConfig,
    in_use: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl SessionPool {
    pub fn new(backend: Arc<dyn SessionBackend>, config: SessionPoolConfig) -> Self {
        let max = config.max_sessions.max(1);
        Self {
            backend,
            permits: Arc::new(Semaphore::new(max)),
            config: SessionPoolConfig {
                max_sessions: max,
                ..config
            },
            in_use: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.max_sessions
    }

    /// Number of sessions that could be handed out right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Stop handing out sessions. Outstanding leases stay valid until released.
    pub fn close(&self) {
        tracing::info!(in_use = self.in_use(), "Closing session pool");
        self.permits.close();
    }

    fn profile_for(&self, source: &str) -> SessionProfile {
        let n = self.opened.fetch_add(1, Ordering::Relaxed);
        let user_agent = match &self.config.user_agent {
            Some(ua) => ua.clone(),
            None => USER_AGENTS[n % USER_AGENTS.len()].to_string(),
        };
        SessionProfile {
            source: source.to_string(),
            viewport: self.config.viewport,
            locale: self.config.locale.clone(),
            user_agent,
            blocked_resources: self.config.blocked_resources.clone(),
        }
    }

    /// Acquire a fresh session for `source`, suspending while the pool is full.
    ///
    /// The returned lease gives the slot back when released or dropped,
    /// including when the owning task is aborted.
    pub async fn acquire(&self, source: &str) -> Result<SessionLease, SourceError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SourceError::Unavailable("session pool is closed".into()))?;

        let profile = self.profile_for(source);
        let session = self.backend.open(&profile).await?;

        self.in_use.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(source = %source, in_use = self.in_use(), "Session acquired");

        Ok(SessionLease {
            source: source.to_string(),
            session,
            released: false,
            in_use: Arc::clone(&self.in_use),
            permit: Some(permit),
        })
    }
}

/// Scoped ownership of one pooled session.
pub struct SessionLease {
    source: String,
    session: Box<dyn PageSession>,
    released: bool,
    in_use: Arc<AtomicUsize>,
    /// Held until the session is closed, so the pool never has more than
    /// `max_sessions` live sessions.
    permit: Option<OwnedSemaphorePermit>,
}

impl SessionLease {
    pub fn session(&self) -> &dyn PageSession {
        self.session.as_ref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Close the session and free the pool slot.
    pub async fn release(mut self) {
        let session = std::mem::replace(&mut self.session, Box::new(ClosedSession));
        self.released = true;
        session.close().await;
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if self.released {
            return;
        }

        // Dropped without release (error path or task abort): close in the
        // background and free the slot once the close has finished.
        let session = std::mem::replace(&mut self.session, Box::new(ClosedSession));
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.close().await;
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::warn!(source = %self.source, "Session dropped outside a runtime; not closed");
            }
        }
    }
}

/// Placeholder left behind once a lease has handed its session to `close()`.
struct ClosedSession;

impl PageSession for ClosedSession {
    fn load<'a>(&'a self, _request: &'a PageRequest) -> BoxFuture<'a, Result<String, SourceError>> {
        Box::pin(async { Err(SourceError::Unavailable("session already released".into())) })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}
