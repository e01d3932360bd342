use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::SourceError;
use crate::models::{PriceRecord, SearchQuery};

/// Resource classes a session refuses to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Image,
    Font,
    Media,
    Stylesheet,
}

impl ResourceType {
    /// URL glob patterns matching this resource class.
    pub fn url_patterns(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Image => &["*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.ico", "*.webp"],
            ResourceType::Font => &["*.woff", "*.woff2", "*.ttf", "*.otf"],
            ResourceType::Media => &["*.mp4", "*.webm", "*.mp3"],
            ResourceType::Stylesheet => &["*.css"],
        }
    }
}

/// Identity a session presents to a site.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProfile {
    /// Source the session is opened for.
    pub source: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub user_agent: String,
    pub blocked_resources: Vec<ResourceType>,
}

/// One page load inside a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub url: String,
    /// CSS selector to wait for before reading the DOM, if the backend renders.
    pub wait_for: Option<String>,
    pub timeout: Duration,
}

/// An isolated browsing session (own cookies, identity and viewport).
pub trait PageSession: Send + Sync {
    /// Load a page and return its HTML.
    fn load<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<String, SourceError>>;

    /// Tear the session down. Called exactly once by the pool.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Opens fresh sessions for the [`SessionPool`](crate::session_pool::SessionPool).
pub trait SessionBackend: Send + Sync {
    fn open<'a>(
        &'a self,
        profile: &'a SessionProfile,
    ) -> BoxFuture<'a, Result<Box<dyn PageSession>, SourceError>>;
}

/// Searches one retail source and normalizes its listings.
///
/// Implementations encapsulate exactly one site's extraction rules and share
/// no state with other adapters.
pub trait SourceAdapter: Send + Sync {
    /// Catalog id of the source this adapter serves.
    fn source_id(&self) -> &'static str;

    /// Upper bound on a single [`search`](Self::search) call.
    fn timeout(&self) -> Duration;

    fn search<'a>(
        &'a self,
        session: &'a dyn PageSession,
        query: &'a SearchQuery,
        max_results: usize,
    ) -> BoxFuture<'a, Result<Vec<PriceRecord>, SourceError>>;
}
