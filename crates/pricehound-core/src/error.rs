use std::time::Duration;

use thiserror::Error;

/// Request-level error types for PriceHound.
///
/// Source-scoped failures never surface here: they are captured into the
/// corresponding [`SourceResult`](crate::models::SourceResult) as a
/// [`SourceError`].
#[derive(Error, Debug)]
pub enum AppError {
    /// The search request was rejected before any dispatch happened.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration value missing or malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Stable, machine-readable classification of a [`SourceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    NetworkError,
    BlockedError,
    ParseError,
    AdapterTimeout,
    DispatchTimeout,
    Unavailable,
}

impl SourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceErrorKind::NetworkError => "network_error",
            SourceErrorKind::BlockedError => "blocked_error",
            SourceErrorKind::ParseError => "parse_error",
            SourceErrorKind::AdapterTimeout => "adapter_timeout",
            SourceErrorKind::DispatchTimeout => "dispatch_timeout",
            SourceErrorKind::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure of a single source during one dispatch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Connection, DNS, TLS or non-success HTTP status.
    #[error("Network error: {0}")]
    Network(String),

    /// Bot detection, CAPTCHA or an explicit block by the site.
    #[error("Blocked by source: {0}")]
    Blocked(String),

    /// The page no longer matches the adapter's extraction assumptions.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The adapter exceeded its own per-source timeout.
    #[error("Adapter timed out after {} ms", .0.as_millis())]
    AdapterTimeout(Duration),

    /// The dispatch-wide deadline elapsed before the source reported.
    #[error("Dispatch deadline of {} ms elapsed", .0.as_millis())]
    DispatchTimeout(Duration),

    /// No adapter, no session, or the source task died.
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Network(_) => SourceErrorKind::NetworkError,
            SourceError::Blocked(_) => SourceErrorKind::BlockedError,
            SourceError::Parse(_) => SourceErrorKind::ParseError,
            SourceError::AdapterTimeout(_) => SourceErrorKind::AdapterTimeout,
            SourceError::DispatchTimeout(_) => SourceErrorKind::DispatchTimeout,
            SourceError::Unavailable(_) => SourceErrorKind::Unavailable,
        }
    }

    /// Returns true if this error is transient and worth retrying inside an adapter.
    ///
    /// Only network failures qualify; a block or a parse failure will not
    /// go away by asking again a few hundred milliseconds later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Network(_))
    }
}
