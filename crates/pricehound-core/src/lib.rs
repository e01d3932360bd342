pub mod aggregate;
pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod service;
pub mod session_pool;
pub mod throttle;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use aggregate::ResultAggregator;
pub use batch::{BatchHandle, BatchItem, BatchReport, BatchSearch, ItemOutcome, TracingBatchReporter};
pub use cache::{CacheConfig, ResponseCache};
pub use catalog::{ReliabilityTier, SourceCatalog, SourceInfo};
pub use config::EngineConfig;
pub use dispatch::{DispatchConfig, QueryDispatcher};
pub use error::{AppError, SourceError, SourceErrorKind};
pub use models::{
    AggregateResult, Availability, Price, PriceRecord, SearchQuery, SearchRequest, SourceResult,
    compute_hash,
};
pub use service::PriceSearchService;
pub use session_pool::{SessionLease, SessionPool, SessionPoolConfig};
pub use throttle::{RateLimiter, ThrottleConfig, ThrottledSession};
pub use traits::{PageRequest, PageSession, ResourceType, SessionBackend, SessionProfile, SourceAdapter};
