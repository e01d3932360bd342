use std::sync::Arc;

use pricehound_core::PriceSearchService;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub service: Arc<PriceSearchService>,
    /// Bearer key required on every `/v1` route.
    pub api_key: String,
}
