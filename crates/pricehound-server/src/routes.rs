use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pricehound_core::{AppError, BatchSearch, TracingBatchReporter};

use crate::auth::require_api_key;
use crate::dto::{
    BatchSearchRequest, BatchSearchResponse, HealthResponse, QuickSearchQuery,
    SearchPricesRequest, SearchResponse, SourceListResponse, SourceResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Largest number of line items accepted in one batch request.
pub const MAX_BATCH_ITEMS: usize = 100;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/search", post(search_prices))
        .route("/v1/search/quick", get(quick_search))
        .route("/v1/search/batch", post(batch_search))
        .route("/v1/search/cache", delete(clear_cache))
        .route("/v1/sources", get(list_sources))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/search",
    request_body = SearchPricesRequest,
    responses(
        (status = 200, description = "Ranked offers, one entry per requested source", body = SearchResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "search"
)]
pub async fn search_prices(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<SearchPricesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.service.search_prices(body.into()).await?;
    Ok(axum::Json(SearchResponse::from(result.as_ref())))
}

#[utoipa::path(
    get,
    path = "/v1/search/quick",
    params(QuickSearchQuery),
    responses(
        (status = 200, description = "Ranked offers", body = SearchResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "search"
)]
pub async fn quick_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuickSearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .service
        .quick_search(&query.q, query.barcode.clone(), query.source_list())
        .await?;
    Ok(axum::Json(SearchResponse::from(result.as_ref())))
}

#[utoipa::path(
    post,
    path = "/v1/search/batch",
    request_body = BatchSearchRequest,
    responses(
        (status = 200, description = "Per-item outcome, in submission order", body = BatchSearchResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "search"
)]
pub async fn batch_search(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<BatchSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.items.is_empty() || body.items.len() > MAX_BATCH_ITEMS {
        return Err(AppError::InvalidRequest(format!(
            "a batch must contain between 1 and {MAX_BATCH_ITEMS} items"
        ))
        .into());
    }

    let (items, sources, max_results) = body.batch_items();
    let handle = BatchSearch::new(Arc::clone(&state.service)).start(items, sources, max_results);

    // Items still running are cancelled if the client goes away.
    let _guard = handle.cancellation_token().drop_guard();
    let report = handle.wait(&TracingBatchReporter).await;

    Ok(axum::Json(BatchSearchResponse::from(report)))
}

#[utoipa::path(
    delete,
    path = "/v1/search/cache",
    responses(
        (status = 204, description = "Cache cleared"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "search"
)]
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.clear_cache();
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/sources",
    responses(
        (status = 200, description = "Known sources", body = SourceListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn list_sources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = SourceListResponse {
        sources: state
            .service
            .catalog()
            .iter()
            .map(SourceResponse::from)
            .collect(),
    };
    axum::Json(response)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Session pool is shut down", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.service.session_pool();

    let (status, label) = if pool.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else {
        (StatusCode::OK, "healthy")
    };

    let response = HealthResponse {
        status: label,
        sessions_in_use: pool.in_use(),
        sessions_capacity: pool.capacity(),
    };

    (status, axum::Json(response))
}
