use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pricehound_core::{
    AggregateResult, BatchItem, BatchReport, ItemOutcome, PriceRecord, SearchRequest, SourceInfo,
    SourceResult,
};

/// Results per source when the caller does not say.
pub const DEFAULT_MAX_RESULTS: usize = 10;

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SearchPricesRequest {
    /// Free-text product description. May be empty when a barcode is given.
    #[serde(default)]
    pub query: String,
    /// EAN/UPC/GTIN code, 8 to 14 digits.
    pub barcode: Option<String>,
    /// Source ids, in the order results should be reported.
    pub sources: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results_per_source: usize,
}

impl From<SearchPricesRequest> for SearchRequest {
    fn from(body: SearchPricesRequest) -> Self {
        Self {
            query: body.query,
            barcode: body.barcode,
            sources: body.sources,
            max_results_per_source: body.max_results_per_source,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct QuickSearchQuery {
    /// Free-text product description.
    #[serde(default)]
    pub q: String,
    /// EAN/UPC/GTIN code; searched instead of `q` when given.
    pub barcode: Option<String>,
    /// Comma-separated source ids. Defaults to amazon, eprice and trovaprezzi.
    pub sources: Option<String>,
}

impl QuickSearchQuery {
    pub fn source_list(&self) -> Option<Vec<String>> {
        self.sources.as_ref().map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PriceRecordResponse {
    pub source: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub price: f64,
    pub currency: String,
    /// One of `in_stock`, `out_of_stock`, `limited`, `unknown`.
    pub availability: String,
    pub shipping_cost: Option<f64>,
    pub shipping_time: Option<String>,
    pub seller_name: Option<String>,
    pub seller_rating: Option<f32>,
}

impl From<&PriceRecord> for PriceRecordResponse {
    fn from(record: &PriceRecord) -> Self {
        Self {
            source: record.source.clone(),
            source_url: record.source_url.clone(),
            title: record.title.clone(),
            price: record.price.value(),
            currency: record.currency.clone(),
            availability: record.availability.to_string(),
            shipping_cost: record.shipping_cost.map(|p| p.value()),
            shipping_time: record.shipping_time.clone(),
            seller_name: record.seller_name.clone(),
            seller_rating: record.seller_rating,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceResultResponse {
    pub source: String,
    pub success: bool,
    pub records: Vec<PriceRecordResponse>,
    /// Set only on failure, e.g. `blocked_error` or `dispatch_timeout`.
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl From<&SourceResult> for SourceResultResponse {
    fn from(result: &SourceResult) -> Self {
        Self {
            source: result.source.clone(),
            success: result.success,
            records: result.records.iter().map(PriceRecordResponse::from).collect(),
            error_kind: result.error_kind.map(|k| k.to_string()),
            error: result.error.clone(),
            elapsed_ms: result.elapsed_ms,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SearchResponse {
    pub query: String,
    pub barcode: Option<String>,
    pub results: Vec<SourceResultResponse>,
    pub best: Option<PriceRecordResponse>,
    pub successful_sources: usize,
    pub search_time_ms: u64,
    pub cached_at: DateTime<Utc>,
}

impl From<&AggregateResult> for SearchResponse {
    fn from(aggregate: &AggregateResult) -> Self {
        Self {
            query: aggregate.query.term.clone(),
            barcode: aggregate.query.barcode.clone(),
            results: aggregate
                .results
                .iter()
                .map(SourceResultResponse::from)
                .collect(),
            best: aggregate.best.as_ref().map(PriceRecordResponse::from),
            successful_sources: aggregate.successful_sources(),
            search_time_ms: aggregate.search_time_ms,
            cached_at: aggregate.cached_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchItemRequest {
    #[serde(default)]
    pub description: String,
    pub barcode: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchSearchRequest {
    pub items: Vec<BatchItemRequest>,
    pub sources: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results_per_source: usize,
}

impl BatchSearchRequest {
    pub fn batch_items(self) -> (Vec<BatchItem>, Vec<String>, usize) {
        let items = self
            .items
            .into_iter()
            .map(|i| BatchItem {
                description: i.description,
                barcode: i.barcode,
            })
            .collect();
        (items, self.sources, self.max_results_per_source)
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchItemResponse {
    pub index: usize,
    pub description: String,
    pub barcode: Option<String>,
    /// One of `completed`, `failed`, `cancelled`.
    pub status: String,
    pub result: Option<SearchResponse>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchSearchResponse {
    pub batch_id: Uuid,
    pub items: Vec<BatchItemResponse>,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub elapsed_ms: u64,
}

impl From<BatchReport> for BatchSearchResponse {
    fn from(report: BatchReport) -> Self {
        let (completed, failed, cancelled) =
            (report.completed(), report.failed(), report.cancelled());
        let items = report
            .items
            .into_iter()
            .map(|r| {
                let (status, result, error) = match r.outcome {
                    ItemOutcome::Completed { result } => {
                        ("completed", Some(SearchResponse::from(result.as_ref())), None)
                    }
                    ItemOutcome::Failed { error } => ("failed", None, Some(error)),
                    ItemOutcome::Cancelled => ("cancelled", None, None),
                };
                BatchItemResponse {
                    index: r.index,
                    description: r.item.description,
                    barcode: r.item.barcode,
                    status: status.to_string(),
                    result,
                    error,
                }
            })
            .collect();

        Self {
            batch_id: report.batch_id,
            items,
            completed,
            failed,
            cancelled,
            elapsed_ms: report.elapsed_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceResponse {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub reliability: String,
}

impl From<&SourceInfo> for SourceResponse {
    fn from(info: &SourceInfo) -> Self {
        Self {
            id: info.id.to_string(),
            display_name: info.display_name.to_string(),
            description: info.description.to_string(),
            reliability: info.reliability.to_string(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceListResponse {
    pub sources: Vec<SourceResponse>,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions_in_use: usize,
    pub sessions_capacity: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
