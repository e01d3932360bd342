use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::SourceCatalog;
use crate::error::{AppError, SourceError, SourceErrorKind};

/// Upper bound on `max_results_per_source` accepted from callers.
pub const MAX_RESULTS_PER_SOURCE: usize = 50;

/// A non-negative, finite price.
///
/// The only way to build one is [`Price::new`], so every [`PriceRecord`]
/// carries a price that satisfies `price >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Price(f64);

impl Price {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value >= 0.0).then_some(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Stock status reported by a source for one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Limited,
    #[default]
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "in_stock",
            Availability::OutOfStock => "out_of_stock",
            Availability::Limited => "limited",
            Availability::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_stock" => Ok(Availability::InStock),
            "out_of_stock" => Ok(Availability::OutOfStock),
            "limited" => Ok(Availability::Limited),
            "unknown" => Ok(Availability::Unknown),
            _ => Err(format!("Unknown availability: {s}")),
        }
    }
}

/// One offer for the searched product, as extracted from one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub source: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub price: Price,
    pub currency: String,
    pub availability: Availability,
    pub shipping_cost: Option<Price>,
    pub shipping_time: Option<String>,
    pub seller_name: Option<String>,
    pub seller_rating: Option<f32>,
}

impl PriceRecord {
    /// Create a record priced in EUR with unknown availability.
    pub fn new(source: impl Into<String>, price: Price) -> Self {
        Self {
            source: source.into(),
            source_url: None,
            title: None,
            price,
            currency: "EUR".to_string(),
            availability: Availability::Unknown,
            shipping_cost: None,
            shipping_time: None,
            seller_name: None,
            seller_rating: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_shipping_cost(mut self, cost: Price) -> Self {
        self.shipping_cost = Some(cost);
        self
    }

    pub fn with_shipping_time(mut self, time: impl Into<String>) -> Self {
        self.shipping_time = Some(time.into());
        self
    }

    pub fn with_seller(mut self, seller: impl Into<String>) -> Self {
        self.seller_name = Some(seller.into());
        self
    }

    pub fn with_seller_rating(mut self, rating: f32) -> Self {
        self.seller_rating = Some(rating);
        self
    }
}

/// Raw search request as received from an upstream caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub barcode: Option<String>,
    pub sources: Vec<String>,
    pub max_results_per_source: usize,
}

/// A validated query, ready to be dispatched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    /// Trimmed free-text term (may be empty when a barcode is given).
    pub term: String,
    pub barcode: Option<String>,
    /// Source ids in the caller's order.
    pub sources: Vec<String>,
    pub max_results: usize,
}

impl SearchQuery {
    /// Validate a request against the catalog.
    ///
    /// This is the only place an [`AppError::InvalidRequest`] is produced.
    pub fn from_request(request: SearchRequest, catalog: &SourceCatalog) -> Result<Self, AppError> {
        if request.sources.is_empty() {
            return Err(AppError::InvalidRequest(
                "at least one source is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &request.sources {
            if !catalog.contains(source) {
                return Err(AppError::InvalidRequest(format!("unknown source: {source}")));
            }
            if !seen.insert(source.as_str()) {
                return Err(AppError::InvalidRequest(format!(
                    "duplicate source: {source}"
                )));
            }
        }

        if request.max_results_per_source == 0
            || request.max_results_per_source > MAX_RESULTS_PER_SOURCE
        {
            return Err(AppError::InvalidRequest(format!(
                "max_results_per_source must be between 1 and {MAX_RESULTS_PER_SOURCE}"
            )));
        }

        let barcode = request
            .barcode
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());

        if let Some(code) = &barcode
            && !is_valid_barcode(code)
        {
            return Err(AppError::InvalidRequest(format!(
                "malformed barcode '{code}': expected 8 to 14 digits"
            )));
        }

        let term = request.query.trim().to_string();
        if term.is_empty() && barcode.is_none() {
            return Err(AppError::InvalidRequest(
                "a query or a barcode is required".into(),
            ));
        }

        Ok(Self {
            term,
            barcode,
            sources: request.sources,
            max_results: request.max_results_per_source,
        })
    }

    /// The string actually typed into each site's search box.
    ///
    /// A barcode is far more precise than free text, so it wins when present.
    pub fn search_term(&self) -> &str {
        self.barcode.as_deref().unwrap_or(&self.term)
    }

    /// Cache signature: normalized term, barcode and the sorted source set.
    ///
    /// A text+barcode query and a barcode-only query produce different
    /// signatures.
    pub fn signature(&self) -> String {
        let term = self
            .term
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let mut sources: Vec<&str> = self.sources.iter().map(String::as_str).collect();
        sources.sort_unstable();

        let raw = format!(
            "{term}\u{1f}{}\u{1f}{}",
            self.barcode.as_deref().unwrap_or(""),
            sources.join(",")
        );
        compute_hash(&raw)
    }
}

/// EAN-8, UPC-A, EAN-13 and GTIN-14 are all 8 to 14 digits long.
fn is_valid_barcode(code: &str) -> bool {
    (8..=14).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit())
}

/// Outcome of one source within one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult {
    pub source: String,
    pub success: bool,
    pub records: Vec<PriceRecord>,
    pub error_kind: Option<SourceErrorKind>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl SourceResult {
    pub fn success(source: impl Into<String>, records: Vec<PriceRecord>, elapsed: Duration) -> Self {
        Self {
            source: source.into(),
            success: true,
            records,
            error_kind: None,
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// A failed result never carries records.
    pub fn failure(source: impl Into<String>, error: &SourceError, elapsed: Duration) -> Self {
        Self {
            source: source.into(),
            success: false,
            records: Vec::new(),
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// The merged, ranked answer for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub query: SearchQuery,
    /// One entry per requested source, in requested order.
    pub results: Vec<SourceResult>,
    pub best: Option<PriceRecord>,
    pub search_time_ms: u64,
    pub cached_at: DateTime<Utc>,
}

impl AggregateResult {
    pub fn all_failed(&self) -> bool {
        self.results.iter().all(|r| !r.success)
    }

    pub fn successful_sources(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
