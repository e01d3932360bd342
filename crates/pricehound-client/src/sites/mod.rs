//! Retail site adapters.
//!
//! Each site lives in its own module and implements [`RetailSite`]: where to
//! search and how to read the results page. [`SiteAdapter`] turns a site into
//! a [`SourceAdapter`] with bounded retry, block detection and a timeout.

pub mod amazon;
pub mod eprice;
pub mod mediaworld;
pub mod trovaprezzi;
pub mod unieuro;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use pricehound_core::error::SourceError;
use pricehound_core::models::{Availability, Price, PriceRecord, SearchQuery};
use pricehound_core::traits::{PageRequest, PageSession, SourceAdapter};
use scraper::{ElementRef, Html, Selector};
use url::Url;

pub use amazon::Amazon;
pub use eprice::Eprice;
pub use mediaworld::MediaWorld;
pub use trovaprezzi::TrovaPrezzi;
pub use unieuro::Unieuro;

/// Default per-source timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One retail site's search URL and extraction rules.
pub trait RetailSite: Send + Sync + 'static {
    /// Catalog id of the site.
    const ID: &'static str;

    fn search_url(&self, term: &str) -> String;

    /// Selector a rendering backend should wait for before reading the DOM.
    fn wait_for(&self) -> Option<&'static str> {
        None
    }

    /// Extract at most `max_results` records from a results page.
    fn parse(&self, html: &str, max_results: usize) -> Result<Vec<PriceRecord>, SourceError>;
}

/// Bounded retry for transient network failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Wait after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// [`SourceAdapter`] for any [`RetailSite`].
pub struct SiteAdapter<S> {
    site: S,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<S: RetailSite> SiteAdapter<S> {
    pub fn new(site: S) -> Self {
        Self {
            site,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Every attempt goes back through `session`, so a throttled session
    /// spaces retries like any other request to the site.
    async fn load_with_retry(
        &self,
        session: &dyn PageSession,
        request: &PageRequest,
    ) -> Result<String, SourceError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match session.load(request).await {
                Ok(html) => return Ok(html),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let wait = self.retry.backoff * attempt;
                    tracing::warn!(
                        source = S::ID,
                        attempt,
                        error = %e,
                        retry_in_ms = %wait.as_millis(),
                        "Load failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run(
        &self,
        session: &dyn PageSession,
        query: &SearchQuery,
        max_results: usize,
    ) -> Result<Vec<PriceRecord>, SourceError> {
        let request = PageRequest {
            url: self.site.search_url(query.search_term()),
            wait_for: self.site.wait_for().map(str::to_string),
            timeout: self.timeout,
        };
        tracing::debug!(source = S::ID, url = %request.url, "Loading search page");

        let html = self.load_with_retry(session, &request).await?;
        if let Some(marker) = detect_block(&html) {
            return Err(SourceError::Blocked(format!("{} served a {marker} page", S::ID)));
        }
        self.site.parse(&html, max_results)
    }
}

impl<S: RetailSite> SourceAdapter for SiteAdapter<S> {
    fn source_id(&self) -> &'static str {
        S::ID
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn search<'a>(
        &'a self,
        session: &'a dyn PageSession,
        query: &'a SearchQuery,
        max_results: usize,
    ) -> BoxFuture<'a, Result<Vec<PriceRecord>, SourceError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.run(session, query, max_results))
                .await
                .map_err(|_| SourceError::AdapterTimeout(self.timeout))?
        })
    }
}

/// One adapter per catalog source.
pub fn default_adapters(timeout: Duration) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(SiteAdapter::new(Amazon).with_timeout(timeout)),
        Arc::new(SiteAdapter::new(Eprice).with_timeout(timeout)),
        Arc::new(SiteAdapter::new(Unieuro).with_timeout(timeout)),
        Arc::new(SiteAdapter::new(MediaWorld).with_timeout(timeout)),
        Arc::new(SiteAdapter::new(TrovaPrezzi).with_timeout(timeout)),
    ]
}

// ---------------------------------------------------------------------------
// Page helpers
// ---------------------------------------------------------------------------

const BLOCK_MARKERS: &[(&str, &str)] = &[
    ("validatecaptcha", "CAPTCHA"),
    ("g-recaptcha", "CAPTCHA"),
    ("captcha-delivery", "CAPTCHA"),
    ("inserisci i caratteri", "CAPTCHA"),
    ("robot check", "robot check"),
    ("not a robot", "robot check"),
    ("access denied", "access denied"),
    ("accesso negato", "access denied"),
];

/// Name of the anti-bot page `html` looks like, if any.
pub fn detect_block(html: &str) -> Option<&'static str> {
    let lower = html.to_lowercase();
    BLOCK_MARKERS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, name)| *name)
}

pub(crate) fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("invalid selector '{css}': {e}")))
}

/// Run `extract` over every listing container, keeping the first `max_results` hits.
///
/// A listing that does not yield a record is skipped. Finding containers but
/// extracting nothing from any of them means the page layout changed.
pub(crate) fn extract_listings<F>(
    source: &str,
    html: &str,
    container: &str,
    max_results: usize,
    extract: F,
) -> Result<Vec<PriceRecord>, SourceError>
where
    F: Fn(ElementRef<'_>) -> Option<PriceRecord>,
{
    let document = Html::parse_document(html);
    let container = selector(container)?;

    let mut found = 0;
    let mut records = Vec::new();
    for item in document.select(&container) {
        found += 1;
        match extract(item) {
            Some(record) => records.push(record),
            None => tracing::debug!(source, "Skipping unparsable listing"),
        }
        if records.len() >= max_results {
            break;
        }
    }

    if found > 0 && records.is_empty() {
        return Err(SourceError::Parse(format!(
            "{found} listings found on {source} but none could be parsed"
        )));
    }
    Ok(records)
}

/// Collapsed text of the first element matching `sel` under `item`.
pub(crate) fn text_of(item: ElementRef<'_>, sel: &Selector) -> Option<String> {
    item.select(sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

pub(crate) fn href_of(item: ElementRef<'_>, sel: &Selector, base: &str) -> Option<String> {
    let href = item.select(sel).next()?.value().attr("href")?;
    absolute_url(base, href)
}

pub(crate) fn absolute_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(String::from)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Encode a search term for a query string, spaces as `+`.
pub(crate) fn encode_plus(term: &str) -> String {
    url::form_urlencoded::byte_serialize(term.as_bytes()).collect()
}

/// Encode a search term for a query string, spaces as `%20`.
pub(crate) fn encode_percent(term: &str) -> String {
    encode_plus(term).replace('+', "%20")
}

// ---------------------------------------------------------------------------
// Text parsing
// ---------------------------------------------------------------------------

/// Parse a displayed price such as `1.299,99 €`, `€ 84,50` or `79.99`.
pub fn parse_price(text: &str) -> Option<Price> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let number: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let number = number.trim_end_matches(['.', ',']);

    let normalized = match (number.rfind(','), number.rfind('.')) {
        // Both separators: whichever comes last is the decimal one.
        (Some(comma), Some(dot)) if comma > dot => number.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => number.replace(',', ""),
        (Some(_), None) => number.replace(',', "."),
        (None, Some(dot)) => {
            let decimals = number.len() - dot - 1;
            if decimals == 3 {
                number.replace('.', "")
            } else {
                number.to_string()
            }
        }
        (None, None) => number.to_string(),
    };

    normalized.parse::<f64>().ok().and_then(Price::new)
}

/// Map Italian or English stock wording to [`Availability`].
pub fn parse_availability(text: &str) -> Availability {
    let lower = text.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["non disponibile", "esaurito", "out of stock", "non acquistabile"]) {
        Availability::OutOfStock
    } else if any(&["ultimi", "pochi pezzi", "solo ", "scorte limitate", "only "]) {
        Availability::Limited
    } else if any(&["disponibil", "in stock", "spedizione immediata", "in magazzino"]) {
        Availability::InStock
    } else {
        Availability::Unknown
    }
}

/// Parse a shipping cost; free shipping is a zero price.
pub fn parse_shipping_cost(text: &str) -> Option<Price> {
    let lower = text.to_lowercase();
    if ["gratis", "gratuita", "free"].iter().any(|w| lower.contains(w)) {
        return Price::new(0.0);
    }
    parse_price(text)
}

/// Parse a rating such as `4,5 su 5 stelle`.
pub fn parse_rating(text: &str) -> Option<f32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let number: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let rating: f32 = number.replace(',', ".").parse().ok()?;
    (0.0..=5.0).contains(&rating).then_some(rating)
}
