use pricehound_core::error::SourceError;
use pricehound_core::models::{Availability, Price, PriceRecord};

use super::{RetailSite, encode_plus, extract_listings, href_of, parse_rating, selector, text_of};

const BASE: &str = "https://www.amazon.it";
const RESULT: &str = r#"[data-component-type="s-search-result"]"#;

/// Amazon.it search results.
#[derive(Debug, Clone, Copy, Default)]
pub struct Amazon;

impl RetailSite for Amazon {
    const ID: &'static str = "amazon";

    fn search_url(&self, term: &str) -> String {
        format!("{BASE}/s?k={}", encode_plus(term))
    }

    fn wait_for(&self) -> Option<&'static str> {
        Some(RESULT)
    }

    fn parse(&self, html: &str, max_results: usize) -> Result<Vec<PriceRecord>, SourceError> {
        let title = selector("h2 span")?;
        let link = selector("h2 a, a.a-link-normal.s-no-outline")?;
        let whole = selector(".a-price .a-price-whole")?;
        let fraction = selector(".a-price .a-price-fraction")?;
        let in_stock = selector(".a-color-success")?;
        let delivery = selector(r#"[data-cy="delivery-recipe"]"#)?;
        let rating = selector(".a-icon-alt")?;

        extract_listings(Self::ID, html, RESULT, max_results, |item| {
            let title = text_of(item, &title)?;
            let price = split_price(&text_of(item, &whole)?, text_of(item, &fraction).as_deref())?;

            let availability = if item.select(&in_stock).next().is_some() {
                Availability::InStock
            } else {
                Availability::Unknown
            };

            let mut record = PriceRecord::new(Self::ID, price)
                .with_title(title)
                .with_availability(availability)
                .with_seller("Amazon");
            if let Some(url) = href_of(item, &link, BASE) {
                record = record.with_url(url);
            }
            if let Some(eta) = text_of(item, &delivery) {
                record = record.with_shipping_time(eta);
            }
            if let Some(stars) = text_of(item, &rating).as_deref().and_then(parse_rating) {
                record = record.with_seller_rating(stars);
            }
            Some(record)
        })
    }
}

/// Amazon renders `1.299,` and `99` in separate spans.
fn split_price(whole: &str, fraction: Option<&str>) -> Option<Price> {
    let whole: String = whole.chars().filter(|c| c.is_ascii_digit()).collect();
    if whole.is_empty() {
        return None;
    }
    let fraction: String = fraction
        .unwrap_or("00")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let fraction = if fraction.is_empty() { "00".to_string() } else { fraction };
    format!("{whole}.{fraction}").parse().ok().and_then(Price::new)
}
