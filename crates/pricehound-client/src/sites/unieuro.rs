use pricehound_core::error::SourceError;
use pricehound_core::models::{Availability, PriceRecord};

use super::{
    RetailSite, encode_plus, extract_listings, href_of, parse_availability, parse_price, selector,
    text_of,
};

const BASE: &str = "https://www.unieuro.it";

/// Unieuro search results.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unieuro;

impl RetailSite for Unieuro {
    const ID: &'static str = "unieuro";

    fn search_url(&self, term: &str) -> String {
        format!("{BASE}/online/ricerca?q={}", encode_plus(term))
    }

    fn parse(&self, html: &str, max_results: usize) -> Result<Vec<PriceRecord>, SourceError> {
        let title = selector(".product-card__title")?;
        let link = selector("a")?;
        let price = selector(".product-card__price")?;
        let stock = selector(".product-card__availability")?;

        extract_listings(Self::ID, html, ".product-card", max_results, |item| {
            let title = text_of(item, &title)?;
            let price = parse_price(&text_of(item, &price)?)?;
            let availability = text_of(item, &stock)
                .map(|t| parse_availability(&t))
                .unwrap_or(Availability::InStock);

            let mut record = PriceRecord::new(Self::ID, price)
                .with_title(title)
                .with_availability(availability)
                .with_seller("Unieuro");
            if let Some(url) = href_of(item, &link, BASE) {
                record = record.with_url(url);
            }
            Some(record)
        })
    }
}
