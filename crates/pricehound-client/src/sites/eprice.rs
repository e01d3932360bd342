use pricehound_core::error::SourceError;
use pricehound_core::models::{Availability, PriceRecord};

use super::{
    RetailSite, encode_percent, extract_listings, href_of, parse_availability, parse_price,
    selector, text_of,
};

const BASE: &str = "https://www.eprice.it";

/// ePRICE search results.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eprice;

impl RetailSite for Eprice {
    const ID: &'static str = "eprice";

    fn search_url(&self, term: &str) -> String {
        format!("{BASE}/s/?k={}", encode_percent(term))
    }

    fn parse(&self, html: &str, max_results: usize) -> Result<Vec<PriceRecord>, SourceError> {
        let title = selector(".productCard__title")?;
        let link = selector("a.productCard__link")?;
        let price = selector(".productCard__price")?;
        let availability = selector(".productCard__availability")?;

        extract_listings(Self::ID, html, ".productCard", max_results, |item| {
            let title = text_of(item, &title)?;
            let price = parse_price(&text_of(item, &price)?)?;
            // Listed products are purchasable unless the card says otherwise.
            let availability = text_of(item, &availability)
                .map(|t| parse_availability(&t))
                .unwrap_or(Availability::InStock);

            let mut record = PriceRecord::new(Self::ID, price)
                .with_title(title)
                .with_availability(availability)
                .with_seller("ePRICE");
            if let Some(url) = href_of(item, &link, BASE) {
                record = record.with_url(url);
            }
            Some(record)
        })
    }
}
