use pricehound_core::error::SourceError;
use pricehound_core::models::{Availability, PriceRecord};

use super::{
    RetailSite, encode_percent, extract_listings, href_of, parse_availability, parse_price,
    selector, text_of,
};

const BASE: &str = "https://www.mediaworld.it";

/// MediaWorld search results.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaWorld;

impl RetailSite for MediaWorld {
    const ID: &'static str = "mediaworld";

    fn search_url(&self, term: &str) -> String {
        format!("{BASE}/search?query={}", encode_percent(term))
    }

    fn wait_for(&self) -> Option<&'static str> {
        Some(r#"[data-test="mms-product-card"]"#)
    }

    fn parse(&self, html: &str, max_results: usize) -> Result<Vec<PriceRecord>, SourceError> {
        let title = selector(r#"[data-test="product-title"]"#)?;
        let link = selector("a")?;
        let price = selector(r#"[data-test="product-price"]"#)?;
        let delivery = selector(r#"[data-test="mms-delivery-online-availability"]"#)?;

        extract_listings(
            Self::ID,
            html,
            r#"[data-test="mms-product-card"]"#,
            max_results,
            |item| {
                let title = text_of(item, &title)?;
                let price = parse_price(&text_of(item, &price)?)?;
                let delivery = text_of(item, &delivery);
                let availability = delivery
                    .as_deref()
                    .map(parse_availability)
                    .unwrap_or(Availability::InStock);

                let mut record = PriceRecord::new(Self::ID, price)
                    .with_title(title)
                    .with_availability(availability)
                    .with_seller("MediaWorld");
                if let Some(url) = href_of(item, &link, BASE) {
                    record = record.with_url(url);
                }
                if let Some(text) = delivery {
                    record = record.with_shipping_time(text);
                }
                Some(record)
            },
        )
    }
}
