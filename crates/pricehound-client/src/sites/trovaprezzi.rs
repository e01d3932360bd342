//! TrovaPrezzi is a price aggregator: every listing is a different shop's
//! offer, so the seller comes from the listing rather than being fixed.

use pricehound_core::error::SourceError;
use pricehound_core::models::{Availability, PriceRecord};

use super::{
    RetailSite, encode_plus, extract_listings, href_of, parse_availability, parse_price,
    parse_shipping_cost, selector, text_of,
};

const BASE: &str = "https://www.trovaprezzi.it";

#[derive(Debug, Clone, Copy, Default)]
pub struct TrovaPrezzi;

impl RetailSite for TrovaPrezzi {
    const ID: &'static str = "trovaprezzi";

    fn search_url(&self, term: &str) -> String {
        format!("{BASE}/prezzi_prodotti.aspx?q={}", encode_plus(term))
    }

    fn parse(&self, html: &str, max_results: usize) -> Result<Vec<PriceRecord>, SourceError> {
        let title = selector(".item_prodotto_nome")?;
        let link = selector(".item_prodotto_nome a")?;
        let price = selector(".item_prodotto_prezzo_offerta")?;
        let shop = selector(".item_prodotto_negozio")?;
        let shipping = selector(".item_prodotto_spedizione")?;
        let stock = selector(".item_prodotto_disponibilita")?;

        extract_listings(Self::ID, html, ".item_prodotto", max_results, |item| {
            let title = text_of(item, &title)?;
            let price = parse_price(&text_of(item, &price)?)?;
            let seller = text_of(item, &shop).unwrap_or_else(|| "TrovaPrezzi".to_string());
            let availability = text_of(item, &stock)
                .map(|t| parse_availability(&t))
                .unwrap_or(Availability::InStock);

            let mut record = PriceRecord::new(Self::ID, price)
                .with_title(title)
                .with_availability(availability)
                .with_seller(seller);
            if let Some(url) = href_of(item, &link, BASE) {
                record = record.with_url(url);
            }
            if let Some(cost) = text_of(item, &shipping).as_deref().and_then(parse_shipping_cost) {
                record = record.with_shipping_cost(cost);
            }
            Some(record)
        })
    }
}
