use std::cmp::Ordering;
use std::time::Duration;

use chrono::Utc;

use crate::catalog::SourceCatalog;
use crate::models::{AggregateResult, PriceRecord, SearchQuery, SourceResult};

/// Merges per-source outcomes into an [`AggregateResult`].
///
/// The best offer is the cheapest record among successful sources. Equal
/// prices go to the source ranked first; sources outside the ranking come
/// last, and any remaining tie keeps the first record seen.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    ranking: Vec<String>,
}

impl ResultAggregator {
    pub fn new(ranking: Vec<String>) -> Self {
        Self { ranking }
    }

    /// Rank sources by catalog reliability tier, then catalog order.
    pub fn from_catalog(catalog: &SourceCatalog) -> Self {
        Self::new(catalog.ranking())
    }

    /// Put `priority` ahead of the current ranking.
    pub fn with_priority(self, priority: &[String]) -> Self {
        let mut ranking: Vec<String> = priority.to_vec();
        for source in self.ranking {
            if !ranking.contains(&source) {
                ranking.push(source);
            }
        }
        Self { ranking }
    }

    pub fn ranking(&self) -> &[String] {
        &self.ranking
    }

    fn rank(&self, source: &str) -> usize {
        self.ranking
            .iter()
            .position(|s| s == source)
            .unwrap_or(usize::MAX)
    }

    fn compare(&self, a: &PriceRecord, b: &PriceRecord) -> Ordering {
        a.price
            .value()
            .total_cmp(&b.price.value())
            .then_with(|| self.rank(&a.source).cmp(&self.rank(&b.source)))
    }

    /// Cheapest record across successful results, if any.
    pub fn best(&self, results: &[SourceResult]) -> Option<PriceRecord> {
        results
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.records.iter())
            .min_by(|a, b| self.compare(a, b))
            .cloned()
    }

    pub fn aggregate(
        &self,
        query: &SearchQuery,
        results: Vec<SourceResult>,
        elapsed: Duration,
    ) -> AggregateResult {
        let best = self.best(&results);
        AggregateResult {
            query: query.clone(),
            results,
            best,
            search_time_ms: elapsed.as_millis() as u64,
            cached_at: Utc::now(),
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::from_catalog(&SourceCatalog::default())
    }
}
