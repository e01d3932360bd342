//! Price discovery for many items at once (e.g. the lines of a quote).
//!
//! Each item runs as its own task against the shared
//! [`PriceSearchService`], so items can finish, fail or be cancelled
//! independently. [`BatchHandle::wait`] returns only once every item has
//! concluded.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{AggregateResult, Price, SearchRequest};
use crate::service::PriceSearchService;

/// One line to price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub description: String,
    pub barcode: Option<String>,
}

/// How one item concluded.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Completed { result: Arc<AggregateResult> },
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub index: usize,
    pub item: BatchItem,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Final state of a batch, one report per item in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub items: Vec<ItemReport>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Cancelled))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.outcome)).count()
    }
}

/// Events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    Started {
        batch_id: Uuid,
        items: usize,
    },
    ItemCompleted {
        batch_id: Uuid,
        index: usize,
        best_price: Option<Price>,
    },
    ItemFailed {
        batch_id: Uuid,
        index: usize,
        error: &'a str,
    },
    ItemCancelled {
        batch_id: Uuid,
        index: usize,
    },
    Finished {
        batch_id: Uuid,
        completed: usize,
        failed: usize,
        cancelled: usize,
    },
}

/// Trait for receiving batch events (decoupled logging).
pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchReporter;

impl BatchReporter for TracingBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        match event {
            BatchEvent::Started { batch_id, items } => {
                tracing::info!(%batch_id, %items, "Batch started");
            }
            BatchEvent::ItemCompleted {
                batch_id,
                index,
                best_price,
            } => {
                tracing::info!(%batch_id, %index, best_price = ?best_price.map(|p| p.value()), "Item priced");
            }
            BatchEvent::ItemFailed {
                batch_id,
                index,
                error,
            } => {
                tracing::warn!(%batch_id, %index, %error, "Item failed");
            }
            BatchEvent::ItemCancelled { batch_id, index } => {
                tracing::info!(%batch_id, %index, "Item cancelled");
            }
            BatchEvent::Finished {
                batch_id,
                completed,
                failed,
                cancelled,
            } => {
                tracing::info!(%batch_id, %completed, %failed, %cancelled, "Batch finished");
            }
        }
    }
}

/// Starts batches on a shared service.
pub struct BatchSearch {
    service: Arc<PriceSearchService>,
}

impl BatchSearch {
    pub fn new(service: Arc<PriceSearchService>) -> Self {
        Self { service }
    }

    /// Spawn one search task per item and return immediately.
    ///
    /// Items carrying a barcode search by barcode; the description is kept
    /// as the free-text fallback.
    pub fn start(
        &self,
        items: Vec<BatchItem>,
        sources: Vec<String>,
        max_results_per_source: usize,
    ) -> BatchHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let tasks = items
            .into_iter()
            .map(|item| {
                let request = SearchRequest {
                    query: item.description.clone(),
                    barcode: item.barcode.clone(),
                    sources: sources.clone(),
                    max_results_per_source,
                };
                let handle = tokio::spawn(search_item(
                    Arc::clone(&self.service),
                    request,
                    cancel.child_token(),
                ));
                (item, handle)
            })
            .collect();

        BatchHandle {
            id,
            cancel,
            started: Instant::now(),
            tasks,
        }
    }
}

async fn search_item(
    service: Arc<PriceSearchService>,
    request: SearchRequest,
    cancel: CancellationToken,
) -> ItemOutcome {
    tokio::select! {
        biased;
        () = cancel.cancelled() => ItemOutcome::Cancelled,
        outcome = service.search_prices(request) => match outcome {
            Ok(result) => ItemOutcome::Completed { result },
            Err(e) => ItemOutcome::Failed { error: e.to_string() },
        },
    }
}

/// A running batch.
pub struct BatchHandle {
    id: Uuid,
    cancel: CancellationToken,
    started: Instant,
    tasks: Vec<(BatchItem, JoinHandle<ItemOutcome>)>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Token that cancels every item still running when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for every item to conclude and report each one.
    pub async fn wait<R: BatchReporter>(self, reporter: &R) -> BatchReport {
        let batch_id = self.id;
        reporter.report(BatchEvent::Started {
            batch_id,
            items: self.tasks.len(),
        });

        let mut items = Vec::with_capacity(self.tasks.len());
        for (index, (item, handle)) in self.tasks.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => ItemOutcome::Failed {
                    error: format!("item task failed: {e}"),
                },
            };

            match &outcome {
                ItemOutcome::Completed { result } => reporter.report(BatchEvent::ItemCompleted {
                    batch_id,
                    index,
                    best_price: result.best.as_ref().map(|b| b.price),
                }),
                ItemOutcome::Failed { error } => reporter.report(BatchEvent::ItemFailed {
                    batch_id,
                    index,
                    error,
                }),
                ItemOutcome::Cancelled => {
                    reporter.report(BatchEvent::ItemCancelled { batch_id, index })
                }
            }

            items.push(ItemReport {
                index,
                item,
                outcome,
            });
        }

        let report = BatchReport {
            batch_id,
            items,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        reporter.report(BatchEvent::Finished {
            batch_id,
            completed: report.completed(),
            failed: report.failed(),
            cancelled: report.cancelled(),
        });
        report
    }
}
