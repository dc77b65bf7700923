//! Per-partition pagination.
//!
//! Each partition is drained by a small state machine:
//!
//! ```text
//! Requesting(page) --page > cap--------------> Done(SafetyCap)
//!                  --cancelled---------------> Done(Cancelled)
//!                  --request failed----------> Done(HttpError)   pages so far kept
//!                  --short or empty page-----> Done(Exhausted)
//!                  --full page---------------> Requesting(page + 1)
//! ```
//!
//! Pages within a partition are strictly sequential: whether page N+1 exists
//! depends on the size of page N.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::AccessToken;
use crate::client::{PageRequest, PlatformClient};
use crate::config::RetrievalConfig;
use crate::error::SweepError;
use crate::models::{Filter, PartitionOutcome, RawRecord, StopReason};

/// Tracing target of the structured event emitted when the page cap is hit.
pub const SAFETY_CAP_TARGET: &str = "recordsweep::safety_cap";

enum FetchState {
    Requesting { page: u32 },
    Done(StopReason),
}

/// Records and stop reason from draining one request sequence.
#[derive(Debug)]
pub struct Drained {
    /// Records in page order
    pub records: Vec<RawRecord>,
    /// Page requests issued, including the one that stopped the loop
    pub pages_requested: u32,
    /// Why the loop stopped
    pub stop: StopReason,
}

/// Drains partitions page by page.
#[derive(Clone)]
pub struct PageFetcher {
    client: Arc<dyn PlatformClient>,
    max_pages: u32,
    request_timeout: Duration,
    throttle: Option<Duration>,
}

impl PageFetcher {
    /// Creates a fetcher using the safety cap, timeout, and throttle from `config`.
    pub fn new(client: Arc<dyn PlatformClient>, config: &RetrievalConfig) -> Self {
        Self {
            client,
            max_pages: config.max_pages_per_partition,
            request_timeout: config.request_timeout,
            throttle: config.throttle_ms.map(Duration::from_millis),
        }
    }

    /// Fetches every page of one partition.
    ///
    /// Never fails: request errors, the safety cap, and cancellation all end
    /// the partition early with the pages gathered so far.
    pub async fn fetch_partition(
        &self,
        token: &AccessToken,
        table: &str,
        filter: Filter,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> PartitionOutcome {
        let request = PageRequest::new(table, filter.clause.clone(), page_size, 1);
        let drained = self.drain(token, request, &filter.to_string(), cancel).await;

        if drained.stop.is_partial() {
            warn!(
                table,
                filter = %filter,
                pages = drained.pages_requested,
                records = drained.records.len(),
                reason = %drained.stop,
                "Partition stopped before it was drained"
            );
        }

        PartitionOutcome {
            filter,
            records: drained.records,
            pages_requested: drained.pages_requested,
            stop: drained.stop,
        }
    }

    /// Runs the pagination loop for `first`, which must be the page-1 request.
    ///
    /// `label` identifies the sequence in log events.
    pub async fn drain(
        &self,
        token: &AccessToken,
        first: PageRequest,
        label: &str,
        cancel: &CancellationToken,
    ) -> Drained {
        let page_size = first.page_size;
        let mut records = Vec::new();
        let mut pages_requested = 0_u32;
        let mut state = FetchState::Requesting { page: 1 };

        let stop = loop {
            let page = match state {
                FetchState::Done(reason) => break reason,
                FetchState::Requesting { page } => page,
            };

            if page > self.max_pages {
                warn!(
                    target: SAFETY_CAP_TARGET,
                    table = %first.table,
                    filter = label,
                    pages = pages_requested,
                    page_size,
                    "Page safety cap reached; more rows may remain upstream"
                );
                state = FetchState::Done(StopReason::SafetyCap {
                    pages: pages_requested,
                });
                continue;
            }

            if cancel.is_cancelled() {
                state = FetchState::Done(StopReason::Cancelled);
                continue;
            }

            if page > 1 {
                if let Some(delay) = self.throttle {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            state = FetchState::Done(StopReason::Cancelled);
                            continue;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            let request = first.with_page_number(page);
            pages_requested += 1;

            let result =
                tokio::time::timeout(self.request_timeout, self.client.fetch_page(token, &request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(SweepError::timeout("Page request", self.request_timeout))
                    });

            state = match result {
                Ok(batch) => {
                    let received = batch.len();
                    debug!(
                        table = %first.table,
                        filter = label,
                        page,
                        received,
                        "Fetched page"
                    );
                    records.extend(batch);

                    if received < page_size as usize {
                        FetchState::Done(StopReason::Exhausted)
                    } else {
                        FetchState::Requesting { page: page + 1 }
                    }
                }
                Err(e) => {
                    warn!(
                        table = %first.table,
                        filter = label,
                        page,
                        "Page request failed: {}",
                        e
                    );
                    FetchState::Done(StopReason::HttpError {
                        status: e.status(),
                        message: e.to_string(),
                    })
                }
            };
        };

        Drained {
            records,
            pages_requested,
            stop,
        }
    }
}
