//! Batch enrichment orchestrator
//!
//! Drives one [`BatchJob`] through the fetcher and the record sink with a
//! bounded number of items in flight.
//!
//! **Algorithm:**
//! 1. Acquire a credential up front; failure stops the run before any item
//! 2. Seed up to `concurrency_limit` item tasks
//! 3. As each task completes, aggregate its outcome and start the next item,
//!    unless the stop signal is set
//! 4. A systemic failure (authentication rejected after refresh, credential
//!    unavailable) sets the stop signal; items already running finish, items
//!    not yet started are recorded as stopped
//!
//! Each worker waits `inter_request_delay` after its own item before its slot
//! is released, so with a limit of 1 items run strictly in job order.

use crate::error::{BatchError, FetchError};
use crate::models::{BatchJob, BatchResult, STOPPED_REASON_PREFIX};
use crate::services::record_sink::RecordSink;
use crate::services::request_executor::EnrichmentFetcher;
use crate::services::token_cache::TokenCache;
use crate::utils::{Sleeper, TokioSleeper};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Stop reason when the caller's signal (e.g. Ctrl-C) ended the run
pub const INTERRUPTED_REASON: &str = "interrupted";

#[derive(Debug)]
enum ItemOutcome {
    Committed,
    Failed(String),
    Systemic(String),
}

/// Runs enrichment batches
pub struct BatchOrchestrator {
    token_cache: TokenCache,
    fetcher: Arc<dyn EnrichmentFetcher>,
    sink: Arc<dyn RecordSink>,
    sleeper: Arc<dyn Sleeper>,
}

impl BatchOrchestrator {
    pub fn new(
        token_cache: TokenCache,
        fetcher: Arc<dyn EnrichmentFetcher>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            token_cache,
            fetcher,
            sink,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used for the inter-request delay
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run `job` to completion or until stopped
    ///
    /// `stop` is observed before each item starts; cancelling it has the same
    /// effect as a systemic failure with reason [`INTERRUPTED_REASON`]. The
    /// orchestrator never cancels the caller's token itself.
    ///
    /// Returns `Err` only when a worker task panicked.
    pub async fn run(
        &self,
        job: BatchJob,
        stop: CancellationToken,
    ) -> Result<BatchResult, BatchError> {
        let ids = dedupe(job.entity_ids);
        let result = BatchResult::new(ids.len());
        let span = tracing::info_span!("batch_run", run_id = %result.run_id);

        self.execute(
            ids,
            job.concurrency_limit.max(1),
            job.inter_request_delay,
            stop.child_token(),
            result,
        )
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        ids: Vec<String>,
        concurrency_limit: usize,
        inter_request_delay: Duration,
        stop: CancellationToken,
        mut result: BatchResult,
    ) -> Result<BatchResult, BatchError> {
        tracing::info!(
            total = result.total,
            concurrency_limit,
            delay_ms = inter_request_delay.as_millis() as u64,
            "Starting enrichment batch"
        );

        if let Err(err) = self.token_cache.acquire(false).await {
            tracing::error!(error = %err, "No credential available, batch not started");
            result.record_stop(FetchError::from(err).to_string());
            result.finished_at = Some(Utc::now());
            return Ok(result);
        }

        let mut pending = ids.into_iter();
        let mut tasks = FuturesUnordered::new();

        loop {
            while tasks.len() < concurrency_limit && !stop.is_cancelled() {
                let Some(id) = pending.next() else {
                    break;
                };
                tasks.push(self.spawn_item(id, inter_request_delay, stop.clone()));
            }

            let Some(joined) = tasks.next().await else {
                break;
            };

            let (id, outcome) = match joined {
                Ok(done) => done,
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Batch worker failed, aborting run");
                    stop.cancel();
                    for task in tasks.iter() {
                        task.abort();
                    }
                    return Err(BatchError::WorkerPanicked(join_error.to_string()));
                }
            };

            match outcome {
                ItemOutcome::Committed => {
                    tracing::info!(artist_id = %id, "Artist enriched");
                    result.record_success(id);
                }
                ItemOutcome::Failed(reason) => {
                    tracing::warn!(artist_id = %id, reason = %reason, "Artist enrichment failed");
                    result.record_failure(id, reason);
                }
                ItemOutcome::Systemic(reason) => {
                    tracing::error!(
                        artist_id = %id,
                        reason = %reason,
                        "Systemic failure, stopping batch"
                    );
                    result.record_failure(id, reason.clone());
                    result.record_stop(reason);
                    stop.cancel();
                }
            }
        }

        let skipped: Vec<String> = pending.collect();
        if !skipped.is_empty() {
            if result.stop_reason.is_none() {
                tracing::warn!("Batch interrupted");
                result.record_stop(INTERRUPTED_REASON);
            }

            let reason = format!(
                "{}: {}",
                STOPPED_REASON_PREFIX,
                result.stop_reason.as_deref().unwrap_or(INTERRUPTED_REASON)
            );
            for id in skipped {
                result.record_failure(id, reason.clone());
            }
        }

        result.finished_at = Some(Utc::now());

        tracing::info!(
            successful = result.success_count(),
            failed = result.failure_count(),
            stopped_early = result.stopped_early,
            "Enrichment batch finished"
        );

        Ok(result)
    }

    fn spawn_item(
        &self,
        id: String,
        delay: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<(String, ItemOutcome)> {
        let fetcher = Arc::clone(&self.fetcher);
        let sink = Arc::clone(&self.sink);
        let sleeper = Arc::clone(&self.sleeper);

        tokio::spawn(
            async move {
                let outcome = process_item(fetcher.as_ref(), sink.as_ref(), &id).await;

                if !delay.is_zero() {
                    tokio::select! {
                        _ = sleeper.sleep(delay) => {}
                        _ = stop.cancelled() => {}
                    }
                }

                (id, outcome)
            }
            .in_current_span(),
        )
    }
}

async fn process_item(
    fetcher: &dyn EnrichmentFetcher,
    sink: &dyn RecordSink,
    id: &str,
) -> ItemOutcome {
    tracing::debug!(artist_id = %id, "Enriching artist");

    match fetcher.fetch_enrichment(id).await {
        Ok(payload) => match sink.commit(id, &payload).await {
            Ok(()) => ItemOutcome::Committed,
            Err(e) => ItemOutcome::Failed(format!("persist failed: {}", e)),
        },
        Err(e) if e.is_systemic() => ItemOutcome::Systemic(e.to_string()),
        Err(e) => ItemOutcome::Failed(e.to_string()),
    }
}

/// Drop repeated ids, keeping first occurrence order
fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut unique = Vec::with_capacity(ids.len());

    for id in ids {
        if seen.insert(id.clone()) {
            unique.push(id);
        } else {
            tracing::debug!(artist_id = %id, "Duplicate artist id in job, ignoring");
        }
    }

    unique
}
