//! Deadline sweep.
//!
//! Each tick lists approved requests whose deadline has elapsed, takes a
//! short per-request lease so concurrent instances do not double-process a
//! row, and runs the closure decision through the lifecycle engine. A
//! failure on one request is counted and logged, never allowed to abort the
//! rest of the batch. Leases are advisory: correctness comes from the
//! version check inside the closure write, the lease only keeps instances
//! from wasting work on the same row.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};

use procura_core::clock::Clock;
use procura_core::config::SchedulerConfig;
use procura_core::domain::request::RequestId;
use procura_core::errors::EngineError;
use procura_core::lifecycle::ClosureOutcome;
use procura_db::repositories::RequestRepository;

use crate::lifecycle::{AutoCloseDisposition, LifecycleEngine};
use crate::store_error;

/// Counters for one sweep, emitted to the log and to command output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Candidates this instance attempted, including skips and failures.
    pub processed: u32,
    pub closed_fulfilled: u32,
    pub closed_unfulfilled: u32,
    /// Lost claims and requests another writer got to first.
    pub skipped: u32,
    pub failed: u32,
}

impl TickReport {
    pub fn closed(&self) -> u32 {
        self.closed_fulfilled + self.closed_unfulfilled
    }
}

#[derive(Clone)]
pub struct ExpirationScheduler {
    engine: LifecycleEngine,
    requests: Arc<dyn RequestRepository>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl ExpirationScheduler {
    pub fn new(
        engine: LifecycleEngine,
        requests: Arc<dyn RequestRepository>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self { engine, requests, clock, config }
    }

    /// One closure sweep over at most `batch_size` due requests.
    pub async fn run_tick(&self) -> Result<TickReport, EngineError> {
        let now = self.clock.now();
        let lease_until = now + Duration::seconds(self.config.lease_timeout_secs as i64);

        let candidates = self
            .requests
            .list_closure_candidates(now, &self.config.instance, self.config.batch_size)
            .await
            .map_err(store_error)?;

        let mut report = TickReport::default();
        for candidate in candidates {
            report.processed += 1;

            let claimed = match self
                .requests
                .claim_for_closure(&candidate.id, &self.config.instance, lease_until, now)
                .await
            {
                Ok(claimed) => claimed,
                Err(error) => {
                    warn!(
                        event_name = "scheduler.claim_failed",
                        request_id = %candidate.id.0,
                        error = %error,
                        "claim failed; continuing with the batch"
                    );
                    report.failed += 1;
                    continue;
                }
            };
            if !claimed {
                // Another instance holds the row or already resolved it.
                report.skipped += 1;
                continue;
            }

            match self.engine.auto_close(&candidate.id).await {
                // The closure write cleared the lease along with the status.
                Ok(AutoCloseDisposition::Closed { outcome, .. }) => match outcome {
                    ClosureOutcome::Fulfilled => report.closed_fulfilled += 1,
                    ClosureOutcome::Unfulfilled => report.closed_unfulfilled += 1,
                },
                Ok(disposition) => {
                    report.skipped += 1;
                    self.release(&candidate.id, disposition.label()).await;
                }
                Err(error) => {
                    warn!(
                        event_name = "scheduler.close_failed",
                        request_id = %candidate.id.0,
                        class = error.class(),
                        error = %error,
                        "closure failed; continuing with the batch"
                    );
                    report.failed += 1;
                    self.release(&candidate.id, "close_failed").await;
                }
            }
        }

        info!(
            event_name = "scheduler.tick_completed",
            instance = %self.config.instance,
            processed = report.processed,
            closed_fulfilled = report.closed_fulfilled,
            closed_unfulfilled = report.closed_unfulfilled,
            skipped = report.skipped,
            failed = report.failed,
            "closure sweep finished"
        );
        Ok(report)
    }

    async fn release(&self, id: &RequestId, context: &'static str) {
        if let Err(error) = self.requests.release_lease(id, &self.config.instance).await {
            warn!(
                event_name = "scheduler.lease_release_failed",
                request_id = %id.0,
                context,
                error = %error,
                "lease release failed; the lease will expire on its own"
            );
        }
    }
}
