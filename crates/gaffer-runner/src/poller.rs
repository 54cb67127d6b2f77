//! The control loop: discover labeled items and fresh feedback on a fixed
//! cadence and dispatch tasks into the pool.
//!
//! Each cycle runs two independent scans. The new-work scan needs no
//! bookkeeping because eligible items keep their trigger label until a
//! task claims them. The feedback scan works off a watermark: entries
//! written after the end of the previous fully successful cycle are
//! fetched, grouped per change request, and dispatched as review tasks.
//! The watermark only advances when both scans succeed and every feedback
//! batch found a slot; holding it back on errors or saturation means a
//! window is re-fetched rather than silently dropped, and the key scheme
//! keeps the re-fetch from dispatching twice.

use chrono::{DateTime, Utc};
use gaffer_core::feedback::FeedbackBatch;
use gaffer_core::task::{TaskKey, TaskKind};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::context::TaskContext;
use crate::implement::run_implement;
use crate::pool::WorkerPool;
use crate::review::run_review;

pub struct Poller {
    ctx: Arc<TaskContext>,
    pool: Arc<WorkerPool>,
    interval: Duration,
    /// Feedback after this instant has not been dispatched yet.
    since: DateTime<Utc>,
}

impl Poller {
    pub fn new(ctx: Arc<TaskContext>, pool: Arc<WorkerPool>, interval: Duration) -> Self {
        Self {
            ctx,
            pool,
            interval,
            since: Utc::now(),
        }
    }

    /// Drive cycles until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.cycle().await;
                }
            }
        }
    }

    /// One poll cycle. Both scans always run; a failure in one never
    /// stops the other.
    pub async fn cycle(&mut self) {
        let new_work = self.scan_new_work().await;
        let feedback = self.scan_feedback().await;
        let cycle_end = Utc::now();

        if let Err(e) = &new_work {
            tracing::warn!("new-work scan failed: {e:#}");
        }
        match &feedback {
            Err(e) => tracing::warn!("feedback scan failed: {e:#}"),
            Ok(false) => tracing::info!("feedback window held for capacity"),
            Ok(true) => {}
        }

        if new_work.is_ok() && matches!(feedback, Ok(true)) {
            self.since = cycle_end;
        }
        tracing::debug!(
            active = self.pool.active_count(),
            watermark = %self.since,
            "cycle complete"
        );
    }

    async fn scan_new_work(&self) -> anyhow::Result<()> {
        let items = self
            .ctx
            .tracker
            .list_items_with_label(&self.ctx.labels.trigger)
            .await?;
        for item in items {
            let key = TaskKey::implement(item.id);
            if self.pool.has(&key) {
                continue;
            }
            if !self.pool.can_accept() {
                // stop instead of skipping ahead; the tracker's ordering
                // decides what runs first once capacity frees up
                tracing::info!(item = %item.id, "pool at capacity, leaving remaining items");
                break;
            }
            tracing::info!(item = %item.id, title = %item.title, "dispatching implement task");
            let ctx = Arc::clone(&self.ctx);
            let target = item.id.0;
            self.pool
                .submit(key, TaskKind::Implement, target, move |cancel| {
                    run_implement(ctx, item, cancel)
                });
        }
        Ok(())
    }

    /// Returns whether the whole window was dispatched. `false` holds the
    /// watermark so undispatched batches are seen again next cycle.
    async fn scan_feedback(&self) -> anyhow::Result<bool> {
        let entries = self.ctx.tracker.list_feedback_since(self.since).await?;
        if entries.is_empty() {
            return Ok(true);
        }

        for batch in FeedbackBatch::group(entries) {
            let key = TaskKey::review(batch.request, batch.newest());
            // a held watermark re-fetches batches that already ran; their
            // keys are in the registry (terminal or not) and stay there
            if self.pool.contains(&key) {
                continue;
            }
            if !self.pool.can_accept() {
                tracing::info!(request = %batch.request, "pool at capacity, holding feedback window");
                return Ok(false);
            }
            tracing::info!(
                request = %batch.request,
                entries = batch.len(),
                "dispatching review task"
            );
            let ctx = Arc::clone(&self.ctx);
            let target = batch.request.0;
            self.pool
                .submit(key, TaskKind::Review, target, move |cancel| {
                    run_review(ctx, batch, cancel)
                });
        }
        Ok(true)
    }
}
