//! Retries confirm-cancel for lines their locations have not yet confirmed.

use std::time::Duration;

use order_store::OrderStore;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::services::LocationGateway;

/// Attempts after which a stuck line is reported at error level.
pub const DEFAULT_ALERT_AFTER: u32 = 10;

/// Outcome of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub resolved: usize,
    pub failed: usize,
}

/// Retry loop over the pending-cancel queue.
///
/// Only the queue is written; order and line rows are left alone.
pub struct PendingCancelRetry<S, G>
where
    S: OrderStore,
    G: LocationGateway,
{
    store: S,
    gateway: G,
    alert_after: u32,
}

impl<S, G> PendingCancelRetry<S, G>
where
    S: OrderStore,
    G: LocationGateway,
{
    pub fn new(store: S, gateway: G) -> Self {
        Self {
            store,
            gateway,
            alert_after: DEFAULT_ALERT_AFTER,
        }
    }

    pub fn with_alert_after(mut self, attempts: u32) -> Self {
        self.alert_after = attempts;
        self
    }

    /// One pass over the queue, oldest entries first.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<RetryReport> {
        let pending = self.store.pending_cancels().await?;
        let mut report = RetryReport::default();

        for entry in pending {
            let line = &entry.line;
            match self.gateway.confirm_cancel(line).await {
                Ok(()) => {
                    // Left queued if the delete fails; confirm is idempotent.
                    if let Err(e) = self.store.remove_pending_cancel(line.id).await {
                        tracing::warn!(line_id = %line.id, error = %e, "confirmed cancel could not be dequeued");
                        report.failed += 1;
                        continue;
                    }
                    metrics::counter!("pending_cancels_resolved_total").increment(1);
                    tracing::info!(line_id = %line.id, location_id = %line.location_id, "pending cancel confirmed");
                    report.resolved += 1;
                }
                Err(e) => {
                    let attempts = match self.store.record_cancel_attempt(line.id).await {
                        Ok(attempts) => attempts,
                        Err(store_err) => {
                            tracing::warn!(
                                line_id = %line.id,
                                error = %e,
                                store_error = %store_err,
                                "confirm cancel retry failed and attempt was not recorded"
                            );
                            report.failed += 1;
                            continue;
                        }
                    };
                    if attempts >= self.alert_after {
                        tracing::error!(
                            line_id = %line.id,
                            location_id = %line.location_id,
                            attempts,
                            error = %e,
                            "confirm cancel keeps failing, manual intervention required"
                        );
                    } else {
                        tracing::warn!(line_id = %line.id, attempts, error = %e, "confirm cancel retry failed");
                    }
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Ticks every `period` until `shutdown` is cancelled.
    pub async fn run(self, period: Duration, shutdown: CancellationToken) {
        tracing::info!(period_secs = period.as_secs(), "pending cancel retry started");
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("pending cancel retry received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "pending cancel retry pass failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryLocationGateway, LinePhase};
    use chrono::Utc;
    use common::{LocationId, OrderId};
    use domain::{OrderLine, PendingCancel};
    use order_store::{InMemoryOrderStore, StoreOp};

    #[tokio::test]
    async fn test_failed_retry_counts_attempts_and_keeps_entry() {
        let store = InMemoryOrderStore::new();
        let gateway = InMemoryLocationGateway::new();
        let line = OrderLine::new(OrderId::new(), LocationId::new(4), Utc::now());
        store
            .add_pending_cancel(&PendingCancel::new(line.clone(), Utc::now()))
            .await
            .unwrap();
        gateway.set_fail_on(line.location_id, LinePhase::Confirm, true);

        let retry = PendingCancelRetry::new(store.clone(), gateway.clone());
        let report = retry.tick().await.unwrap();
        assert_eq!(report, RetryReport { resolved: 0, failed: 1 });
        retry.tick().await.unwrap();

        let queued = store.pending_cancels().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].attempts, 2);

        gateway.set_fail_on(line.location_id, LinePhase::Confirm, false);
        let report = retry.tick().await.unwrap();
        assert_eq!(report.resolved, 1);
        assert!(store.pending_cancels().await.unwrap().is_empty());
    }

    fn queued_line(location: i64, recorded_at: chrono::DateTime<Utc>) -> PendingCancel {
        PendingCancel::new(
            OrderLine::new(OrderId::new(), LocationId::new(location), recorded_at),
            recorded_at,
        )
    }

    #[tokio::test]
    async fn test_dequeue_failure_does_not_stop_the_pass() {
        let store = InMemoryOrderStore::new();
        let gateway = InMemoryLocationGateway::new();
        let now = Utc::now();
        let first = queued_line(1, now - chrono::Duration::minutes(2));
        let second = queued_line(2, now - chrono::Duration::minutes(1));
        store.add_pending_cancel(&first).await.unwrap();
        store.add_pending_cancel(&second).await.unwrap();
        store.fail_on(StoreOp::RemovePendingCancel).await;

        let retry = PendingCancelRetry::new(store.clone(), gateway.clone());
        let report = retry.tick().await.unwrap();

        assert_eq!(report, RetryReport { resolved: 0, failed: 2 });
        assert_eq!(gateway.calls_for(LinePhase::Confirm).len(), 2);

        store.recover(StoreOp::RemovePendingCancel).await;
        let report = retry.tick().await.unwrap();
        assert_eq!(report.resolved, 2);
        assert!(store.pending_cancels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecorded_attempt_does_not_stop_the_pass() {
        let store = InMemoryOrderStore::new();
        let gateway = InMemoryLocationGateway::new();
        let now = Utc::now();
        let stuck = queued_line(1, now - chrono::Duration::minutes(2));
        let healthy = queued_line(2, now - chrono::Duration::minutes(1));
        store.add_pending_cancel(&stuck).await.unwrap();
        store.add_pending_cancel(&healthy).await.unwrap();
        gateway.set_fail_on(stuck.line.location_id, LinePhase::Confirm, true);
        store.fail_on(StoreOp::RecordCancelAttempt).await;

        let retry = PendingCancelRetry::new(store.clone(), gateway.clone());
        let report = retry.tick().await.unwrap();

        assert_eq!(report, RetryReport { resolved: 1, failed: 1 });
        let queued = store.pending_cancels().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].line.id, stuck.line.id);
        assert_eq!(queued[0].attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = InMemoryOrderStore::new();
        let gateway = InMemoryLocationGateway::new();
        let line = OrderLine::new(OrderId::new(), LocationId::new(1), Utc::now());
        store
            .add_pending_cancel(&PendingCancel::new(line, Utc::now()))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            PendingCancelRetry::new(store.clone(), gateway.clone())
                .run(Duration::from_secs(60), shutdown.clone()),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(store.pending_cancels().await.unwrap().is_empty());
        assert_eq!(gateway.calls_for(LinePhase::Confirm).len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
