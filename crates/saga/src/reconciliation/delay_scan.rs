//! Flags lines that sit in one state too long and escalates expired ones.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use common::OrderId;
use domain::{OrderLine, OrderProblem, ProblemKind, ThresholdKind};
use order_store::{LineFlag, OrderStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::services::Notifier;

/// Hours of the day (UTC) during which the scan runs: `[start_hour, end_hour)`.
///
/// A window whose start is after its end wraps past midnight. Equal bounds
/// mean the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ScanWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn always() -> Self {
        Self::new(0, 0)
    }

    pub fn contains(&self, hour: u32) -> bool {
        match self.start_hour.cmp(&self.end_hour) {
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Less => (self.start_hour..self.end_hour).contains(&hour),
            std::cmp::Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
        }
    }
}

/// Outcome of one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// The pass ran outside the window and did nothing.
    pub skipped: bool,
    pub delayed: usize,
    pub escalated: usize,
}

/// Periodic delay/expiry scan.
///
/// A line is picked up once per flag: the `delayed` and `problem` flags
/// keep later passes from touching it again. Flagging a line also raises
/// the same flag on its order.
pub struct DelayScan<S, N>
where
    S: OrderStore,
    N: Notifier,
{
    store: S,
    notifier: N,
    window: ScanWindow,
}

impl<S, N> DelayScan<S, N>
where
    S: OrderStore,
    N: Notifier,
{
    pub fn new(store: S, notifier: N, window: ScanWindow) -> Self {
        Self {
            store,
            notifier,
            window,
        }
    }

    pub async fn tick(&self) -> Result<ScanReport> {
        self.tick_at(Utc::now()).await
    }

    /// One pass as of `now`.
    #[tracing::instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        if !self.window.contains(now.hour()) {
            tracing::debug!(hour = now.hour(), "outside scan window");
            return Ok(ScanReport {
                skipped: true,
                ..ScanReport::default()
            });
        }

        let mut report = ScanReport::default();
        let mut emails = HashMap::new();

        for threshold in self.store.thresholds(ThresholdKind::Delay).await? {
            let stale = self
                .store
                .stale_lines(threshold.state, threshold.cutoff(now), LineFlag::Delayed)
                .await?;
            for line in stale {
                if self.mark_delayed(&line, &mut emails).await {
                    report.delayed += 1;
                }
            }
        }

        for threshold in self.store.thresholds(ThresholdKind::Expire).await? {
            let stale = self
                .store
                .stale_lines(threshold.state, threshold.cutoff(now), LineFlag::Problem)
                .await?;
            for line in stale {
                if self.escalate(&line, now, &mut emails).await {
                    report.escalated += 1;
                }
            }
        }

        if report.delayed > 0 || report.escalated > 0 {
            tracing::info!(delayed = report.delayed, escalated = report.escalated, "delay scan flagged lines");
        }
        Ok(report)
    }

    async fn mark_delayed(
        &self,
        line: &OrderLine,
        emails: &mut HashMap<OrderId, Option<String>>,
    ) -> bool {
        let mut flagged = line.clone();
        flagged.delayed = true;
        if let Err(e) = self.store.update_line(&flagged).await {
            tracing::warn!(line_id = %line.id, error = %e, "failed to flag delayed line");
            return false;
        }
        metrics::counter!("order_lines_delayed_total").increment(1);
        self.flag_order(line.order_id, LineFlag::Delayed).await;

        let body = format!(
            "Part of your order {} is taking longer than expected ({}). We are on it.",
            line.order_id, line.state
        );
        self.notify(line, "Your order is delayed", &body, emails).await;
        true
    }

    async fn escalate(
        &self,
        line: &OrderLine,
        now: DateTime<Utc>,
        emails: &mut HashMap<OrderId, Option<String>>,
    ) -> bool {
        let problem = OrderProblem::for_line(line, ProblemKind::Expired, now);
        match self.store.escalate_line(&problem, line).await {
            Ok(_) => {}
            Err(StoreError::Duplicate { .. }) => return false,
            Err(e) => {
                tracing::warn!(line_id = %line.id, error = %e, "failed to escalate line");
                return false;
            }
        }
        metrics::counter!("order_problems_created_total").increment(1);
        self.flag_order(line.order_id, LineFlag::Problem).await;

        let body = format!(
            "Part of your order {} has been stuck in {} for too long. Our support team is now looking into it.",
            line.order_id, line.state
        );
        self.notify(line, "Support is looking into your order", &body, emails)
            .await;
        true
    }

    async fn flag_order(&self, order_id: OrderId, flag: LineFlag) {
        let mut order = match self.store.get_order(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "failed to load order for flagging");
                return;
            }
        };
        let raised = match flag {
            LineFlag::Delayed => &mut order.delayed,
            LineFlag::Problem => &mut order.problem,
        };
        if *raised {
            return;
        }
        *raised = true;
        if let Err(e) = self.store.update_order(&order).await {
            tracing::warn!(order_id = %order_id, ?flag, error = %e, "failed to flag order");
        }
    }

    async fn notify(
        &self,
        line: &OrderLine,
        subject: &str,
        body: &str,
        emails: &mut HashMap<OrderId, Option<String>>,
    ) {
        let email = match emails.get(&line.order_id) {
            Some(email) => email.clone(),
            None => {
                let email = match self.store.get_order(line.order_id).await {
                    Ok(order) => order.map(|order| order.customer_email),
                    Err(e) => {
                        tracing::warn!(order_id = %line.order_id, error = %e, "failed to load order for email");
                        None
                    }
                };
                emails.insert(line.order_id, email.clone());
                email
            }
        };

        let Some(to) = email else {
            return;
        };
        if let Err(e) = self.notifier.send_basic_email(&to, subject, body).await {
            tracing::warn!(line_id = %line.id, error = %e, "delay email failed");
        }
    }

    /// Ticks every `period` until `shutdown` is cancelled.
    pub async fn run(self, period: Duration, shutdown: CancellationToken) {
        tracing::info!(
            period_secs = period.as_secs(),
            start_hour = self.window.start_hour,
            end_hour = self.window.end_hour,
            "delay scan started"
        );
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("delay scan received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "delay scan pass failed");
                    }
                }
            }
        }
    }
}
