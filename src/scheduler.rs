//! Periodic publication of scheduled items.
//!
//! One tick fires every period and issues exactly one `publish_scheduled`
//! call through the gateway. A failed tick is logged and forgotten: the next
//! tick fires on time. A tick whose slot has fully elapsed while an earlier
//! publish was still running is dropped rather than replayed.

use crate::backend::Backend;
use crate::core::GatewayError;
use crate::gateway::Gateway;
use tokio_util::sync::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub use crate::config::DEFAULT_PUBLISH_PERIOD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Published { rows: usize },
    Failed(GatewayError),
}

impl TickOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Ticks that issued a publish call.
    pub ticks: u64,
    pub failures: u64,
    /// Ticks dropped because their whole period had already passed.
    pub skipped: u64,
}

pub struct ScheduledPublisher<B: Backend> {
    gateway: Arc<Gateway<B>>,
    period: Duration,
}

impl<B: Backend> ScheduledPublisher<B> {
    /// Publisher ticking at the gateway's configured period.
    pub fn new(gateway: Arc<Gateway<B>>) -> Self {
        let period = gateway.config().publish_period;
        Self { gateway, period }
    }

    pub fn with_period(gateway: Arc<Gateway<B>>, period: Duration) -> Self {
        Self { gateway, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run a single publish tick.
    pub async fn run_once(&self, cancel: &CancellationToken) -> TickOutcome {
        match self.gateway.publish_scheduled_with_cancel(cancel).await {
            Ok(result) => {
                info!(rows = result.len(), "scheduled items published");
                TickOutcome::Published { rows: result.len() }
            }
            Err(e) => {
                error!(
                    error = %e,
                    attempts = e.attempts(),
                    "scheduled publish tick failed"
                );
                TickOutcome::Failed(e)
            }
        }
    }

    /// Tick until `shutdown` is cancelled. The first tick fires immediately.
    pub async fn run(&self, shutdown: CancellationToken) -> SchedulerReport {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = SchedulerReport::default();
        info!(period_secs = self.period.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                deadline = interval.tick() => {
                    let late = deadline.elapsed();
                    if late >= self.period {
                        debug!(late_ms = late.as_millis() as u64, "skipping missed tick");
                        report.skipped += 1;
                        continue;
                    }

                    report.ticks += 1;
                    if self.run_once(&shutdown).await.is_failure() {
                        report.failures += 1;
                    }
                }
            }
        }

        info!(
            ticks = report.ticks,
            failures = report.failures,
            skipped = report.skipped,
            "scheduler stopped"
        );
        report
    }
}

impl<B: Backend> ScheduledPublisher<B> {
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<SchedulerReport> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
