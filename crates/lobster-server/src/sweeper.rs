use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::state::AppState;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_tasks: usize,
    pub expired_quotes: usize,
    pub requeued: usize,
    pub reconciled: usize,
}

/// Background loop for time-driven work: task timeouts, quote expiry, poll
/// lease requeue, ledger reconciliation and snapshots.
pub struct Sweeper {
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        let interval = state.config.sweep_interval();
        Self {
            state,
            shutdown_rx,
            interval,
        }
    }

    /// Run until shutdown is signalled, then save state one last time.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                Ok(()) = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        tracing::info!("Sweeper shutting down");
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.state.persist().await {
            tracing::error!("Failed to save state on shutdown: {}", e);
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();

        match self.state.tasks.expire_overdue(now).await {
            Ok(expired) => report.expired_tasks = expired.len(),
            Err(e) => tracing::error!("Task timeout sweep failed: {}", e),
        }
        match self.state.quotes.expire_due(now).await {
            Ok(expired) => report.expired_quotes = expired.len(),
            Err(e) => tracing::error!("Quote expiry sweep failed: {}", e),
        }
        report.requeued = self
            .state
            .dispatcher
            .queue()
            .requeue_stale(self.state.config.poll_lease(), now);
        match self.state.tasks.reconcile().await {
            Ok(settled) => report.reconciled = settled,
            Err(e) => tracing::error!("Reconcile failed: {}", e),
        }
        if let Err(e) = self.state.persist().await {
            tracing::error!("Failed to save state: {}", e);
        }

        if report != SweepReport::default() {
            tracing::info!("Sweep: {:?}", report);
        }
        report
    }
}
