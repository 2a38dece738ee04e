use crate::database::repository::TransactionStore;
use chrono::Utc;
use crate::services::orchestrator::{
    ReconciliationOrchestrator, SettlementOutcome, SettlementTrigger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PendingPollerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Terminal transactions untouched this long with incomplete follow-up
    /// work get their task queued again.
    pub follow_up_grace: Duration,
}

impl Default for PendingPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            batch_size: 50,
            follow_up_grace: Duration::from_secs(300),
        }
    }
}

/// Periodically settles transactions whose callback never arrived, and
/// re-queues follow-up work that never completed for settled ones.
pub struct PendingPoller {
    store: Arc<dyn TransactionStore>,
    orchestrator: Arc<ReconciliationOrchestrator>,
    config: PendingPollerConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub checked: usize,
    pub settled: usize,
    pub failed: usize,
    pub requeued: usize,
}

impl PendingPoller {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        orchestrator: Arc<ReconciliationOrchestrator>,
        config: PendingPollerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "pending transaction poller started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("pending transaction poller stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(summary) if summary.checked > 0 || summary.requeued > 0 => info!(
                            checked = summary.checked,
                            settled = summary.settled,
                            failed = summary.failed,
                            requeued = summary.requeued,
                            "poll cycle complete"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "poll cycle failed"),
                    }
                }
            }
        }

        info!("pending transaction poller stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<PollSummary> {
        let awaiting = self
            .store
            .list_awaiting_confirmation(self.config.batch_size)
            .await?;
        let mut summary = PollSummary::default();
        for tx in awaiting {
            summary.checked += 1;
            match self.orchestrator.settle(tx.id, SettlementTrigger::Poll).await {
                Ok(SettlementOutcome::Settled(status)) => {
                    summary.settled += 1;
                    debug!(transaction_id = %tx.id, status = %status, "settled by poll");
                }
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(transaction_id = %tx.id, reference = %tx.reference, error = %e, "poll settlement failed");
                }
            }
        }
        summary.requeued = self.requeue_unfinished().await?;
        Ok(summary)
    }

    async fn requeue_unfinished(&self) -> anyhow::Result<usize> {
        let grace = chrono::Duration::from_std(self.config.follow_up_grace)?;
        let unfinished = self
            .store
            .list_unfinished_follow_ups(Utc::now() - grace, self.config.batch_size)
            .await?;
        let mut requeued = 0;
        for tx in unfinished {
            if self.orchestrator.requeue_follow_up(&tx).await? {
                requeued += 1;
                warn!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    status = %tx.status,
                    "follow-up work re-queued"
                );
            }
        }
        Ok(requeued)
    }
}
