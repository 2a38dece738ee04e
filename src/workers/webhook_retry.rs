use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::database::repository::TransactionStore;
use crate::services::orchestrator::SettlementOutcome;
use crate::services::webhook_intake::{IngestOutcome, WebhookIntake};

const RETRY_BATCH: i64 = 100;

/// Re-runs intake for recorded callbacks that have not been processed yet.
pub struct WebhookRetryWorker {
    store: Arc<dyn TransactionStore>,
    intake: Arc<WebhookIntake>,
    interval: Duration,
    max_attempts: i32,
}

impl WebhookRetryWorker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        intake: Arc<WebhookIntake>,
        interval: Duration,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            intake,
            interval,
            max_attempts,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        info!(
            interval_secs = self.interval.as_secs(),
            max_attempts = self.max_attempts,
            "Webhook retry worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(0) => {}
                        Ok(count) => info!(processed = count, "Retried pending webhooks"),
                        Err(e) => error!(error = %e, "Failed to retry pending webhooks"),
                    }
                }
            }
        }

        info!("Webhook retry worker stopped");
    }

    /// One pass over the backlog; returns how many callbacks were resolved.
    pub async fn run_cycle(&self) -> anyhow::Result<usize> {
        let pending = self
            .store
            .list_unprocessed_webhooks(self.max_attempts, RETRY_BATCH)
            .await?;
        let mut processed = 0;
        for log in pending {
            match self.intake.process_key(&log.reference).await {
                Ok(outcome) if outcome.already_processed => {}
                Ok(IngestOutcome {
                    settlement:
                        Some(SettlementOutcome::Settled(_) | SettlementOutcome::AlreadyFinal(_)),
                    ..
                }) => processed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %log.reference, attempts = log.attempts, error = %e, "Webhook retry failed");
                }
            }
        }
        Ok(processed)
    }
}
