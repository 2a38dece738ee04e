use crate::services::orchestrator::ReconciliationOrchestrator;
use crate::services::task_queue::FollowUpTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Consumes follow-up tasks. Tasks are idempotent, so a failed one is rerun
/// from the start a bounded number of times.
pub struct FollowUpWorker {
    orchestrator: Arc<ReconciliationOrchestrator>,
    receiver: mpsc::Receiver<FollowUpTask>,
}

impl FollowUpWorker {
    pub fn new(
        orchestrator: Arc<ReconciliationOrchestrator>,
        receiver: mpsc::Receiver<FollowUpTask>,
    ) -> Self {
        Self {
            orchestrator,
            receiver,
        }
    }

    /// Runs until shutdown, then drains the tasks already queued.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("follow-up worker started");
        loop {
            tokio::select! {
                task = self.receiver.recv() => match task {
                    Some(task) => {
                        run_with_retries(&self.orchestrator, &task).await;
                    }
                    None => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        self.drain().await;
                        break;
                    }
                }
            }
        }
        info!("follow-up worker stopped");
    }

    async fn drain(&mut self) {
        self.receiver.close();
        let mut drained = 0usize;
        while let Some(task) = self.receiver.recv().await {
            run_with_retries(&self.orchestrator, &task).await;
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "follow-up queue drained");
        }
    }
}

pub async fn run_with_retries(orchestrator: &ReconciliationOrchestrator, task: &FollowUpTask) -> bool {
    for attempt in 1..=MAX_ATTEMPTS {
        match orchestrator.run_follow_up(task).await {
            Ok(()) => return true,
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(task = ?task, attempt, error = %e, "follow-up task failed, retrying");
                tokio::time::sleep(RETRY_DELAY * attempt).await;
            }
            Err(e) => {
                error!(task = ?task, attempts = attempt, error = %e, "follow-up task abandoned");
            }
        }
    }
    false
}
