//! Follow-up work scheduled after a transaction changes state.
//!
//! Tasks are handed off after the originating unit of work commits; the
//! settlement path never waits on notification, ledger or bonus work.

use crate::services::error::{ReconciliationError, ReconciliationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum FollowUpTask {
    /// Transaction reached `accept`: notify, apply the ledger effect, accrue referral bonus.
    Settled { transaction_id: Uuid },
    /// Transaction reached `error` or `timeout`: notify user and operators.
    Failed { transaction_id: Uuid },
    /// Mobile-money leg initiated: publish the pending event.
    Initiated { transaction_id: Uuid },
    AdminAlert { title: String, content: String },
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: FollowUpTask) -> ReconciliationResult<()>;
}

/// In-process queue backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTaskQueue {
    sender: mpsc::Sender<FollowUpTask>,
}

impl ChannelTaskQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FollowUpTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskQueue for ChannelTaskQueue {
    async fn enqueue(&self, task: FollowUpTask) -> ReconciliationResult<()> {
        self.sender
            .send(task)
            .await
            .map_err(|e| ReconciliationError::InvariantViolation(format!("task queue closed: {:?}", e.0)))
    }
}
