//! Services module for reconciliation logic

pub mod bonus;
pub mod error;
pub mod fees;
pub mod identity;
pub mod ledger;
pub mod notification;
pub mod orchestrator;
pub mod reference;
pub mod task_queue;
pub mod transaction_state;
pub mod webhook_intake;

pub use error::{ReconciliationError, ReconciliationResult};
pub use orchestrator::{
    ReconciliationOrchestrator, RewardRedemption, SettlementOutcome, SettlementTrigger,
};
pub use task_queue::{ChannelTaskQueue, FollowUpTask, TaskQueue};
pub use webhook_intake::{IngestOutcome, WebhookIntake};
