//! Transaction state machine.
//!
//! `pending -> init_payment -> accept | error | timeout`, with `pending` also
//! allowed to jump straight to a terminal state. Every change appends to
//! `status_history`; the history is never rewritten.

use crate::database::models::{HistorySource, StatusHistoryEntry, Transaction, TransactionStatus};
use crate::payments::types::PaymentState;
use crate::services::error::{ReconciliationError, ReconciliationResult};
use chrono::{DateTime, Utc};

pub fn is_terminal(status: TransactionStatus) -> bool {
    matches!(
        status,
        TransactionStatus::Accept | TransactionStatus::Error | TransactionStatus::Timeout
    )
}

pub fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus::*;
    match (from, to) {
        (Pending, InitPayment) => true,
        (Pending | InitPayment, Accept | Error | Timeout) => true,
        _ => false,
    }
}

/// Terminal status a final provider state settles into; `None` while pending.
pub fn terminal_status_for(state: PaymentState) -> Option<TransactionStatus> {
    match state {
        PaymentState::Success => Some(TransactionStatus::Accept),
        PaymentState::Failed | PaymentState::Cancelled => Some(TransactionStatus::Error),
        PaymentState::Timeout => Some(TransactionStatus::Timeout),
        PaymentState::Pending => None,
    }
}

/// Automated transition. Terminal transactions never move here.
pub fn transition(
    transaction: &mut Transaction,
    to: TransactionStatus,
    now: DateTime<Utc>,
) -> ReconciliationResult<()> {
    if !can_transition(transaction.status, to) {
        return Err(ReconciliationError::InvalidTransition {
            from: transaction.status.to_string(),
            to: to.to_string(),
        });
    }
    transaction.status = to;
    transaction.status_history.push(StatusHistoryEntry {
        status: to,
        timestamp: now,
        source: HistorySource::System,
        admin_id: None,
    });
    if to == TransactionStatus::Accept {
        transaction.validated_at = Some(now);
    }
    Ok(())
}

/// Manual override: may leave a terminal state and is always recorded.
pub fn admin_override(
    transaction: &mut Transaction,
    to: TransactionStatus,
    admin_id: &str,
    now: DateTime<Utc>,
) {
    transaction.status = to;
    transaction.fixed_by_admin = true;
    transaction.status_history.push(StatusHistoryEntry {
        status: to,
        timestamp: now,
        source: HistorySource::Admin,
        admin_id: Some(admin_id.to_string()),
    });
    if to == TransactionStatus::Accept && transaction.validated_at.is_none() {
        transaction.validated_at = Some(now);
    }
}
