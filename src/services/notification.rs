use crate::database::models::{Owner, Transaction, TransactionStatus};
use crate::services::error::ReconciliationResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Owner(Owner),
    /// Operator channel.
    Admin(String),
}

/// Real-time transaction event kinds; each is published at most once per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionEvent {
    Success,
    Failed,
    Pending,
    Timeout,
}

/// Claims the event for the transaction's current status, flipping its
/// once-per-status flag. Returns `None` if it was already published.
pub fn claim_status_event(transaction: &mut Transaction) -> Option<TransactionEvent> {
    let (flag, event) = match transaction.status {
        TransactionStatus::Accept => (&mut transaction.success_event_sent, TransactionEvent::Success),
        TransactionStatus::Error => (&mut transaction.fail_event_sent, TransactionEvent::Failed),
        TransactionStatus::Pending | TransactionStatus::InitPayment => {
            (&mut transaction.pending_event_sent, TransactionEvent::Pending)
        }
        TransactionStatus::Timeout => (&mut transaction.timeout_event_sent, TransactionEvent::Timeout),
    };
    if *flag {
        return None;
    }
    *flag = true;
    Some(event)
}

/// Delivery channel for user and operator messages (push, chat bot, in-app).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &Recipient, title: &str, content: &str)
        -> ReconciliationResult<()>;

    async fn publish_event(
        &self,
        transaction: &Transaction,
        event: TransactionEvent,
    ) -> ReconciliationResult<()> {
        info!(
            transaction_id = %transaction.id,
            reference = %transaction.reference,
            owner = %transaction.owner,
            event = ?event,
            "Transaction event"
        );
        Ok(())
    }
}

/// Writes every notification to the structured log.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(
        &self,
        recipient: &Recipient,
        title: &str,
        content: &str,
    ) -> ReconciliationResult<()> {
        match recipient {
            Recipient::Owner(owner) => {
                info!(recipient = %owner, title = %title, "NOTIFICATION: {}", content);
            }
            Recipient::Admin(channel) => {
                warn!(channel = %channel, title = %title, "ADMIN ALERT: {}", content);
            }
        }
        Ok(())
    }
}

pub fn success_message(transaction: &Transaction) -> (String, String) {
    use crate::database::models::TransactionType::*;
    let content = match transaction.transaction_type {
        Deposit | Reward => format!(
            "Vous avez effectué un dépôt de {} FCFA sur votre compte {}",
            transaction.platform_credit_amount(),
            transaction.platform_id
        ),
        Withdrawal | Disbursement => format!(
            "Vous avez effectué un retrait de {} FCFA sur {}",
            transaction.amount, transaction.platform_id
        ),
    };
    ("Opération réussie".to_string(), content)
}

/// Generic user-facing failure text; details go to the operator channel only.
pub fn failure_message(transaction: &Transaction) -> (String, String) {
    (
        "Erreur de transaction".to_string(),
        format!(
            "Une erreur est survenue lors de votre transaction de {} FCFA. Référence de la transaction : {}",
            transaction.amount, transaction.reference
        ),
    )
}

pub fn admin_failure_detail(transaction: &Transaction) -> String {
    format!(
        "reference={} type={} platform={} player={} phone={} amount={} status={} error={} provider_response={}",
        transaction.reference,
        transaction.transaction_type,
        transaction.platform_id,
        transaction.player_id,
        transaction.phone_number,
        transaction.amount,
        transaction.status,
        transaction.error_message.as_deref().unwrap_or("-"),
        transaction
            .webhook_data
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewTransaction, TransactionSource, TransactionType};
    use crate::payments::types::{NetworkApi, NetworkProfile};
    use chrono::Utc;

    fn transaction() -> Transaction {
        Transaction::new(
            "retrait-17000000000009".to_string(),
            NewTransaction {
                transaction_type: TransactionType::Withdrawal,
                amount: 5000,
                owner: Owner::BotUser(8),
                network: NetworkProfile {
                    name: "orange".to_string(),
                    country_code: "ci".to_string(),
                    deposit_api: NetworkApi::Connect,
                    withdrawal_api: NetworkApi::Connect,
                    payment_by_link: true,
                    customer_pays_fee: true,
                    manual_processing: false,
                },
                source: TransactionSource::Bot,
                platform_id: "melbet".to_string(),
                player_id: "71".to_string(),
                phone_number: "2250500000000".to_string(),
                customer_name: "Yao".to_string(),
                customer_email: None,
                withdrawal_code: Some("AB12".to_string()),
            },
            Utc::now(),
        )
    }

    #[test]
    fn status_event_is_claimed_once() {
        let mut tx = transaction();
        assert_eq!(claim_status_event(&mut tx), Some(TransactionEvent::Pending));
        assert_eq!(claim_status_event(&mut tx), None);

        tx.status = TransactionStatus::Accept;
        assert_eq!(claim_status_event(&mut tx), Some(TransactionEvent::Success));
        assert_eq!(claim_status_event(&mut tx), None);
        assert!(tx.success_event_sent && tx.pending_event_sent);
        assert!(!tx.fail_event_sent);
    }

    #[test]
    fn failure_message_only_exposes_reference() {
        let mut tx = transaction();
        tx.error_message = Some("cashdesk said: invalid code".to_string());
        let (_, content) = failure_message(&tx);
        assert!(content.contains("retrait-17000000000009"));
        assert!(!content.contains("invalid code"));
        assert!(admin_failure_detail(&tx).contains("invalid code"));
    }
}
