//! Persisted entities: transactions, webhook deliveries, platform ledgers,
//! bonus accruals and reward balances.

use crate::payments::types::{NetworkProfile, ProviderName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Reward,
    Disbursement,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Reward => "reward",
            TransactionType::Disbursement => "disbursement",
        }
    }

    /// Deposits and rewards end with a credit on the betting platform.
    pub fn credits_platform(&self) -> bool {
        matches!(self, TransactionType::Deposit | TransactionType::Reward)
    }

    /// Withdrawals and disbursements end with a mobile-money payout.
    pub fn pays_out(&self) -> bool {
        matches!(
            self,
            TransactionType::Withdrawal | TransactionType::Disbursement
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "reward" => Ok(TransactionType::Reward),
            "disbursement" | "disbursements" => Ok(TransactionType::Disbursement),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    InitPayment,
    Accept,
    Error,
    Timeout,
}

impl TransactionStatus {
    pub fn to_db_status(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::InitPayment => "init_payment",
            TransactionStatus::Accept => "accept",
            TransactionStatus::Error => "error",
            TransactionStatus::Timeout => "timeout",
        }
    }

    /// Accepts legacy spellings still present in older rows.
    pub fn from_db_status(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "init_payment" => Some(TransactionStatus::InitPayment),
            "accept" | "init_success" => Some(TransactionStatus::Accept),
            "error" => Some(TransactionStatus::Error),
            "timeout" | "timeouf" => Some(TransactionStatus::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_status())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Mobile,
    Web,
    Bot,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Mobile => "mobile",
            TransactionSource::Web => "web",
            TransactionSource::Bot => "bot",
        }
    }
}

impl FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mobile" => Ok(TransactionSource::Mobile),
            "web" => Ok(TransactionSource::Web),
            "bot" => Ok(TransactionSource::Bot),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

/// Exactly one party owns a transaction: a registered user or an anonymous
/// bot user identified by its chat id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Owner {
    User(Uuid),
    BotUser(i64),
}

impl Owner {
    /// Stable string key used for lock names and map keys.
    pub fn key(&self) -> String {
        match self {
            Owner::User(id) => format!("user:{}", id),
            Owner::BotUser(id) => format!("bot:{}", id),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::BotUser(_) => None,
        }
    }

    pub fn bot_user_id(&self) -> Option<i64> {
        match self {
            Owner::BotUser(id) => Some(*id),
            Owner::User(_) => None,
        }
    }

    /// Rebuilds the owner from the two nullable columns; both or neither set is invalid.
    pub fn from_columns(user_id: Option<Uuid>, bot_user_id: Option<i64>) -> Option<Self> {
        match (user_id, bot_user_id) {
            (Some(id), None) => Some(Owner::User(id)),
            (None, Some(id)) => Some(Owner::BotUser(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    System,
    Admin,
}

/// One entry of the append-only status log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryEntry {
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub source: HistorySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub public_id: Option<String>,
    pub transaction_type: TransactionType,
    /// Gateway that issued the mobile-money leg.
    pub provider: Option<ProviderName>,
    pub network: NetworkProfile,
    pub source: TransactionSource,

    pub amount: i64,
    /// Amount actually charged or paid out on the mobile-money side.
    pub net_payable_amount: Option<i64>,
    /// Deposit reward folded into the platform credit.
    pub bonus_amount: i64,

    pub owner: Owner,
    pub platform_id: String,
    pub player_id: String,
    pub phone_number: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub withdrawal_code: Option<String>,

    pub status: TransactionStatus,
    pub status_history: Vec<StatusHistoryEntry>,

    pub payout_started: bool,
    pub payout_done: bool,
    pub fond_calculate: bool,
    pub fixed_by_admin: bool,

    pub success_event_sent: bool,
    pub fail_event_sent: bool,
    pub pending_event_sent: bool,
    pub timeout_event_sent: bool,

    pub transaction_link: Option<String>,
    pub webhook_data: Option<JsonValue>,
    pub error_message: Option<String>,
    pub webhook_received_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub owner: Owner,
    pub network: NetworkProfile,
    pub source: TransactionSource,
    pub platform_id: String,
    pub player_id: String,
    pub phone_number: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub withdrawal_code: Option<String>,
}

impl Transaction {
    /// Builds a `pending` transaction with its first history entry.
    pub fn new(reference: String, request: NewTransaction, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference,
            public_id: None,
            transaction_type: request.transaction_type,
            provider: None,
            network: request.network,
            source: request.source,
            amount: request.amount,
            net_payable_amount: None,
            bonus_amount: 0,
            owner: request.owner,
            platform_id: request.platform_id,
            player_id: request.player_id,
            phone_number: request.phone_number,
            customer_name: request.customer_name,
            customer_email: request.customer_email,
            withdrawal_code: request.withdrawal_code,
            status: TransactionStatus::Pending,
            status_history: vec![StatusHistoryEntry {
                status: TransactionStatus::Pending,
                timestamp: now,
                source: HistorySource::System,
                admin_id: None,
            }],
            payout_started: false,
            payout_done: false,
            fond_calculate: false,
            fixed_by_admin: false,
            success_event_sent: false,
            fail_event_sent: false,
            pending_event_sent: false,
            timeout_event_sent: false,
            transaction_link: None,
            webhook_data: None,
            error_message: None,
            webhook_received_at: None,
            validated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when `key` is this transaction's reference, public id or id.
    pub fn matches_key(&self, key: &str) -> bool {
        self.reference == key
            || self.public_id.as_deref() == Some(key)
            || self.id.to_string() == key
    }

    /// Amount credited on the betting platform, deposit reward included.
    pub fn platform_credit_amount(&self) -> i64 {
        self.amount + self.bonus_amount
    }

    /// Terminal transaction whose follow-up work has not all completed:
    /// ledger or success event for `accept`, the failure event otherwise.
    pub fn has_unfinished_follow_up(&self) -> bool {
        match self.status {
            TransactionStatus::Accept => !self.fond_calculate || !self.success_event_sent,
            TransactionStatus::Error => !self.fail_event_sent,
            TransactionStatus::Timeout => !self.timeout_event_sent,
            TransactionStatus::Pending | TransactionStatus::InitPayment => false,
        }
    }
}

/// One row per distinct provider callback key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: Uuid,
    pub reference: String,
    pub provider_name: String,
    pub payload: JsonValue,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookLog {
    pub fn new(reference: &str, provider_name: &str, payload: JsonValue, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            provider_name: provider_name.to_string(),
            payload,
            processed: false,
            processed_at: None,
            error_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-platform cash float.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ledger {
    pub platform_id: String,
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bonus {
    pub id: Uuid,
    pub owner: Owner,
    pub amount: i64,
    pub reason: String,
    /// Transaction whose settlement produced this bonus.
    pub source_transaction_id: Option<Uuid>,
    /// Reward transaction that consumed this bonus.
    pub redeemed_by: Option<Uuid>,
    /// `bonus_with`
    pub consumed: bool,
    /// `bonus_delete`
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Running redeemable bonus balance per owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reward {
    pub owner: Owner,
    pub amount: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::NetworkApi;

    fn network() -> NetworkProfile {
        NetworkProfile {
            name: "wave".to_string(),
            country_code: "ci".to_string(),
            deposit_api: NetworkApi::Connect,
            withdrawal_api: NetworkApi::Connect,
            payment_by_link: true,
            customer_pays_fee: false,
            manual_processing: false,
        }
    }

    #[test]
    fn new_transaction_starts_pending_with_history() {
        let tx = Transaction::new(
            "depot-1".to_string(),
            NewTransaction {
                transaction_type: TransactionType::Deposit,
                amount: 2000,
                owner: Owner::BotUser(77),
                network: network(),
                source: TransactionSource::Bot,
                platform_id: "1xbet".to_string(),
                player_id: "123".to_string(),
                phone_number: "2250700000000".to_string(),
                customer_name: "Awa".to_string(),
                customer_email: None,
                withdrawal_code: None,
            },
            Utc::now(),
        );
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.status_history.len(), 1);
        assert!(tx.matches_key("depot-1"));
        assert!(tx.matches_key(&tx.id.to_string()));
        assert!(!tx.matches_key("other"));
    }

    #[test]
    fn legacy_status_spellings_are_loaded() {
        assert_eq!(
            TransactionStatus::from_db_status("init_success"),
            Some(TransactionStatus::Accept)
        );
        assert_eq!(
            TransactionStatus::from_db_status("timeouf"),
            Some(TransactionStatus::Timeout)
        );
        assert_eq!(TransactionStatus::from_db_status("unknown"), None);
    }

    #[test]
    fn unfinished_follow_up_tracks_ledger_and_events() {
        let mut tx = Transaction::new(
            "depot-2".to_string(),
            NewTransaction {
                transaction_type: TransactionType::Deposit,
                amount: 1000,
                owner: Owner::BotUser(3),
                network: network(),
                source: TransactionSource::Bot,
                platform_id: "1xbet".to_string(),
                player_id: "123".to_string(),
                phone_number: "2250700000000".to_string(),
                customer_name: "Awa".to_string(),
                customer_email: None,
                withdrawal_code: None,
            },
            Utc::now(),
        );
        assert!(!tx.has_unfinished_follow_up());

        tx.status = TransactionStatus::Accept;
        assert!(tx.has_unfinished_follow_up());
        tx.fond_calculate = true;
        assert!(tx.has_unfinished_follow_up());
        tx.success_event_sent = true;
        assert!(!tx.has_unfinished_follow_up());

        tx.status = TransactionStatus::Timeout;
        assert!(tx.has_unfinished_follow_up());
        tx.timeout_event_sent = true;
        assert!(!tx.has_unfinished_follow_up());
    }

    #[test]
    fn owner_columns_are_mutually_exclusive() {
        let id = Uuid::new_v4();
        assert_eq!(Owner::from_columns(Some(id), None), Some(Owner::User(id)));
        assert_eq!(Owner::from_columns(None, Some(5)), Some(Owner::BotUser(5)));
        assert_eq!(Owner::from_columns(Some(id), Some(5)), None);
        assert_eq!(Owner::from_columns(None, None), None);
    }
}
