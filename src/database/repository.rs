//! Store seams used by the reconciliation services.
//!
//! Every decision that depends on a row's current value is taken inside a
//! [`UnitOfWork`]: the row is locked first, read under the lock, written, and
//! the unit committed. Dropping a unit without committing rolls it back and
//! releases its locks.

use crate::database::error::DatabaseError;
use crate::database::models::{Bonus, Ledger, Owner, Transaction, WebhookLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Unlocked read for display and scheduling; never for decisions.
    async fn find_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>>;

    /// Unlocked lookup by reference, public id or id.
    async fn find_transaction_by_key(&self, key: &str) -> StoreResult<Option<Transaction>>;

    /// `pending`/`init_payment` transactions that already carry a provider id.
    async fn list_awaiting_confirmation(&self, limit: i64) -> StoreResult<Vec<Transaction>>;

    /// Terminal transactions last touched before `updated_before` whose
    /// follow-up work is incomplete (see [`Transaction::has_unfinished_follow_up`]).
    async fn list_unfinished_follow_ups(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// Webhook rows not yet processed with fewer than `max_attempts` attempts.
    async fn list_unprocessed_webhooks(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> StoreResult<Vec<WebhookLog>>;

    async fn find_webhook_log(&self, key: &str) -> StoreResult<Option<WebhookLog>>;

    async fn find_ledger(&self, platform_id: &str) -> StoreResult<Option<Ledger>>;

    async fn list_bonuses(&self, owner: &Owner) -> StoreResult<Vec<Bonus>>;

    async fn reward_balance(&self, owner: &Owner) -> StoreResult<i64>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn lock_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>>;

    /// Locks the transaction whose reference, public id or id equals `key`.
    async fn lock_transaction_by_key(&mut self, key: &str) -> StoreResult<Option<Transaction>>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    async fn save_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    /// Locks the log row for `key`, creating it unprocessed if absent.
    async fn lock_webhook_log(
        &mut self,
        key: &str,
        provider_name: &str,
        payload: &JsonValue,
    ) -> StoreResult<WebhookLog>;

    async fn save_webhook_log(&mut self, log: &WebhookLog) -> StoreResult<()>;

    /// Locks the platform ledger row, creating it at zero if absent.
    async fn lock_ledger(&mut self, platform_id: &str) -> StoreResult<Ledger>;

    async fn save_ledger(&mut self, ledger: &Ledger) -> StoreResult<()>;

    /// Locks every unconsumed, undeleted bonus of `owner`.
    async fn lock_unconsumed_bonuses(&mut self, owner: &Owner) -> StoreResult<Vec<Bonus>>;

    async fn mark_bonuses_consumed(&mut self, ids: &[Uuid], redeemed_by: Uuid)
        -> StoreResult<()>;

    /// Returns the bonuses consumed by `redeemed_by` to the unconsumed pool.
    /// `redeemed_by` is kept so a later override can reclaim them.
    async fn release_bonuses(&mut self, owner: &Owner, redeemed_by: Uuid) -> StoreResult<u64>;

    /// Locks every bonus of `owner` last redeemed by `redeemed_by`, consumed or not.
    async fn lock_bonuses_redeemed_by(
        &mut self,
        owner: &Owner,
        redeemed_by: Uuid,
    ) -> StoreResult<Vec<Bonus>>;

    async fn bonus_exists_for_transaction(&mut self, transaction_id: Uuid) -> StoreResult<bool>;

    async fn insert_bonus(&mut self, bonus: &Bonus) -> StoreResult<()>;

    /// Adds `delta` to the owner's reward balance and returns the new balance.
    async fn add_reward(&mut self, owner: &Owner, delta: i64) -> StoreResult<i64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
