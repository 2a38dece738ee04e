//! In-memory store with the same locking contract as the Postgres store.
//!
//! Each row has its own async mutex; a unit of work holds the guards of every
//! row it locked until it commits or is dropped. Writes are staged in the unit
//! and become visible to other units only at commit.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    Bonus, Ledger, Owner, Reward, Transaction, TransactionStatus, WebhookLog,
};
use crate::database::repository::{StoreResult, TransactionStore, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct MemoryData {
    transactions: HashMap<Uuid, Transaction>,
    webhooks: HashMap<String, WebhookLog>,
    ledgers: HashMap<String, Ledger>,
    bonuses: HashMap<Uuid, Bonus>,
    rewards: HashMap<Owner, Reward>,
}

impl MemoryData {
    fn transaction_id_for_key(&self, key: &str) -> Option<Uuid> {
        self.transactions
            .values()
            .find(|tx| tx.matches_key(key))
            .map(|tx| tx.id)
    }
}

#[derive(Default)]
struct Shared {
    data: Mutex<MemoryData>,
    row_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn data(&self) -> MutexGuard<'_, MemoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a ledger balance; used by operators' fixtures and tests.
    pub fn set_ledger_balance(&self, platform_id: &str, balance: i64) {
        self.shared.data().ledgers.insert(
            platform_id.to_string(),
            Ledger {
                platform_id: platform_id.to_string(),
                balance,
                updated_at: Utc::now(),
            },
        );
    }
}

fn tx_lock(id: Uuid) -> String {
    format!("tx:{}", id)
}

fn bonus_lock(owner: &Owner) -> String {
    format!("bonus:{}", owner.key())
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            shared: self.shared.clone(),
            held: HashMap::new(),
            transactions: HashMap::new(),
            inserted: HashSet::new(),
            webhooks: HashMap::new(),
            ledgers: HashMap::new(),
            bonuses: HashMap::new(),
            rewards: HashMap::new(),
        }))
    }

    async fn find_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        Ok(self.shared.data().transactions.get(&id).cloned())
    }

    async fn find_transaction_by_key(&self, key: &str) -> StoreResult<Option<Transaction>> {
        let data = self.shared.data();
        Ok(data
            .transaction_id_for_key(key)
            .and_then(|id| data.transactions.get(&id).cloned()))
    }

    async fn list_awaiting_confirmation(&self, limit: i64) -> StoreResult<Vec<Transaction>> {
        let mut awaiting: Vec<Transaction> = self
            .shared
            .data()
            .transactions
            .values()
            .filter(|tx| {
                matches!(
                    tx.status,
                    TransactionStatus::Pending | TransactionStatus::InitPayment
                ) && tx.public_id.is_some()
            })
            .cloned()
            .collect();
        awaiting.sort_by_key(|tx| tx.created_at);
        awaiting.truncate(limit.max(0) as usize);
        Ok(awaiting)
    }

    async fn list_unfinished_follow_ups(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let mut unfinished: Vec<Transaction> = self
            .shared
            .data()
            .transactions
            .values()
            .filter(|tx| tx.has_unfinished_follow_up() && tx.updated_at <= updated_before)
            .cloned()
            .collect();
        unfinished.sort_by_key(|tx| tx.updated_at);
        unfinished.truncate(limit.max(0) as usize);
        Ok(unfinished)
    }

    async fn list_unprocessed_webhooks(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> StoreResult<Vec<WebhookLog>> {
        let mut logs: Vec<WebhookLog> = self
            .shared
            .data()
            .webhooks
            .values()
            .filter(|log| !log.processed && log.attempts < max_attempts)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.created_at);
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }

    async fn find_webhook_log(&self, key: &str) -> StoreResult<Option<WebhookLog>> {
        Ok(self.shared.data().webhooks.get(key).cloned())
    }

    async fn find_ledger(&self, platform_id: &str) -> StoreResult<Option<Ledger>> {
        Ok(self.shared.data().ledgers.get(platform_id).cloned())
    }

    async fn list_bonuses(&self, owner: &Owner) -> StoreResult<Vec<Bonus>> {
        let mut bonuses: Vec<Bonus> = self
            .shared
            .data()
            .bonuses
            .values()
            .filter(|b| &b.owner == owner)
            .cloned()
            .collect();
        bonuses.sort_by_key(|b| b.created_at);
        Ok(bonuses)
    }

    async fn reward_balance(&self, owner: &Owner) -> StoreResult<i64> {
        Ok(self
            .shared
            .data()
            .rewards
            .get(owner)
            .map(|r| r.amount)
            .unwrap_or(0))
    }
}

pub struct MemoryUnitOfWork {
    shared: Arc<Shared>,
    held: HashMap<String, OwnedMutexGuard<()>>,
    transactions: HashMap<Uuid, Transaction>,
    inserted: HashSet<Uuid>,
    webhooks: HashMap<String, WebhookLog>,
    ledgers: HashMap<String, Ledger>,
    bonuses: HashMap<Uuid, Bonus>,
    rewards: HashMap<Owner, Reward>,
}

impl MemoryUnitOfWork {
    /// Row locks are re-entrant within one unit.
    async fn hold(&mut self, name: String) {
        if !self.held.contains_key(&name) {
            let guard = self.shared.acquire(&name).await;
            self.held.insert(name, guard);
        }
    }

    fn require_held(&self, name: &str) -> StoreResult<()> {
        if self.held.contains_key(name) {
            Ok(())
        } else {
            Err(DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("write to {} without holding its lock", name),
            }))
        }
    }

    fn current_transaction(&self, id: Uuid) -> Option<Transaction> {
        self.transactions
            .get(&id)
            .cloned()
            .or_else(|| self.shared.data().transactions.get(&id).cloned())
    }

    fn current_bonus(&self, id: Uuid) -> Option<Bonus> {
        self.bonuses
            .get(&id)
            .cloned()
            .or_else(|| self.shared.data().bonuses.get(&id).cloned())
    }

    /// Committed bonuses overlaid with the ones staged in this unit.
    fn visible_bonuses(&self) -> Vec<Bonus> {
        let mut merged: HashMap<Uuid, Bonus> = self.shared.data().bonuses.clone();
        for (id, bonus) in &self.bonuses {
            merged.insert(*id, bonus.clone());
        }
        merged.into_values().collect()
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>> {
        if self.current_transaction(id).is_none() {
            return Ok(None);
        }
        self.hold(tx_lock(id)).await;
        Ok(self.current_transaction(id))
    }

    async fn lock_transaction_by_key(&mut self, key: &str) -> StoreResult<Option<Transaction>> {
        let staged = self
            .transactions
            .values()
            .find(|tx| tx.matches_key(key))
            .map(|tx| tx.id);
        let id = match staged.or_else(|| self.shared.data().transaction_id_for_key(key)) {
            Some(id) => id,
            None => return Ok(None),
        };
        self.lock_transaction(id).await
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        let duplicate = {
            let data = self.shared.data();
            data.transactions.contains_key(&transaction.id)
                || data
                    .transactions
                    .values()
                    .any(|tx| tx.reference == transaction.reference)
        } || self
            .transactions
            .values()
            .any(|tx| tx.reference == transaction.reference);
        if duplicate {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "transactions_reference_key".to_string(),
            }));
        }

        self.hold(tx_lock(transaction.id)).await;
        self.inserted.insert(transaction.id);
        self.transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        self.require_held(&tx_lock(transaction.id))?;
        let mut updated = transaction.clone();
        updated.updated_at = Utc::now();
        self.transactions.insert(transaction.id, updated);
        Ok(())
    }

    async fn lock_webhook_log(
        &mut self,
        key: &str,
        provider_name: &str,
        payload: &JsonValue,
    ) -> StoreResult<WebhookLog> {
        self.hold(format!("webhook:{}", key)).await;
        if let Some(log) = self.webhooks.get(key) {
            return Ok(log.clone());
        }
        let existing = self.shared.data().webhooks.get(key).cloned();
        let log = match existing {
            Some(log) => log,
            None => {
                let log = WebhookLog::new(key, provider_name, payload.clone(), Utc::now());
                self.webhooks.insert(key.to_string(), log.clone());
                log
            }
        };
        Ok(log)
    }

    async fn save_webhook_log(&mut self, log: &WebhookLog) -> StoreResult<()> {
        self.require_held(&format!("webhook:{}", log.reference))?;
        let mut updated = log.clone();
        updated.updated_at = Utc::now();
        self.webhooks.insert(log.reference.clone(), updated);
        Ok(())
    }

    async fn lock_ledger(&mut self, platform_id: &str) -> StoreResult<Ledger> {
        self.hold(format!("ledger:{}", platform_id)).await;
        if let Some(ledger) = self.ledgers.get(platform_id) {
            return Ok(ledger.clone());
        }
        let existing = self.shared.data().ledgers.get(platform_id).cloned();
        Ok(existing.unwrap_or_else(|| Ledger {
            platform_id: platform_id.to_string(),
            balance: 0,
            updated_at: Utc::now(),
        }))
    }

    async fn save_ledger(&mut self, ledger: &Ledger) -> StoreResult<()> {
        self.require_held(&format!("ledger:{}", ledger.platform_id))?;
        self.ledgers
            .insert(ledger.platform_id.clone(), ledger.clone());
        Ok(())
    }

    async fn lock_unconsumed_bonuses(&mut self, owner: &Owner) -> StoreResult<Vec<Bonus>> {
        self.hold(bonus_lock(owner)).await;
        let mut bonuses: Vec<Bonus> = self
            .visible_bonuses()
            .into_iter()
            .filter(|b| &b.owner == owner && !b.consumed && !b.deleted)
            .collect();
        bonuses.sort_by_key(|b| b.created_at);
        Ok(bonuses)
    }

    async fn mark_bonuses_consumed(
        &mut self,
        ids: &[Uuid],
        redeemed_by: Uuid,
    ) -> StoreResult<()> {
        for id in ids {
            let mut bonus = self
                .current_bonus(*id)
                .ok_or_else(|| DatabaseError::not_found("bonus", id))?;
            self.require_held(&bonus_lock(&bonus.owner))?;
            bonus.consumed = true;
            bonus.redeemed_by = Some(redeemed_by);
            self.bonuses.insert(*id, bonus);
        }
        Ok(())
    }

    async fn release_bonuses(&mut self, owner: &Owner, redeemed_by: Uuid) -> StoreResult<u64> {
        self.hold(bonus_lock(owner)).await;
        let mut released = 0;
        for mut bonus in self.visible_bonuses() {
            if &bonus.owner == owner && bonus.consumed && bonus.redeemed_by == Some(redeemed_by) {
                bonus.consumed = false;
                self.bonuses.insert(bonus.id, bonus);
                released += 1;
            }
        }
        Ok(released)
    }

    async fn lock_bonuses_redeemed_by(
        &mut self,
        owner: &Owner,
        redeemed_by: Uuid,
    ) -> StoreResult<Vec<Bonus>> {
        self.hold(bonus_lock(owner)).await;
        let mut bonuses: Vec<Bonus> = self
            .visible_bonuses()
            .into_iter()
            .filter(|b| &b.owner == owner && b.redeemed_by == Some(redeemed_by))
            .collect();
        bonuses.sort_by_key(|b| b.created_at);
        Ok(bonuses)
    }

    async fn bonus_exists_for_transaction(&mut self, transaction_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .visible_bonuses()
            .iter()
            .any(|b| b.source_transaction_id == Some(transaction_id)))
    }

    async fn insert_bonus(&mut self, bonus: &Bonus) -> StoreResult<()> {
        self.hold(bonus_lock(&bonus.owner)).await;
        self.bonuses.insert(bonus.id, bonus.clone());
        Ok(())
    }

    async fn add_reward(&mut self, owner: &Owner, delta: i64) -> StoreResult<i64> {
        self.hold(format!("reward:{}", owner.key())).await;
        let current = match self.rewards.get(owner) {
            Some(reward) => reward.clone(),
            None => self
                .shared
                .data()
                .rewards
                .get(owner)
                .cloned()
                .unwrap_or(Reward {
                    owner: *owner,
                    amount: 0,
                    updated_at: Utc::now(),
                }),
        };
        let amount = current.amount + delta;
        self.rewards.insert(
            *owner,
            Reward {
                owner: *owner,
                amount,
                updated_at: Utc::now(),
            },
        );
        Ok(amount)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        {
            let mut data = this.shared.data();
            for (id, tx) in this.transactions {
                data.transactions.insert(id, tx);
            }
            for (key, log) in this.webhooks {
                data.webhooks.insert(key, log);
            }
            for (platform, ledger) in this.ledgers {
                data.ledgers.insert(platform, ledger);
            }
            for (id, bonus) in this.bonuses {
                data.bonuses.insert(id, bonus);
            }
            for (owner, reward) in this.rewards {
                data.rewards.insert(owner, reward);
            }
        }
        // Row guards in `this.held` are released here, after the data is visible.
        drop(this.held);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewTransaction, TransactionSource, TransactionType};
    use crate::payments::types::{NetworkApi, NetworkProfile};
    use std::time::Duration;

    fn transaction(reference: &str) -> Transaction {
        Transaction::new(
            reference.to_string(),
            NewTransaction {
                transaction_type: TransactionType::Deposit,
                amount: 1000,
                owner: Owner::BotUser(1),
                network: NetworkProfile {
                    name: "mtn".to_string(),
                    country_code: "bj".to_string(),
                    deposit_api: NetworkApi::Feexpay,
                    withdrawal_api: NetworkApi::Feexpay,
                    payment_by_link: false,
                    customer_pays_fee: true,
                    manual_processing: false,
                },
                source: TransactionSource::Bot,
                platform_id: "1xbet".to_string(),
                player_id: "9".to_string(),
                phone_number: "22997000000".to_string(),
                customer_name: "K".to_string(),
                customer_email: None,
                withdrawal_code: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn uncommitted_writes_are_rolled_back_on_drop() {
        let store = InMemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_transaction(&transaction("depot-a")).await.unwrap();
        }
        assert!(store
            .find_transaction_by_key("depot-a")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_transaction(&transaction("depot-b")).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .insert_transaction(&transaction("depot-b"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, DatabaseErrorKind::UniqueViolation { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_unit_waits_for_row_lock() {
        let store = InMemoryStore::new();
        let tx = transaction("depot-c");
        let id = tx.id;
        let mut uow = store.begin().await.unwrap();
        uow.insert_transaction(&tx).await.unwrap();
        uow.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.lock_transaction(id).await.unwrap();

        let contender = store.clone();
        let handle = tokio::spawn(async move {
            let mut second = contender.begin().await.unwrap();
            second.lock_transaction(id).await.unwrap().map(|t| t.bonus_amount)
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        let mut locked = first.lock_transaction(id).await.unwrap().unwrap();
        locked.bonus_amount = 20;
        first.save_transaction(&locked).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(handle.await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn save_without_lock_is_refused() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        assert!(uow.save_transaction(&transaction("depot-d")).await.is_err());
    }

    #[tokio::test]
    async fn webhook_log_is_created_once() {
        let store = InMemoryStore::new();
        let payload = serde_json::json!({"uid": "u-1"});

        let mut uow = store.begin().await.unwrap();
        let log = uow.lock_webhook_log("u-1", "connect_ussd", &payload).await.unwrap();
        assert!(!log.processed);
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let again = uow.lock_webhook_log("u-1", "connect_ussd", &payload).await.unwrap();
        assert_eq!(again.id, log.id);
    }
}
