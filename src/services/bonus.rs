//! Referral accrual and reward redemption.

use crate::config::ReconciliationSettings;
use crate::database::models::{Bonus, Owner, Transaction, TransactionStatus, TransactionType};
use crate::database::repository::{TransactionStore, UnitOfWork};
use crate::services::error::{ReconciliationError, ReconciliationResult};
use crate::services::fees::percent_of;
use crate::services::identity::IdentityLookup;
use crate::services::notification::{Notifier, Recipient};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound for every configured bonus percentage.
pub const BONUS_PERCENT_MAX: f64 = 100.0;

pub const REFERRAL_REASON: &str = "Bonus de parrainage";

/// Bonuses locked for redemption and their total.
#[derive(Debug, Clone)]
pub struct Redeemable {
    pub bonuses: Vec<Bonus>,
    pub total: i64,
}

/// Locks every redeemable bonus of `owner` inside `uow`.
pub async fn lock_redeemable(
    uow: &mut dyn UnitOfWork,
    owner: &Owner,
) -> ReconciliationResult<Redeemable> {
    let bonuses = uow.lock_unconsumed_bonuses(owner).await?;
    let total = bonuses.iter().map(|b| b.amount).sum();
    Ok(Redeemable { bonuses, total })
}

/// Marks the locked bonuses consumed by `reward` and debits the reward balance.
pub async fn consume(
    uow: &mut dyn UnitOfWork,
    redeemable: &Redeemable,
    reward: &Transaction,
) -> ReconciliationResult<()> {
    let ids: Vec<Uuid> = redeemable.bonuses.iter().map(|b| b.id).collect();
    uow.mark_bonuses_consumed(&ids, reward.id).await?;
    uow.add_reward(&reward.owner, -redeemable.total).await?;
    Ok(())
}

/// Returns the bonuses consumed by a failed reward transaction to the pool.
/// Releasing twice is a no-op.
pub async fn release(uow: &mut dyn UnitOfWork, reward: &Transaction) -> ReconciliationResult<u64> {
    if reward.transaction_type != TransactionType::Reward {
        return Ok(0);
    }
    let released = uow.release_bonuses(&reward.owner, reward.id).await?;
    if released > 0 {
        uow.add_reward(&reward.owner, reward.amount).await?;
        info!(
            transaction_id = %reward.id,
            owner = %reward.owner,
            released,
            "Bonuses released after failed redemption"
        );
    }
    Ok(released)
}

/// Statuses under which a reward's bonuses belong back in the pool.
pub fn releases_bonuses(status: TransactionStatus) -> bool {
    matches!(status, TransactionStatus::Error | TransactionStatus::Timeout)
}

/// Consumes again the bonuses a failed reward released, for a reward moved
/// back to a live status. Nothing happens when they are still consumed.
/// Fails when any of them was redeemed by another reward in the meantime.
pub async fn reclaim(uow: &mut dyn UnitOfWork, reward: &Transaction) -> ReconciliationResult<u64> {
    if reward.transaction_type != TransactionType::Reward {
        return Ok(0);
    }
    let bonuses = uow.lock_bonuses_redeemed_by(&reward.owner, reward.id).await?;
    let total: i64 = bonuses.iter().map(|b| b.amount).sum();
    let released: Vec<Uuid> = bonuses.iter().filter(|b| !b.consumed).map(|b| b.id).collect();
    if total == reward.amount && released.is_empty() {
        return Ok(0);
    }
    if total != reward.amount || released.len() != bonuses.len() {
        return Err(ReconciliationError::InvariantViolation(format!(
            "bonuses of {} were redeemed elsewhere ({} of {} FCFA left)",
            reward.reference, total, reward.amount
        )));
    }
    uow.mark_bonuses_consumed(&released, reward.id).await?;
    uow.add_reward(&reward.owner, -reward.amount).await?;
    info!(
        transaction_id = %reward.id,
        owner = %reward.owner,
        reclaimed = released.len(),
        "Bonuses consumed again after override"
    );
    Ok(released.len() as u64)
}

pub struct BonusEngine {
    store: Arc<dyn TransactionStore>,
    identity: Arc<dyn IdentityLookup>,
    notifier: Arc<dyn Notifier>,
    settings: ReconciliationSettings,
}

impl BonusEngine {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        identity: Arc<dyn IdentityLookup>,
        notifier: Arc<dyn Notifier>,
        settings: ReconciliationSettings,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            settings,
        }
    }

    /// Deposit reward folded into the platform credit of a deposit.
    pub fn deposit_reward_for(&self, transaction: &Transaction) -> i64 {
        if !self.settings.deposit_reward || transaction.transaction_type != TransactionType::Deposit {
            return 0;
        }
        percent_of(transaction.amount, self.settings.deposit_reward_percent)
    }

    /// Credits the referrer of the transaction's owner once per transaction.
    /// Returns the created bonus, or `None` when nothing was due.
    pub async fn accrue_referral(&self, transaction_id: Uuid) -> ReconciliationResult<Option<Bonus>> {
        if !self.settings.referral_bonus {
            return Ok(None);
        }
        let snapshot = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| ReconciliationError::NotFound(transaction_id.to_string()))?;
        if snapshot.status != TransactionStatus::Accept
            || !matches!(
                snapshot.transaction_type,
                TransactionType::Deposit | TransactionType::Withdrawal
            )
        {
            return Ok(None);
        }
        let owner = match snapshot.owner {
            Owner::User(_) => snapshot.owner,
            Owner::BotUser(_) => return Ok(None),
        };
        let code = match self.identity.referrer_code(&owner).await? {
            Some(code) => code,
            None => return Ok(None),
        };
        let referrer = match self.identity.by_referral_code(&code).await? {
            Some(referrer) if referrer != owner => referrer,
            _ => {
                warn!(transaction_id = %transaction_id, referrer_code = %code, "Referrer not found");
                return Ok(None);
            }
        };
        let amount = percent_of(snapshot.amount, self.settings.bonus_percent);
        if amount <= 0 {
            return Ok(None);
        }

        let mut uow = self.store.begin().await?;
        // The transaction lock serializes concurrent accruals for the same transaction.
        if uow.lock_transaction(transaction_id).await?.is_none() {
            return Err(ReconciliationError::NotFound(transaction_id.to_string()));
        }
        if uow.bonus_exists_for_transaction(transaction_id).await? {
            return Ok(None);
        }
        let bonus = Bonus {
            id: Uuid::new_v4(),
            owner: referrer,
            amount,
            reason: REFERRAL_REASON.to_string(),
            source_transaction_id: Some(transaction_id),
            redeemed_by: None,
            consumed: false,
            deleted: false,
            created_at: Utc::now(),
        };
        uow.insert_bonus(&bonus).await?;
        let balance = uow.add_reward(&referrer, amount).await?;
        uow.commit().await?;

        info!(
            transaction_id = %transaction_id,
            referrer = %referrer,
            amount,
            reward_balance = balance,
            "Referral bonus accrued"
        );

        let content = format!(
            "Vous avez reçu un bonus de parrainage de {} FCFA. Votre solde bonus est de {} FCFA",
            amount, balance
        );
        if let Err(e) = self
            .notifier
            .send(&Recipient::Owner(referrer), REFERRAL_REASON, &content)
            .await
        {
            warn!(referrer = %referrer, error = %e, "Referral notification not delivered");
        }
        Ok(Some(bonus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::database::models::{NewTransaction, TransactionSource};
    use crate::payments::types::{NetworkApi, NetworkProfile};
    use crate::services::identity::StaticIdentityLookup;
    use crate::services::notification::TracingNotifier;

    fn reward_for(owner: Owner, amount: i64) -> Transaction {
        Transaction::new(
            "depot-2".to_string(),
            NewTransaction {
                transaction_type: TransactionType::Reward,
                amount,
                owner,
                network: NetworkProfile {
                    name: "moov".to_string(),
                    country_code: "bj".to_string(),
                    deposit_api: NetworkApi::Feexpay,
                    withdrawal_api: NetworkApi::Feexpay,
                    payment_by_link: false,
                    customer_pays_fee: true,
                    manual_processing: false,
                },
                source: TransactionSource::Mobile,
                platform_id: "1xbet".to_string(),
                player_id: "4".to_string(),
                phone_number: "22997000000".to_string(),
                customer_name: "Ama".to_string(),
                customer_email: None,
                withdrawal_code: None,
            },
            Utc::now(),
        )
    }

    async fn seed_bonus(store: &InMemoryStore, owner: Owner, amount: i64) {
        let mut uow = store.begin().await.unwrap();
        uow.insert_bonus(&Bonus {
            id: Uuid::new_v4(),
            owner,
            amount,
            reason: REFERRAL_REASON.to_string(),
            source_transaction_id: Some(Uuid::new_v4()),
            redeemed_by: None,
            consumed: false,
            deleted: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        uow.add_reward(&owner, amount).await.unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn consume_then_release_restores_the_pool() {
        let store = InMemoryStore::new();
        let owner = Owner::User(Uuid::new_v4());
        seed_bonus(&store, owner, 150).await;
        seed_bonus(&store, owner, 100).await;

        let reward = reward_for(owner, 250);
        let mut uow = store.begin().await.unwrap();
        let redeemable = lock_redeemable(uow.as_mut(), &owner).await.unwrap();
        assert_eq!(redeemable.total, 250);
        consume(uow.as_mut(), &redeemable, &reward).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.reward_balance(&owner).await.unwrap(), 0);
        assert!(store.list_bonuses(&owner).await.unwrap().iter().all(|b| b.consumed));

        let mut uow = store.begin().await.unwrap();
        assert_eq!(release(uow.as_mut(), &reward).await.unwrap(), 2);
        assert_eq!(release(uow.as_mut(), &reward).await.unwrap(), 0);
        uow.commit().await.unwrap();
        assert_eq!(store.reward_balance(&owner).await.unwrap(), 250);
        assert!(store.list_bonuses(&owner).await.unwrap().iter().all(|b| !b.consumed));
    }

    #[tokio::test]
    async fn reclaim_consumes_released_bonuses_once() {
        let store = InMemoryStore::new();
        let owner = Owner::User(Uuid::new_v4());
        seed_bonus(&store, owner, 400).await;

        let reward = reward_for(owner, 400);
        let mut uow = store.begin().await.unwrap();
        let redeemable = lock_redeemable(uow.as_mut(), &owner).await.unwrap();
        consume(uow.as_mut(), &redeemable, &reward).await.unwrap();
        // Still consumed: nothing to reclaim.
        assert_eq!(reclaim(uow.as_mut(), &reward).await.unwrap(), 0);
        release(uow.as_mut(), &reward).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.reward_balance(&owner).await.unwrap(), 400);

        let mut uow = store.begin().await.unwrap();
        assert_eq!(reclaim(uow.as_mut(), &reward).await.unwrap(), 1);
        assert_eq!(reclaim(uow.as_mut(), &reward).await.unwrap(), 0);
        uow.commit().await.unwrap();
        assert_eq!(store.reward_balance(&owner).await.unwrap(), 0);
        let bonuses = store.list_bonuses(&owner).await.unwrap();
        assert!(bonuses[0].consumed);
        assert_eq!(bonuses[0].redeemed_by, Some(reward.id));
    }

    #[tokio::test]
    async fn reclaim_refuses_bonuses_redeemed_elsewhere() {
        let store = InMemoryStore::new();
        let owner = Owner::User(Uuid::new_v4());
        seed_bonus(&store, owner, 300).await;

        let first = reward_for(owner, 300);
        let mut uow = store.begin().await.unwrap();
        let redeemable = lock_redeemable(uow.as_mut(), &owner).await.unwrap();
        consume(uow.as_mut(), &redeemable, &first).await.unwrap();
        release(uow.as_mut(), &first).await.unwrap();

        let second = reward_for(owner, 300);
        let redeemable = lock_redeemable(uow.as_mut(), &owner).await.unwrap();
        consume(uow.as_mut(), &redeemable, &second).await.unwrap();
        release(uow.as_mut(), &second).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = reclaim(uow.as_mut(), &first).await.unwrap_err();
        assert!(matches!(err, ReconciliationError::InvariantViolation(_)));
        assert_eq!(reclaim(uow.as_mut(), &second).await.unwrap(), 1);
    }

    #[test]
    fn timeout_and_error_release_bonuses() {
        assert!(releases_bonuses(TransactionStatus::Error));
        assert!(releases_bonuses(TransactionStatus::Timeout));
        assert!(!releases_bonuses(TransactionStatus::Accept));
        assert!(!releases_bonuses(TransactionStatus::InitPayment));
    }

    #[test]
    fn deposit_reward_only_applies_to_deposits() {
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::new());
        let engine = BonusEngine::new(
            store,
            Arc::new(StaticIdentityLookup::new()),
            Arc::new(TracingNotifier),
            ReconciliationSettings {
                deposit_reward_percent: 2.0,
                ..ReconciliationSettings::default()
            },
        );
        let owner = Owner::BotUser(3);
        let reward = reward_for(owner, 1000);
        assert_eq!(engine.deposit_reward_for(&reward), 0);

        let mut deposit = reward_for(owner, 1000);
        deposit.transaction_type = TransactionType::Deposit;
        assert_eq!(engine.deposit_reward_for(&deposit), 20);
    }
}
