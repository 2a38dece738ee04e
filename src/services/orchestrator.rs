//! Reconciliation Orchestrator
//!
//! Drives a transaction from creation to a terminal status: sends it to the
//! routed gateways, settles it from webhooks or polls, and schedules the
//! follow-up work (notifications, ledger, referral bonus) once it settles.
//!
//! Every decision that reads a transaction's status is taken under that
//! transaction's row lock. Provider calls whose effect is not idempotent
//! (collection, platform credit) run under the same lock; status queries and
//! balance refreshes run outside it.

use crate::config::ReconciliationSettings;
use crate::database::error::DatabaseErrorKind;
use crate::database::models::{
    NewTransaction, Owner, Transaction, TransactionSource, TransactionStatus, TransactionType,
};
use crate::database::repository::{TransactionStore, UnitOfWork};
use crate::payments::factory::GatewayResolver;
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    DepositRequest, NetworkProfile, PaymentState, ProviderName, ProviderOutcome, StatusRequest,
    WithdrawalRequest,
};
use crate::services::bonus::{self, BonusEngine};
use crate::services::error::{ReconciliationError, ReconciliationResult};
use crate::services::fees;
use crate::services::identity::IdentityLookup;
use crate::services::ledger::LedgerService;
use crate::services::notification::{
    admin_failure_detail, claim_status_event, failure_message, success_message, Notifier,
    Recipient, TransactionEvent,
};
use crate::services::reference::{generate_reference, prefix_for};
use crate::services::task_queue::{FollowUpTask, TaskQueue};
use crate::services::transaction_state::{
    admin_override, is_terminal, terminal_status_for, transition,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const REFERENCE_ATTEMPTS: usize = 3;

// ============================================================================
// Types
// ============================================================================

/// What caused a settlement attempt.
#[derive(Debug, Clone)]
pub enum SettlementTrigger {
    /// Provider callback; the payload is kept for audit only.
    Webhook { payload: JsonValue },
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Settled(TransactionStatus),
    /// Provider still reports the operation as pending.
    StillPending,
    /// Another settlement got there first.
    AlreadyFinal(TransactionStatus),
}

/// Redemption of every accumulated bonus of an owner.
#[derive(Debug, Clone)]
pub struct RewardRedemption {
    pub owner: Owner,
    pub network: NetworkProfile,
    pub source: TransactionSource,
    pub platform_id: String,
    pub player_id: String,
    pub phone_number: String,
    pub customer_name: String,
}

fn rejection(provider: ProviderName, outcome: &ProviderOutcome) -> Option<ReconciliationError> {
    let refused = !outcome.success
        || matches!(outcome.state, PaymentState::Failed | PaymentState::Cancelled);
    refused.then(|| ReconciliationError::ProviderRejected {
        provider: provider.as_str().to_string(),
        message: outcome
            .raw_message
            .clone()
            .unwrap_or_else(|| "operation refused".to_string()),
    })
}

async fn lock(uow: &mut dyn UnitOfWork, id: Uuid) -> ReconciliationResult<Transaction> {
    uow.lock_transaction(id)
        .await?
        .ok_or_else(|| ReconciliationError::NotFound(id.to_string()))
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct ReconciliationOrchestrator {
    store: Arc<dyn TransactionStore>,
    gateways: Arc<dyn GatewayResolver>,
    tasks: Arc<dyn TaskQueue>,
    notifier: Arc<dyn Notifier>,
    ledger: LedgerService,
    bonuses: BonusEngine,
    settings: ReconciliationSettings,
}

impl ReconciliationOrchestrator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateways: Arc<dyn GatewayResolver>,
        tasks: Arc<dyn TaskQueue>,
        notifier: Arc<dyn Notifier>,
        identity: Arc<dyn IdentityLookup>,
        settings: ReconciliationSettings,
    ) -> Self {
        Self {
            ledger: LedgerService::new(
                store.clone(),
                gateways.clone(),
                notifier.clone(),
                settings.clone(),
            ),
            bonuses: BonusEngine::new(store.clone(), identity, notifier.clone(), settings.clone()),
            store,
            gateways,
            tasks,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn bonuses(&self) -> &BonusEngine {
        &self.bonuses
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    pub async fn create_deposit(&self, request: NewTransaction) -> ReconciliationResult<Transaction> {
        self.create(TransactionType::Deposit, request).await
    }

    pub async fn create_withdrawal(&self, request: NewTransaction) -> ReconciliationResult<Transaction> {
        self.create(TransactionType::Withdrawal, request).await
    }

    pub async fn create_disbursement(
        &self,
        request: NewTransaction,
    ) -> ReconciliationResult<Transaction> {
        self.create(TransactionType::Disbursement, request).await
    }

    async fn create(
        &self,
        transaction_type: TransactionType,
        mut request: NewTransaction,
    ) -> ReconciliationResult<Transaction> {
        request.transaction_type = transaction_type;
        let minimum = match transaction_type {
            TransactionType::Deposit => self.settings.minimum_deposit,
            TransactionType::Withdrawal | TransactionType::Disbursement => {
                self.settings.minimum_withdrawal
            }
            TransactionType::Reward => self.settings.reward_mini_withdrawal,
        };
        if request.amount < minimum {
            return Err(ReconciliationError::AmountBelowMinimum {
                amount: request.amount,
                minimum,
            });
        }
        if transaction_type == TransactionType::Withdrawal
            && request
                .withdrawal_code
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(ReconciliationError::Validation(
                "withdrawal_code is required for withdrawals".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        let transaction = self.insert_new(uow.as_mut(), request).await?;
        uow.commit().await?;

        info!(
            transaction_id = %transaction.id,
            reference = %transaction.reference,
            transaction_type = %transaction.transaction_type,
            amount = transaction.amount,
            platform_id = %transaction.platform_id,
            "Transaction created"
        );
        Ok(transaction)
    }

    /// Inserts a fresh `pending` transaction, regenerating the reference on collision.
    async fn insert_new(
        &self,
        uow: &mut dyn UnitOfWork,
        request: NewTransaction,
    ) -> ReconciliationResult<Transaction> {
        let prefix = prefix_for(request.transaction_type);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let transaction =
                Transaction::new(generate_reference(prefix), request.clone(), Utc::now());
            match uow.insert_transaction(&transaction).await {
                Ok(()) => return Ok(transaction),
                Err(e)
                    if matches!(e.kind, DatabaseErrorKind::UniqueViolation { .. })
                        && attempt < REFERENCE_ATTEMPTS =>
                {
                    warn!(reference = %transaction.reference, "Reference collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Bundles every unconsumed bonus into one `reward` transaction and credits
    /// it on the platform straight away.
    pub async fn create_reward_redemption(
        &self,
        request: RewardRedemption,
    ) -> ReconciliationResult<Transaction> {
        let mut uow = self.store.begin().await?;
        let redeemable = bonus::lock_redeemable(uow.as_mut(), &request.owner).await?;
        let minimum = self.settings.reward_mini_withdrawal.max(1);
        if redeemable.total < minimum {
            return Err(ReconciliationError::AmountBelowMinimum {
                amount: redeemable.total,
                minimum,
            });
        }
        let transaction = self
            .insert_new(
                uow.as_mut(),
                NewTransaction {
                    transaction_type: TransactionType::Reward,
                    amount: redeemable.total,
                    owner: request.owner,
                    network: request.network,
                    source: request.source,
                    platform_id: request.platform_id,
                    player_id: request.player_id,
                    phone_number: request.phone_number,
                    customer_name: request.customer_name,
                    customer_email: None,
                    withdrawal_code: None,
                },
            )
            .await?;
        bonus::consume(uow.as_mut(), &redeemable, &transaction).await?;
        uow.commit().await?;

        info!(
            transaction_id = %transaction.id,
            owner = %transaction.owner,
            bonuses = redeemable.bonuses.len(),
            amount = transaction.amount,
            "Reward redemption created"
        );
        self.credit_reward(transaction.id).await
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Issues the first external call of a `pending` transaction.
    pub async fn send_to_provider(&self, transaction_id: Uuid) -> ReconciliationResult<Transaction> {
        let snapshot = self.load(transaction_id).await?;
        match snapshot.transaction_type {
            TransactionType::Deposit => self.collect_deposit(transaction_id).await,
            TransactionType::Withdrawal | TransactionType::Disbursement => {
                self.dispatch_withdrawal(transaction_id).await
            }
            TransactionType::Reward => self.credit_reward(transaction_id).await,
        }
    }

    async fn collect_deposit(&self, transaction_id: Uuid) -> ReconciliationResult<Transaction> {
        let mut uow = self.store.begin().await?;
        let mut tx = lock(uow.as_mut(), transaction_id).await?;
        if tx.status != TransactionStatus::Pending {
            return Err(ReconciliationError::AlreadyProcessed(tx.reference));
        }

        let route = self
            .gateways
            .route(tx.transaction_type, &tx.network, &tx.platform_id);
        let provider_name = route.mobile_money.ok_or_else(|| {
            ReconciliationError::InvariantViolation(format!("no collection route for {}", tx.reference))
        })?;
        let gateway = match self.gateways.resolve(provider_name, &tx.platform_id) {
            Ok(gateway) => gateway,
            Err(e) => {
                let err = ReconciliationError::from(e);
                self.fail_in(uow, &mut tx, &err).await?;
                return Err(err);
            }
        };

        let charged = fees::collection_amount(tx.amount, &tx.network, provider_name, &self.settings);
        let request = DepositRequest {
            reference: tx.reference.clone(),
            amount: charged,
            phone_number: tx.phone_number.clone(),
            customer_name: tx.customer_name.clone(),
            customer_email: tx.customer_email.clone(),
            network: tx.network.clone(),
            player_id: tx.player_id.clone(),
            platform_id: tx.platform_id.clone(),
        };
        tx.provider = Some(provider_name);
        tx.net_payable_amount = Some(charged);

        let result = gateway.initiate_deposit(request).await;
        let outcome = match result.map_err(ReconciliationError::from) {
            Ok(outcome) => match rejection(provider_name, &outcome) {
                None => outcome,
                Some(err) => {
                    self.fail_in(uow, &mut tx, &err).await?;
                    return Ok(tx);
                }
            },
            Err(err) if err.is_outcome_unknown() => {
                warn!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    provider = %provider_name.as_str(),
                    error = %err,
                    "Collection outcome unknown, left pending"
                );
                tx.error_message = Some(err.to_string());
                tx.updated_at = Utc::now();
                uow.save_transaction(&tx).await?;
                uow.commit().await?;
                return Ok(tx);
            }
            Err(err) => {
                self.fail_in(uow, &mut tx, &err).await?;
                return Ok(tx);
            }
        };

        tx.public_id = outcome.provider_transaction_id.clone();
        tx.transaction_link = outcome.payment_link.clone();
        tx.bonus_amount = self.bonuses.deposit_reward_for(&tx);
        tx.error_message = None;
        transition(&mut tx, TransactionStatus::InitPayment, Utc::now())?;
        tx.updated_at = Utc::now();
        uow.save_transaction(&tx).await?;
        uow.commit().await?;

        info!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            provider = %provider_name.as_str(),
            public_id = ?tx.public_id,
            charged,
            bonus_amount = tx.bonus_amount,
            "Collection initiated"
        );
        self.schedule(FollowUpTask::Initiated {
            transaction_id: tx.id,
        })
        .await;
        Ok(tx)
    }

    /// Platform debit followed by the mobile-money payout.
    ///
    /// `payout_started` is committed before either non-idempotent call; a
    /// transaction with `payout_started` and no `payout_done` is only ever
    /// resolved by an operator.
    pub async fn dispatch_withdrawal(&self, transaction_id: Uuid) -> ReconciliationResult<Transaction> {
        let mut uow = self.store.begin().await?;
        let mut tx = lock(uow.as_mut(), transaction_id).await?;
        if !tx.transaction_type.pays_out() {
            return Err(ReconciliationError::Validation(format!(
                "{} is not a payout transaction",
                tx.reference
            )));
        }
        if tx.status != TransactionStatus::Pending || tx.payout_started {
            return Err(ReconciliationError::AlreadyProcessed(tx.reference));
        }
        let route = self
            .gateways
            .route(tx.transaction_type, &tx.network, &tx.platform_id);
        tx.payout_started = true;
        if route.platform.is_none() {
            transition(&mut tx, TransactionStatus::InitPayment, Utc::now())?;
        }
        tx.updated_at = Utc::now();
        uow.save_transaction(&tx).await?;
        uow.commit().await?;

        if let Some(platform) = route.platform {
            match self.debit_platform(&tx, platform).await {
                Ok(debited) => {
                    let mut uow = self.store.begin().await?;
                    tx = lock(uow.as_mut(), transaction_id).await?;
                    tx.amount = debited;
                    transition(&mut tx, TransactionStatus::InitPayment, Utc::now())?;
                    tx.updated_at = Utc::now();
                    uow.save_transaction(&tx).await?;
                    uow.commit().await?;
                    info!(transaction_id = %tx.id, reference = %tx.reference, amount = debited, "Platform debited");
                }
                Err(err) if err.is_outcome_unknown() => {
                    let message = format!("platform debit outcome unknown: {}", err);
                    self.annotate(transaction_id, &message).await?;
                    self.alert(
                        "Retrait à vérifier",
                        &format!("{} ({})", message, tx.reference),
                    )
                    .await;
                    return self.load(transaction_id).await;
                }
                Err(err) => {
                    let mut uow = self.store.begin().await?;
                    tx = lock(uow.as_mut(), transaction_id).await?;
                    self.fail_in(uow, &mut tx, &err).await?;
                    return Ok(tx);
                }
            }
        }

        if !self.settings.can_withdrawal || tx.network.manual_processing {
            info!(transaction_id = %tx.id, reference = %tx.reference, "Payout left to operators");
            self.alert(
                "Retrait manuel",
                &format!(
                    "Retrait {} de {} FCFA vers {} ({}) à effectuer manuellement",
                    tx.reference, tx.amount, tx.phone_number, tx.network.name
                ),
            )
            .await;
            return Ok(tx);
        }

        let provider_name = match route.mobile_money {
            Some(name) => name,
            None => {
                return Err(ReconciliationError::InvariantViolation(format!(
                    "no payout route for {}",
                    tx.reference
                )))
            }
        };
        let paid_out = fees::payout_amount(tx.amount, &tx.network);
        let result = match self.gateways.resolve(provider_name, &tx.platform_id) {
            Ok(gateway) => gateway
                .initiate_withdrawal(WithdrawalRequest {
                    reference: tx.reference.clone(),
                    amount: paid_out,
                    phone_number: tx.phone_number.clone(),
                    customer_name: tx.customer_name.clone(),
                    network: tx.network.clone(),
                    player_id: tx.player_id.clone(),
                    platform_id: tx.platform_id.clone(),
                    withdrawal_code: tx.withdrawal_code.clone(),
                })
                .await
                .map_err(ReconciliationError::from)
                .and_then(|outcome| match rejection(provider_name, &outcome) {
                    Some(err) => Err(err),
                    None => Ok(outcome),
                }),
            Err(e) => Err(e.into()),
        };

        let mut uow = self.store.begin().await?;
        tx = lock(uow.as_mut(), transaction_id).await?;
        match result {
            Ok(outcome) => {
                tx.payout_done = true;
                tx.provider = Some(provider_name);
                tx.public_id = outcome.provider_transaction_id.or(tx.public_id.take());
                tx.net_payable_amount = Some(paid_out);
                tx.updated_at = Utc::now();
                uow.save_transaction(&tx).await?;
                uow.commit().await?;
                info!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    provider = %provider_name.as_str(),
                    amount = paid_out,
                    "Payout issued"
                );
                self.schedule(FollowUpTask::Initiated {
                    transaction_id: tx.id,
                })
                .await;
            }
            Err(err) if err.is_outcome_unknown() => {
                tx.error_message = Some(format!("payout outcome unknown: {}", err));
                tx.updated_at = Utc::now();
                uow.save_transaction(&tx).await?;
                uow.commit().await?;
                warn!(transaction_id = %tx.id, reference = %tx.reference, error = %err, "Payout outcome unknown");
                self.alert(
                    "Retrait à vérifier",
                    &format!("Paiement {} sans réponse: {}", tx.reference, err),
                )
                .await;
            }
            Err(err) => {
                let debited = tx.transaction_type == TransactionType::Withdrawal;
                self.fail_in(uow, &mut tx, &err).await?;
                if debited {
                    self.alert(
                        "Retrait échoué après débit",
                        &admin_failure_detail(&tx),
                    )
                    .await;
                }
            }
        }
        Ok(tx)
    }

    async fn debit_platform(
        &self,
        tx: &Transaction,
        platform: ProviderName,
    ) -> ReconciliationResult<i64> {
        let gateway = self.gateways.resolve(platform, &tx.platform_id)?;
        let outcome = gateway
            .initiate_withdrawal(WithdrawalRequest {
                reference: tx.reference.clone(),
                amount: tx.amount,
                phone_number: tx.phone_number.clone(),
                customer_name: tx.customer_name.clone(),
                network: tx.network.clone(),
                player_id: tx.player_id.clone(),
                platform_id: tx.platform_id.clone(),
                withdrawal_code: tx.withdrawal_code.clone(),
            })
            .await?;
        if let Some(err) = rejection(platform, &outcome) {
            return Err(err);
        }
        Ok(outcome
            .amount
            .map(i64::abs)
            .filter(|amount| *amount > 0)
            .unwrap_or(tx.amount))
    }

    async fn credit_platform(&self, tx: &Transaction) -> ReconciliationResult<ProviderOutcome> {
        let route = self
            .gateways
            .route(tx.transaction_type, &tx.network, &tx.platform_id);
        let platform = route.platform.ok_or_else(|| {
            ReconciliationError::InvariantViolation(format!("no credit route for {}", tx.reference))
        })?;
        let gateway = self.gateways.resolve(platform, &tx.platform_id)?;
        let outcome = gateway
            .initiate_deposit(DepositRequest {
                reference: tx.reference.clone(),
                amount: tx.platform_credit_amount(),
                phone_number: tx.phone_number.clone(),
                customer_name: tx.customer_name.clone(),
                customer_email: tx.customer_email.clone(),
                network: tx.network.clone(),
                player_id: tx.player_id.clone(),
                platform_id: tx.platform_id.clone(),
            })
            .await?;
        match rejection(platform, &outcome) {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    async fn credit_reward(&self, transaction_id: Uuid) -> ReconciliationResult<Transaction> {
        let mut uow = self.store.begin().await?;
        let mut tx = lock(uow.as_mut(), transaction_id).await?;
        if tx.transaction_type != TransactionType::Reward || tx.status != TransactionStatus::Pending
        {
            return Err(ReconciliationError::AlreadyProcessed(tx.reference));
        }

        match self.credit_platform(&tx).await {
            Ok(outcome) => {
                tx.public_id = outcome.provider_transaction_id;
                transition(&mut tx, TransactionStatus::Accept, Utc::now())?;
                tx.updated_at = Utc::now();
                uow.save_transaction(&tx).await?;
                uow.commit().await?;
                info!(transaction_id = %tx.id, reference = %tx.reference, amount = tx.amount, "Reward credited");
                self.schedule(FollowUpTask::Settled {
                    transaction_id: tx.id,
                })
                .await;
            }
            Err(err) if err.is_outcome_unknown() => {
                tx.error_message = Some(err.to_string());
                transition(&mut tx, TransactionStatus::InitPayment, Utc::now())?;
                tx.updated_at = Utc::now();
                uow.save_transaction(&tx).await?;
                uow.commit().await?;
                self.alert(
                    "Bonus à vérifier",
                    &format!("Crédit du bonus {} sans réponse: {}", tx.reference, err),
                )
                .await;
            }
            Err(err) => {
                self.fail_in(uow, &mut tx, &err).await?;
            }
        }
        Ok(tx)
    }

    // ------------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------------

    pub async fn settle(
        &self,
        transaction_id: Uuid,
        trigger: SettlementTrigger,
    ) -> ReconciliationResult<SettlementOutcome> {
        let snapshot = self.load(transaction_id).await?;
        if is_terminal(snapshot.status) {
            return Ok(SettlementOutcome::AlreadyFinal(snapshot.status));
        }
        if snapshot.transaction_type == TransactionType::Reward {
            warn!(transaction_id = %snapshot.id, reference = %snapshot.reference, "Reward credits are resolved by operators");
            return Ok(SettlementOutcome::StillPending);
        }
        if awaits_operator_credit(&snapshot) {
            warn!(transaction_id = %snapshot.id, reference = %snapshot.reference, "Unanswered platform credit is resolved by operators");
            return Ok(SettlementOutcome::StillPending);
        }

        // The provider is the source of truth, whatever the webhook claims.
        let gateway = self.status_gateway(&snapshot)?;
        let queried = gateway
            .query_status(StatusRequest {
                reference: snapshot.reference.clone(),
                provider_reference: snapshot.public_id.clone(),
                network: Some(snapshot.network.clone()),
            })
            .await;
        let outcome = match queried {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = ReconciliationError::from(e);
                warn!(
                    transaction_id = %snapshot.id,
                    reference = %snapshot.reference,
                    error = %err,
                    "Status query failed"
                );
                self.record_diagnostics(transaction_id, &trigger, &err).await?;
                return Err(err);
            }
        };

        let mut uow = self.store.begin().await?;
        let mut tx = lock(uow.as_mut(), transaction_id).await?;
        if is_terminal(tx.status) {
            return Ok(SettlementOutcome::AlreadyFinal(tx.status));
        }
        if awaits_operator_credit(&tx) {
            return Ok(SettlementOutcome::StillPending);
        }
        let now = Utc::now();
        if let SettlementTrigger::Webhook { payload } = &trigger {
            tx.webhook_data = Some(payload.clone());
            tx.webhook_received_at = Some(now);
        }

        let target = match terminal_status_for(outcome.state) {
            Some(status) => status,
            None => {
                tx.updated_at = now;
                uow.save_transaction(&tx).await?;
                uow.commit().await?;
                return Ok(SettlementOutcome::StillPending);
            }
        };

        let mut credit_failure = None;
        let status = match target {
            TransactionStatus::Accept if tx.transaction_type.credits_platform() => {
                match self.credit_platform(&tx).await {
                    Ok(_) => TransactionStatus::Accept,
                    // Re-crediting automatically could pay twice; operators decide.
                    Err(err) if err.is_outcome_unknown() => {
                        tx.error_message = Some(format!("platform credit unanswered: {}", err));
                        tx.payout_started = true;
                        if tx.status == TransactionStatus::Pending {
                            transition(&mut tx, TransactionStatus::InitPayment, Utc::now())?;
                        }
                        tx.updated_at = Utc::now();
                        uow.save_transaction(&tx).await?;
                        uow.commit().await?;
                        warn!(transaction_id = %tx.id, reference = %tx.reference, error = %err, "Platform credit outcome unknown after collection");
                        self.alert(
                            "Crédit plateforme à vérifier",
                            &format!(
                                "{} sans réponse de la plateforme: {} raw_response={}",
                                tx.reference, err, outcome.raw
                            ),
                        )
                        .await;
                        return Ok(SettlementOutcome::StillPending);
                    }
                    Err(err) => {
                        tx.error_message = Some(format!("platform credit failed: {}", err));
                        credit_failure = Some(err);
                        TransactionStatus::Error
                    }
                }
            }
            TransactionStatus::Accept => {
                tx.payout_done = true;
                TransactionStatus::Accept
            }
            other => {
                if let Some(message) = outcome.raw_message.clone() {
                    tx.error_message = Some(message);
                }
                other
            }
        };

        transition(&mut tx, status, Utc::now())?;
        if bonus::releases_bonuses(status) {
            bonus::release(uow.as_mut(), &tx).await?;
        }
        tx.updated_at = Utc::now();
        uow.save_transaction(&tx).await?;
        uow.commit().await?;

        info!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            provider_state = ?outcome.state,
            status = %status,
            "Transaction settled"
        );

        if let Some(err) = credit_failure {
            error!(transaction_id = %tx.id, reference = %tx.reference, error = %err, "Platform credit failed after collection");
            self.alert(
                "Crédit plateforme échoué",
                &format!(
                    "{} raw_response={}",
                    admin_failure_detail(&tx),
                    outcome.raw
                ),
            )
            .await;
        }
        self.schedule_terminal(&tx).await;
        Ok(SettlementOutcome::Settled(status))
    }

    fn status_gateway(&self, tx: &Transaction) -> ReconciliationResult<Arc<dyn PaymentProvider>> {
        let provider = match tx.provider {
            Some(provider) if !provider.is_platform_cashier() => provider,
            _ => self
                .gateways
                .route(tx.transaction_type, &tx.network, &tx.platform_id)
                .mobile_money
                .ok_or_else(|| {
                    ReconciliationError::InvariantViolation(format!(
                        "no status route for {}",
                        tx.reference
                    ))
                })?,
        };
        Ok(self.gateways.resolve(provider, &tx.platform_id)?)
    }

    async fn record_diagnostics(
        &self,
        transaction_id: Uuid,
        trigger: &SettlementTrigger,
        err: &ReconciliationError,
    ) -> ReconciliationResult<()> {
        let mut uow = self.store.begin().await?;
        let mut tx = lock(uow.as_mut(), transaction_id).await?;
        if is_terminal(tx.status) {
            return Ok(());
        }
        if let SettlementTrigger::Webhook { payload } = trigger {
            tx.webhook_data = Some(payload.clone());
            tx.webhook_received_at = Some(Utc::now());
        }
        tx.error_message = Some(err.to_string());
        tx.updated_at = Utc::now();
        uow.save_transaction(&tx).await?;
        uow.commit().await?;
        Ok(())
    }

    /// Settles a non-terminal transaction on demand and returns its current state.
    pub async fn check_status(&self, key: &str) -> ReconciliationResult<Transaction> {
        let tx = self
            .store
            .find_transaction_by_key(key)
            .await?
            .ok_or_else(|| ReconciliationError::NotFound(key.to_string()))?;
        if !is_terminal(tx.status) {
            if let Err(e) = self.settle(tx.id, SettlementTrigger::Poll).await {
                warn!(transaction_id = %tx.id, reference = %tx.reference, error = %e, "On-demand settlement failed");
            }
        }
        self.load(tx.id).await
    }

    pub async fn admin_set_status(
        &self,
        key: &str,
        status: TransactionStatus,
        admin_id: &str,
    ) -> ReconciliationResult<Transaction> {
        let mut uow = self.store.begin().await?;
        let mut tx = uow
            .lock_transaction_by_key(key)
            .await?
            .ok_or_else(|| ReconciliationError::NotFound(key.to_string()))?;
        let previous = tx.status;
        admin_override(&mut tx, status, admin_id, Utc::now());
        if bonus::releases_bonuses(status) {
            bonus::release(uow.as_mut(), &tx).await?;
        } else {
            bonus::reclaim(uow.as_mut(), &tx).await?;
        }
        tx.updated_at = Utc::now();
        uow.save_transaction(&tx).await?;
        uow.commit().await?;

        warn!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            admin_id = %admin_id,
            from = %previous,
            to = %status,
            "Status overridden by admin"
        );
        self.schedule_terminal(&tx).await;
        Ok(tx)
    }

    // ------------------------------------------------------------------------
    // Follow-up work
    // ------------------------------------------------------------------------

    /// Runs one follow-up task. Safe to run more than once for the same task.
    pub async fn run_follow_up(&self, task: &FollowUpTask) -> ReconciliationResult<()> {
        match task {
            FollowUpTask::Settled { transaction_id } => {
                self.ledger.apply_ledger_effect(*transaction_id).await?;
                self.bonuses.accrue_referral(*transaction_id).await?;
                if let Some(tx) = self.claim_event(*transaction_id).await? {
                    let (title, content) = success_message(&tx);
                    self.notifier
                        .send(&Recipient::Owner(tx.owner), &title, &content)
                        .await?;
                }
            }
            FollowUpTask::Failed { transaction_id } => {
                if let Some(tx) = self.claim_event(*transaction_id).await? {
                    let (title, content) = failure_message(&tx);
                    self.notifier
                        .send(&Recipient::Owner(tx.owner), &title, &content)
                        .await?;
                    self.notifier
                        .send(
                            &Recipient::Admin(self.settings.admin_recipient.clone()),
                            "Transaction échouée",
                            &admin_failure_detail(&tx),
                        )
                        .await?;
                }
            }
            FollowUpTask::Initiated { transaction_id } => {
                self.claim_event(*transaction_id).await?;
            }
            FollowUpTask::AdminAlert { title, content } => {
                self.notifier
                    .send(
                        &Recipient::Admin(self.settings.admin_recipient.clone()),
                        title,
                        content,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Claims and publishes the event of the transaction's current status.
    /// Returns the transaction when this call published it.
    async fn claim_event(&self, transaction_id: Uuid) -> ReconciliationResult<Option<Transaction>> {
        let mut uow = self.store.begin().await?;
        let mut tx = lock(uow.as_mut(), transaction_id).await?;
        let event: TransactionEvent = match claim_status_event(&mut tx) {
            Some(event) => event,
            None => return Ok(None),
        };
        uow.save_transaction(&tx).await?;
        uow.commit().await?;
        self.notifier.publish_event(&tx, event).await?;
        Ok(Some(tx))
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn load(&self, transaction_id: Uuid) -> ReconciliationResult<Transaction> {
        self.store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| ReconciliationError::NotFound(transaction_id.to_string()))
    }

    /// Moves a locked transaction to `error`, commits, and schedules the failure follow-up.
    async fn fail_in(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        tx: &mut Transaction,
        err: &ReconciliationError,
    ) -> ReconciliationResult<()> {
        tx.error_message = Some(err.to_string());
        transition(tx, TransactionStatus::Error, Utc::now())?;
        bonus::release(uow.as_mut(), tx).await?;
        tx.updated_at = Utc::now();
        uow.save_transaction(tx).await?;
        uow.commit().await?;
        warn!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            error = %err,
            "Transaction failed"
        );
        self.schedule(FollowUpTask::Failed {
            transaction_id: tx.id,
        })
        .await;
        Ok(())
    }

    async fn annotate(&self, transaction_id: Uuid, message: &str) -> ReconciliationResult<()> {
        let mut uow = self.store.begin().await?;
        let mut tx = lock(uow.as_mut(), transaction_id).await?;
        tx.error_message = Some(message.to_string());
        tx.updated_at = Utc::now();
        uow.save_transaction(&tx).await?;
        uow.commit().await?;
        Ok(())
    }

    async fn schedule_terminal(&self, tx: &Transaction) {
        if let Some(task) = terminal_task(tx) {
            self.schedule(task).await;
        }
    }

    /// Queues the follow-up of a terminal transaction again. Used by the
    /// sweep that recovers tasks lost after their transaction committed.
    pub async fn requeue_follow_up(&self, tx: &Transaction) -> ReconciliationResult<bool> {
        match terminal_task(tx) {
            Some(task) => {
                self.tasks.enqueue(task).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // A lost terminal task is recovered by `requeue_follow_up`.
    async fn schedule(&self, task: FollowUpTask) {
        if let Err(e) = self.tasks.enqueue(task.clone()).await {
            error!(task = ?task, error = %e, "Follow-up task not scheduled");
        }
    }

    async fn alert(&self, title: &str, content: &str) {
        warn!(title = %title, "{}", content);
        self.schedule(FollowUpTask::AdminAlert {
            title: title.to_string(),
            content: content.to_string(),
        })
        .await;
    }
}

fn terminal_task(tx: &Transaction) -> Option<FollowUpTask> {
    match tx.status {
        TransactionStatus::Accept => Some(FollowUpTask::Settled {
            transaction_id: tx.id,
        }),
        TransactionStatus::Error | TransactionStatus::Timeout => Some(FollowUpTask::Failed {
            transaction_id: tx.id,
        }),
        TransactionStatus::Pending | TransactionStatus::InitPayment => None,
    }
}

/// A platform credit was issued without a definite answer; only an operator
/// may resolve the transaction.
fn awaits_operator_credit(tx: &Transaction) -> bool {
    tx.transaction_type.credits_platform() && tx.payout_started && !tx.payout_done
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn refused_outcomes_become_rejections() {
        let refused = ProviderOutcome {
            success: false,
            state: PaymentState::Pending,
            provider_transaction_id: None,
            raw_message: Some("solde insuffisant".to_string()),
            payment_link: None,
            amount: None,
            raw: json!({}),
        };
        match rejection(ProviderName::Feexpay, &refused) {
            Some(ReconciliationError::ProviderRejected { provider, message }) => {
                assert_eq!(provider, ProviderName::Feexpay.as_str());
                assert_eq!(message, "solde insuffisant");
            }
            other => panic!("unexpected {:?}", other),
        }

        let failed = ProviderOutcome::accepted(None, json!({})).with_state(PaymentState::Failed);
        assert!(rejection(ProviderName::ConnectUssd, &failed).is_some());

        let accepted = ProviderOutcome::accepted(Some("uid-1".to_string()), json!({}));
        assert!(rejection(ProviderName::ConnectUssd, &accepted).is_none());
    }

    #[test]
    fn settlement_outcome_serializes_with_status() {
        let value = serde_json::to_value(SettlementOutcome::Settled(TransactionStatus::Accept)).unwrap();
        assert_eq!(value, json!({"outcome": "settled", "status": "accept"}));
        let value = serde_json::to_value(SettlementOutcome::StillPending).unwrap();
        assert_eq!(value, json!({"outcome": "still_pending"}));
    }
}
