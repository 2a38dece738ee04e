//! Platform cash-float bookkeeping.
//!
//! Each accepted transaction moves its platform's ledger exactly once; the
//! transaction's `fond_calculate` flag records that it happened.

use crate::config::ReconciliationSettings;
use crate::database::models::{Transaction, TransactionStatus, TransactionType};
use crate::database::repository::TransactionStore;
use crate::payments::factory::GatewayResolver;
use crate::services::error::{ReconciliationError, ReconciliationResult};
use crate::services::notification::{Notifier, Recipient};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Applied { balance: i64 },
    /// Already applied, or the transaction is not accepted.
    Skipped,
}

/// Incremental adjustment used when no authoritative balance is available.
pub fn fallback_delta(transaction: &Transaction) -> i64 {
    match transaction.transaction_type {
        TransactionType::Deposit => -transaction.amount,
        TransactionType::Withdrawal => transaction.amount,
        TransactionType::Reward | TransactionType::Disbursement => 0,
    }
}

pub struct LedgerService {
    store: Arc<dyn TransactionStore>,
    gateways: Arc<dyn GatewayResolver>,
    notifier: Arc<dyn Notifier>,
    settings: ReconciliationSettings,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateways: Arc<dyn GatewayResolver>,
        notifier: Arc<dyn Notifier>,
        settings: ReconciliationSettings,
    ) -> Self {
        Self {
            store,
            gateways,
            notifier,
            settings,
        }
    }

    pub async fn apply_ledger_effect(&self, transaction_id: Uuid) -> ReconciliationResult<LedgerOutcome> {
        let snapshot = match self.store.find_transaction(transaction_id).await? {
            Some(tx) => tx,
            None => return Err(ReconciliationError::NotFound(transaction_id.to_string())),
        };
        if snapshot.fond_calculate || snapshot.status != TransactionStatus::Accept {
            return Ok(LedgerOutcome::Skipped);
        }

        // Provider round-trip happens before any row lock is taken.
        let authoritative = self.authoritative_balance(&snapshot).await;

        let mut uow = self.store.begin().await?;
        let mut transaction = match uow.lock_transaction(transaction_id).await? {
            Some(tx) => tx,
            None => return Err(ReconciliationError::NotFound(transaction_id.to_string())),
        };
        if transaction.fond_calculate || transaction.status != TransactionStatus::Accept {
            return Ok(LedgerOutcome::Skipped);
        }

        let mut ledger = uow.lock_ledger(&transaction.platform_id).await?;
        let previous = ledger.balance;
        ledger.balance = match authoritative {
            Some(balance) => balance,
            None => ledger.balance + fallback_delta(&transaction),
        };
        ledger.updated_at = Utc::now();
        uow.save_ledger(&ledger).await?;

        transaction.fond_calculate = true;
        transaction.updated_at = Utc::now();
        uow.save_transaction(&transaction).await?;
        uow.commit().await?;

        info!(
            transaction_id = %transaction.id,
            platform_id = %transaction.platform_id,
            previous_balance = previous,
            balance = ledger.balance,
            authoritative = authoritative.is_some(),
            "Ledger updated"
        );

        if let Some(minimum) = self.settings.minimum_solde {
            if ledger.balance < minimum {
                self.alert_low_balance(&transaction.platform_id, ledger.balance, minimum)
                    .await;
            }
        }

        Ok(LedgerOutcome::Applied {
            balance: ledger.balance,
        })
    }

    async fn authoritative_balance(&self, transaction: &Transaction) -> Option<i64> {
        let route = self.gateways.route(
            transaction.transaction_type,
            &transaction.network,
            &transaction.platform_id,
        );
        let gateway = self
            .gateways
            .resolve(route.platform?, &transaction.platform_id)
            .ok()?;
        match gateway.fetch_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(
                    platform_id = %transaction.platform_id,
                    provider = %gateway.name().as_str(),
                    error = %e,
                    "Balance refresh failed, using incremental adjustment"
                );
                None
            }
        }
    }

    async fn alert_low_balance(&self, platform_id: &str, balance: i64, minimum: i64) {
        warn!(platform_id = %platform_id, balance, minimum, "Platform balance below threshold");
        let recipient = Recipient::Admin(self.settings.admin_recipient.clone());
        let content = format!(
            "Le solde de la plateforme {} est de {} FCFA, sous le minimum de {} FCFA",
            platform_id, balance, minimum
        );
        if let Err(e) = self
            .notifier
            .send(&recipient, "Solde insuffisant", &content)
            .await
        {
            warn!(platform_id = %platform_id, error = %e, "Low-balance alert not delivered");
        }
    }
}
