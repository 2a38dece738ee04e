//! Provider callback intake with per-key deduplication.
//!
//! A callback is first recorded durably under its correlation key, then
//! processed under that key's row lock: the `processed` flag is only read
//! while the lock is held, so concurrent deliveries of the same callback
//! settle the transaction at most once.

use crate::database::models::{Transaction, WebhookLog};
use crate::database::repository::TransactionStore;
use crate::services::error::{ReconciliationError, ReconciliationResult};
use crate::services::orchestrator::{
    ReconciliationOrchestrator, SettlementOutcome, SettlementTrigger,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

/// Correlation fields, in lookup order. Providers name them differently.
const KEY_FIELDS: [&str; 6] = [
    "externalId",
    "external_id",
    "reference",
    "uid",
    "transaction_id",
    "id",
];

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub key: String,
    pub already_processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementOutcome>,
}

fn field_as_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Candidate correlation keys found in `payload`, top level first, then under `data`.
pub fn correlation_keys(payload: &JsonValue) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let scopes = [Some(payload), payload.get("data")];
    for scope in scopes.into_iter().flatten() {
        for field in KEY_FIELDS {
            if let Some(key) = scope.get(field).and_then(field_as_key) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
    }
    keys
}

pub struct WebhookIntake {
    store: Arc<dyn TransactionStore>,
    orchestrator: Arc<ReconciliationOrchestrator>,
}

impl WebhookIntake {
    pub fn new(store: Arc<dyn TransactionStore>, orchestrator: Arc<ReconciliationOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Durably records the callback; returns its correlation key.
    pub async fn record(&self, provider_name: &str, payload: &JsonValue) -> ReconciliationResult<String> {
        let key = correlation_keys(payload).into_iter().next().ok_or_else(|| {
            ReconciliationError::Validation("callback carries no correlation key".to_string())
        })?;
        let mut uow = self.store.begin().await?;
        uow.lock_webhook_log(&key, provider_name, payload).await?;
        uow.commit().await?;
        info!(provider = %provider_name, key = %key, "Webhook recorded");
        Ok(key)
    }

    pub async fn ingest(&self, provider_name: &str, payload: &JsonValue) -> ReconciliationResult<IngestOutcome> {
        let key = self.record(provider_name, payload).await?;
        self.process_key(&key).await
    }

    /// Processes the recorded callback for `key`. A failed attempt leaves the
    /// row unprocessed with its error so a later retry can pick it up.
    pub async fn process_key(&self, key: &str) -> ReconciliationResult<IngestOutcome> {
        let recorded = self
            .store
            .find_webhook_log(key)
            .await?
            .ok_or_else(|| ReconciliationError::NotFound(format!("webhook {}", key)))?;

        let mut uow = self.store.begin().await?;
        let mut log = uow
            .lock_webhook_log(key, &recorded.provider_name, &recorded.payload)
            .await?;
        if log.processed {
            info!(key = %key, "Webhook already processed");
            return Ok(IngestOutcome {
                key: key.to_string(),
                already_processed: true,
                settlement: None,
            });
        }

        let result = match self.find_transaction(&log).await {
            Ok(tx) => {
                self.orchestrator
                    .settle(
                        tx.id,
                        SettlementTrigger::Webhook {
                            payload: log.payload.clone(),
                        },
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        let now = Utc::now();
        let settlement = match result {
            Ok(outcome @ (SettlementOutcome::Settled(_) | SettlementOutcome::AlreadyFinal(_))) => {
                log.processed = true;
                log.processed_at = Some(now);
                log.error_message = None;
                Some(outcome)
            }
            Ok(SettlementOutcome::StillPending) => {
                log.attempts += 1;
                log.error_message = Some("provider still reports the operation as pending".to_string());
                Some(SettlementOutcome::StillPending)
            }
            Err(e) => {
                warn!(key = %key, provider = %log.provider_name, error = %e, "Webhook processing failed");
                log.attempts += 1;
                log.error_message = Some(e.to_string());
                None
            }
        };
        log.updated_at = now;
        uow.save_webhook_log(&log).await?;
        uow.commit().await?;

        Ok(IngestOutcome {
            key: key.to_string(),
            already_processed: false,
            settlement,
        })
    }

    async fn find_transaction(&self, log: &WebhookLog) -> ReconciliationResult<Transaction> {
        let mut candidates = correlation_keys(&log.payload);
        if !candidates.contains(&log.reference) {
            candidates.insert(0, log.reference.clone());
        }
        for candidate in &candidates {
            if let Some(tx) = self.store.find_transaction_by_key(candidate).await? {
                return Ok(tx);
            }
        }
        Err(ReconciliationError::NotFound(format!(
            "no transaction for keys {}",
            candidates.join(", ")
        )))
    }
}
