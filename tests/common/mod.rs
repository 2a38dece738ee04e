//! Shared fixtures for the integration tests: scriptable gateways, a
//! recording task queue and notifier, and an in-memory harness wiring them
//! into the orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use mobcash_reconciliation::config::ReconciliationSettings;
use mobcash_reconciliation::database::memory::InMemoryStore;
use mobcash_reconciliation::database::models::{
    Bonus, NewTransaction, Owner, TransactionSource, TransactionType,
};
use mobcash_reconciliation::database::repository::TransactionStore;
use mobcash_reconciliation::payments::error::{PaymentError, PaymentResult};
use mobcash_reconciliation::payments::factory::GatewayResolver;
use mobcash_reconciliation::payments::provider::PaymentProvider;
use mobcash_reconciliation::payments::types::{
    AccountQuery, DepositRequest, NetworkApi, NetworkProfile, PaymentState, ProviderName,
    ProviderOutcome, StatusRequest, WithdrawalRequest,
};
use mobcash_reconciliation::services::error::ReconciliationResult;
use mobcash_reconciliation::services::identity::StaticIdentityLookup;
use mobcash_reconciliation::services::notification::{Notifier, Recipient, TransactionEvent};
use mobcash_reconciliation::services::orchestrator::ReconciliationOrchestrator;
use mobcash_reconciliation::services::task_queue::{FollowUpTask, TaskQueue};
use mobcash_reconciliation::services::webhook_intake::WebhookIntake;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const PLATFORM: &str = "betapp";

// ============================================================================
// Gateways
// ============================================================================

/// How a scripted gateway answers a deposit or withdrawal call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Accepted; the id is `<gateway>-<reference>`.
    Accept { amount: Option<i64> },
    /// Answered with `success: false`.
    Refuse(String),
    /// Answered with a rejection error.
    Reject(String),
    /// No answer in time; outcome unknown.
    Timeout,
}

pub struct MockGateway {
    name: ProviderName,
    deposit_reply: Mutex<Reply>,
    withdrawal_reply: Mutex<Reply>,
    status: Mutex<PaymentState>,
    balance: Mutex<Option<i64>>,
    status_delay: Mutex<Option<Duration>>,
    pub deposits: Mutex<Vec<DepositRequest>>,
    pub withdrawals: Mutex<Vec<WithdrawalRequest>>,
    pub status_queries: AtomicUsize,
}

impl MockGateway {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            deposit_reply: Mutex::new(Reply::Accept { amount: None }),
            withdrawal_reply: Mutex::new(Reply::Accept { amount: None }),
            status: Mutex::new(PaymentState::Pending),
            balance: Mutex::new(None),
            status_delay: Mutex::new(None),
            deposits: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
            status_queries: AtomicUsize::new(0),
        }
    }

    pub fn reply_to_deposits(&self, reply: Reply) {
        *self.deposit_reply.lock().unwrap() = reply;
    }

    pub fn reply_to_withdrawals(&self, reply: Reply) {
        *self.withdrawal_reply.lock().unwrap() = reply;
    }

    pub fn report_status(&self, state: PaymentState) {
        *self.status.lock().unwrap() = state;
    }

    pub fn report_balance(&self, balance: Option<i64>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn delay_status(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    pub fn deposit_count(&self) -> usize {
        self.deposits.lock().unwrap().len()
    }

    pub fn withdrawal_count(&self) -> usize {
        self.withdrawals.lock().unwrap().len()
    }

    fn answer(&self, reply: Reply, reference: &str) -> PaymentResult<ProviderOutcome> {
        match reply {
            Reply::Accept { amount } => Ok(ProviderOutcome::accepted(
                Some(format!("{}-{}", self.name.as_str(), reference)),
                json!({ "reference": reference }),
            )
            .with_amount(amount)),
            Reply::Refuse(message) => {
                let mut outcome = ProviderOutcome::accepted(None, json!({ "error": message }))
                    .with_message(Some(message));
                outcome.success = false;
                Ok(outcome)
            }
            Reply::Reject(message) => Err(PaymentError::rejected(self.name.as_str(), message)),
            Reply::Timeout => Err(PaymentError::TimeoutError {
                message: format!("{} did not answer", self.name.as_str()),
            }),
        }
    }
}

#[async_trait]
impl PaymentProvider for MockGateway {
    fn name(&self) -> ProviderName {
        self.name
    }

    async fn initiate_deposit(&self, request: DepositRequest) -> PaymentResult<ProviderOutcome> {
        let reference = request.reference.clone();
        self.deposits.lock().unwrap().push(request);
        let reply = self.deposit_reply.lock().unwrap().clone();
        self.answer(reply, &reference)
    }

    async fn initiate_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> PaymentResult<ProviderOutcome> {
        let reference = request.reference.clone();
        self.withdrawals.lock().unwrap().push(request);
        let reply = self.withdrawal_reply.lock().unwrap().clone();
        self.answer(reply, &reference)
    }

    async fn verify_account(&self, _query: AccountQuery) -> PaymentResult<ProviderOutcome> {
        Ok(ProviderOutcome::accepted(None, json!({})))
    }

    async fn query_status(&self, request: StatusRequest) -> PaymentResult<ProviderOutcome> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = *self.status.lock().unwrap();
        Ok(
            ProviderOutcome::accepted(request.provider_reference, json!({ "state": state }))
                .with_state(state)
                .with_message(Some(format!("{:?}", state))),
        )
    }

    async fn fetch_balance(&self) -> PaymentResult<Option<i64>> {
        Ok(*self.balance.lock().unwrap())
    }
}

/// Resolves every gateway name to a scripted gateway.
pub struct MockGateways {
    gateways: HashMap<ProviderName, Arc<MockGateway>>,
    credentialed: HashSet<String>,
}

impl MockGateways {
    pub fn new() -> Self {
        let names = [
            ProviderName::LegacyCashier,
            ProviderName::ExternalPlatform,
            ProviderName::ConnectLink,
            ProviderName::ConnectUssd,
            ProviderName::Feexpay,
        ];
        Self {
            gateways: names
                .into_iter()
                .map(|name| (name, Arc::new(MockGateway::new(name))))
                .collect(),
            credentialed: HashSet::new(),
        }
    }

    pub fn with_cashdesk(mut self, platform_id: &str) -> Self {
        self.credentialed.insert(platform_id.to_lowercase());
        self
    }

    pub fn get(&self, name: ProviderName) -> Arc<MockGateway> {
        self.gateways[&name].clone()
    }
}

impl GatewayResolver for MockGateways {
    fn platform_has_credentials(&self, platform_id: &str) -> bool {
        self.credentialed.contains(&platform_id.to_lowercase())
    }

    fn resolve(
        &self,
        provider: ProviderName,
        _platform_id: &str,
    ) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.gateways
            .get(&provider)
            .cloned()
            .map(|gateway| gateway as Arc<dyn PaymentProvider>)
            .ok_or_else(|| PaymentError::missing_config(provider.as_str()))
    }
}

// ============================================================================
// Queue and notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<FollowUpTask>>,
}

impl RecordingQueue {
    pub fn take(&self) -> Vec<FollowUpTask> {
        std::mem::take(&mut *self.tasks.lock().unwrap())
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: FollowUpTask) -> ReconciliationResult<()> {
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub recipient: Recipient,
    pub title: String,
    pub content: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<SentMessage>>,
    pub events: Mutex<Vec<(Uuid, TransactionEvent)>>,
}

impl RecordingNotifier {
    pub fn messages_to(&self, recipient: &Recipient) -> Vec<SentMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.recipient == recipient)
            .cloned()
            .collect()
    }

    pub fn events_for(&self, transaction_id: Uuid) -> Vec<TransactionEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == transaction_id)
            .map(|(_, event)| *event)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipient: &Recipient,
        title: &str,
        content: &str,
    ) -> ReconciliationResult<()> {
        self.messages.lock().unwrap().push(SentMessage {
            recipient: recipient.clone(),
            title: title.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn publish_event(
        &self,
        transaction: &mobcash_reconciliation::database::models::Transaction,
        event: TransactionEvent,
    ) -> ReconciliationResult<()> {
        self.events.lock().unwrap().push((transaction.id, event));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn test_settings() -> ReconciliationSettings {
    ReconciliationSettings {
        deposit_reward: false,
        admin_recipient: "ops".to_string(),
        ..ReconciliationSettings::default()
    }
}

pub struct Harness {
    pub memory: InMemoryStore,
    pub store: Arc<dyn TransactionStore>,
    pub gateways: Arc<MockGateways>,
    pub tasks: Arc<RecordingQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<ReconciliationOrchestrator>,
    pub intake: Arc<WebhookIntake>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(test_settings(), StaticIdentityLookup::new(), MockGateways::new())
    }

    pub fn build(
        settings: ReconciliationSettings,
        identity: StaticIdentityLookup,
        gateways: MockGateways,
    ) -> Self {
        let memory = InMemoryStore::new();
        let store: Arc<dyn TransactionStore> = Arc::new(memory.clone());
        let gateways = Arc::new(gateways);
        let tasks = Arc::new(RecordingQueue::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Arc::new(ReconciliationOrchestrator::new(
            store.clone(),
            gateways.clone(),
            tasks.clone(),
            notifier.clone(),
            Arc::new(identity),
            settings,
        ));
        let intake = Arc::new(WebhookIntake::new(store.clone(), orchestrator.clone()));
        Self {
            memory,
            store,
            gateways,
            tasks,
            notifier,
            orchestrator,
            intake,
        }
    }

    pub fn gateway(&self, name: ProviderName) -> Arc<MockGateway> {
        self.gateways.get(name)
    }

    /// Runs queued follow-up tasks until the queue stays empty.
    pub async fn run_follow_ups(&self) -> Vec<FollowUpTask> {
        let mut ran = Vec::new();
        loop {
            let batch = self.tasks.take();
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                self.orchestrator
                    .run_follow_up(&task)
                    .await
                    .expect("follow-up task should succeed");
                ran.push(task);
            }
        }
    }

    /// Seeds an unconsumed bonus and the matching reward balance.
    pub async fn seed_bonus(&self, owner: Owner, amount: i64) -> Bonus {
        let bonus = Bonus {
            id: Uuid::new_v4(),
            owner,
            amount,
            reason: "Bonus de parrainage".to_string(),
            source_transaction_id: None,
            redeemed_by: None,
            consumed: false,
            deleted: false,
            created_at: chrono::Utc::now(),
        };
        let mut uow = self.store.begin().await.unwrap();
        uow.insert_bonus(&bonus).await.unwrap();
        uow.add_reward(&owner, amount).await.unwrap();
        uow.commit().await.unwrap();
        bonus
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn wave_ci() -> NetworkProfile {
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

pub fn mtn_bj() -> NetworkProfile {
    NetworkProfile {
        name: "mtn".to_string(),
        country_code: "bj".to_string(),
        deposit_api: NetworkApi::Feexpay,
        withdrawal_api: NetworkApi::Feexpay,
        payment_by_link: false,
        customer_pays_fee: false,
        manual_processing: false,
    }
}

pub fn user() -> Owner {
    Owner::User(Uuid::new_v4())
}

pub fn request(
    transaction_type: TransactionType,
    owner: Owner,
    network: NetworkProfile,
    amount: i64,
) -> NewTransaction {
    NewTransaction {
        transaction_type,
        amount,
        owner,
        network,
        source: TransactionSource::Mobile,
        platform_id: PLATFORM.to_string(),
        player_id: "778899".to_string(),
        phone_number: "2250700000000".to_string(),
        customer_name: "Awa K.".to_string(),
        customer_email: None,
        withdrawal_code: match transaction_type {
            TransactionType::Withdrawal => Some("WX42".to_string()),
            _ => None,
        },
    }
}
