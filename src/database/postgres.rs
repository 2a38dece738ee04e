//! Postgres store. Row locks are `SELECT ... FOR UPDATE` inside one database
//! transaction per unit of work.

use crate::database::error::DatabaseError;
use crate::database::models::{
    Bonus, Ledger, Owner, StatusHistoryEntry, Transaction, TransactionSource, TransactionStatus,
    TransactionType, WebhookLog,
};
use crate::database::repository::{StoreResult, TransactionStore, UnitOfWork};
use crate::payments::types::{NetworkProfile, ProviderName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_reconciliation.sql");

/// Waiting longer than this for a row lock fails the unit with a lock conflict.
const LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '10s'";

const TRANSACTION_COLUMNS: &str = "id, reference, public_id, transaction_type, provider, network, \
     source, amount, net_payable_amount, bonus_amount, user_id, bot_user_id, platform_id, \
     player_id, phone_number, customer_name, customer_email, withdrawal_code, status, \
     status_history, payout_started, payout_done, fond_calculate, fixed_by_admin, \
     success_event_sent, fail_event_sent, pending_event_sent, timeout_event_sent, \
     transaction_link, webhook_data, error_message, webhook_received_at, validated_at, \
     created_at, updated_at";

const WEBHOOK_COLUMNS: &str = "id, reference, provider_name, payload, processed, processed_at, \
     error_message, attempts, created_at, updated_at";

const BONUS_COLUMNS: &str = "id, user_id, bot_user_id, amount, reason, source_transaction_id, \
     redeemed_by, consumed, deleted, created_at";

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    public_id: Option<String>,
    transaction_type: String,
    provider: Option<String>,
    network: Json<NetworkProfile>,
    source: String,
    amount: i64,
    net_payable_amount: Option<i64>,
    bonus_amount: i64,
    user_id: Option<Uuid>,
    bot_user_id: Option<i64>,
    platform_id: String,
    player_id: String,
    phone_number: String,
    customer_name: String,
    customer_email: Option<String>,
    withdrawal_code: Option<String>,
    status: String,
    status_history: Json<Vec<StatusHistoryEntry>>,
    payout_started: bool,
    payout_done: bool,
    fond_calculate: bool,
    fixed_by_admin: bool,
    success_event_sent: bool,
    fail_event_sent: bool,
    pending_event_sent: bool,
    timeout_event_sent: bool,
    transaction_link: Option<String>,
    webhook_data: Option<JsonValue>,
    error_message: Option<String>,
    webhook_received_at: Option<DateTime<Utc>>,
    validated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let owner = Owner::from_columns(row.user_id, row.bot_user_id).ok_or_else(|| {
            DatabaseError::corrupted(format!("transaction {} has no single owner", row.id))
        })?;
        let status = TransactionStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::corrupted(format!("transaction {} status '{}'", row.id, row.status))
        })?;
        let transaction_type =
            TransactionType::from_str(&row.transaction_type).map_err(DatabaseError::corrupted)?;
        let source = TransactionSource::from_str(&row.source).map_err(DatabaseError::corrupted)?;
        let provider = row
            .provider
            .as_deref()
            .map(ProviderName::from_str)
            .transpose()
            .map_err(|e| DatabaseError::corrupted(e.to_string()))?;

        Ok(Transaction {
            id: row.id,
            reference: row.reference,
            public_id: row.public_id,
            transaction_type,
            provider,
            network: row.network.0,
            source,
            amount: row.amount,
            net_payable_amount: row.net_payable_amount,
            bonus_amount: row.bonus_amount,
            owner,
            platform_id: row.platform_id,
            player_id: row.player_id,
            phone_number: row.phone_number,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            withdrawal_code: row.withdrawal_code,
            status,
            status_history: row.status_history.0,
            payout_started: row.payout_started,
            payout_done: row.payout_done,
            fond_calculate: row.fond_calculate,
            fixed_by_admin: row.fixed_by_admin,
            success_event_sent: row.success_event_sent,
            fail_event_sent: row.fail_event_sent,
            pending_event_sent: row.pending_event_sent,
            timeout_event_sent: row.timeout_event_sent,
            transaction_link: row.transaction_link,
            webhook_data: row.webhook_data,
            error_message: row.error_message,
            webhook_received_at: row.webhook_received_at,
            validated_at: row.validated_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WebhookRow {
    id: Uuid,
    reference: String,
    provider_name: String,
    payload: JsonValue,
    processed: bool,
    processed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WebhookRow> for WebhookLog {
    fn from(row: WebhookRow) -> Self {
        WebhookLog {
            id: row.id,
            reference: row.reference,
            provider_name: row.provider_name,
            payload: row.payload,
            processed: row.processed,
            processed_at: row.processed_at,
            error_message: row.error_message,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    platform_id: String,
    balance: i64,
    updated_at: DateTime<Utc>,
}

impl From<LedgerRow> for Ledger {
    fn from(row: LedgerRow) -> Self {
        Ledger {
            platform_id: row.platform_id,
            balance: row.balance,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BonusRow {
    id: Uuid,
    user_id: Option<Uuid>,
    bot_user_id: Option<i64>,
    amount: i64,
    reason: String,
    source_transaction_id: Option<Uuid>,
    redeemed_by: Option<Uuid>,
    consumed: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<BonusRow> for Bonus {
    type Error = DatabaseError;

    fn try_from(row: BonusRow) -> Result<Self, Self::Error> {
        let owner = Owner::from_columns(row.user_id, row.bot_user_id).ok_or_else(|| {
            DatabaseError::corrupted(format!("bonus {} has no single owner", row.id))
        })?;
        Ok(Bonus {
            id: row.id,
            owner,
            amount: row.amount,
            reason: row.reason,
            source_transaction_id: row.source_transaction_id,
            redeemed_by: row.redeemed_by,
            consumed: row.consumed,
            deleted: row.deleted,
            created_at: row.created_at,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> StoreResult<Vec<Transaction>> {
    rows.into_iter().map(Transaction::try_from).collect()
}

fn into_bonuses(rows: Vec<BonusRow>) -> StoreResult<Vec<Bonus>> {
    rows.into_iter().map(Bonus::try_from).collect()
}

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables if they are missing.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        info!("Reconciliation schema is in place");
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        sqlx::query(LOCK_TIMEOUT)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Transaction::try_from).transpose()
    }

    async fn find_transaction_by_key(&self, key: &str) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions \
             WHERE reference = $1 OR public_id = $1 OR id::text = $1 \
             ORDER BY created_at LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Transaction::try_from).transpose()
    }

    async fn list_awaiting_confirmation(&self, limit: i64) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions \
             WHERE status IN ('pending', 'init_payment') AND public_id IS NOT NULL \
             ORDER BY created_at LIMIT $1",
            TRANSACTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_transactions(rows)
    }

    async fn list_unfinished_follow_ups(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions \
             WHERE ((status = 'accept' AND (fond_calculate = FALSE OR success_event_sent = FALSE)) \
                 OR (status = 'error' AND fail_event_sent = FALSE) \
                 OR (status = 'timeout' AND timeout_event_sent = FALSE)) \
               AND updated_at <= $1 \
             ORDER BY updated_at LIMIT $2",
            TRANSACTION_COLUMNS
        ))
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_transactions(rows)
    }

    async fn list_unprocessed_webhooks(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> StoreResult<Vec<WebhookLog>> {
        let rows = sqlx::query_as::<_, WebhookRow>(&format!(
            "SELECT {} FROM webhook_logs \
             WHERE processed = FALSE AND attempts < $1 \
             ORDER BY created_at LIMIT $2",
            WEBHOOK_COLUMNS
        ))
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(WebhookLog::from).collect())
    }

    async fn find_webhook_log(&self, key: &str) -> StoreResult<Option<WebhookLog>> {
        let row = sqlx::query_as::<_, WebhookRow>(&format!(
            "SELECT {} FROM webhook_logs WHERE reference = $1",
            WEBHOOK_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(WebhookLog::from))
    }

    async fn find_ledger(&self, platform_id: &str) -> StoreResult<Option<Ledger>> {
        let row = sqlx::query_as::<_, LedgerRow>(
            "SELECT platform_id, balance, updated_at FROM ledgers WHERE platform_id = $1",
        )
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(Ledger::from))
    }

    async fn list_bonuses(&self, owner: &Owner) -> StoreResult<Vec<Bonus>> {
        let rows = sqlx::query_as::<_, BonusRow>(&format!(
            "SELECT {} FROM bonuses \
             WHERE user_id IS NOT DISTINCT FROM $1 AND bot_user_id IS NOT DISTINCT FROM $2 \
             ORDER BY created_at",
            BONUS_COLUMNS
        ))
        .bind(owner.user_id())
        .bind(owner.bot_user_id())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_bonuses(rows)
    }

    async fn reward_balance(&self, owner: &Owner) -> StoreResult<i64> {
        let amount: Option<i64> =
            sqlx::query_scalar("SELECT amount FROM rewards WHERE owner_key = $1")
                .bind(owner.key())
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(amount.unwrap_or(0))
    }
}

pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Transaction::try_from).transpose()
    }

    async fn lock_transaction_by_key(&mut self, key: &str) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions \
             WHERE reference = $1 OR public_id = $1 OR id::text = $1 \
             ORDER BY created_at LIMIT 1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Transaction::try_from).transpose()
    }

    async fn insert_transaction(&mut self, t: &Transaction) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, \
             $27, $28, $29, $30, $31, $32, $33, $34, $35)",
            TRANSACTION_COLUMNS
        ))
        .bind(t.id)
        .bind(&t.reference)
        .bind(&t.public_id)
        .bind(t.transaction_type.as_str())
        .bind(t.provider.map(|p| p.as_str()))
        .bind(Json(&t.network))
        .bind(t.source.as_str())
        .bind(t.amount)
        .bind(t.net_payable_amount)
        .bind(t.bonus_amount)
        .bind(t.owner.user_id())
        .bind(t.owner.bot_user_id())
        .bind(&t.platform_id)
        .bind(&t.player_id)
        .bind(&t.phone_number)
        .bind(&t.customer_name)
        .bind(&t.customer_email)
        .bind(&t.withdrawal_code)
        .bind(t.status.to_db_status())
        .bind(Json(&t.status_history))
        .bind(t.payout_started)
        .bind(t.payout_done)
        .bind(t.fond_calculate)
        .bind(t.fixed_by_admin)
        .bind(t.success_event_sent)
        .bind(t.fail_event_sent)
        .bind(t.pending_event_sent)
        .bind(t.timeout_event_sent)
        .bind(&t.transaction_link)
        .bind(&t.webhook_data)
        .bind(&t.error_message)
        .bind(t.webhook_received_at)
        .bind(t.validated_at)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn save_transaction(&mut self, t: &Transaction) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET \
                public_id = $2, provider = $3, amount = $4, net_payable_amount = $5, \
                bonus_amount = $6, status = $7, status_history = $8, payout_started = $9, \
                payout_done = $10, fond_calculate = $11, fixed_by_admin = $12, \
                success_event_sent = $13, fail_event_sent = $14, pending_event_sent = $15, \
                timeout_event_sent = $16, transaction_link = $17, webhook_data = $18, \
                error_message = $19, webhook_received_at = $20, validated_at = $21, \
                withdrawal_code = $22, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(t.id)
        .bind(&t.public_id)
        .bind(t.provider.map(|p| p.as_str()))
        .bind(t.amount)
        .bind(t.net_payable_amount)
        .bind(t.bonus_amount)
        .bind(t.status.to_db_status())
        .bind(Json(&t.status_history))
        .bind(t.payout_started)
        .bind(t.payout_done)
        .bind(t.fond_calculate)
        .bind(t.fixed_by_admin)
        .bind(t.success_event_sent)
        .bind(t.fail_event_sent)
        .bind(t.pending_event_sent)
        .bind(t.timeout_event_sent)
        .bind(&t.transaction_link)
        .bind(&t.webhook_data)
        .bind(&t.error_message)
        .bind(t.webhook_received_at)
        .bind(t.validated_at)
        .bind(&t.withdrawal_code)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("transaction", t.id));
        }
        Ok(())
    }

    async fn lock_webhook_log(
        &mut self,
        key: &str,
        provider_name: &str,
        payload: &JsonValue,
    ) -> StoreResult<WebhookLog> {
        sqlx::query(
            "INSERT INTO webhook_logs (id, reference, provider_name, payload) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (reference) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(provider_name)
        .bind(payload)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, WebhookRow>(&format!(
            "SELECT {} FROM webhook_logs WHERE reference = $1 FOR UPDATE",
            WEBHOOK_COLUMNS
        ))
        .bind(key)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into())
    }

    async fn save_webhook_log(&mut self, log: &WebhookLog) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_logs SET processed = $2, processed_at = $3, error_message = $4, \
             attempts = $5, payload = $6, updated_at = NOW() WHERE reference = $1",
        )
        .bind(&log.reference)
        .bind(log.processed)
        .bind(log.processed_at)
        .bind(&log.error_message)
        .bind(log.attempts)
        .bind(&log.payload)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn lock_ledger(&mut self, platform_id: &str) -> StoreResult<Ledger> {
        sqlx::query(
            "INSERT INTO ledgers (platform_id, balance) VALUES ($1, 0) \
             ON CONFLICT (platform_id) DO NOTHING",
        )
        .bind(platform_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, LedgerRow>(
            "SELECT platform_id, balance, updated_at FROM ledgers \
             WHERE platform_id = $1 FOR UPDATE",
        )
        .bind(platform_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into())
    }

    async fn save_ledger(&mut self, ledger: &Ledger) -> StoreResult<()> {
        sqlx::query("UPDATE ledgers SET balance = $2, updated_at = $3 WHERE platform_id = $1")
            .bind(&ledger.platform_id)
            .bind(ledger.balance)
            .bind(ledger.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn lock_unconsumed_bonuses(&mut self, owner: &Owner) -> StoreResult<Vec<Bonus>> {
        let rows = sqlx::query_as::<_, BonusRow>(&format!(
            "SELECT {} FROM bonuses \
             WHERE user_id IS NOT DISTINCT FROM $1 AND bot_user_id IS NOT DISTINCT FROM $2 \
               AND consumed = FALSE AND deleted = FALSE \
             ORDER BY created_at FOR UPDATE",
            BONUS_COLUMNS
        ))
        .bind(owner.user_id())
        .bind(owner.bot_user_id())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_bonuses(rows)
    }

    async fn mark_bonuses_consumed(
        &mut self,
        ids: &[Uuid],
        redeemed_by: Uuid,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE bonuses SET consumed = TRUE, redeemed_by = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(redeemed_by)
            .execute(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn release_bonuses(&mut self, owner: &Owner, redeemed_by: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE bonuses SET consumed = FALSE \
             WHERE redeemed_by = $1 AND consumed = TRUE \
               AND user_id IS NOT DISTINCT FROM $2 AND bot_user_id IS NOT DISTINCT FROM $3",
        )
        .bind(redeemed_by)
        .bind(owner.user_id())
        .bind(owner.bot_user_id())
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn lock_bonuses_redeemed_by(
        &mut self,
        owner: &Owner,
        redeemed_by: Uuid,
    ) -> StoreResult<Vec<Bonus>> {
        let rows = sqlx::query_as::<_, BonusRow>(&format!(
            "SELECT {} FROM bonuses \
             WHERE redeemed_by = $1 \
               AND user_id IS NOT DISTINCT FROM $2 AND bot_user_id IS NOT DISTINCT FROM $3 \
             ORDER BY created_at FOR UPDATE",
            BONUS_COLUMNS
        ))
        .bind(redeemed_by)
        .bind(owner.user_id())
        .bind(owner.bot_user_id())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_bonuses(rows)
    }

    async fn bonus_exists_for_transaction(&mut self, transaction_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM bonuses WHERE source_transaction_id = $1)")
            .bind(transaction_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_bonus(&mut self, bonus: &Bonus) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO bonuses ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            BONUS_COLUMNS
        ))
        .bind(bonus.id)
        .bind(bonus.owner.user_id())
        .bind(bonus.owner.bot_user_id())
        .bind(bonus.amount)
        .bind(&bonus.reason)
        .bind(bonus.source_transaction_id)
        .bind(bonus.redeemed_by)
        .bind(bonus.consumed)
        .bind(bonus.deleted)
        .bind(bonus.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn add_reward(&mut self, owner: &Owner, delta: i64) -> StoreResult<i64> {
        sqlx::query_scalar(
            "INSERT INTO rewards (owner_key, user_id, bot_user_id, amount, updated_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (owner_key) DO UPDATE \
             SET amount = rewards.amount + EXCLUDED.amount, updated_at = NOW() \
             RETURNING amount",
        )
        .bind(owner.key())
        .bind(owner.user_id())
        .bind(owner.bot_user_id())
        .bind(delta)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(DatabaseError::from_sqlx)
    }
}
