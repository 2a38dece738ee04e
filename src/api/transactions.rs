use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::database::models::{
    Owner, StatusHistoryEntry, Transaction, TransactionStatus, TransactionType,
};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::middleware::error::tag_request_id;
use crate::services::error::ReconciliationError;

/// Public view of a transaction; the withdrawal code and raw provider payloads stay internal.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: String,
    pub reference: String,
    pub public_id: Option<String>,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub net_payable_amount: Option<i64>,
    pub bonus_amount: i64,
    pub owner: Owner,
    pub platform_id: String,
    pub network: String,
    pub transaction_link: Option<String>,
    pub fixed_by_admin: bool,
    pub status_history: Vec<StatusHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            reference: tx.reference,
            public_id: tx.public_id,
            transaction_type: tx.transaction_type,
            status: tx.status,
            amount: tx.amount,
            net_payable_amount: tx.net_payable_amount,
            bonus_amount: tx.bonus_amount,
            owner: tx.owner,
            platform_id: tx.platform_id,
            network: tx.network.name,
            transaction_link: tx.transaction_link,
            fixed_by_admin: tx.fixed_by_admin,
            status_history: tx.status_history,
            created_at: tx.created_at,
            validated_at: tx.validated_at,
        }
    }
}

/// GET /transactions/{reference}
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TransactionView>, AppError> {
    let found = state
        .orchestrator
        .store()
        .find_transaction_by_key(&reference)
        .await
        .map_err(|e| tag_request_id(ReconciliationError::from(e), &headers))?;
    match found {
        Some(tx) => Ok(Json(tx.into())),
        None => Err(tag_request_id(
            AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                reference,
            })),
            &headers,
        )),
    }
}

/// POST /transactions/{reference}/check
pub async fn check_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TransactionView>, AppError> {
    let tx = state
        .orchestrator
        .check_status(&reference)
        .await
        .map_err(|e| tag_request_id(e, &headers))?;
    Ok(Json(tx.into()))
}

#[derive(Debug, Deserialize)]
pub struct AdminStatusRequest {
    pub status: String,
    pub admin_id: String,
}

/// POST /admin/transactions/{reference}/status
pub async fn admin_set_status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AdminStatusRequest>,
) -> Result<Json<TransactionView>, AppError> {
    let status = TransactionStatus::from_db_status(&request.status).ok_or_else(|| {
        tag_request_id(
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("unknown status '{}'", request.status),
            })),
            &headers,
        )
    })?;
    if request.admin_id.trim().is_empty() {
        return Err(tag_request_id(
            AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                field: "admin_id".to_string(),
            })),
            &headers,
        ));
    }
    let tx = state
        .orchestrator
        .admin_set_status(&reference, status, request.admin_id.trim())
        .await
        .map_err(|e| tag_request_id(e, &headers))?;
    Ok(Json(tx.into()))
}
