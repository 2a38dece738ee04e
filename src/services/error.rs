use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::error::{
    AppError, AppErrorKind, DomainError, ExternalError, InfrastructureError, ValidationError,
};
use crate::payments::error::PaymentError;
use thiserror::Error;

pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

/// Failures surfaced by intake, settlement, ledger and bonus operations.
#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    /// Missing gateway credentials; raised before any external call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport failure; the remote outcome is unknown.
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider} rejected the operation: {message}")]
    ProviderRejected { provider: String, message: String },

    #[error("already processed: {0}")]
    AlreadyProcessed(String),

    #[error("concurrency conflict on {0}")]
    ConcurrencyConflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("amount {amount} is below the minimum of {minimum}")]
    AmountBelowMinimum { amount: i64, minimum: i64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(DatabaseError),
}

impl ReconciliationError {
    /// The remote side may have acted; the transaction must stay non-terminal.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            ReconciliationError::Network(_) | ReconciliationError::Timeout(_)
        )
    }
}

impl From<PaymentError> for ReconciliationError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ConfigurationError { message } => {
                ReconciliationError::Configuration(message)
            }
            PaymentError::ValidationError { message, .. } => ReconciliationError::Validation(message),
            PaymentError::TimeoutError { message } => ReconciliationError::Timeout(message),
            PaymentError::NetworkError { message } | PaymentError::InvalidResponse { message } => {
                ReconciliationError::Network(message)
            }
            PaymentError::HttpError { status, body } if status >= 500 => {
                ReconciliationError::Network(format!("HTTP {}: {}", status, body))
            }
            PaymentError::HttpError { status, body } => ReconciliationError::ProviderRejected {
                provider: "provider".to_string(),
                message: format!("HTTP {}: {}", status, body),
            },
            PaymentError::ProviderRejected {
                provider, message, ..
            } => ReconciliationError::ProviderRejected { provider, message },
        }
    }
}

impl From<DatabaseError> for ReconciliationError {
    fn from(err: DatabaseError) -> Self {
        match &err.kind {
            DatabaseErrorKind::LockConflict { message } => {
                ReconciliationError::ConcurrencyConflict(message.clone())
            }
            DatabaseErrorKind::NotFound { entity, id } => {
                ReconciliationError::NotFound(format!("{} {}", entity, id))
            }
            _ => ReconciliationError::Store(err),
        }
    }
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        let detail = err.to_string();
        let kind = match err {
            ReconciliationError::Configuration(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            ReconciliationError::Network(message) => {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "payment provider".to_string(),
                    message,
                    is_retryable: true,
                })
            }
            ReconciliationError::Timeout(_) => AppErrorKind::External(ExternalError::Timeout {
                service: "payment provider".to_string(),
            }),
            ReconciliationError::ProviderRejected { provider, message } => {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider,
                    message,
                    is_retryable: false,
                })
            }
            ReconciliationError::AlreadyProcessed(reference) => {
                AppErrorKind::Domain(DomainError::DuplicateTransaction {
                    transaction_id: reference,
                })
            }
            ReconciliationError::ConcurrencyConflict(resource) => {
                AppErrorKind::Domain(DomainError::ConcurrencyConflict { resource })
            }
            ReconciliationError::InvariantViolation(message) => {
                AppErrorKind::Domain(DomainError::InvariantViolation { message })
            }
            ReconciliationError::NotFound(reference) => {
                AppErrorKind::Domain(DomainError::TransactionNotFound { reference })
            }
            ReconciliationError::InvalidTransition { from, to } => {
                AppErrorKind::Domain(DomainError::InvalidStatusTransition { from, to })
            }
            ReconciliationError::AmountBelowMinimum { amount, minimum } => {
                AppErrorKind::Domain(DomainError::AmountBelowMinimum { amount, minimum })
            }
            ReconciliationError::Validation(reason) => {
                AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: "request".to_string(),
                    reason,
                })
            }
            ReconciliationError::Store(err) => return err.into(),
        };
        AppError::new(kind).with_context(detail)
    }
}
