//! Application-level error handling
//!
//! Every layer error (`PaymentError`, `DatabaseError`, `ReconciliationError`)
//! converts into [`AppError`], which carries the HTTP status mapping, a
//! machine-readable error code and a message safe to show to end users.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable code carried in every error body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TransactionNotFound,
    InvalidStatusTransition,
    AmountBelowMinimum,
    DuplicateTransaction,
    ConcurrencyConflict,
    InvariantViolation,
    DatabaseError,
    ConfigurationError,
    PaymentProviderError,
    ExternalServiceTimeout,
    ValidationError,
}

/// Business rule errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No transaction matches the given reference, public id or id
    TransactionNotFound { reference: String },
    /// Status change refused by the state machine
    InvalidStatusTransition { from: String, to: String },
    /// Requested amount is under the configured minimum
    AmountBelowMinimum { amount: i64, minimum: i64 },
    DuplicateTransaction { transaction_id: String },
    /// A row lock could not be acquired; retry the whole unit of work
    ConcurrencyConflict { resource: String },
    /// Something that must never happen did (double ledger apply, re-settlement)
    InvariantViolation { message: String },
}

#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Timeout { service: String },
}

#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidValue { field: String, reason: String },
}

/// What handlers return; rendered by `middleware::error`.
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::InvalidStatusTransition { .. } => 409,
                DomainError::AmountBelowMinimum { .. } => 400,
                DomainError::DuplicateTransaction { .. } => 409,
                DomainError::ConcurrencyConflict { .. } => 409,
                DomainError::InvariantViolation { .. } => 500,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::AmountBelowMinimum { .. } => ErrorCode::AmountBelowMinimum,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
                DomainError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
                DomainError::InvariantViolation { .. } => ErrorCode::InvariantViolation,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Safe to show to end users; never includes `context`.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
                DomainError::InvalidStatusTransition { from, to } => {
                    format!("Transaction cannot move from '{}' to '{}'", from, to)
                }
                DomainError::AmountBelowMinimum { amount, minimum } => {
                    format!("Amount {} is below the minimum of {}", amount, minimum)
                }
                DomainError::DuplicateTransaction { transaction_id } => {
                    format!("Transaction '{}' already exists", transaction_id)
                }
                DomainError::ConcurrencyConflict { .. } => {
                    "The operation is already in progress. Please try again".to_string()
                }
                DomainError::InvariantViolation { .. } => {
                    "Operation failed. Please contact support".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Timeout { service } => {
                    format!("{} request timed out. Please try again", service)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidValue { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::ConcurrencyConflict { .. }),
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_not_found_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
            reference: "depot-1700000000000123".to_string(),
        }));

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::TransactionNotFound);
        assert!(error.user_message().contains("depot-1700000000000123"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_concurrency_conflict_is_retryable() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::ConcurrencyConflict {
            resource: "transaction".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_invariant_violation_hides_details() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InvariantViolation {
            message: "ledger applied twice".to_string(),
        }));

        assert_eq!(error.status_code(), 500);
        assert!(!error.user_message().contains("ledger"));
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }))
        .with_request_id("req-1");

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert_eq!(error.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn conversions_keep_operator_detail() {
        let error: AppError = crate::services::error::ReconciliationError::InvariantViolation(
            "ledger applied twice".to_string(),
        )
        .into();
        assert_eq!(error.error_code(), ErrorCode::InvariantViolation);
        assert!(error.context.as_deref().unwrap().contains("ledger applied twice"));
    }

    #[test]
    fn error_code_serializes_screaming_case() {
        let json = serde_json::to_string(&ErrorCode::AmountBelowMinimum).unwrap();
        assert_eq!(json, "\"AMOUNT_BELOW_MINIMUM\"");
    }
}
