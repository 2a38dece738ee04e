use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Failure classes surfaced by the gateway boundary. Transport errors never
/// escape a gateway in any other shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    NetworkError,
    HttpError,
    InvalidResponse,
    Rejected,
    Configuration,
}

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Timeout: {message}")]
    TimeoutError { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("Invalid provider response: {message}")]
    InvalidResponse { message: String },

    #[error("Provider rejected: provider={provider}, message={message}")]
    ProviderRejected {
        provider: String,
        message: String,
        provider_code: Option<String>,
    },
}

impl PaymentError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PaymentError::ConfigurationError { .. } => FailureKind::Configuration,
            PaymentError::ValidationError { .. } => FailureKind::Rejected,
            PaymentError::TimeoutError { .. } => FailureKind::Timeout,
            PaymentError::NetworkError { .. } => FailureKind::NetworkError,
            PaymentError::HttpError { .. } => FailureKind::HttpError,
            PaymentError::InvalidResponse { .. } => FailureKind::InvalidResponse,
            PaymentError::ProviderRejected { .. } => FailureKind::Rejected,
        }
    }

    /// The remote side may or may not have acted. The transaction must stay
    /// non-terminal and be resolved by webhook or poll.
    pub fn is_outcome_unknown(&self) -> bool {
        match self {
            PaymentError::TimeoutError { .. }
            | PaymentError::NetworkError { .. }
            | PaymentError::InvalidResponse { .. } => true,
            PaymentError::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError { .. } | PaymentError::TimeoutError { .. }
        ) || matches!(self, PaymentError::HttpError { status, .. } if *status >= 500)
    }

    /// Vocabulary shared with the external platform API error payloads.
    pub fn error_type(&self) -> &'static str {
        match self {
            PaymentError::TimeoutError { .. } => "timeout",
            PaymentError::NetworkError { .. } => "connection_error",
            PaymentError::HttpError { .. } => "http_error",
            PaymentError::InvalidResponse { .. } => "invalid_json",
            PaymentError::ProviderRejected { .. } => "provider_rejected",
            PaymentError::ValidationError { .. } => "validation_error",
            PaymentError::ConfigurationError { .. } => "configuration_error",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::ValidationError { .. } => 400,
            PaymentError::TimeoutError { .. } => 504,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::HttpError { .. } => 502,
            PaymentError::InvalidResponse { .. } => 502,
            PaymentError::ProviderRejected { .. } => 402,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ConfigurationError { .. } => {
                "Payment provider is not configured".to_string()
            }
            PaymentError::TimeoutError { .. } | PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::HttpError { .. } | PaymentError::InvalidResponse { .. } => {
                "Payment provider returned an error".to_string()
            }
            PaymentError::ProviderRejected { .. } => {
                "Operation was declined by the provider".to_string()
            }
        }
    }

    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ProviderRejected {
            provider: provider.into(),
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn missing_config(what: &str) -> Self {
        PaymentError::ConfigurationError {
            message: format!("{} is not configured", what),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError,
        };

        let kind = match &err {
            PaymentError::ConfigurationError { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: message.clone(),
                })
            }
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            PaymentError::TimeoutError { .. } => AppErrorKind::External(ExternalError::Timeout {
                service: "payment provider".to_string(),
            }),
            PaymentError::ProviderRejected {
                provider, message, ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: provider.clone(),
                message: message.clone(),
                is_retryable: false,
            }),
            _ => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "payment provider".to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::TimeoutError {
                message: "slow".to_string()
            }
            .http_status_code(),
            504
        );
    }

    #[test]
    fn unknown_outcomes_are_classified() {
        assert!(PaymentError::TimeoutError {
            message: "t".to_string()
        }
        .is_outcome_unknown());
        assert!(PaymentError::HttpError {
            status: 502,
            body: String::new()
        }
        .is_outcome_unknown());
        assert!(!PaymentError::HttpError {
            status: 400,
            body: String::new()
        }
        .is_outcome_unknown());
        assert!(!PaymentError::rejected("feexpay", "declined").is_outcome_unknown());
    }

    #[test]
    fn error_type_vocabulary() {
        assert_eq!(
            PaymentError::NetworkError {
                message: "refused".to_string()
            }
            .error_type(),
            "connection_error"
        );
        assert_eq!(
            PaymentError::InvalidResponse {
                message: "eof".to_string()
            }
            .error_type(),
            "invalid_json"
        );
    }
}
