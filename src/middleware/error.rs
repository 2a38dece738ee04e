//! JSON error bodies for the HTTP surface.
//!
//! Every handler error is an [`AppError`]; this module turns it into
//! `{ error, message, request_id, retryable, timestamp }` with the status from
//! [`AppError::status_code`].

use crate::error::{AppError, ErrorCode};
use crate::middleware::logging::REQUEST_ID_HEADER;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// Operator-facing detail, only present for server-side failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub retryable: bool,
    pub timestamp: String,
}

impl From<&AppError> for ErrorBody {
    fn from(error: &AppError) -> Self {
        let server_side = error.status_code() >= 500;
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            context: if server_side {
                error.context.clone()
            } else {
                None
            },
            retryable: error.is_retryable(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody::from(&self);

        if status.is_server_error() {
            tracing::error!(
                error = ?self.kind,
                code = ?body.error,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request failed"
            );
        } else {
            tracing::debug!(
                code = ?body.error,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request rejected"
            );
        }

        (status, Json(body)).into_response()
    }
}

/// The request id set by the request-id layer, if any.
pub fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Attaches the caller's request id to an error on its way out.
pub fn tag_request_id(error: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let error = error.into();
    match request_id_from(headers) {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppErrorKind, DomainError, ValidationError};
    use axum::http::HeaderValue;

    #[test]
    fn not_found_body_names_the_reference() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
            reference: "depot-17000000000001".to_string(),
        }))
        .with_request_id("req_123");

        let body = ErrorBody::from(&error);
        assert_eq!(body.error, ErrorCode::TransactionNotFound);
        assert_eq!(body.request_id.as_deref(), Some("req_123"));
        assert!(body.message.contains("depot-17000000000001"));
        assert!(!body.retryable);
        assert!(body.context.is_none());
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn lock_conflicts_are_retryable_409s() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::ConcurrencyConflict {
            resource: "tx".to_string(),
        }));
        let body = ErrorBody::from(&error);
        assert_eq!(body.error, ErrorCode::ConcurrencyConflict);
        assert!(body.retryable);
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn request_id_is_taken_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-7"));
        let error = tag_request_id(
            AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                reference: "x".to_string(),
            })),
            &headers,
        );
        assert_eq!(error.request_id.as_deref(), Some("req-7"));
        assert!(request_id_from(&HeaderMap::new()).is_none());
    }
}
