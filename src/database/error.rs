use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: String },
    /// Row lock not available, serialization failure or deadlock; the unit of
    /// work can be retried from the start.
    LockConflict { message: String },
    Connection { message: String },
    /// A stored row could not be mapped back onto its entity.
    Corrupted { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Corrupted {
            message: message.into(),
        })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or_default().to_string(),
                },
                // lock_not_available, serialization_failure, deadlock_detected
                Some("55P03") | Some("40001") | Some("40P01") => DatabaseErrorKind::LockConflict {
                    message: db.message().to_string(),
                },
                _ => DatabaseErrorKind::Unknown {
                    message: db.message().to_string(),
                },
            },
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::LockConflict { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::LockConflict { .. } | DatabaseErrorKind::Connection { .. }
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::LockConflict { message } => write!(f, "lock conflict: {}", message),
            DatabaseErrorKind::Connection { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::Corrupted { message } => write!(f, "corrupted row: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { id, .. } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: id.clone(),
                })
            }
            DatabaseErrorKind::UniqueViolation { constraint } => {
                AppErrorKind::Domain(DomainError::DuplicateTransaction {
                    transaction_id: constraint.clone(),
                })
            }
            DatabaseErrorKind::LockConflict { .. } => {
                AppErrorKind::Domain(DomainError::ConcurrencyConflict {
                    resource: "database row".to_string(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind).with_context(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_conflicts_map_to_retryable_conflict() {
        let err = DatabaseError::new(DatabaseErrorKind::LockConflict {
            message: "could not obtain lock".to_string(),
        });
        assert!(err.is_lock_conflict());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 409);
        assert!(app.is_retryable());
    }

    #[test]
    fn not_found_maps_to_404() {
        let app: AppError = DatabaseError::not_found("transaction", "depot-1").into();
        assert_eq!(app.status_code(), 404);
    }
}
