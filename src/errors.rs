use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Unified error type for the service layer.
///
/// Every failure an engine operation can report maps to exactly one
/// variant, and every variant maps to exactly one HTTP status. Handlers
/// return `ServiceError` directly and let `IntoResponse` shape the body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Malformed or unsatisfiable input, including unknown ids.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A sale asked for more units than the product's consignments hold.
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// An income-invoice consignment has already been drawn from.
    #[error("Consignment in use: {0}")]
    ConsignmentInUse(String),

    /// The invoice was already voided by an earlier delete.
    #[error("Invoice already voided: {0}")]
    AlreadyVoided(String),

    /// Ledger bookkeeping drifted from its invariants. Fatal for the
    /// affected product: further mutations are refused until an operator
    /// intervenes.
    #[error("Integrity fault: {0}")]
    IntegrityFault(String),

    /// Underlying storage failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Anything else that should never happen.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Single source of truth for the HTTP status of each variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::ConsignmentInUse(_) => StatusCode::CONFLICT,
            ServiceError::AlreadyVoided(_) => StatusCode::CONFLICT,
            ServiceError::IntegrityFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used for failure counters, one per variant.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceError::ValidationError(_) => "validation",
            ServiceError::InsufficientStock(_) => "insufficient_stock",
            ServiceError::ConsignmentInUse(_) => "consignment_in_use",
            ServiceError::AlreadyVoided(_) => "already_voided",
            ServiceError::IntegrityFault(_) => "integrity_fault",
            ServiceError::DatabaseError(_) => "database",
            ServiceError::InternalError(_) => "internal",
        }
    }

    /// Message exposed to API clients. Storage and internal errors are
    /// collapsed to a generic line; everything else is actionable for the
    /// caller and passed through, including integrity faults, which must
    /// be reported rather than papered over.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True for faults that leave the affected product quarantined.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::IntegrityFault(_))
    }

    pub fn db_error<E: IntoDbErr>(err: E) -> Self {
        ServiceError::DatabaseError(err.into_db_err())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ServiceError::ValidationError(msg.into())
    }
}

/// Conversion helper so `ServiceError::db_error` accepts whatever the
/// storage layer hands back.
pub trait IntoDbErr {
    fn into_db_err(self) -> String;
}

impl IntoDbErr for sea_orm::DbErr {
    fn into_db_err(self) -> String {
        self.to_string()
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> String {
        self
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> String {
        self.to_string()
    }
}

impl From<sea_orm::DbErr> for ServiceError {
    fn from(err: sea_orm::DbErr) -> Self {
        ServiceError::DatabaseError(err.to_string())
    }
}

impl From<sea_orm::TransactionError<ServiceError>> for ServiceError {
    fn from(err: sea_orm::TransactionError<ServiceError>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(e) => ServiceError::db_error(e),
            sea_orm::TransactionError::Transaction(e) => e,
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let details = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}: {}", field, details)
            })
            .collect::<Vec<_>>()
            .join("; ");
        ServiceError::ValidationError(message)
    }
}

/// JSON body returned for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Conflict", "Bad Request").
    pub error: String,
    /// Human-readable error description.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred.
    pub timestamp: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppError = ServiceError;
