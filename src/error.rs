//! Error taxonomy shared by the engine modules and the REST layer.
//!
//! Client-facing variants render their message; infrastructure failures are
//! logged in full and answered with a generic 500 body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sled::transaction::TransactionError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ViewError {
    /// Malformed input, rejected before any write.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A view references a catalog entry that does not exist.
    #[error("Dangling reference: {kind} {id} does not exist")]
    DanglingReference { kind: &'static str, id: Uuid },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid or inactive secret")]
    Unauthorized,

    /// Unique-constraint or referential-integrity violation.
    #[error("Conflict on {field}: {detail}")]
    Conflict { field: &'static str, detail: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid status '{0}'")]
    InvalidStatus(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Secret hashing error: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ViewError>;

impl ViewError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ViewError::Validation(_)
            | ViewError::DanglingReference { .. }
            | ViewError::InvalidTransition { .. }
            | ViewError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            ViewError::Unauthorized => StatusCode::UNAUTHORIZED,
            ViewError::NotFound(_) => StatusCode::NOT_FOUND,
            ViewError::Conflict { .. } => StatusCode::CONFLICT,
            ViewError::Storage(_)
            | ViewError::Serialization(_)
            | ViewError::Hashing(_)
            | ViewError::Upstream(_)
            | ViewError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TransactionError<ViewError>> for ViewError {
    fn from(err: TransactionError<ViewError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => ViewError::Storage(inner),
        }
    }
}

impl From<tokio::task::JoinError> for ViewError {
    fn from(err: tokio::task::JoinError) -> Self {
        ViewError::Internal(format!("blocking task failed: {}", err))
    }
}

impl IntoResponse for ViewError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self, "Request failed");
                "Internal server error".to_string()
            }
            StatusCode::UNAUTHORIZED => {
                tracing::warn!("Rejected secret");
                self.to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Request rejected");
                self.to_string()
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
