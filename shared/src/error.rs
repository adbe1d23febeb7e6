//! Error taxonomy and the API envelope shared by both services.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the order orchestrator and the payment processor.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A referenced resource does not exist.
    #[error("{resource} not found with id: {key}")]
    NotFound { resource: &'static str, key: String },

    /// Request validation failed.
    #[error("{0}")]
    InvalidInput(String),

    /// The requested state change is not legal from the current state.
    #[error("{0}")]
    InvalidStateTransition(String),

    /// A payment for this order already exists (direct payment path only;
    /// the event-driven path treats this as a no-op).
    #[error("payment already exists for order id: {0}")]
    DuplicatePayment(i64),

    /// Stock check reported fewer units than requested.
    #[error("insufficient stock for product: {0}")]
    InsufficientStock(String),

    /// The reserve call failed after the order row was persisted.
    #[error("stock reservation failed: {0}")]
    StockReservationFailed(String),

    /// An upstream collaborator was unreachable, timed out, or answered
    /// with a server error.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A record could not be appended to the event channel.
    #[error("event publish failed: {0}")]
    PublishFailed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidInput(_)
            | ServiceError::InvalidStateTransition(_)
            | ServiceError::DuplicatePayment(_)
            | ServiceError::InsufficientStock(_)
            | ServiceError::StockReservationFailed(_) => StatusCode::BAD_REQUEST,
            ServiceError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::PublishFailed(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Internal details stay in the logs.
            tracing::error!("internal error: {self:#}");
            ApiResponse::<()>::error("internal server error")
        } else {
            ApiResponse::<()>::error(self.to_string())
        };
        (status, Json(body)).into_response()
    }
}

/// Response envelope used by every HTTP endpoint and by the upstream
/// collaborators this system calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn success_with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mapping_follows_the_taxonomy() {
        let not_found = ServiceError::NotFound {
            resource: "Order",
            key: "9".to_string(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::InsufficientStock("Widget".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::DuplicatePayment(5).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::StockReservationFailed("boom".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::UpstreamUnavailable("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::PublishFailed("broker down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn envelope_skips_empty_fields() {
        let ok = ApiResponse::success(1);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 1);
        assert!(json.get("message").is_none());

        let err = ApiResponse::<()>::error("nope");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "nope");
        assert!(json.get("data").is_none());
    }
}
