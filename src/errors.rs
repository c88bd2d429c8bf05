use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "code": "invalid_transition",
    "message": "Invalid status transition from pending to ready",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2025-03-14T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Stable machine-readable error kind
    #[schema(example = "assignment_conflict")]
    pub code: String,
    /// Human-readable error description
    #[schema(example = "Delivery for order 550e8400-e29b-41d4-a716-446655440000 was claimed by another courier")]
    pub message: String,
    /// Additional error details (validation errors and the like)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2025-03-14T10:30:00.000Z")]
    pub timestamp: String,
}

/// Unified error type for all service operations.
///
/// Handlers return this directly; `status_code`, `kind` and
/// `response_message` are the single source of truth for how each failure
/// reaches the wire.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid delivery details: {0}")]
    InvalidDeliveryInfo(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Cancellation not allowed: {0}")]
    CancellationNotAllowed(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order subtotal {subtotal} is below the merchant minimum {minimum}")]
    MinimumOrderNotMet { minimum: Decimal, subtotal: Decimal },

    #[error("Item unavailable: {0}")]
    ItemUnavailable(String),

    #[error("Order has no assigned courier to complete the delivery")]
    NoDeliveryAssigned,

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Delivery for order {0} was claimed by another courier")]
    AssignmentConflict(Uuid),

    #[error("Concurrent modification detected for order: {0}")]
    ConcurrentModification(Uuid),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl ServiceError {
    /// Maps every variant to its HTTP status. Single source of truth so the
    /// taxonomy cannot drift between handlers.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidDeliveryInfo(_) | Self::InvalidOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. }
            | Self::CancellationNotAllowed(_)
            | Self::EmptyCart
            | Self::MinimumOrderNotMet { .. }
            | Self::ItemUnavailable(_)
            | Self::NoDeliveryAssigned
            | Self::NotEligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AssignmentConflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable kind, echoed in the error body. Clients match
    /// on these strings, so they never change.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidDeliveryInfo(_) => "invalid_delivery_info",
            Self::AccessDenied(_) => "access_denied",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::CancellationNotAllowed(_) => "cancellation_not_allowed",
            Self::EmptyCart => "empty_cart",
            Self::MinimumOrderNotMet { .. } => "minimum_order_not_met",
            Self::ItemUnavailable(_) => "item_unavailable",
            Self::NoDeliveryAssigned => "no_delivery_assigned",
            Self::NotEligible(_) => "not_eligible",
            Self::AssignmentConflict(_) => "assignment_conflict",
            Self::ConcurrentModification(_) => "concurrency_conflict",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::InternalError(_) => "internal_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Other(_) => "internal_error",
        }
    }

    /// Message safe to expose to clients. Infrastructure failures keep their
    /// driver details in the logs, not on the wire.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let detail = errors
            .field_errors()
            .iter()
            .flat_map(|(field, field_errors)| {
                field_errors.iter().map(move |err| match &err.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: invalid value", field),
                })
            })
            .collect::<Vec<_>>()
            .join(", ");
        Self::ValidationError(detail)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.kind().to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("order".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidDeliveryInfo("phone".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::AccessDenied("not yours".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::InvalidTransition {
                from: "pending".into(),
                to: "ready".into()
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::EmptyCart.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::MinimumOrderNotMet {
                minimum: dec!(20.00),
                subtotal: dec!(12.50)
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::ServiceUnavailable("db down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn conflict_class_maps_to_409() {
        let id = Uuid::new_v4();
        assert_eq!(
            ServiceError::AssignmentConflict(id).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ConcurrentModification(id).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            ServiceError::AssignmentConflict(Uuid::new_v4()).kind(),
            "assignment_conflict"
        );
        assert_eq!(
            ServiceError::ConcurrentModification(Uuid::new_v4()).kind(),
            "concurrency_conflict"
        );
        assert_eq!(ServiceError::NoDeliveryAssigned.kind(), "no_delivery_assigned");
        assert_eq!(ServiceError::EmptyCart.kind(), "empty_cart");
        assert_eq!(
            ServiceError::CancellationNotAllowed("too late".into()).kind(),
            "cancellation_not_allowed"
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        let db_err = ServiceError::DatabaseError(DbErr::Custom(
            "connection refused at 10.0.0.5:5432".to_string(),
        ));
        assert_eq!(db_err.response_message(), "Database error");
        assert!(!db_err.response_message().contains("10.0.0.5"));

        let internal = ServiceError::InternalError("lock poisoned in claim path".to_string());
        assert_eq!(internal.response_message(), "Internal server error");
    }

    #[test]
    fn domain_errors_keep_their_messages() {
        let err = ServiceError::InvalidTransition {
            from: "pending".into(),
            to: "ready".into(),
        };
        assert_eq!(
            err.response_message(),
            "Invalid status transition from pending to ready"
        );
    }

    #[test]
    fn validation_errors_flatten_to_one_message() {
        use validator::Validate;

        #[derive(Validate)]
        struct Probe {
            #[validate(range(min = 1, message = "must be at least 1"))]
            quantity: i32,
        }

        let err: ServiceError = Probe { quantity: 0 }.validate().unwrap_err().into();
        match err {
            ServiceError::ValidationError(message) => {
                assert!(message.contains("quantity"));
                assert!(message.contains("must be at least 1"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_response_includes_request_id_when_scoped() {
        use crate::tracing::{scope_request_id, RequestId};

        let response = scope_request_id(RequestId::new("req-err-123"), async {
            ServiceError::NotFound("order 42".into()).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["request_id"], "req-err-123");
        assert_eq!(body["code"], "not_found");
    }
}
