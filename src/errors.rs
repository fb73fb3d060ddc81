use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::order::OrderStatus;

/// Error body returned by every handler.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error code for the checkout UI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Reason a coupon was rejected. Every variant is customer-correctable and
/// surfaced verbatim so the UI can prompt the right fix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("coupon code not found")]
    NotFound,
    #[error("coupon is not active yet")]
    NotStarted,
    #[error("coupon has expired")]
    Expired,
    #[error("order subtotal is below the coupon minimum of {minimum}")]
    BelowMinimum { minimum: rust_decimal::Decimal },
    #[error("coupon usage limit has been reached")]
    UsageLimitReached,
    #[error("you have already used this coupon the maximum number of times")]
    PerUserLimitReached,
    #[error("coupon does not apply to any item in the cart")]
    NotApplicable,
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "coupon_not_found",
            Self::NotStarted => "coupon_not_started",
            Self::Expired => "coupon_expired",
            Self::BelowMinimum { .. } => "coupon_below_minimum",
            Self::UsageLimitReached => "coupon_usage_limit",
            Self::PerUserLimitReached => "coupon_per_user_limit",
            Self::NotApplicable => "coupon_not_applicable",
        }
    }
}

/// Unified service error for the checkout pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A cart line references an item that no longer exists, is unpublished,
    /// or lacks stock. Carries enough context for the UI to point at the line.
    #[error("Item unavailable: {name}: {reason}")]
    ItemUnavailable { name: String, reason: String },

    #[error("Coupon invalid: {0}")]
    CouponInvalid(CouponRejection),

    /// A concurrent checkout consumed the last redemption between validation
    /// and the order transaction.
    #[error("Coupon {0} has been exhausted")]
    CouponExhausted(String),

    #[error("Payment intent failed: {0}")]
    PaymentIntentFailed(String),

    /// Gateway callback signature did not match. Fatal: the order stays unpaid.
    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order row changed between read and write. The caller saw a stale
    /// snapshot and should re-read before retrying.
    #[error("Order {0} was modified concurrently")]
    ConcurrentModification(uuid::Uuid),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ItemUnavailable { .. } => StatusCode::CONFLICT,
            Self::CouponInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CouponExhausted(_) => StatusCode::CONFLICT,
            Self::PaymentIntentFailed(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::EventError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for the client, where one exists.
    fn client_code(&self) -> Option<String> {
        match self {
            Self::ItemUnavailable { .. } => Some("item_unavailable".to_string()),
            Self::CouponInvalid(reason) => Some(reason.code().to_string()),
            Self::CouponExhausted(_) => Some("coupon_exhausted".to_string()),
            Self::PaymentIntentFailed(_) => Some("payment_intent_failed".to_string()),
            Self::InvalidSignature => Some("invalid_signature".to_string()),
            Self::InvalidTransition { .. } => Some("invalid_transition".to_string()),
            Self::ConcurrentModification(_) => Some("concurrent_modification".to_string()),
            _ => None,
        }
    }

    /// Message safe to show the customer. Gateway internals and database
    /// details never leak through here.
    fn client_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::Other(_) | Self::EventError(_) => {
                "An internal error occurred. Please try again.".to_string()
            }
            Self::PaymentIntentFailed(_) => {
                "Payment could not be initiated. Please retry.".to_string()
            }
            Self::InvalidSignature => "Payment could not be confirmed.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: self.client_message(),
            code: self.client_code(),
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coupon_rejection_maps_to_unprocessable() {
        let err = ServiceError::CouponInvalid(CouponRejection::Expired);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.client_code().as_deref(), Some("coupon_expired"));
    }

    #[test]
    fn gateway_details_do_not_leak() {
        let err = ServiceError::PaymentIntentFailed("gateway: key_id rzp_live_x rejected".into());
        assert!(!err.client_message().contains("rzp_live"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn database_errors_are_internal() {
        let err = ServiceError::DatabaseError(sea_orm::DbErr::Custom("boom".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.client_message().contains("boom"));
    }
}
