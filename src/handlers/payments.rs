use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::payments::{GatewayIntent, PaymentCallback, VerificationOutcome},
    AppState,
};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub order_id: Uuid,
}

/// Open (or fetch the existing) payment intent for a prepaid order. This is
/// the retry path when checkout committed the order but the gateway call
/// failed.
#[utoipa::path(
    post,
    path = "/orders/{id}/payment-intent",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Payment intent", body = GatewayIntent),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is not payable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
#[instrument(skip(state), fields(order_id = %id))]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GatewayIntent>, ServiceError> {
    let record = state.services.payments.initiate_for_order(id).await?;
    Ok(Json(GatewayIntent {
        intent_id: record.intent_id,
        amount: record.amount,
        currency: record.currency,
    }))
}

/// Gateway settlement callback. Signature-checked and idempotent: redelivery
/// of an already-settled payment returns success without a second
/// transition.
#[utoipa::path(
    post,
    path = "/payments/webhook",
    request_body = PaymentCallback,
    responses(
        (status = 200, description = "Settlement accepted (or already applied)", body = WebhookResponse),
        (status = 401, description = "Signature mismatch", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
#[instrument(skip(state, callback), fields(intent_id = %callback.intent_id))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<WebhookResponse>, ServiceError> {
    let outcome = state.services.payments.verify_callback(callback).await?;
    let (status, order_id) = match outcome {
        VerificationOutcome::Settled { order_id } => ("settled", order_id),
        VerificationOutcome::AlreadySettled { order_id } => ("already_settled", order_id),
    };
    Ok(Json(WebhookResponse { status, order_id }))
}
