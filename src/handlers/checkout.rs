use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::order::{self, PaymentMethod},
    errors::ServiceError,
    services::{
        orders::{Address, PlaceOrder},
        payments::GatewayIntent,
        pricing::CartLine,
    },
    AppState,
};

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CheckoutRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub lines: Vec<CartLine>,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    #[validate]
    pub shipping_address: Address,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CheckoutResponse {
    pub order: order::Model,
    /// Present for online payment; the client completes the intent
    /// out-of-band and the gateway calls back for verification. `None` for
    /// pay-on-delivery, or when intent creation failed after the order
    /// committed; in the latter case the client retries via
    /// `POST /orders/{id}/payment-intent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<GatewayIntent>,
}

/// Run the full checkout pipeline: re-price the cart from the catalog,
/// evaluate the coupon, quote shipping, commit the order transactionally,
/// and open a payment intent when the order is prepaid.
#[utoipa::path(
    post,
    path = "/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Order placed", body = CheckoutResponse),
        (status = 409, description = "Stock or coupon race lost", body = crate::errors::ErrorResponse),
        (status = 422, description = "Coupon rejected", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
#[instrument(skip(state, request), fields(customer_id = %request.customer_id))]
pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ServiceError> {
    request.validate()?;
    let services = &state.services;

    let cart = services.pricing.resolve(&request.lines).await?;
    let coupon = services
        .coupons
        .apply(request.coupon_code.as_deref(), request.customer_id, &cart)
        .await?;
    let shipping = services.shipping.quote(
        &request.shipping_address.postal_code,
        cart.total_weight_grams,
        request.payment_method,
        cart.subtotal - coupon.discount,
    );

    let order = services
        .assembler
        .place_order(PlaceOrder {
            customer_id: request.customer_id,
            cart,
            coupon,
            shipping,
            payment_method: request.payment_method,
            shipping_address: request.shipping_address,
            notes: request.notes,
        })
        .await?;

    // The order is committed at this point. A gateway failure must not turn
    // into an error response that hides the order the client now owns; the
    // client retries through the payment-intent route instead.
    let payment_intent = match services.payments.initiate(&order).await {
        Ok(record) => record.map(|p| GatewayIntent {
            intent_id: p.intent_id,
            amount: p.amount,
            currency: p.currency,
        }),
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "payment intent creation failed after order commit");
            None
        }
    };

    Ok(Json(CheckoutResponse {
        order,
        payment_intent,
    }))
}
