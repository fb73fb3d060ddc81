pub mod checkout;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::{
    services::{
        coupons::CouponEngine, order_status::OrderStatusService, orders::OrderAssembler,
        payments::PaymentOrchestrator, pricing::PriceResolver, shipping::ShippingCalculator,
    },
    AppState,
};

/// Service container shared by the handlers.
#[derive(Clone)]
pub struct AppServices {
    pub pricing: Arc<PriceResolver>,
    pub coupons: Arc<CouponEngine>,
    pub shipping: Arc<ShippingCalculator>,
    pub assembler: Arc<OrderAssembler>,
    pub payments: Arc<PaymentOrchestrator>,
    pub order_status: Arc<OrderStatusService>,
}

/// The checkout pipeline's HTTP surface.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout::checkout))
        .route("/payments/webhook", post(payments::payment_webhook))
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", post(orders::update_status))
        .route(
            "/orders/:id/payment-intent",
            post(payments::create_payment_intent),
        )
}
