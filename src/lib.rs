//! Checkout-to-order commitment pipeline.
//!
//! Turns a shopping cart into a durable, price-correct, payment-verified
//! order: authoritative repricing, coupon validation, shipping quotes, one
//! transactional order assembly step, gateway payment verification, and a
//! guarded post-creation state machine.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use utoipa::OpenApi;

use crate::handlers::AppServices;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

impl AppState {
    /// Wire the service graph for a database connection and event channel.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
        gateway: Arc<dyn services::payments::PaymentGateway>,
    ) -> Self {
        let services = AppServices {
            pricing: Arc::new(services::pricing::PriceResolver::new(
                db.clone(),
                config.default_weight_grams,
            )),
            coupons: Arc::new(services::coupons::CouponEngine::new(db.clone())),
            shipping: Arc::new(services::shipping::ShippingCalculator::new(
                (&config).into(),
            )),
            assembler: Arc::new(services::orders::OrderAssembler::new(
                db.clone(),
                event_sender.clone(),
                config.tax_rate_percent,
                config.currency.clone(),
            )),
            payments: Arc::new(services::payments::PaymentOrchestrator::new(
                db.clone(),
                gateway,
                config.gateway_webhook_secret.clone(),
                event_sender.clone(),
            )),
            order_status: Arc::new(services::order_status::OrderStatusService::new(
                db.clone(),
                event_sender.clone(),
            )),
        };
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::checkout::checkout,
        handlers::payments::payment_webhook,
        handlers::payments::create_payment_intent,
        handlers::orders::get_order,
        handlers::orders::list_orders,
        handlers::orders::update_status,
    ),
    components(schemas(
        handlers::checkout::CheckoutRequest,
        handlers::checkout::CheckoutResponse,
        handlers::orders::OrderListResponse,
        handlers::orders::OrderDetailResponse,
        handlers::payments::WebhookResponse,
        entities::order::Model,
        entities::order_item::Model,
        entities::order_status_event::Model,
        services::orders::Address,
        services::order_status::TransitionRequest,
        services::payments::PaymentCallback,
        services::payments::GatewayIntent,
        services::pricing::CartLine,
        errors::ErrorResponse,
        errors::CouponRejection,
    )),
    tags(
        (name = "Checkout", description = "Cart to order commitment"),
        (name = "Payments", description = "Gateway settlement verification"),
        (name = "Orders", description = "Order lookup and lifecycle")
    )
)]
pub struct ApiDoc;

/// Assemble the application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(handlers::routes())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
