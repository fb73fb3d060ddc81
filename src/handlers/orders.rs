use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{order, order_item, order_status_event},
    errors::ServiceError,
    services::order_status::TransitionRequest,
    AppState,
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ListOrdersQuery {
    pub customer_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}
fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OrderDetailResponse {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub timeline: Vec<order_status_event::Model>,
}

/// Fetch one order with its frozen items and status timeline.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = OrderDetailResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
#[instrument(skip(state))]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetailResponse>, ServiceError> {
    let (order, items) = state.services.assembler.get_order(id).await?;
    let timeline = state.services.order_status.timeline(id).await?;
    Ok(Json(OrderDetailResponse {
        order,
        items,
        timeline,
    }))
}

/// List orders, newest first, optionally scoped to one customer.
#[utoipa::path(
    get,
    path = "/orders",
    responses((status = 200, description = "Order page", body = OrderListResponse)),
    tag = "Orders"
)]
#[instrument(skip(state))]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let (orders, total) = state
        .services
        .assembler
        .list_orders(query.customer_id, query.page, query.per_page)
        .await?;
    Ok(Json(OrderListResponse {
        orders,
        total,
        page: query.page,
        per_page: query.per_page,
    }))
}

/// Administrative status transition, validated against the transition table.
#[utoipa::path(
    post,
    path = "/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Order transitioned", body = order::Model),
        (status = 409, description = "Transition rejected", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
#[instrument(skip(state, request), fields(order_id = %id))]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<order::Model>, ServiceError> {
    let order = state.services.order_status.update_status(id, request).await?;
    Ok(Json(order))
}
