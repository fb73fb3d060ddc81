use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus},
        order_item, order_status_event, product, product_variant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

impl OrderStatus {
    /// Terminal states admit no further transitions, forced or not.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// The allowed-transition table: one step forward along the fulfilment
    /// chain, or onto a side branch from any non-terminal state.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        if self == to {
            // Re-entering the same status is a no-op upstream, not an error.
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match to {
            Cancelled | Returned | Refunded => true,
            _ => matches!(
                (self, to),
                (Pending, Confirmed)
                    | (Confirmed, Processing)
                    | (Processing, Shipped)
                    | (Shipped, OutForDelivery)
                    | (OutForDelivery, Delivered)
            ),
        }
    }

    fn timeline_title(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Order placed",
            OrderStatus::Confirmed => "Order confirmed",
            OrderStatus::Processing => "Order is being processed",
            OrderStatus::Shipped => "Order shipped",
            OrderStatus::OutForDelivery => "Out for delivery",
            OrderStatus::Delivered => "Order delivered",
            OrderStatus::Cancelled => "Order cancelled",
            OrderStatus::Returned => "Order returned",
            OrderStatus::Refunded => "Order refunded",
        }
    }
}

/// Request to move an order to a new status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TransitionRequest {
    pub status: OrderStatus,
    pub description: Option<String>,
    pub location: Option<String>,
    pub tracking_number: Option<String>,
    pub courier_name: Option<String>,
    /// Administrative override of the transition table. Forced transitions
    /// are recorded as such on the timeline.
    #[serde(default)]
    pub forced: bool,
}

/// Governs post-creation lifecycle transitions and appends the immutable
/// status timeline.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Transition an order, validating against the allowed-transition table,
    /// stamping the matching date field on first entry, and appending one
    /// timeline event. Re-entering the current status is a no-op.
    #[instrument(skip(self, request), fields(order_id = %order_id, new_status = ?request.status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        request: TransitionRequest,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        if old_status == request.status {
            info!(%order_id, status = ?old_status, "status unchanged; no-op");
            return Ok(order);
        }

        let updated = apply_transition(&txn, order, &request).await?;
        txn.commit().await?;

        info!(%order_id, ?old_status, new_status = ?request.status, forced = request.forced,
            "order status updated");

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: request.status,
                forced: request.forced,
            })
            .await;
        if request.status == OrderStatus::Cancelled {
            self.event_sender.send_or_log(Event::OrderCancelled(order_id)).await;
        }

        Ok(updated)
    }

    /// Full timeline for an order, oldest first.
    pub async fn timeline(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_event::Model>, ServiceError> {
        let events = order_status_event::Entity::find()
            .filter(order_status_event::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_event::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(events)
    }
}

/// Apply one status transition inside the caller's transaction. Shared with
/// the payment orchestrator, whose settle step advances the order in the
/// same transaction that marks the payment paid.
///
/// The write is conditional on the version the caller read. A concurrent
/// transition bumps the version first, the filter then matches nothing, and
/// the losing caller gets a conflict instead of acting on a stale status.
/// Two racing cancels therefore restock exactly once.
pub(crate) async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
    request: &TransitionRequest,
) -> Result<order::Model, ServiceError> {
    let from = order.status;
    let to = request.status;

    if from.is_terminal() || (!request.forced && !from.can_transition(to)) {
        return Err(ServiceError::InvalidTransition { from, to });
    }
    if request.forced && !from.can_transition(to) {
        warn!(order_id = %order.id, ?from, ?to, "forced transition outside the allowed table");
    }

    let now = Utc::now();
    let order_id = order.id;
    let version = order.version;

    let mut update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
        .col_expr(order::Column::Version, Expr::value(version + 1));

    // Stamp the matching date field the first time the state is entered.
    match to {
        OrderStatus::Shipped if order.shipped_at.is_none() => {
            update = update.col_expr(order::Column::ShippedAt, Expr::value(Some(now)));
        }
        OrderStatus::Delivered if order.delivered_at.is_none() => {
            update = update.col_expr(order::Column::DeliveredAt, Expr::value(Some(now)));
        }
        OrderStatus::Cancelled if order.cancelled_at.is_none() => {
            update = update.col_expr(order::Column::CancelledAt, Expr::value(Some(now)));
        }
        _ => {}
    }

    if let Some(tracking) = &request.tracking_number {
        update = update.col_expr(
            order::Column::TrackingNumber,
            Expr::value(Some(tracking.clone())),
        );
    }
    if let Some(courier) = &request.courier_name {
        update = update.col_expr(
            order::Column::CourierName,
            Expr::value(Some(courier.clone())),
        );
    }

    let rows = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Version.eq(version))
        .exec(conn)
        .await?
        .rows_affected;
    if rows == 0 {
        warn!(%order_id, ?from, ?to, version, "lost transition race; order row changed underneath");
        return Err(ServiceError::ConcurrentModification(order_id));
    }

    // Only the transition that won the version check may restock.
    if to == OrderStatus::Cancelled {
        restock_items(conn, order_id).await?;
    }

    append_event(conn, order_id, Some(from), to, request, now).await?;

    let updated = order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    Ok(updated)
}

pub(crate) async fn append_event<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    from_status: Option<OrderStatus>,
    status: OrderStatus,
    request: &TransitionRequest,
    at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let event = order_status_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        from_status: Set(from_status),
        status: Set(status),
        title: Set(status.timeline_title().to_string()),
        description: Set(request.description.clone()),
        location: Set(request.location.clone()),
        forced: Set(request.forced),
        created_at: Set(at),
    };
    event.insert(conn).await?;
    Ok(())
}

/// Return the stock an order reserved at assembly. Variant lines restock the
/// variant pool, plain lines the product pool.
async fn restock_items<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<(), ServiceError> {
    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in items {
        match item.variant_id {
            Some(variant_id) => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity).add(item.quantity),
                    )
                    .filter(product_variant::Column::Id.eq(variant_id))
                    .exec(conn)
                    .await?;
            }
            None => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).add(item.quantity),
                    )
                    .filter(product::Column::Id.eq(item.product_id))
                    .exec(conn)
                    .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn forward_chain_is_single_step() {
        assert!(Pending.can_transition(Confirmed));
        assert!(Confirmed.can_transition(Processing));
        assert!(Processing.can_transition(Shipped));
        assert!(Shipped.can_transition(OutForDelivery));
        assert!(OutForDelivery.can_transition(Delivered));

        assert!(!Pending.can_transition(Delivered));
        assert!(!Pending.can_transition(Shipped));
        assert!(!Confirmed.can_transition(Delivered));
    }

    #[test]
    fn side_branches_reachable_from_any_non_terminal() {
        for from in [Pending, Confirmed, Processing, Shipped, OutForDelivery, Returned] {
            assert!(from.can_transition(Cancelled), "{from:?} -> Cancelled");
            assert!(from.can_transition(Refunded), "{from:?} -> Refunded");
        }
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for terminal in [Delivered, Cancelled, Refunded] {
            assert!(terminal.is_terminal());
            for to in [Pending, Confirmed, Processing, Shipped, OutForDelivery, Cancelled, Returned]
            {
                if to != terminal {
                    assert!(!terminal.can_transition(to), "{terminal:?} -> {to:?}");
                }
            }
        }
    }

    #[test]
    fn same_status_is_allowed_as_no_op() {
        assert!(Processing.can_transition(Processing));
    }
}
