use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        coupon, coupon_redemption,
        order::{self, OrderStatus, PaymentMethod, PaymentStatus},
        order_item, product, product_variant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        coupons::CouponDecision,
        order_status::{self, TransitionRequest},
        pricing::{PricedCart, PricedLine},
        shipping::ShippingQuote,
    },
};

/// Destination address, copied onto the order at placement.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    #[validate(length(min = 1, max = 200))]
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    #[validate(length(min = 1, max = 80))]
    pub city: String,
    #[validate(length(min = 1, max = 80))]
    pub state: String,
    #[validate(length(min = 4, max = 10))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2))]
    pub country_code: String,
    pub phone: Option<String>,
}

/// Everything the assembler needs to commit one order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub customer_id: Uuid,
    pub cart: PricedCart,
    pub coupon: CouponDecision,
    pub shipping: ShippingQuote,
    pub payment_method: PaymentMethod,
    pub shipping_address: Address,
    pub notes: Option<String>,
}

/// The single transactional boundary of the pipeline. As one atomic unit it
/// re-checks and decrements stock, consumes coupon redemptions, and persists
/// the order with its frozen items and first timeline entry. Any sub-step
/// failure rolls the whole transaction back; no partial order is ever
/// observable.
#[derive(Clone)]
pub struct OrderAssembler {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    tax_rate_percent: Decimal,
    currency: String,
}

impl OrderAssembler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        tax_rate_percent: Decimal,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            tax_rate_percent,
            currency,
        }
    }

    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn place_order(&self, request: PlaceOrder) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        // Price snapshot, computed exactly once.
        let subtotal = request.cart.subtotal;
        let discount = request.coupon.discount;
        let discounted = subtotal - discount;
        let shipping = request.shipping.charge;
        let tax = (discounted * self.tax_rate_percent / Decimal::from(100)).round_dp(2);
        let grand_total = discounted + shipping + tax;

        let txn = self.db.begin().await?;

        // (a) Re-check and decrement stock for every line. A concurrent
        // checkout that got here first makes the conditional update match
        // zero rows; the transaction drops and rolls back.
        for line in &request.cart.lines {
            decrement_stock(&txn, line).await?;
        }

        // (b) Consume a redemption if a coupon was applied.
        if let Some(coupon) = &request.coupon.coupon {
            consume_coupon(&txn, coupon, request.customer_id, now).await?;
        }

        // (c) Persist the order, its frozen items, and the first timeline entry.
        let payment_status = match request.payment_method {
            PaymentMethod::Prepaid => PaymentStatus::Pending,
            PaymentMethod::Cod => PaymentStatus::PendingCod,
        };

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(order_id)),
            customer_id: Set(request.customer_id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(payment_status),
            payment_method: Set(request.payment_method),
            currency: Set(self.currency.clone()),
            subtotal: Set(subtotal),
            discount_amount: Set(discount),
            coupon_code: Set(request.coupon.code()),
            shipping_charge: Set(shipping),
            tax_amount: Set(tax),
            grand_total: Set(grand_total),
            shipping_address: Set(serde_json::to_value(&request.shipping_address)
                .map_err(|e| ServiceError::ValidationError(format!("invalid address: {e}")))?),
            notes: Set(request.notes),
            tracking_number: Set(None),
            courier_name: Set(None),
            created_at: Set(now),
            paid_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order = order.insert(&txn).await?;

        for line in &request.cart.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                sku: Set(line.sku.clone()),
                name: Set(line.name.clone()),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                line_total: Set(line.line_total),
                created_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        order_status::append_event(
            &txn,
            order_id,
            None,
            OrderStatus::Pending,
            &TransitionRequest::default(),
            now,
        )
        .await?;

        txn.commit().await?;

        info!(%order_id, order_number = %order.order_number, %grand_total, "order placed");

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;
        if let Some(coupon) = &request.coupon.coupon {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id: coupon.id,
                    order_id,
                    code: coupon.code.clone(),
                })
                .await;
        }

        Ok(order)
    }

    /// Retrieve an order with its frozen items.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok((order, items))
    }

    /// List orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        customer_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(customer_id) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }
}

/// Conditionally decrement the stock row backing one line. The quantity
/// guard in the filter makes the decrement atomic under concurrent
/// checkouts: the row either still has enough stock or the update matches
/// nothing.
async fn decrement_stock(
    txn: &DatabaseTransaction,
    line: &PricedLine,
) -> Result<(), ServiceError> {
    let rows = match line.variant_id {
        Some(variant_id) => {
            product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::StockQuantity,
                    Expr::col(product_variant::Column::StockQuantity).sub(line.quantity),
                )
                .filter(product_variant::Column::Id.eq(variant_id))
                .filter(product_variant::Column::StockQuantity.gte(line.quantity))
                .exec(txn)
                .await?
                .rows_affected
        }
        None => {
            product::Entity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(line.quantity),
                )
                .filter(product::Column::Id.eq(line.product_id))
                .filter(product::Column::StockQuantity.gte(line.quantity))
                .filter(product::Column::IsPublished.eq(true))
                .exec(txn)
                .await?
                .rows_affected
        }
    };

    if rows == 0 {
        warn!(sku = %line.sku, quantity = line.quantity, "stock re-check failed at assembly");
        return Err(ServiceError::ItemUnavailable {
            name: line.name.clone(),
            reason: "sold out while you were checking out".to_string(),
        });
    }
    Ok(())
}

/// Consume one global and one per-customer redemption. Both increments are
/// guarded by their limits in the UPDATE filter, so losing a race against a
/// concurrent redemption surfaces as zero affected rows, never as an
/// over-count.
async fn consume_coupon(
    txn: &DatabaseTransaction,
    coupon: &coupon::Model,
    customer_id: Uuid,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), ServiceError> {
    let rows = coupon::Entity::update_many()
        .col_expr(
            coupon::Column::UsageCount,
            Expr::col(coupon::Column::UsageCount).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
        .filter(coupon::Column::Id.eq(coupon.id))
        .filter(coupon::Column::IsActive.eq(true))
        .filter(
            Condition::any()
                .add(coupon::Column::UsageLimit.is_null())
                .add(Expr::col(coupon::Column::UsageCount).lt(Expr::col(coupon::Column::UsageLimit))),
        )
        .exec(txn)
        .await?
        .rows_affected;

    if rows == 0 {
        return Err(ServiceError::CouponExhausted(coupon.code.clone()));
    }

    // Per-customer counter: bump the existing row under its limit, or create
    // the first one.
    let existing = coupon_redemption::Entity::find()
        .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
        .filter(coupon_redemption::Column::CustomerId.eq(customer_id))
        .one(txn)
        .await?;

    match existing {
        Some(row) => {
            let mut update = coupon_redemption::Entity::update_many()
                .col_expr(
                    coupon_redemption::Column::RedemptionCount,
                    Expr::col(coupon_redemption::Column::RedemptionCount).add(1),
                )
                .col_expr(coupon_redemption::Column::LastRedeemedAt, Expr::value(now))
                .filter(coupon_redemption::Column::Id.eq(row.id));
            if let Some(limit) = coupon.per_user_limit {
                update = update
                    .filter(coupon_redemption::Column::RedemptionCount.lt(limit));
            }
            let rows = update.exec(txn).await?.rows_affected;
            if rows == 0 {
                return Err(ServiceError::CouponExhausted(coupon.code.clone()));
            }
        }
        None => {
            let redemption = coupon_redemption::ActiveModel {
                id: Set(Uuid::new_v4()),
                coupon_id: Set(coupon.id),
                customer_id: Set(customer_id),
                redemption_count: Set(1),
                last_redeemed_at: Set(now),
            };
            redemption.insert(txn).await?;
        }
    }

    Ok(())
}

fn generate_order_number(order_id: Uuid) -> String {
    format!(
        "ORD-{}",
        order_id.simple().to_string()[..8].to_uppercase()
    )
}
