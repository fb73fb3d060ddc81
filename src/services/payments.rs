use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus, PaymentMethod, PaymentStatus},
        payment::{self, PaymentState},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::order_status::{self, TransitionRequest},
};

type HmacSha256 = Hmac<Sha256>;

/// Intent opened on the gateway side, handed back to the client so it can
/// complete payment out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct GatewayIntent {
    pub intent_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Outbound seam to the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        order_ref: &str,
    ) -> Result<GatewayIntent, ServiceError>;
}

/// REST gateway client.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            key_id,
            key_secret,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateIntentBody<'a> {
    amount: Decimal,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateIntentReply {
    id: String,
    amount: Decimal,
    currency: String,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        order_ref: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let url = format!("{}/v1/intents", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateIntentBody {
                amount,
                currency,
                receipt: order_ref,
            })
            .send()
            .await
            .map_err(|e| ServiceError::PaymentIntentFailed(format!("gateway unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "gateway rejected intent creation");
            return Err(ServiceError::PaymentIntentFailed(format!(
                "gateway returned {status}"
            )));
        }

        let reply: CreateIntentReply = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentIntentFailed(format!("bad gateway reply: {e}")))?;

        Ok(GatewayIntent {
            intent_id: reply.id,
            amount: reply.amount,
            currency: reply.currency,
        })
    }
}

/// Asynchronous callback from the gateway after the client completes payment.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PaymentCallback {
    pub intent_id: String,
    pub settlement_id: String,
    pub signature: String,
}

/// Result of processing a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// This delivery settled the payment and confirmed the order.
    Settled { order_id: Uuid },
    /// Duplicate delivery for an already-settled payment; nothing changed.
    AlreadySettled { order_id: Uuid },
}

/// Drives the two payment paths. Pay-on-delivery is terminal at order
/// creation; online payment opens a gateway intent and later settles it via
/// an idempotent, signature-checked callback.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    webhook_secret: String,
    event_sender: EventSender,
}

impl PaymentOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        webhook_secret: String,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            webhook_secret,
            event_sender,
        }
    }

    /// Open a gateway intent for a freshly assembled order. Pay-on-delivery
    /// orders need no gateway involvement and return `None`. Idempotent: an
    /// order that already has a payment record gets that record back instead
    /// of a second intent, keeping payments one-to-one with orders.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn initiate(&self, order: &order::Model) -> Result<Option<payment::Model>, ServiceError> {
        if order.payment_method == PaymentMethod::Cod {
            return Ok(None);
        }

        if let Some(existing) = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?
        {
            info!(order_id = %order.id, intent_id = %existing.intent_id, "reusing existing payment intent");
            return Ok(Some(existing));
        }

        let intent = self
            .gateway
            .create_intent(order.grand_total, &order.currency, &order.order_number)
            .await?;

        let now = Utc::now();
        let record = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            intent_id: Set(intent.intent_id.clone()),
            settlement_id: Set(None),
            amount: Set(intent.amount),
            currency: Set(intent.currency),
            status: Set(PaymentState::Pending),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        let record = record.insert(&*self.db).await?;

        info!(order_id = %order.id, intent_id = %record.intent_id, "payment intent created");
        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                order_id: order.id,
                intent_id: record.intent_id.clone(),
            })
            .await;

        Ok(Some(record))
    }

    /// Open (or re-open) the payment intent for an existing order. Covers the
    /// retry path after checkout committed the order but the gateway call
    /// failed.
    #[instrument(skip(self))]
    pub async fn initiate_for_order(&self, order_id: Uuid) -> Result<payment::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.payment_method == PaymentMethod::Cod {
            return Err(ServiceError::InvalidOperation(
                "pay-on-delivery orders have no payment intent".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is already paid",
                order.order_number
            )));
        }

        self.initiate(&order).await?.ok_or_else(|| {
            ServiceError::InvalidOperation("order has no payable intent".to_string())
        })
    }

    /// Verify a gateway callback and settle the payment exactly once.
    ///
    /// The signature is recomputed from the stored secret; a mismatch is
    /// fatal and never marks anything paid. The `pending -> paid` flip is a
    /// conditional update keyed on the current status, so a duplicate
    /// delivery (at-least-once gateways retry) degrades to a no-op success
    /// instead of a second state transition.
    #[instrument(skip(self, callback), fields(intent_id = %callback.intent_id))]
    pub async fn verify_callback(
        &self,
        callback: PaymentCallback,
    ) -> Result<VerificationOutcome, ServiceError> {
        if !self.signature_matches(&callback) {
            warn!(intent_id = %callback.intent_id, "callback signature mismatch");
            self.event_sender
                .send_or_log(Event::PaymentSignatureRejected {
                    intent_id: callback.intent_id.clone(),
                })
                .await;
            return Err(ServiceError::InvalidSignature);
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let rows = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentState::Paid))
            .col_expr(
                payment::Column::SettlementId,
                Expr::value(Some(callback.settlement_id.clone())),
            )
            .col_expr(payment::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::IntentId.eq(callback.intent_id.clone()))
            .filter(payment::Column::Status.eq(PaymentState::Pending))
            .exec(&txn)
            .await?
            .rows_affected;

        let record = payment::Entity::find()
            .filter(payment::Column::IntentId.eq(callback.intent_id.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment intent {} not found", callback.intent_id))
            })?;

        if rows == 0 {
            // Lost the settle race or this is a redelivery. A matching,
            // already-paid record is a no-op success; anything else is a
            // real conflict.
            return match (&record.status, record.settlement_id.as_deref()) {
                (PaymentState::Paid, Some(existing)) if existing == callback.settlement_id => {
                    info!(order_id = %record.order_id, "duplicate settlement callback ignored");
                    Ok(VerificationOutcome::AlreadySettled {
                        order_id: record.order_id,
                    })
                }
                _ => Err(ServiceError::InvalidOperation(format!(
                    "payment intent {} cannot be settled from state {:?}",
                    callback.intent_id, record.status
                ))),
            };
        }

        // This delivery won the conditional flip: stamp the order paid and
        // advance it through the state machine in the same transaction.
        let order = order::Entity::find_by_id(record.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", record.order_id))
            })?;

        let old_status = order.status;
        let mut active: order::ActiveModel = order.clone().into();
        active.payment_status = Set(PaymentStatus::Paid);
        active.paid_at = Set(Some(now));
        active.updated_at = Set(Some(now));
        active.version = Set(order.version + 1);
        let order = active.update(&txn).await?;

        let order = order_status::apply_transition(
            &txn,
            order,
            &TransitionRequest {
                status: OrderStatus::Confirmed,
                description: Some("Payment verified".to_string()),
                ..Default::default()
            },
        )
        .await?;

        txn.commit().await?;

        info!(order_id = %order.id, settlement_id = %callback.settlement_id, "payment settled");
        self.event_sender
            .send_or_log(Event::PaymentSettled {
                order_id: order.id,
                settlement_id: callback.settlement_id.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status,
                new_status: OrderStatus::Confirmed,
                forced: false,
            })
            .await;

        Ok(VerificationOutcome::Settled { order_id: order.id })
    }

    fn signature_matches(&self, callback: &PaymentCallback) -> bool {
        let expected = compute_signature(
            &self.webhook_secret,
            &callback.intent_id,
            &callback.settlement_id,
        );
        constant_time_eq(&expected, &callback.signature)
    }
}

/// HMAC-SHA256 over `"{intent_id}|{settlement_id}"`, hex encoded.
pub fn compute_signature(secret: &str, intent_id: &str, settlement_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{intent_id}|{settlement_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
