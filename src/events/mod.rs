use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the checkout pipeline. Delivery is fire-and-forget: the
/// pipeline never waits on a subscriber, and a lost event never fails an
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
        forced: bool,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        code: String,
    },
    PaymentIntentCreated {
        order_id: Uuid,
        intent_id: String,
    },
    PaymentSettled {
        order_id: Uuid,
        settlement_id: String,
    },
    PaymentSignatureRejected {
        intent_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Send where delivery failure only merits a warning. Used on every
    /// pipeline path: notification fan-out must never fail an order.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event channel closed; dropping event");
        }
    }
}

/// Consumer loop for the event channel. External notification and admin-alert
/// systems subscribe here; the default implementation just logs.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "order cancelled");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                forced,
            } => {
                info!(%order_id, ?old_status, ?new_status, forced, "order status changed");
            }
            Event::CouponRedeemed { coupon_id, order_id, code } => {
                info!(%coupon_id, %order_id, %code, "coupon redeemed");
            }
            Event::PaymentIntentCreated { order_id, intent_id } => {
                info!(%order_id, %intent_id, "payment intent created");
            }
            Event::PaymentSettled { order_id, settlement_id } => {
                info!(%order_id, %settlement_id, "payment settled");
            }
            Event::PaymentSignatureRejected { intent_id } => {
                warn!(%intent_id, "payment callback rejected: bad signature");
            }
        }
    }
    info!("event channel closed; processor exiting");
}
