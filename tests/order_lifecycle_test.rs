mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

use checkout_api::{
    entities::{
        order::{self, OrderStatus, PaymentMethod},
        product,
    },
    errors::ServiceError,
    services::order_status::TransitionRequest,
};
use common::{line, seed_product, TestApp};

fn to_status(status: OrderStatus) -> TransitionRequest {
    TransitionRequest {
        status,
        ..Default::default()
    }
}

async fn placed_order(app: &TestApp) -> order::Model {
    let product = seed_product(app, "Kettle", dec!(1500), 5, 700).await;
    app.checkout(Uuid::new_v4(), &[line(product.id, 1)], None, PaymentMethod::Cod)
        .await
        .expect("checkout")
}

#[tokio::test]
async fn skipping_ahead_is_rejected_unless_forced() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let svc = &app.state.services.order_status;

    let err = svc
        .update_status(order.id, to_status(OrderStatus::Delivered))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Delivered
        }
    );

    // An administrator can force it, and the timeline records that.
    let forced = svc
        .update_status(
            order.id,
            TransitionRequest {
                status: OrderStatus::Delivered,
                description: Some("Manual reconciliation".to_string()),
                forced: true,
                ..Default::default()
            },
        )
        .await
        .expect("forced transition");
    assert_eq!(forced.status, OrderStatus::Delivered);
    assert!(forced.delivered_at.is_some());

    let timeline = svc.timeline(order.id).await.unwrap();
    let last = timeline.last().unwrap();
    assert_eq!(last.status, OrderStatus::Delivered);
    assert!(last.forced);
}

#[tokio::test]
async fn terminal_states_reject_all_transitions() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let svc = &app.state.services.order_status;

    svc.update_status(
        order.id,
        TransitionRequest {
            status: OrderStatus::Delivered,
            forced: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = svc
        .update_status(order.id, to_status(OrderStatus::Cancelled))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });
}

#[tokio::test]
async fn full_chain_stamps_dates_and_courier_fields() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let svc = &app.state.services.order_status;

    svc.update_status(order.id, to_status(OrderStatus::Confirmed)).await.unwrap();
    svc.update_status(order.id, to_status(OrderStatus::Processing)).await.unwrap();
    let shipped = svc
        .update_status(
            order.id,
            TransitionRequest {
                status: OrderStatus::Shipped,
                tracking_number: Some("AWB123456".to_string()),
                courier_name: Some("BlueDart".to_string()),
                location: Some("Bengaluru hub".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(shipped.shipped_at.is_some());
    assert_eq!(shipped.tracking_number.as_deref(), Some("AWB123456"));
    assert_eq!(shipped.courier_name.as_deref(), Some("BlueDart"));

    svc.update_status(order.id, to_status(OrderStatus::OutForDelivery)).await.unwrap();
    let delivered = svc
        .update_status(order.id, to_status(OrderStatus::Delivered))
        .await
        .unwrap();
    assert!(delivered.delivered_at.is_some());
    // shipped_at is stamped once and stays put
    assert_eq!(delivered.shipped_at, shipped.shipped_at);

    let timeline = svc.timeline(order.id).await.unwrap();
    // placement + 5 transitions
    assert_eq!(timeline.len(), 6);
    assert!(timeline.iter().all(|e| !e.forced));
}

#[tokio::test]
async fn re_entering_the_same_status_is_a_no_op() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let svc = &app.state.services.order_status;

    svc.update_status(order.id, to_status(OrderStatus::Confirmed)).await.unwrap();
    let before = svc.timeline(order.id).await.unwrap().len();

    let unchanged = svc
        .update_status(order.id, to_status(OrderStatus::Confirmed))
        .await
        .expect("same-status transition must not error");
    assert_eq!(unchanged.status, OrderStatus::Confirmed);
    assert_eq!(svc.timeline(order.id).await.unwrap().len(), before);
}

#[tokio::test]
async fn cancelling_restocks_reserved_units() {
    let app = TestApp::new().await;
    let product = seed_product(&app, "Blender", dec!(3200), 4, 1200).await;
    let order = app
        .checkout(Uuid::new_v4(), &[line(product.id, 3)], None, PaymentMethod::Cod)
        .await
        .unwrap();

    let after_order = product::Entity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_order.stock_quantity, 1);

    let cancelled = app
        .state
        .services
        .order_status
        .update_status(
            order.id,
            TransitionRequest {
                status: OrderStatus::Cancelled,
                description: Some("Customer request".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(cancelled.cancelled_at.is_some());

    let restocked = product::Entity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restocked.stock_quantity, 4);
}
