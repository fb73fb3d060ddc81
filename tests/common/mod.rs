#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use checkout_api::{
    config::AppConfig,
    db,
    entities::{coupon, order, product, product_variant},
    errors::ServiceError,
    events::{self, EventSender},
    services::{
        orders::{Address, PlaceOrder},
        payments::{GatewayIntent, PaymentGateway},
        pricing::CartLine,
    },
    AppState,
};

pub const WEBHOOK_SECRET: &str = "test_webhook_secret_32_chars_long";

/// Gateway stub that hands out sequential intent ids without any network.
/// Flip `set_failing(true)` to simulate an unreachable gateway.
pub struct StubGateway {
    counter: AtomicU32,
    failing: AtomicBool,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        _order_ref: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentIntentFailed(
                "gateway unreachable".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayIntent {
            intent_id: format!("intent_{n}"),
            amount,
            currency: currency.to_string(),
        })
    }
}

/// Test harness: file-backed SQLite with a single connection so concurrent
/// transactions serialize the way row locks would on Postgres.
pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let db_path = tmp.path().join("checkout_test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let mut opts = ConnectOptions::new(url.clone());
        opts.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let conn = Database::connect(opts).await.expect("db connect");
        db::create_schema(&conn).await.expect("schema bootstrap");

        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let cfg = AppConfig::new(url, WEBHOOK_SECRET);
        let gateway = Arc::new(StubGateway::new());
        let state = AppState::build(Arc::new(conn), cfg, event_sender, gateway.clone());

        Self {
            state,
            gateway,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    /// Run the whole checkout pipeline the way the handler wires it.
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        lines: &[CartLine],
        coupon_code: Option<&str>,
        payment_method: order::PaymentMethod,
    ) -> Result<order::Model, ServiceError> {
        let services = &self.state.services;
        let cart = services.pricing.resolve(lines).await?;
        let coupon = services.coupons.apply(coupon_code, customer_id, &cart).await?;
        let shipping = services.shipping.quote(
            "560001",
            cart.total_weight_grams,
            payment_method,
            cart.subtotal - coupon.discount,
        );
        services
            .assembler
            .place_order(PlaceOrder {
                customer_id,
                cart,
                coupon,
                shipping,
                payment_method,
                shipping_address: test_address(),
                notes: None,
            })
            .await
    }
}

pub fn test_address() -> Address {
    Address {
        full_name: "Asha Rao".to_string(),
        address_line_1: "12 MG Road".to_string(),
        address_line_2: None,
        city: "Bengaluru".to_string(),
        state: "Karnataka".to_string(),
        postal_code: "560001".to_string(),
        country_code: "IN".to_string(),
        phone: Some("+919800000000".to_string()),
    }
}

pub async fn seed_product(
    app: &TestApp,
    name: &str,
    price: Decimal,
    stock: i32,
    weight_grams: i32,
) -> product::Model {
    let now = Utc::now();
    let id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(id),
        sku: Set(format!("SKU-{}", &id.simple().to_string()[..8])),
        name: Set(name.to_string()),
        price: Set(price),
        stock_quantity: Set(stock),
        weight_grams: Set(weight_grams),
        is_published: Set(true),
        is_bundle: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed product")
}

pub async fn seed_variant(
    app: &TestApp,
    product_id: Uuid,
    name: &str,
    price_override: Option<Decimal>,
    stock: i32,
) -> product_variant::Model {
    let now = Utc::now();
    let id = Uuid::new_v4();
    product_variant::ActiveModel {
        id: Set(id),
        product_id: Set(product_id),
        name: Set(name.to_string()),
        sku: Set(format!("VAR-{}", &id.simple().to_string()[..8])),
        price_override: Set(price_override),
        stock_quantity: Set(stock),
        weight_grams: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed variant")
}

/// Coupon seed with sensible defaults; adjust the returned builder fields
/// before insertion via the `tweak` closure.
pub async fn seed_coupon<F>(app: &TestApp, code: &str, tweak: F) -> coupon::Model
where
    F: FnOnce(&mut coupon::ActiveModel),
{
    let now = Utc::now();
    let mut model = coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        discount_kind: Set(coupon::DiscountKind::Percentage),
        discount_value: Set(Decimal::from(10)),
        min_order_amount: Set(None),
        max_discount: Set(None),
        usage_limit: Set(None),
        usage_count: Set(0),
        per_user_limit: Set(None),
        is_active: Set(true),
        applies_to_all: Set(true),
        product_ids: Set(None),
        starts_at: Set(None),
        ends_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    tweak(&mut model);
    model.insert(&*app.state.db).await.expect("seed coupon")
}

pub fn line(product_id: Uuid, quantity: i32) -> CartLine {
    CartLine {
        product_id,
        variant_id: None,
        quantity,
    }
}
