//! Shared harness: an application instance backed by a throwaway SQLite
//! database, with a scriptable in-process payment gateway.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use fulfillment_api::{
    auth,
    config::AppConfig,
    db,
    entities::{cart, cart_item, inventory_record, order, payment, product, shopper, warehouse},
    errors::ServiceError,
    events::{self, EventSender},
    gateway::{
        CreatePaymentLinkRequest, GatewayPayment, GatewayPaymentStatus, PaymentGateway,
        PaymentLink, RefundReceipt,
    },
    handlers::AppServices,
    services::payment_events::sign_body,
    services::reconciliation::{ReconciliationSweeper, SweepConfig},
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Scriptable gateway double: tests decide what the gateway reports for each
/// payment link and whether calls fail.
#[derive(Default)]
pub struct FakeGateway {
    counter: AtomicUsize,
    pub fail_link_creation: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub links: Mutex<Vec<CreatePaymentLinkRequest>>,
    pub payments: Mutex<HashMap<String, GatewayPayment>>,
    pub refunds: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn set_status(&self, link_id: &str, status: GatewayPaymentStatus, payment_id: Option<&str>) {
        self.payments.lock().unwrap().insert(
            link_id.to_string(),
            GatewayPayment {
                status,
                payment_id: payment_id.map(str::to_string),
            },
        );
    }

    pub fn links_created(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn refunds_issued(&self) -> Vec<String> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_link(
        &self,
        request: CreatePaymentLinkRequest,
    ) -> Result<PaymentLink, ServiceError> {
        if self.fail_link_creation.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("gateway unavailable".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let link_id = format!("plink_{:04}", n);
        self.links.lock().unwrap().push(request);
        self.payments.lock().unwrap().insert(
            link_id.clone(),
            GatewayPayment {
                status: GatewayPaymentStatus::Pending,
                payment_id: None,
            },
        );
        Ok(PaymentLink {
            short_url: format!("https://gateway.test/pay/{}", link_id),
            link_id,
        })
    }

    async fn fetch_payment(&self, link_id: &str) -> Result<GatewayPayment, ServiceError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("gateway unavailable".into()));
        }
        Ok(self
            .payments
            .lock()
            .unwrap()
            .get(link_id)
            .cloned()
            .unwrap_or(GatewayPayment {
                status: GatewayPaymentStatus::Pending,
                payment_id: None,
            }))
    }

    async fn refund(
        &self,
        payment_id: &str,
        _amount: Option<Decimal>,
    ) -> Result<RefundReceipt, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.refunds.lock().unwrap().push(payment_id.to_string());
        Ok(RefundReceipt {
            refund_id: format!("rfnd_{:04}", n),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_path = std::env::temp_dir().join(format!("fulfillment_test_{}.db", Uuid::new_v4()));
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test_secret_key_for_testing_purposes_only_32chars",
            WEBHOOK_SECRET,
            "127.0.0.1",
            18080,
            "test",
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        // Sweep everything immediately in tests; individual tests override
        // via `sweeper_with` when they need different windows.
        cfg.sweep_grace_secs = 0;
        cfg.sweep_abandon_secs = 0;

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to create schema");
        let pool = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let services = AppServices::new(
            pool.clone(),
            event_sender.clone(),
            gateway.clone() as Arc<dyn PaymentGateway>,
            &cfg,
        );

        let state = AppState {
            db: pool,
            config: cfg,
            event_sender,
            services,
        };
        let router = fulfillment_api::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn sweeper(&self) -> ReconciliationSweeper {
        self.sweeper_with(SweepConfig::from_config(&self.state.config))
    }

    pub fn sweeper_with(&self, config: SweepConfig) -> ReconciliationSweeper {
        ReconciliationSweeper::new(
            self.state.db.clone(),
            self.state.services.orders.clone(),
            self.gateway.clone() as Arc<dyn PaymentGateway>,
            self.state.event_sender.clone(),
            config,
        )
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig::from_config(&self.state.config)
    }

    pub fn shopper_token(&self, shopper_id: Uuid) -> String {
        auth::issue_token(&self.state.config, shopper_id, auth::ROLE_SHOPPER).unwrap()
    }

    pub fn operator_token(&self) -> String {
        auth::issue_token(&self.state.config, Uuid::new_v4(), auth::ROLE_OPERATOR).unwrap()
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json_body) => builder
                .header("content-type", "application/json")
                .body(Body::from(json_body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn post_webhook(&self, body: &Value, signature: &str) -> (StatusCode, Value) {
        let raw = body.to_string();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("x-signature", signature)
            .body(Body::from(raw))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Signs and delivers a `payment_link.paid` webhook for an order.
    pub async fn deliver_capture_webhook(
        &self,
        order_id: Uuid,
        gateway_payment_id: &str,
    ) -> (StatusCode, Value) {
        let body = capture_event(order_id, gateway_payment_id);
        let signature = sign_body(WEBHOOK_SECRET, body.to_string().as_bytes());
        self.post_webhook(&body, &signature).await
    }

    // ------------------------------------------------------------------
    // seed helpers
    // ------------------------------------------------------------------

    pub async fn seed_shopper(&self, latitude: Option<f64>, longitude: Option<f64>) -> Uuid {
        let id = Uuid::new_v4();
        shopper::ActiveModel {
            id: Set(id),
            name: Set("Asha Verma".into()),
            email: Set(format!("{}@example.test", id.simple())),
            street: Set(Some("12 MG Road".into())),
            city: Set(Some("Bengaluru".into())),
            state: Set(Some("Karnataka".into())),
            country: Set(Some("IN".into())),
            postal_code: Set(Some("560001".into())),
            latitude: Set(latitude),
            longitude: Set(longitude),
            status: Set(shopper::ShopperStatus::Active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed shopper");
        id
    }

    pub async fn seed_warehouse(&self, latitude: f64, longitude: f64) -> Uuid {
        let id = Uuid::new_v4();
        warehouse::ActiveModel {
            id: Set(id),
            name: Set(format!("WH-{}", &id.to_string()[..4])),
            latitude: Set(latitude),
            longitude: Set(longitude),
            status: Set(warehouse::WarehouseStatus::Active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed warehouse");
        id
    }

    pub async fn seed_product(&self, price: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set("Linen Kurta".into()),
            price: Set(price),
            status: Set(product::ProductStatus::Active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn seed_inventory(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        stock_available: i32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        inventory_record::ActiveModel {
            id: Set(id),
            product_id: Set(product_id),
            warehouse_id: Set(warehouse_id),
            colors: Set(json!(["black", "red"])),
            sizes: Set(json!(["M", "L"])),
            stock_available: Set(stock_available),
            stock_reserved: Set(0),
            stock_damaged: Set(0),
            stock_in_transit: Set(0),
            status: Set(inventory_record::InventoryStatus::Active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed inventory");
        id
    }

    pub async fn seed_cart_with_line(
        &self,
        shopper_id: Uuid,
        product_id: Uuid,
        inventory_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
    ) -> (Uuid, Uuid) {
        let now = Utc::now();
        let cart_id = Uuid::new_v4();
        let line_total = unit_price * Decimal::from(quantity);
        cart::ActiveModel {
            id: Set(cart_id),
            shopper_id: Set(shopper_id),
            currency: Set("INR".into()),
            subtotal: Set(line_total),
            status: Set(cart::CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed cart");

        let line_id = Uuid::new_v4();
        cart_item::ActiveModel {
            id: Set(line_id),
            cart_id: Set(cart_id),
            product_id: Set(product_id),
            inventory_id: Set(inventory_id),
            product_name: Set("Linen Kurta".into()),
            quantity: Set(quantity),
            color: Set("black".into()),
            size: Set("M".into()),
            unit_price: Set(unit_price),
            discount: Set(Decimal::ZERO),
            line_total: Set(line_total),
            created_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed cart line");

        (cart_id, line_id)
    }

    /// One call that seeds shopper + warehouse + product + stock + cart and
    /// returns everything a checkout test needs.
    pub async fn seed_checkout_fixture(
        &self,
        quantity: i32,
        unit_price: Decimal,
        stock_available: i32,
    ) -> CheckoutFixture {
        let shopper_id = self.seed_shopper(Some(12.9716), Some(77.5946)).await;
        let warehouse_id = self.seed_warehouse(13.0, 77.6).await;
        let product_id = self.seed_product(unit_price).await;
        let inventory_id = self
            .seed_inventory(product_id, warehouse_id, stock_available)
            .await;
        let (cart_id, line_id) = self
            .seed_cart_with_line(shopper_id, product_id, inventory_id, quantity, unit_price)
            .await;

        CheckoutFixture {
            shopper_id,
            warehouse_id,
            product_id,
            inventory_id,
            cart_id,
            line_id,
        }
    }

    // ------------------------------------------------------------------
    // state inspection
    // ------------------------------------------------------------------

    pub async fn order_row(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("order row")
    }

    pub async fn payment_row(&self, order_id: Uuid) -> payment::Model {
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("payment row")
    }

    pub async fn stock_available(&self, inventory_id: Uuid) -> i32 {
        inventory_record::Entity::find_by_id(inventory_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("inventory row")
            .stock_available
    }

    /// Moves a payment's creation time into the past so it falls outside the
    /// grace/abandon windows.
    pub async fn backdate_payment(&self, order_id: Uuid, seconds: i64) {
        let when = Utc::now() - Duration::seconds(seconds);
        payment::Entity::update_many()
            .col_expr(payment::Column::CreatedAt, Expr::value(when))
            .filter(payment::Column::OrderId.eq(order_id))
            .exec(&*self.state.db)
            .await
            .unwrap();
    }
}

pub struct CheckoutFixture {
    pub shopper_id: Uuid,
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub inventory_id: Uuid,
    pub cart_id: Uuid,
    pub line_id: Uuid,
}

/// Reads a Decimal out of a JSON field regardless of whether it was
/// serialized as a string or a number.
pub fn decimal_field(value: &Value, key: &str) -> Decimal {
    let field = &value[key];
    if let Some(s) = field.as_str() {
        s.parse().unwrap_or_else(|_| panic!("field {} is not a decimal: {}", key, s))
    } else if let Some(f) = field.as_f64() {
        Decimal::try_from(f).expect("decimal from f64")
    } else {
        panic!("field {} missing or not numeric: {}", key, field);
    }
}

/// A gateway `payment_link.paid` event for the given order.
pub fn capture_event(order_id: Uuid, gateway_payment_id: &str) -> Value {
    json!({
        "event": "payment_link.paid",
        "payload": {
            "payment_link": { "entity": { "reference_id": order_id.to_string() } },
            "payment": { "entity": { "id": gateway_payment_id } }
        }
    })
}
