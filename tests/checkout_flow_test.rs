//! Checkout scenarios: pricing is re-derived server-side, stock is checked
//! but never reserved, and the payment path matches the payment mode.

mod common;

use axum::http::{Method, StatusCode};
use common::{decimal_field, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use std::sync::atomic::Ordering;
use uuid::Uuid;

use fulfillment_api::entities::{cart, order, payment};

#[tokio::test]
async fn online_checkout_prices_order_and_leaves_stock_untouched() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(2, dec!(500), 10).await;
    let token = app.shopper_token(fixture.shopper_id);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": fixture.cart_id, "payment_mode": "ONLINE" })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(decimal_field(&body, "subtotal"), dec!(1000));
    // The seeded shopper sits ~3 km from the warehouse, under the 50 floor.
    assert_eq!(decimal_field(&body, "shipping_charges"), dec!(50));
    assert_eq!(decimal_field(&body, "total_amount"), dec!(1050));
    assert_eq!(body["payment_status"], "PENDING");
    assert_eq!(body["order_status"], "PROCESSING");
    assert!(body["payment_link_url"].as_str().is_some());
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    // Stock is sufficiency-checked only; nothing is decremented at checkout.
    assert_eq!(app.stock_available(fixture.inventory_id).await, 10);
    assert_eq!(app.gateway.links_created(), 1);

    let order_id = Uuid::parse_str(body["id"].as_str().unwrap()).unwrap();
    let payment_row = app.payment_row(order_id).await;
    assert_eq!(payment_row.payment_status, payment::PaymentStatus::Pending);
    assert!(payment_row.gateway_link_id.is_some());
    assert_eq!(payment_row.amount, dec!(1050));

    // Whole-cart checkout retires the cart.
    let cart_row = cart::Entity::find_by_id(fixture.cart_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart_row.status, cart::CartStatus::CheckedOut);
}

#[tokio::test]
async fn cod_checkout_makes_no_gateway_call() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(1, dec!(250), 5).await;
    let token = app.shopper_token(fixture.shopper_id);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": fixture.cart_id, "payment_mode": "COD" })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["payment_mode"], "COD");
    assert_eq!(body["payment_status"], "PENDING");
    assert!(body["payment_link_url"].is_null());
    assert_eq!(app.gateway.links_created(), 0);
}

#[tokio::test]
async fn single_line_checkout_leaves_cart_active() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(2, dec!(500), 10).await;
    let token = app.shopper_token(fixture.shopper_id);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({
                "cart_id": fixture.cart_id,
                "line_item_id": fixture.line_id,
                "payment_mode": "COD"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);

    let cart_row = cart::Entity::find_by_id(fixture.cart_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart_row.status, cart::CartStatus::Active);
}

#[tokio::test]
async fn client_submitted_prices_are_ignored() {
    let app = TestApp::new().await;
    let shopper_id = app.seed_shopper(Some(12.9716), Some(77.5946)).await;
    let warehouse_id = app.seed_warehouse(13.0, 77.6).await;
    let product_id = app.seed_product(dec!(500)).await;
    let inventory_id = app.seed_inventory(product_id, warehouse_id, 10).await;
    // The cart claims the product costs 1; the catalog says 500.
    let (cart_id, _) = app
        .seed_cart_with_line(shopper_id, product_id, inventory_id, 2, dec!(1))
        .await;
    let token = app.shopper_token(shopper_id);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": cart_id, "payment_mode": "COD" })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(decimal_field(&body, "subtotal"), dec!(1000));
}

#[tokio::test]
async fn missing_delivery_coordinates_is_a_bad_request() {
    let app = TestApp::new().await;
    let shopper_id = app.seed_shopper(None, None).await;
    let warehouse_id = app.seed_warehouse(13.0, 77.6).await;
    let product_id = app.seed_product(dec!(500)).await;
    let inventory_id = app.seed_inventory(product_id, warehouse_id, 10).await;
    let (cart_id, _) = app
        .seed_cart_with_line(shopper_id, product_id, inventory_id, 1, dec!(500))
        .await;
    let token = app.shopper_token(shopper_id);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": cart_id, "payment_mode": "ONLINE" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_cart_is_not_found() {
    let app = TestApp::new().await;
    let shopper_id = app.seed_shopper(Some(12.9716), Some(77.5946)).await;
    let token = app.shopper_token(shopper_id);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": Uuid::new_v4(), "payment_mode": "ONLINE" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn insufficient_stock_rejects_the_checkout() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(5, dec!(500), 2).await;
    let token = app.shopper_token(fixture.shopper_id);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": fixture.cart_id, "payment_mode": "ONLINE" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_available(fixture.inventory_id).await, 2);
}

#[tokio::test]
async fn checkout_requires_authentication() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            None,
            Some(json!({ "cart_id": Uuid::new_v4(), "payment_mode": "ONLINE" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gateway_failure_surfaces_502_but_keeps_the_order() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(1, dec!(500), 10).await;
    let token = app.shopper_token(fixture.shopper_id);
    app.gateway.fail_link_creation.store(true, Ordering::SeqCst);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": fixture.cart_id, "payment_mode": "ONLINE" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    // The order committed before the gateway call; it sits PENDING with no
    // gateway reference until the sweeper expires it.
    let order_row = order::Entity::find()
        .filter(order::Column::CartId.eq(fixture.cart_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(order_row.payment_status, order::PaymentStatus::Pending);
    assert!(order_row.gateway_link_id.is_none());
}

#[tokio::test]
async fn orders_are_visible_to_their_owner_only() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(1, dec!(500), 10).await;
    let token = app.shopper_token(fixture.shopper_id);

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": fixture.cart_id, "payment_mode": "COD" })),
        )
        .await;
    let order_path = format!("/api/v1/orders/{}", body["id"].as_str().unwrap());

    let (owner_status, _) = app
        .request(Method::GET, &order_path, Some(&token), None)
        .await;
    assert_eq!(owner_status, StatusCode::OK);

    // Another shopper sees nothing, not even that the order exists.
    let stranger = app.seed_shopper(Some(12.0), Some(77.0)).await;
    let (stranger_status, _) = app
        .request(
            Method::GET,
            &order_path,
            Some(&app.shopper_token(stranger)),
            None,
        )
        .await;
    assert_eq!(stranger_status, StatusCode::NOT_FOUND);

    // Operators see everything.
    let (operator_status, _) = app
        .request(Method::GET, &order_path, Some(&app.operator_token()), None)
        .await;
    assert_eq!(operator_status, StatusCode::OK);
}

#[tokio::test]
async fn payment_link_can_be_reissued_for_unpaid_order() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(1, dec!(500), 10).await;
    let token = app.shopper_token(fixture.shopper_id);

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": fixture.cart_id, "payment_mode": "ONLINE" })),
        )
        .await;
    let order_id = body["id"].as_str().unwrap().to_string();

    let (status, link_body) = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/checkout", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body: {}", link_body);
    assert!(link_body["payment_link_url"].as_str().is_some());
    assert_eq!(app.gateway.links_created(), 2);
}

#[tokio::test]
async fn paid_order_cannot_reissue_a_payment_link() {
    let app = TestApp::new().await;
    let fixture = app.seed_checkout_fixture(1, dec!(500), 10).await;
    let token = app.shopper_token(fixture.shopper_id);

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "cart_id": fixture.cart_id, "payment_mode": "ONLINE" })),
        )
        .await;
    let order_id = Uuid::parse_str(body["id"].as_str().unwrap()).unwrap();
    app.deliver_capture_webhook(order_id, "pay_001").await;

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/checkout", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
