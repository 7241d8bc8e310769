//! HTTP gateway client against a wiremock double of the provider's REST API.

use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fulfillment_api::config::AppConfig;
use fulfillment_api::errors::ServiceError;
use fulfillment_api::gateway::{
    CreatePaymentLinkRequest, GatewayPaymentStatus, HttpPaymentGateway, PaymentGateway,
};

fn gateway_for(server: &MockServer) -> HttpPaymentGateway {
    let mut cfg = AppConfig::new(
        "sqlite::memory:",
        "test_secret_key_for_testing_purposes_only_32chars",
        "whsec_test",
        "127.0.0.1",
        18080,
        "test",
    );
    cfg.gateway_base_url = server.uri();
    cfg.gateway_key_id = "key_test".into();
    cfg.gateway_key_secret = "secret_test".into();
    HttpPaymentGateway::new(&cfg).unwrap()
}

fn link_request() -> CreatePaymentLinkRequest {
    CreatePaymentLinkRequest {
        amount: dec!(1050),
        currency: "INR".into(),
        reference_id: "order-1".into(),
        description: "Order payment".into(),
        customer_name: "Asha Verma".into(),
        customer_email: "asha@example.test".into(),
    }
}

#[tokio::test]
async fn creates_payment_links_in_minor_units() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_links"))
        .and(body_partial_json(json!({
            "amount": 105000,
            "currency": "INR",
            "reference_id": "order-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "plink_9",
            "short_url": "https://gw.test/pay/plink_9"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let link = gateway_for(&server)
        .create_payment_link(link_request())
        .await
        .unwrap();
    assert_eq!(link.link_id, "plink_9");
    assert_eq!(link.short_url, "https://gw.test/pay/plink_9");
}

#[tokio::test]
async fn gateway_rejection_maps_to_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_links"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = gateway_for(&server)
        .create_payment_link(link_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GatewayError(_)));
}

#[tokio::test]
async fn payment_status_strings_map_to_ground_truth() {
    let server = MockServer::start().await;
    for (wire, link_id) in [("paid", "pl_paid"), ("expired", "pl_exp"), ("created", "pl_new")] {
        Mock::given(method("GET"))
            .and(path(format!("/v1/payment_links/{}", link_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": link_id,
                "status": wire,
                "payment_id": if wire == "paid" { Some("pay_77") } else { None }
            })))
            .mount(&server)
            .await;
    }

    let gateway = gateway_for(&server);

    let paid = gateway.fetch_payment("pl_paid").await.unwrap();
    assert_eq!(paid.status, GatewayPaymentStatus::Captured);
    assert_eq!(paid.payment_id.as_deref(), Some("pay_77"));

    let expired = gateway.fetch_payment("pl_exp").await.unwrap();
    assert_eq!(expired.status, GatewayPaymentStatus::Failed);

    let created = gateway.fetch_payment("pl_new").await.unwrap();
    assert_eq!(created.status, GatewayPaymentStatus::Pending);
}

#[tokio::test]
async fn refunds_post_to_the_payment_resource() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments/pay_77/refund"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "rfnd_1",
            "status": "processed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = gateway_for(&server)
        .refund("pay_77", Some(dec!(1050)))
        .await
        .unwrap();
    assert_eq!(receipt.refund_id, "rfnd_1");
}
