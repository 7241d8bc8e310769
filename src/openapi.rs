use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "fulfillment-api",
        description = "Order checkout and payment reconciliation backend"
    ),
    paths(
        crate::handlers::carts::add_line,
        crate::handlers::carts::active_cart,
        crate::handlers::carts::remove_line,
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::create_payment_link,
        crate::handlers::orders::settle_cash_on_delivery,
        crate::handlers::orders::ship_order,
        crate::handlers::orders::deliver_order,
        crate::handlers::orders::refund_order,
        crate::handlers::payments::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::cart::AddCartLineRequest,
        crate::services::cart::CartLineResponse,
        crate::services::cart::CartResponse,
        crate::services::checkout::CreateOrderRequest,
        crate::services::checkout::PaymentLinkResponse,
        crate::services::orders::OrderItemResponse,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderListResponse,
    )),
    tags(
        (name = "Carts", description = "Cart management"),
        (name = "Orders", description = "Checkout, fulfillment and settlement"),
        (name = "Payments", description = "Gateway webhooks")
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
