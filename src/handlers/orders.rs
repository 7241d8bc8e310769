use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::checkout::CreateOrderRequest,
    AppState, ListQuery,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/checkout", post(create_payment_link))
        .route("/:id/settle-cod", post(settle_cash_on_delivery))
        .route("/:id/ship", post(ship_order))
        .route("/:id/deliver", post(deliver_order))
        .route("/:id/refund", post(refund_order))
}

/// Loads an order the caller is allowed to see: operators see everything,
/// shoppers only their own. A foreign order reads as missing, not forbidden.
pub async fn authorize_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let model = state.services.orders.load_order(order_id).await?;
    if !user.is_operator() && model.shopper_id != user.id {
        return Err(ServiceError::order_not_found(order_id));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::services::orders::OrderResponse),
        (status = 400, description = "Empty cart or missing coordinates", body = crate::errors::ErrorResponse),
        (status = 404, description = "Shopper, cart or inventory missing", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway rejected the payment intent", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.checkout.create_order(user.id, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "The caller's orders", body = crate::services::orders::OrderListResponse)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let list = state
        .services
        .orders
        .list_for_shopper(user.id, query.page, query.limit)
        .await?;
    Ok(Json(list))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    responses(
        (status = 200, description = "Order detail", body = crate::services::orders::OrderResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize_order(&state, &user, order_id).await?;
    let model = state.services.orders.load_order(order_id).await?;
    Ok(Json(state.services.orders.to_response(model).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/checkout",
    responses(
        (status = 200, description = "Payment link issued", body = crate::services::checkout::PaymentLinkResponse),
        (status = 409, description = "Order already paid or not payable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_payment_link(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let link = state
        .services
        .checkout
        .create_payment_link(user.id, order_id)
        .await?;
    Ok(Json(link))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/settle-cod",
    responses(
        (status = 200, description = "COD order settled", body = crate::services::orders::OrderResponse),
        (status = 409, description = "Not COD or already terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn settle_cash_on_delivery(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_operator()?;
    let order = state
        .services
        .settlement
        .settle_cash_on_delivery(user.id, order_id)
        .await?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/ship",
    responses(
        (status = 200, description = "Order shipped", body = crate::services::orders::OrderResponse),
        (status = 409, description = "Order not in a shippable state", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn ship_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_operator()?;
    Ok(Json(state.services.orders.mark_shipped(order_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/deliver",
    responses(
        (status = 200, description = "Order delivered", body = crate::services::orders::OrderResponse),
        (status = 409, description = "Order not in a deliverable state", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn deliver_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_operator()?;
    Ok(Json(state.services.orders.mark_delivered(order_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/refund",
    responses(
        (status = 200, description = "Order refunded", body = crate::services::orders::OrderResponse),
        (status = 409, description = "Only confirmed, paid orders can be refunded", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_operator()?;
    Ok(Json(state.services.orders.refund_paid_order(order_id).await?))
}
