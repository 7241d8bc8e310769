use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{auth::AuthUser, errors::ServiceError, services::cart::AddCartLineRequest, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/items", post(add_line))
        .route("/items/:id", delete(remove_line))
        .route("/active", get(active_cart))
}

#[utoipa::path(
    post,
    path = "/api/v1/carts/items",
    request_body = AddCartLineRequest,
    responses(
        (status = 201, description = "Line added", body = crate::services::cart::CartResponse),
        (status = 400, description = "Unavailable color/size or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or inventory missing", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_line(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AddCartLineRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.add_line(user.id, request).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

#[utoipa::path(
    get,
    path = "/api/v1/carts/active",
    responses(
        (status = 200, description = "The caller's active cart", body = crate::services::cart::CartResponse),
        (status = 404, description = "No active cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn active_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.services.cart.active_cart(user.id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/carts/items/{id}",
    responses(
        (status = 200, description = "Line removed", body = crate::services::cart::CartResponse),
        (status = 404, description = "Line not in the active cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_line(
    State(state): State<AppState>,
    user: AuthUser,
    Path(line_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.services.cart.remove_line(user.id, line_id).await?))
}
