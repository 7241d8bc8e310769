//! fulfillment-api
//!
//! Order-checkout-and-payment-reconciliation engine for a retail platform:
//! carts become priced order snapshots, online payments settle through an
//! asynchronous gateway webhook, and a periodic reconciliation sweep resolves
//! whatever the webhook never confirmed. Inventory moves at most once per
//! order, enforced by guarded state transitions rather than locks.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod openapi;
pub mod services;

use axum::Router;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::ToSchema;

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Common query parameters for list endpoints.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

/// All `/api/v1` routes.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/carts", handlers::carts::router())
        .nest("/orders", handlers::orders::router())
        .nest("/payments", handlers::payments::router())
}

/// Full application router, shared between `main` and the test harness.
pub fn build_router(state: AppState) -> Router {
    let cors = match state.config.cors_allowed_origins.as_deref() {
        Some(raw) => {
            let origins: Vec<_> = raw
                .split(',')
                .filter_map(|origin| origin.trim().parse::<http::HeaderValue>().ok())
                .collect();
            CorsLayer::new().allow_origin(origins)
        }
        None => CorsLayer::permissive(),
    };

    Router::new()
        .merge(handlers::health::router())
        .merge(openapi::router())
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
