pub mod carts;
pub mod health;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        cart::CartService, checkout::CheckoutService, inventory::InventoryService,
        orders::OrderService, payment_events::PaymentEventService, pricing::ShippingPolicy,
        settlement::SettlementService,
    },
};

/// Aggregated service container handed to the HTTP handlers through
/// [`crate::AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub inventory: InventoryService,
    pub settlement: Arc<SettlementService>,
    pub payment_events: Arc<PaymentEventService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        cfg: &AppConfig,
    ) -> Self {
        let inventory = InventoryService::new(db.clone(), event_sender.clone());
        let orders = Arc::new(OrderService::new(
            db.clone(),
            inventory.clone(),
            gateway.clone(),
            event_sender.clone(),
        ));
        let cart = Arc::new(CartService::new(
            db.clone(),
            inventory.clone(),
            cfg.currency.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            inventory.clone(),
            orders.clone(),
            gateway,
            event_sender.clone(),
            cfg.currency.clone(),
            ShippingPolicy::from_config(cfg),
        ));
        let settlement = Arc::new(SettlementService::new(
            db,
            orders.clone(),
            event_sender,
        ));
        let payment_events = Arc::new(PaymentEventService::new(
            orders.clone(),
            cfg.payment_webhook_secret.clone(),
        ));

        Self {
            cart,
            checkout,
            orders,
            inventory,
            settlement,
            payment_events,
        }
    }
}
