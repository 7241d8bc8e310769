//! Checkout orchestration: snapshots a cart (or a single cart line) into an
//! immutable order with a re-derived price, records the payment shadow row,
//! and for online orders asks the gateway for a payment link. Stock is
//! sufficiency-checked here but deliberately not reserved; the one-time
//! decrement belongs to whichever actor first settles the payment.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::cart::{self, CartStatus, Entity as CartEntity},
    entities::cart_item::{self, Entity as CartItemEntity},
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentMode, PaymentStatus},
    entities::order_item,
    entities::payment::{self, Entity as PaymentEntity},
    entities::product::{self, Entity as ProductEntity, ProductStatus},
    entities::shopper::{self, Entity as ShopperEntity, ShopperStatus},
    entities::warehouse::{self, Entity as WarehouseEntity, WarehouseStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CreatePaymentLinkRequest, PaymentGateway},
    services::inventory::InventoryService,
    services::orders::{OrderResponse, OrderService},
    services::pricing::{self, GeoPoint, ShippingPolicy, WarehouseSite},
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub cart_id: Uuid,
    /// When present, order only this cart line instead of the whole cart
    pub line_item_id: Option<Uuid>,
    pub payment_mode: PaymentMode,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentLinkResponse {
    pub order_id: Uuid,
    pub link_id: String,
    pub payment_link_url: String,
}

/// Delivery-address snapshot frozen onto the order at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

impl DeliveryAddress {
    fn from_shopper(model: &shopper::Model) -> Self {
        Self {
            street: model.street.clone(),
            city: model.city.clone(),
            state: model.state.clone(),
            country: model.country.clone(),
            postal_code: model.postal_code.clone(),
        }
    }
}

struct PricedLine {
    cart_line: cart_item::Model,
    unit_price: Decimal,
    line_total: Decimal,
    product_name: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    inventory: InventoryService,
    orders: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    currency: String,
    shipping: ShippingPolicy,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        inventory: InventoryService,
        orders: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        currency: String,
        shipping: ShippingPolicy,
    ) -> Self {
        Self {
            db,
            inventory,
            orders,
            gateway,
            event_sender,
            currency,
            shipping,
        }
    }

    /// Creates an order from the shopper's cart. Fails 404 when shopper,
    /// cart, inventory or warehouse is missing; 400 on an empty cart/line or
    /// missing delivery coordinates. Never trusts client-submitted prices.
    #[instrument(skip(self, request), fields(shopper_id = %shopper_id, cart_id = %request.cart_id))]
    pub async fn create_order(
        &self,
        shopper_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        let shopper_model = ShopperEntity::find_by_id(shopper_id)
            .filter(shopper::Column::Status.eq(ShopperStatus::Active))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Shopper not found".to_string()))?;

        let cart_model = CartEntity::find_by_id(request.cart_id)
            .filter(cart::Column::ShopperId.eq(shopper_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let cart_lines = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart_model.id))
            .all(&*self.db)
            .await?;

        let ordering_whole_cart = request.line_item_id.is_none();
        let selected: Vec<cart_item::Model> = match request.line_item_id {
            Some(line_id) => {
                let line = cart_lines
                    .into_iter()
                    .find(|l| l.id == line_id)
                    .ok_or_else(|| {
                        ServiceError::NotFound("Item not found in cart".to_string())
                    })?;
                vec![line]
            }
            None => cart_lines,
        };
        if selected.is_empty() {
            return Err(ServiceError::BadRequest(
                "No items found to order".to_string(),
            ));
        }

        // Re-derive every price from the catalog and check stock sufficiency
        // against the current ledger.
        let mut priced = Vec::with_capacity(selected.len());
        let mut warehouse_ids = Vec::new();
        let mut discount = Decimal::ZERO;
        for line in selected {
            let product_model = ProductEntity::find_by_id(line.product_id)
                .filter(product::Column::Status.eq(ProductStatus::Active))
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

            let record = self.inventory.get_sellable(line.inventory_id).await?;
            InventoryService::check_sufficiency(&record, line.quantity)?;
            if !warehouse_ids.contains(&record.warehouse_id) {
                warehouse_ids.push(record.warehouse_id);
            }

            discount += line.discount;
            priced.push(PricedLine {
                unit_price: product_model.price,
                line_total: product_model.price * Decimal::from(line.quantity),
                product_name: product_model.name,
                cart_line: line,
            });
        }

        let warehouses = WarehouseEntity::find()
            .filter(warehouse::Column::Id.is_in(warehouse_ids))
            .filter(warehouse::Column::Status.eq(WarehouseStatus::Active))
            .all(&*self.db)
            .await?;
        if warehouses.is_empty() {
            return Err(ServiceError::NotFound(
                "No active warehouse serves the ordered inventory".to_string(),
            ));
        }

        let delivery = match (shopper_model.latitude, shopper_model.longitude) {
            (Some(latitude), Some(longitude)) => GeoPoint {
                latitude,
                longitude,
            },
            _ => {
                return Err(ServiceError::BadRequest(
                    "Delivery coordinates are missing".to_string(),
                ))
            }
        };

        let sites: Vec<WarehouseSite> = warehouses
            .iter()
            .map(|w| WarehouseSite {
                id: w.id,
                name: w.name.clone(),
                location: GeoPoint {
                    latitude: w.latitude,
                    longitude: w.longitude,
                },
            })
            .collect();
        let nearest = pricing::nearest_warehouse(delivery, &sites)?;

        let subtotal: Decimal = priced.iter().map(|p| p.line_total).sum();
        let breakdown = pricing::price_breakdown(subtotal, discount, self.shipping, nearest.distance_km);

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let address = serde_json::to_value(DeliveryAddress::from_shopper(&shopper_model))
            .map_err(|e| ServiceError::InternalError(format!("address snapshot: {}", e)))?;

        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!(
                "ORD-{}",
                order_id.to_string()[..8].to_uppercase()
            )),
            shopper_id: Set(shopper_id),
            cart_id: Set(cart_model.id),
            subtotal: Set(breakdown.subtotal),
            shipping_charges: Set(breakdown.shipping_charges),
            discount: Set(breakdown.discount),
            total_amount: Set(breakdown.total),
            currency: Set(self.currency.clone()),
            payment_mode: Set(request.payment_mode),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(OrderStatus::Processing),
            delivery_address: Set(Some(address)),
            gateway_intent_id: Set(None),
            gateway_link_id: Set(None),
            inventory_committed: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        for line in &priced {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.cart_line.product_id),
                inventory_id: Set(line.cart_line.inventory_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.cart_line.quantity),
                color: Set(line.cart_line.color.clone()),
                size: Set(line.cart_line.size.clone()),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            shopper_id: Set(shopper_id),
            cart_id: Set(cart_model.id),
            amount: Set(breakdown.total),
            currency: Set(self.currency.clone()),
            payment_mode: Set(request.payment_mode),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(OrderStatus::Processing),
            gateway_intent_id: Set(None),
            gateway_link_id: Set(None),
            gateway_link_url: Set(None),
            gateway_payment_id: Set(None),
            gateway_refund_id: Set(None),
            sweep_failures: Set(0),
            needs_review: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        if ordering_whole_cart {
            let mut cart_update: cart::ActiveModel = cart_model.clone().into();
            cart_update.status = Set(CartStatus::CheckedOut);
            cart_update.updated_at = Set(now);
            cart_update.update(&txn).await?;
        }

        txn.commit().await?;

        let _ = self.event_sender.send(Event::OrderCreated(order_id)).await;
        info!(
            order_id = %order_id,
            total = %breakdown.total,
            nearest_warehouse = %nearest.name,
            distance_km = nearest.distance_km,
            "order created"
        );

        if request.payment_mode == PaymentMode::Online {
            // The order is already durable; a gateway failure here leaves a
            // PENDING payment with no link, which the sweeper later expires.
            self.issue_link(order_id, breakdown.total, &shopper_model)
                .await
                .map_err(|err| {
                    warn!(order_id = %order_id, error = %err, "payment link creation failed after order commit");
                    err
                })?;
        }

        let model = self.orders.load_order(order_id).await?;
        self.orders.to_response(model).await
    }

    /// (Re)issues the payment link for an existing unpaid online order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_payment_link(
        &self,
        shopper_id: Uuid,
        order_id: Uuid,
    ) -> Result<PaymentLinkResponse, ServiceError> {
        let shopper_model = ShopperEntity::find_by_id(shopper_id)
            .filter(shopper::Column::Status.eq(ShopperStatus::Active))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Shopper not found".to_string()))?;

        let order_model = self.orders.load_order(order_id).await?;
        if order_model.shopper_id != shopper_id {
            return Err(ServiceError::order_not_found(order_id));
        }
        if order_model.payment_mode != PaymentMode::Online {
            return Err(ServiceError::Conflict(
                "cash-on-delivery orders have no payment link".to_string(),
            ));
        }
        if order_model.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict("Order already paid".to_string()));
        }
        if order_model.is_terminal() {
            return Err(ServiceError::Conflict(
                "order is no longer payable".to_string(),
            ));
        }
        if order_model.total_amount <= Decimal::ZERO {
            return Err(ServiceError::BadRequest(
                "Invalid order total".to_string(),
            ));
        }

        let link = self
            .issue_link(order_id, order_model.total_amount, &shopper_model)
            .await?;

        Ok(PaymentLinkResponse {
            order_id,
            link_id: link.0,
            payment_link_url: link.1,
        })
    }

    async fn issue_link(
        &self,
        order_id: Uuid,
        amount: Decimal,
        shopper_model: &shopper::Model,
    ) -> Result<(String, String), ServiceError> {
        let link = self
            .gateway
            .create_payment_link(CreatePaymentLinkRequest {
                amount,
                currency: self.currency.clone(),
                reference_id: order_id.to_string(),
                description: "Order payment".to_string(),
                customer_name: shopper_model.name.clone(),
                customer_email: shopper_model.email.clone(),
            })
            .await?;

        let now = Utc::now();
        OrderEntity::update_many()
            .col_expr(
                order::Column::GatewayIntentId,
                Expr::value(Some(link.link_id.clone())),
            )
            .col_expr(
                order::Column::GatewayLinkId,
                Expr::value(Some(link.link_id.clone())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;

        PaymentEntity::update_many()
            .col_expr(
                payment::Column::GatewayIntentId,
                Expr::value(Some(link.link_id.clone())),
            )
            .col_expr(
                payment::Column::GatewayLinkId,
                Expr::value(Some(link.link_id.clone())),
            )
            .col_expr(
                payment::Column::GatewayLinkUrl,
                Expr::value(Some(link.short_url.clone())),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        let _ = self
            .event_sender
            .send(Event::PaymentLinkIssued {
                order_id,
                link_id: link.link_id.clone(),
            })
            .await;

        Ok((link.link_id, link.short_url))
    }
}
