//! Order/payment state machine. Every transition is a guarded compare-and-swap:
//! one conditional UPDATE filtered on the expected prior state, decided by the
//! row count. Request handlers, the webhook and the reconciliation sweeper all
//! run concurrently over the same rows; whichever actor wins the guard performs
//! the transition and its one-time inventory side effect, and everyone else
//! observes a no-op.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentMode, PaymentStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::payment::{self, Entity as PaymentEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    services::inventory::InventoryService,
};

/// How a settle-on-capture attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// This caller won the guard: order is now CONFIRMED/PAID and stock was
    /// committed exactly once.
    Settled,
    /// Another actor already settled the order; nothing was mutated.
    AlreadyPaid,
    /// The order reached a failed/cancelled terminal state first; the caller
    /// should compensate with a refund.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The guard was lost: the order was already resolved elsewhere.
    AlreadyResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded,
    AlreadyRefunded,
    /// No captured gateway payment is known for the order
    NothingToRefund,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub inventory_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub color: String,
    pub size: String,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub shopper_id: Uuid,
    pub cart_id: Uuid,
    pub subtotal: Decimal,
    pub shipping_charges: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_mode: PaymentMode,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub delivery_address: Option<serde_json::Value>,
    /// Redirect URL for ONLINE orders whose payment link is live
    pub payment_link_url: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    inventory: InventoryService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        inventory: InventoryService,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            inventory,
            gateway,
            event_sender,
        }
    }

    pub async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    pub async fn load_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::order_not_found(order_id))
    }

    pub async fn items_of(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn payment_of(&self, order_id: Uuid) -> Result<Option<payment::Model>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?)
    }

    /// Builds the API representation, resolving items and the live payment
    /// link in one place.
    pub async fn to_response(&self, model: order::Model) -> Result<OrderResponse, ServiceError> {
        let items = self.items_of(model.id).await?;
        let link = match model.payment_status {
            PaymentStatus::Pending => self
                .payment_of(model.id)
                .await?
                .and_then(|p| p.gateway_link_url),
            _ => None,
        };

        Ok(OrderResponse {
            id: model.id,
            order_number: model.order_number,
            shopper_id: model.shopper_id,
            cart_id: model.cart_id,
            subtotal: model.subtotal,
            shipping_charges: model.shipping_charges,
            discount: model.discount,
            total_amount: model.total_amount,
            currency: model.currency,
            payment_mode: model.payment_mode,
            payment_status: model.payment_status,
            order_status: model.order_status,
            delivery_address: model.delivery_address,
            payment_link_url: link,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    inventory_id: item.inventory_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    color: item.color,
                    size: item.size,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                })
                .collect(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    /// Lists a shopper's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_shopper(
        &self,
        shopper_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::ShopperId.eq(shopper_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut orders = Vec::with_capacity(models.len());
        for model in models {
            orders.push(self.to_response(model).await?);
        }

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Guarded PROCESSING/PENDING → CONFIRMED/PAID. Whichever actor observed
    /// the capture first wins the guard, performs the one-time inventory
    /// decrement and finalizes the payment shadow row.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn settle_captured(
        &self,
        order_id: Uuid,
        gateway_payment_id: Option<String>,
    ) -> Result<SettlementOutcome, ServiceError> {
        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Confirmed),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Processing))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let current = self.load_order(order_id).await?;
            return Ok(match current.payment_status {
                PaymentStatus::Paid => SettlementOutcome::AlreadyPaid,
                _ => SettlementOutcome::Superseded,
            });
        }

        // We won the terminal transition: commit stock exactly once.
        let items = self.items_of(order_id).await?;
        self.inventory.commit_for_order(order_id, &items).await?;

        OrderEntity::update_many()
            .col_expr(order::Column::InventoryCommitted, Expr::value(true))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;

        PaymentEntity::update_many()
            .col_expr(
                payment::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid),
            )
            .col_expr(
                payment::Column::OrderStatus,
                Expr::value(OrderStatus::Confirmed),
            )
            .col_expr(
                payment::Column::GatewayPaymentId,
                Expr::value(gateway_payment_id.clone()),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if let Some(payment_id) = gateway_payment_id {
            let _ = self
                .event_sender
                .send(Event::PaymentCaptured {
                    order_id,
                    gateway_payment_id: payment_id,
                })
                .await;
        }
        let _ = self.event_sender.send(Event::OrderPaid(order_id)).await;
        info!(order_id = %order_id, "order settled as paid");

        Ok(SettlementOutcome::Settled)
    }

    /// Guarded PROCESSING/PENDING → CANCELLED/FAILED. Restocks only when the
    /// order had actually committed inventory (it has not, under the current
    /// checkout design, but compensation never assumes that).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_unpaid(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<CancelOutcome, ServiceError> {
        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Cancelled),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Processing))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(CancelOutcome::AlreadyResolved);
        }

        let current = self.load_order(order_id).await?;
        if current.inventory_committed {
            let items = self.items_of(order_id).await?;
            self.inventory.restock_for_order(order_id, &items).await?;
        }

        PaymentEntity::update_many()
            .col_expr(
                payment::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed),
            )
            .col_expr(
                payment::Column::OrderStatus,
                Expr::value(OrderStatus::Cancelled),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        info!(order_id = %order_id, reason = reason, "unpaid order cancelled");
        let _ = self
            .event_sender
            .send(Event::OrderCancelled(order_id))
            .await;

        Ok(CancelOutcome::Cancelled)
    }

    /// Compensation for a capture that lost the race against a cancellation:
    /// the shopper's money moved after the order was already cancelled, so it
    /// goes straight back. The payment-row CAS makes the refund at-most-once
    /// under webhook replays.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund_after_cancellation(
        &self,
        order_id: Uuid,
        gateway_payment_id: Option<String>,
    ) -> Result<RefundOutcome, ServiceError> {
        let payment = self
            .payment_of(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment for order {} not found", order_id)))?;

        let payment_ref = gateway_payment_id
            .or_else(|| payment.gateway_payment_id.clone());
        let Some(payment_ref) = payment_ref else {
            warn!(order_id = %order_id, "capture reported but no gateway payment id is known");
            return Ok(RefundOutcome::NothingToRefund);
        };

        let now = Utc::now();
        let won = PaymentEntity::update_many()
            .col_expr(
                payment::Column::PaymentStatus,
                Expr::value(PaymentStatus::Refunded),
            )
            .col_expr(
                payment::Column::GatewayPaymentId,
                Expr::value(Some(payment_ref.clone())),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Failed))
            .exec(&*self.db)
            .await?;

        if won.rows_affected == 0 {
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        match self.gateway.refund(&payment_ref, Some(payment.amount)).await {
            Ok(receipt) => {
                PaymentEntity::update_many()
                    .col_expr(
                        payment::Column::GatewayRefundId,
                        Expr::value(Some(receipt.refund_id)),
                    )
                    .filter(payment::Column::Id.eq(payment.id))
                    .exec(&*self.db)
                    .await?;
            }
            Err(err) => {
                // Refund is owed but could not be issued; park for a human.
                warn!(order_id = %order_id, error = %err, "refund call failed; flagging payment for review");
                PaymentEntity::update_many()
                    .col_expr(payment::Column::NeedsReview, Expr::value(true))
                    .filter(payment::Column::Id.eq(payment.id))
                    .exec(&*self.db)
                    .await?;
                let _ = self
                    .event_sender
                    .send(Event::PaymentFlaggedForReview {
                        payment_id: payment.id,
                        order_id,
                        consecutive_failures: payment.sweep_failures,
                    })
                    .await;
                return Err(err);
            }
        }

        OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Refunded),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Failed))
            .exec(&*self.db)
            .await?;

        let _ = self.event_sender.send(Event::OrderRefunded(order_id)).await;
        info!(order_id = %order_id, "late capture refunded");
        Ok(RefundOutcome::Refunded)
    }

    /// Operator compensation: CONFIRMED/PAID → CANCELLED/REFUNDED, refunding
    /// through the gateway and restoring whatever stock the settlement
    /// committed.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund_paid_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Cancelled),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Refunded),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Confirmed))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "only a confirmed, paid order can be refunded".to_string(),
            ));
        }

        let current = self.load_order(order_id).await?;
        if current.inventory_committed {
            let items = self.items_of(order_id).await?;
            self.inventory.restock_for_order(order_id, &items).await?;
        }

        if let Some(payment) = self.payment_of(order_id).await? {
            if let Some(payment_ref) = payment.gateway_payment_id.clone() {
                let receipt = self.gateway.refund(&payment_ref, Some(payment.amount)).await?;
                PaymentEntity::update_many()
                    .col_expr(
                        payment::Column::PaymentStatus,
                        Expr::value(PaymentStatus::Refunded),
                    )
                    .col_expr(
                        payment::Column::OrderStatus,
                        Expr::value(OrderStatus::Cancelled),
                    )
                    .col_expr(
                        payment::Column::GatewayRefundId,
                        Expr::value(Some(receipt.refund_id)),
                    )
                    .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
                    .filter(payment::Column::Id.eq(payment.id))
                    .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Paid))
                    .exec(&*self.db)
                    .await?;
            }
        }

        let _ = self.event_sender.send(Event::OrderRefunded(order_id)).await;
        self.to_response(self.load_order(order_id).await?).await
    }

    /// Guarded CONFIRMED → SHIPPED fulfillment step.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_shipped(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.advance_fulfillment(order_id, OrderStatus::Confirmed, OrderStatus::Shipped)
            .await
    }

    /// Guarded SHIPPED → DELIVERED fulfillment step.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.advance_fulfillment(order_id, OrderStatus::Shipped, OrderStatus::Delivered)
            .await
    }

    async fn advance_fulfillment(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(order::Column::OrderStatus, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(from))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Distinguish a missing order from a wrong-state one.
            let current = self.load_order(order_id).await?;
            return Err(ServiceError::Conflict(format!(
                "order is {:?}/{:?}, cannot move {:?} → {:?}",
                current.order_status, current.payment_status, from, to
            )));
        }

        PaymentEntity::update_many()
            .col_expr(payment::Column::OrderStatus, Expr::value(to))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::OrderId.eq(order_id))
            .exec(&*self.db)
            .await?;

        let _ = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{:?}", from),
                new_status: format!("{:?}", to),
            })
            .await;

        self.to_response(self.load_order(order_id).await?).await
    }
}
