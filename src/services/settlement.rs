//! Operator-triggered settlement of cash-on-delivery orders. Runs entirely
//! outside the gateway/sweeper machinery: the courier collected the money,
//! so the order jumps straight to DELIVERED/PAID under the usual guard.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentMode, PaymentStatus},
    entities::payment::{self, Entity as PaymentEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{OrderResponse, OrderService},
};

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    event_sender: EventSender,
}

impl SettlementService {
    pub fn new(db: Arc<DbPool>, orders: Arc<OrderService>, event_sender: EventSender) -> Self {
        Self {
            db,
            orders,
            event_sender,
        }
    }

    /// Guarded PROCESSING/PENDING → DELIVERED/PAID for a COD order.
    /// Fails with 409 when the order is not COD or was already resolved.
    /// Unlike the webhook/sweeper paths a lost guard here is an error: an
    /// operator settling twice deserves to hear about it.
    #[instrument(skip(self), fields(operator_id = %operator_id, order_id = %order_id))]
    pub async fn settle_cash_on_delivery(
        &self,
        operator_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order_model = self.orders.load_order(order_id).await?;

        if order_model.payment_mode != PaymentMode::Cod {
            return Err(ServiceError::Conflict(
                "only cash-on-delivery orders can be settled manually".to_string(),
            ));
        }

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Delivered),
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
            .filter(order::Column::PaymentMode.eq(PaymentMode::Cod))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Processing))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "order is already settled or cancelled".to_string(),
            ));
        }

        PaymentEntity::update_many()
            .col_expr(
                payment::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid),
            )
            .col_expr(
                payment::Column::OrderStatus,
                Expr::value(OrderStatus::Delivered),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        info!(order_id = %order_id, "cash-on-delivery order settled");
        let _ = self.event_sender.send(Event::OrderPaid(order_id)).await;

        self.orders
            .to_response(self.orders.load_order(order_id).await?)
            .await
    }
}
