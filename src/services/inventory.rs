//! Inventory ledger: authoritative stock counters with atomic, bounds-checked
//! mutation. Every decrement is a single conditional UPDATE guarded on the
//! current value, so `stock_available` can never be driven negative by
//! concurrent checkouts or by a webhook racing the reconciliation sweeper.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::inventory_record::{self, Entity as InventoryRecord, InventoryStatus},
    entities::order_item,
    errors::ServiceError,
    events::{Event, EventSender},
};

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Loads a sellable inventory record. INACTIVE records are invisible to
    /// the core, matching the catalog's notion of a delisted combination.
    pub async fn get_sellable(
        &self,
        inventory_id: Uuid,
    ) -> Result<inventory_record::Model, ServiceError> {
        InventoryRecord::find_by_id(inventory_id)
            .filter(inventory_record::Column::Status.ne(InventoryStatus::Inactive))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory record {} not found", inventory_id))
            })
    }

    /// Checkout-time sufficiency check. Deliberately not a reservation: stock
    /// is only committed by the first terminal payment transition.
    pub fn check_sufficiency(
        record: &inventory_record::Model,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if record.stock_available < quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "requested {} of inventory {}, only {} available",
                quantity, record.id, record.stock_available
            )));
        }
        Ok(())
    }

    /// Atomically subtracts `quantity` from `stock_available` if and only if
    /// enough stock remains. Returns whether the decrement was applied.
    #[instrument(skip(self))]
    pub async fn try_decrement(
        &self,
        inventory_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = InventoryRecord::update_many()
            .col_expr(
                inventory_record::Column::StockAvailable,
                Expr::col(inventory_record::Column::StockAvailable).sub(quantity),
            )
            .col_expr(
                inventory_record::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(inventory_record::Column::Id.eq(inventory_id))
            .filter(inventory_record::Column::StockAvailable.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        // Flip the record to OUT_OF_STOCK when the decrement landed on zero.
        InventoryRecord::update_many()
            .col_expr(
                inventory_record::Column::Status,
                Expr::value(InventoryStatus::OutOfStock),
            )
            .filter(inventory_record::Column::Id.eq(inventory_id))
            .filter(inventory_record::Column::StockAvailable.eq(0))
            .filter(inventory_record::Column::Status.eq(InventoryStatus::Active))
            .exec(&*self.db)
            .await?;

        Ok(true)
    }

    /// Atomically returns `quantity` to `stock_available`.
    #[instrument(skip(self))]
    pub async fn restock(&self, inventory_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        InventoryRecord::update_many()
            .col_expr(
                inventory_record::Column::StockAvailable,
                Expr::col(inventory_record::Column::StockAvailable).add(quantity),
            )
            .col_expr(
                inventory_record::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(inventory_record::Column::Id.eq(inventory_id))
            .exec(&*self.db)
            .await?;

        InventoryRecord::update_many()
            .col_expr(
                inventory_record::Column::Status,
                Expr::value(InventoryStatus::Active),
            )
            .filter(inventory_record::Column::Id.eq(inventory_id))
            .filter(inventory_record::Column::StockAvailable.gt(0))
            .filter(inventory_record::Column::Status.eq(InventoryStatus::OutOfStock))
            .exec(&*self.db)
            .await?;

        Ok(())
    }

    /// One-time stock commit for a freshly settled order. A refused decrement
    /// here means money moved but stock did not follow: that is escalated as
    /// a consistency alarm, never rolled back onto the payment.
    #[instrument(skip(self, items), fields(order_id = %order_id))]
    pub async fn commit_for_order(
        &self,
        order_id: Uuid,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        for item in items {
            let applied = self.try_decrement(item.inventory_id, item.quantity).await?;
            if !applied {
                error!(
                    order_id = %order_id,
                    inventory_id = %item.inventory_id,
                    quantity = item.quantity,
                    "stock decrement refused after payment capture"
                );
                let _ = self
                    .event_sender
                    .send(Event::ConsistencyAlarm {
                        order_id,
                        inventory_id: item.inventory_id,
                        quantity: item.quantity,
                    })
                    .await;
            }
        }

        let _ = self
            .event_sender
            .send(Event::InventoryCommitted { order_id })
            .await;
        info!(order_id = %order_id, "inventory committed");
        Ok(())
    }

    /// Restores the stock a settled-then-compensated order had committed.
    #[instrument(skip(self, items), fields(order_id = %order_id))]
    pub async fn restock_for_order(
        &self,
        order_id: Uuid,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        for item in items {
            self.restock(item.inventory_id, item.quantity).await?;
        }
        let _ = self
            .event_sender
            .send(Event::InventoryRestocked { order_id })
            .await;
        Ok(())
    }
}
