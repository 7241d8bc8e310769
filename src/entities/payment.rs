use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use super::order::{OrderStatus, PaymentMode, PaymentStatus};

/// Shadow record mirroring an order's financial state. The reconciliation
/// sweeper polls this table; once `payment_status` reaches PAID, FAILED or
/// REFUNDED the row is terminal and is never written back to PENDING.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub shopper_id: Uuid,
    pub cart_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub payment_mode: PaymentMode,
    pub payment_status: PaymentStatus,
    /// Copy of the order status, denormalized for reconciliation queries
    pub order_status: OrderStatus,
    #[sea_orm(nullable)]
    pub gateway_intent_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_link_id: Option<String>,
    /// Redirect URL the shopper completes payment at
    #[sea_orm(nullable)]
    pub gateway_link_url: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_payment_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_refund_id: Option<String>,
    /// Consecutive gateway lookup failures observed by the sweeper
    pub sweep_failures: i32,
    /// Parked for an operator after too many consecutive lookup failures
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
