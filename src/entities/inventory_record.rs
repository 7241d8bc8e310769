use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authoritative stock counters for one (product, warehouse, color-set,
/// size-set) combination. `stock_available` must never go negative: every
/// decrement is a bounds-checked conditional UPDATE, never a read-then-write.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    /// Colors offered by this record, stored as a JSON string array
    #[sea_orm(column_type = "Json")]
    pub colors: Json,
    /// Sizes offered by this record, stored as a JSON string array
    #[sea_orm(column_type = "Json")]
    pub sizes: Json,
    pub stock_available: i32,
    pub stock_reserved: i32,
    pub stock_damaged: i32,
    pub stock_in_transit: i32,
    pub status: InventoryStatus,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn offers_color(&self, color: &str) -> bool {
        json_contains(&self.colors, color)
    }

    pub fn offers_size(&self, size: &str) -> bool {
        json_contains(&self.sizes, size)
    }
}

fn json_contains(value: &Json, needle: &str) -> bool {
    value
        .as_array()
        .map(|items| items.iter().any(|v| v.as_str() == Some(needle)))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum InventoryStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "INACTIVE")]
    Inactive,
    #[sea_orm(string_value = "OUT_OF_STOCK")]
    OutOfStock,
}
