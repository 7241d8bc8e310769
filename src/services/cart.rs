//! Cart management: lines are priced from the catalog at add time, validated
//! against the inventory record's color/size sets, and re-priced again at
//! checkout. A cart never holds a stock reservation.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::cart::{self, CartStatus, Entity as CartEntity},
    entities::cart_item::{self, Entity as CartItemEntity},
    entities::product::{self, Entity as ProductEntity, ProductStatus},
    entities::shopper::{self, Entity as ShopperEntity, ShopperStatus},
    errors::ServiceError,
    services::inventory::InventoryService,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddCartLineRequest {
    pub product_id: Uuid,
    pub inventory_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(length(min = 1, message = "Color is required"))]
    pub color: String,
    #[validate(length(min = 1, message = "Size is required"))]
    pub size: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub inventory_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub color: String,
    pub size: String,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartResponse {
    pub id: Uuid,
    pub shopper_id: Uuid,
    pub currency: String,
    pub subtotal: Decimal,
    pub status: CartStatus,
    pub items: Vec<CartLineResponse>,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    inventory: InventoryService,
    currency: String,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, inventory: InventoryService, currency: String) -> Self {
        Self {
            db,
            inventory,
            currency,
        }
    }

    async fn load_active_shopper(&self, shopper_id: Uuid) -> Result<shopper::Model, ServiceError> {
        ShopperEntity::find_by_id(shopper_id)
            .filter(shopper::Column::Status.eq(ShopperStatus::Active))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Shopper not found".to_string()))
    }

    async fn find_active_cart(
        &self,
        shopper_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(CartEntity::find()
            .filter(cart::Column::ShopperId.eq(shopper_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(&*self.db)
            .await?)
    }

    async fn recompute_subtotal(&self, cart_model: &cart::Model) -> Result<(), ServiceError> {
        let lines = cart_model
            .find_related(CartItemEntity)
            .all(&*self.db)
            .await?;
        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

        let mut update: cart::ActiveModel = cart_model.clone().into();
        update.subtotal = Set(subtotal);
        update.updated_at = Set(Utc::now());
        update.update(&*self.db).await?;
        Ok(())
    }

    /// Adds a line to the shopper's active cart, creating the cart on first
    /// add. The line is priced from the catalog, never from the client.
    #[instrument(skip(self, request), fields(shopper_id = %shopper_id))]
    pub async fn add_line(
        &self,
        shopper_id: Uuid,
        request: AddCartLineRequest,
    ) -> Result<CartResponse, ServiceError> {
        request.validate()?;
        self.load_active_shopper(shopper_id).await?;

        let product_model = ProductEntity::find_by_id(request.product_id)
            .filter(product::Column::Status.eq(ProductStatus::Active))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

        let record = self.inventory.get_sellable(request.inventory_id).await?;
        if record.product_id != request.product_id {
            return Err(ServiceError::NotFound(
                "Inventory record does not belong to the product".to_string(),
            ));
        }
        if !record.offers_color(&request.color) {
            return Err(ServiceError::ValidationError(format!(
                "Color [{}] not available",
                request.color
            )));
        }
        if !record.offers_size(&request.size) {
            return Err(ServiceError::ValidationError(format!(
                "Size [{}] not available",
                request.size
            )));
        }
        InventoryService::check_sufficiency(&record, request.quantity)?;

        let now = Utc::now();
        let cart_model = match self.find_active_cart(shopper_id).await? {
            Some(existing) => existing,
            None => {
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    shopper_id: Set(shopper_id),
                    currency: Set(self.currency.clone()),
                    subtotal: Set(Decimal::ZERO),
                    status: Set(CartStatus::Active),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?
            }
        };

        let existing_line = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart_model.id))
            .filter(cart_item::Column::InventoryId.eq(request.inventory_id))
            .filter(cart_item::Column::Color.eq(request.color.clone()))
            .filter(cart_item::Column::Size.eq(request.size.clone()))
            .one(&*self.db)
            .await?;

        match existing_line {
            Some(line) => {
                let quantity = line.quantity + request.quantity;
                InventoryService::check_sufficiency(&record, quantity)?;
                let mut update: cart_item::ActiveModel = line.into();
                update.quantity = Set(quantity);
                update.line_total = Set(product_model.price * Decimal::from(quantity));
                update.unit_price = Set(product_model.price);
                update.update(&*self.db).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart_model.id),
                    product_id: Set(request.product_id),
                    inventory_id: Set(request.inventory_id),
                    product_name: Set(product_model.name.clone()),
                    quantity: Set(request.quantity),
                    color: Set(request.color.clone()),
                    size: Set(request.size.clone()),
                    unit_price: Set(product_model.price),
                    discount: Set(Decimal::ZERO),
                    line_total: Set(product_model.price * Decimal::from(request.quantity)),
                    created_at: Set(now),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        self.recompute_subtotal(&cart_model).await?;
        info!(cart_id = %cart_model.id, "cart line added");
        self.get_cart(cart_model.id).await
    }

    /// Fetches the shopper's active cart.
    #[instrument(skip(self))]
    pub async fn active_cart(&self, shopper_id: Uuid) -> Result<CartResponse, ServiceError> {
        let cart_model = self
            .find_active_cart(shopper_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;
        self.get_cart(cart_model.id).await
    }

    /// Removes one line. The freed quantity is not restocked because carts
    /// never held stock in the first place.
    #[instrument(skip(self))]
    pub async fn remove_line(
        &self,
        shopper_id: Uuid,
        line_id: Uuid,
    ) -> Result<CartResponse, ServiceError> {
        let cart_model = self
            .find_active_cart(shopper_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;

        let line = CartItemEntity::find_by_id(line_id)
            .filter(cart_item::Column::CartId.eq(cart_model.id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Item not found in cart".to_string()))?;

        line.delete(&*self.db).await?;
        self.recompute_subtotal(&cart_model).await?;
        self.get_cart(cart_model.id).await
    }

    async fn get_cart(&self, cart_id: Uuid) -> Result<CartResponse, ServiceError> {
        let cart_model = CartEntity::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(CartResponse {
            id: cart_model.id,
            shopper_id: cart_model.shopper_id,
            currency: cart_model.currency,
            subtotal: cart_model.subtotal,
            status: cart_model.status,
            items: items
                .into_iter()
                .map(|line| CartLineResponse {
                    id: line.id,
                    product_id: line.product_id,
                    inventory_id: line.inventory_id,
                    product_name: line.product_name,
                    quantity: line.quantity,
                    color: line.color,
                    size: line.size,
                    unit_price: line.unit_price,
                    discount: line.discount,
                    line_total: line.line_total,
                })
                .collect(),
        })
    }
}
