pub mod cart;
pub mod cart_item;
pub mod inventory_record;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod shopper;
pub mod warehouse;
