//! Pure pricing rules: nearest-warehouse selection via great-circle distance
//! and the shipping fee derived from it. No I/O happens here; the checkout
//! service feeds in whatever inventory and warehouse rows it loaded.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseSite {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestWarehouse {
    pub warehouse_id: Uuid,
    pub name: String,
    pub distance_km: f64,
}

/// Shipping fee policy: a per-kilometre rate clamped into [min_fee, max_fee].
#[derive(Debug, Clone, Copy)]
pub struct ShippingPolicy {
    pub rate_per_km: u32,
    pub min_fee: u32,
    pub max_fee: u32,
}

impl ShippingPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            rate_per_km: cfg.shipping_rate_per_km,
            min_fee: cfg.shipping_min_fee,
            max_fee: cfg.shipping_max_fee,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub shipping_charges: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Picks the warehouse closest to the delivery location.
pub fn nearest_warehouse(
    delivery: GeoPoint,
    sites: &[WarehouseSite],
) -> Result<NearestWarehouse, ServiceError> {
    let mut best: Option<NearestWarehouse> = None;

    for site in sites {
        let distance_km = haversine_km(delivery, site.location);
        let closer = best
            .as_ref()
            .map(|b| distance_km < b.distance_km)
            .unwrap_or(true);
        if closer {
            best = Some(NearestWarehouse {
                warehouse_id: site.id,
                name: site.name.clone(),
                distance_km,
            });
        }
    }

    best.ok_or_else(|| {
        ServiceError::NotFound("no active warehouse serves the ordered inventory".to_string())
    })
}

/// `clamp(round(distance_km × rate), min_fee, max_fee)`
pub fn shipping_fee(policy: ShippingPolicy, distance_km: f64) -> Decimal {
    let raw = (distance_km * f64::from(policy.rate_per_km)).round() as i64;
    Decimal::from(raw.clamp(i64::from(policy.min_fee), i64::from(policy.max_fee)))
}

/// Assembles the order price breakdown from already-priced lines and the
/// shipping distance.
pub fn price_breakdown(
    subtotal: Decimal,
    discount: Decimal,
    policy: ShippingPolicy,
    distance_km: f64,
) -> PriceBreakdown {
    let shipping_charges = shipping_fee(policy, distance_km);
    PriceBreakdown {
        subtotal,
        shipping_charges,
        discount,
        total: subtotal + shipping_charges - discount,
    }
}
