//! Asynchronous payment confirmation. The gateway signs every webhook body
//! with a shared secret; a bad signature is rejected with no state change.
//! The actual settlement runs through the same guarded transition the
//! reconciliation sweeper uses, so a confirmation arriving twice, or racing
//! the sweeper, can never decrement inventory twice.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::orders::{OrderService, RefundOutcome, SettlementOutcome},
};

type HmacSha256 = Hmac<Sha256>;

/// What a webhook delivery amounted to. Every variant is a 200 to the
/// gateway; the distinction exists for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First observation of the capture: order settled, stock committed
    Settled,
    /// Replay or lost race against the sweeper's identical settlement
    AlreadySettled,
    /// Capture arrived after cancellation; the money was sent back
    Refunded,
    /// Event type this handler does not care about
    Ignored,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment_link: Option<EntityWrapper<PaymentLinkEntity>>,
    #[serde(default)]
    payment: Option<EntityWrapper<PaymentEntity>>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkEntity {
    /// Our order id, as handed to the gateway at link creation
    reference_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
}

#[derive(Clone)]
pub struct PaymentEventService {
    orders: Arc<OrderService>,
    webhook_secret: String,
}

impl PaymentEventService {
    pub fn new(orders: Arc<OrderService>, webhook_secret: String) -> Self {
        Self {
            orders,
            webhook_secret,
        }
    }

    /// Recomputes the expected HMAC-SHA256 over the raw body and compares it
    /// in constant time against the signature header.
    pub fn verify_signature(&self, raw_body: &[u8], signature: &str) -> Result<(), ServiceError> {
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("webhook hmac: {}", e)))?;
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());

        if !constant_time_eq(&expected, signature) {
            return Err(ServiceError::InvalidSignature);
        }
        Ok(())
    }

    /// Handles a `payment_link.paid` delivery. Idempotent: replays and
    /// guard misses acknowledge without mutating anything.
    #[instrument(skip(self, raw_body, signature))]
    pub async fn on_payment_confirmed(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        self.verify_signature(raw_body, signature)?;

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

        if envelope.event != "payment_link.paid" {
            info!(event = %envelope.event, "ignoring webhook event type");
            return Ok(WebhookOutcome::Ignored);
        }

        let reference = envelope
            .payload
            .payment_link
            .as_ref()
            .map(|w| w.entity.reference_id.as_str())
            .ok_or_else(|| {
                ServiceError::BadRequest("webhook payload carries no payment link".to_string())
            })?;
        let order_id = Uuid::parse_str(reference).map_err(|_| {
            ServiceError::BadRequest(format!("malformed order reference: {}", reference))
        })?;
        let gateway_payment_id = envelope
            .payload
            .payment
            .as_ref()
            .map(|w| w.entity.id.clone());

        match self
            .orders
            .settle_captured(order_id, gateway_payment_id.clone())
            .await?
        {
            SettlementOutcome::Settled => Ok(WebhookOutcome::Settled),
            SettlementOutcome::AlreadyPaid => {
                info!(order_id = %order_id, "webhook replay on settled order");
                Ok(WebhookOutcome::AlreadySettled)
            }
            SettlementOutcome::Superseded => {
                // The sweeper cancelled first but the shopper's money moved.
                warn!(order_id = %order_id, "capture arrived for a cancelled order; refunding");
                match self
                    .orders
                    .refund_after_cancellation(order_id, gateway_payment_id)
                    .await?
                {
                    RefundOutcome::Refunded => Ok(WebhookOutcome::Refunded),
                    _ => Ok(WebhookOutcome::AlreadySettled),
                }
            }
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Signs a body the way the gateway does. Shared with the test suite.
pub fn sign_body(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}
