//! Abstract contract with the external payment gateway: create a payment
//! link for an order, fetch ground truth for a payment, issue a refund.
//! Services hold a trait object so tests can script the gateway.

pub mod http;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub use http::HttpPaymentGateway;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentLinkRequest {
    pub amount: Decimal,
    pub currency: String,
    /// Our order id, echoed back in webhook payloads
    pub reference_id: String,
    pub description: String,
    pub customer_name: String,
    pub customer_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLink {
    pub link_id: String,
    pub short_url: String,
}

/// Ground truth the gateway reports for a payment link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayPaymentStatus {
    /// Link issued, nothing captured yet
    Pending,
    /// Money has moved
    Captured,
    /// Rejected, expired or cancelled on the gateway side
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub status: GatewayPaymentStatus,
    /// Present once a capture attempt exists
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_link(
        &self,
        request: CreatePaymentLinkRequest,
    ) -> Result<PaymentLink, ServiceError>;

    async fn fetch_payment(&self, link_id: &str) -> Result<GatewayPayment, ServiceError>;

    async fn refund(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<RefundReceipt, ServiceError>;
}
