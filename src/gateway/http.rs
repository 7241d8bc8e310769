use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

use super::{
    CreatePaymentLinkRequest, GatewayPayment, GatewayPaymentStatus, PaymentGateway, PaymentLink,
    RefundReceipt,
};
use crate::{config::AppConfig, errors::ServiceError};

/// REST client for a Razorpay-style payment-link gateway. Amounts go over
/// the wire in minor units (paise for INR).
#[derive(Clone)]
pub struct HttpPaymentGateway {
    base_url: String,
    key_id: String,
    key_secret: String,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.gateway_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;

        Ok(Self {
            base_url: cfg.gateway_base_url.trim_end_matches('/').to_string(),
            key_id: cfg.gateway_key_id.clone(),
            key_secret: cfg.gateway_key_secret.clone(),
            client,
        })
    }

    fn amount_minor(amount: Decimal) -> Result<i64, ServiceError> {
        (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("amount {} not representable", amount))
            })
    }
}

#[derive(Serialize)]
struct LinkCustomer {
    name: String,
    email: String,
}

#[derive(Serialize)]
struct CreateLinkBody {
    amount: i64,
    currency: String,
    reference_id: String,
    description: String,
    customer: LinkCustomer,
}

#[derive(Deserialize)]
struct LinkResponse {
    id: String,
    short_url: String,
}

#[derive(Deserialize)]
struct LinkStatusResponse {
    status: String,
    #[serde(default)]
    payment_id: Option<String>,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(reference_id = %request.reference_id))]
    async fn create_payment_link(
        &self,
        request: CreatePaymentLinkRequest,
    ) -> Result<PaymentLink, ServiceError> {
        let body = CreateLinkBody {
            amount: Self::amount_minor(request.amount)?,
            currency: request.currency,
            reference_id: request.reference_id,
            description: request.description,
            customer: LinkCustomer {
                name: request.customer_name,
                email: request.customer_email,
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/payment_links", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("create payment link: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "gateway rejected payment link request: {}", text);
            return Err(ServiceError::GatewayError(format!(
                "create payment link returned {}",
                status
            )));
        }

        let link: LinkResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("malformed link response: {}", e)))?;

        Ok(PaymentLink {
            link_id: link.id,
            short_url: link.short_url,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, link_id: &str) -> Result<GatewayPayment, ServiceError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_links/{}", self.base_url, link_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("fetch payment: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::GatewayError(format!(
                "fetch payment returned {}",
                response.status()
            )));
        }

        let link: LinkStatusResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("malformed status response: {}", e)))?;

        let status = match link.status.as_str() {
            "paid" => GatewayPaymentStatus::Captured,
            "expired" | "cancelled" => GatewayPaymentStatus::Failed,
            _ => GatewayPaymentStatus::Pending,
        };

        Ok(GatewayPayment {
            status,
            payment_id: link.payment_id,
        })
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<RefundReceipt, ServiceError> {
        let mut body = serde_json::Map::new();
        if let Some(amount) = amount {
            body.insert(
                "amount".to_string(),
                serde_json::Value::from(Self::amount_minor(amount)?),
            );
        }

        let response = self
            .client
            .post(format!(
                "{}/v1/payments/{}/refund",
                self.base_url, payment_id
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&serde_json::Value::Object(body))
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("refund: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::GatewayError(format!(
                "refund returned {}",
                response.status()
            )));
        }

        let refund: RefundResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("malformed refund response: {}", e)))?;

        Ok(RefundReceipt {
            refund_id: refund.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amounts_are_converted_to_minor_units() {
        assert_eq!(HttpPaymentGateway::amount_minor(dec!(1000)).unwrap(), 100000);
        assert_eq!(HttpPaymentGateway::amount_minor(dec!(10.50)).unwrap(), 1050);
        assert_eq!(HttpPaymentGateway::amount_minor(dec!(12.34)).unwrap(), 1234);
    }
}
