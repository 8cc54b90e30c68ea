use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::config::GatewayConfig;
use crate::errors::ServiceError;
use crate::models::InvoiceRecord;
use crate::signature::SignatureCodec;

/// Gateway response envelope. `code` is `"00"` on success; anything else
/// is a gateway-side rejection.
#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    code: String,
    desc: String,
    data: Option<T>,
}

const GATEWAY_SUCCESS_CODE: &str = "00";

/// Line item carried in the remote order payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    pub price: i64,
}

/// Artifacts of a successfully created payment session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkData {
    pub order_code: u64,
    pub checkout_url: String,
    pub qr_code: String,
}

/// Remote payment session status as reported by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    pub order_code: u64,
    pub status: String,
    pub amount: i64,
}

/// Remote side of the payment lifecycle. Implementations never retry; a
/// timed-out or rejected call surfaces as [`ServiceError::Gateway`] and
/// the decision to re-invoke stays with the operator.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_link(
        &self,
        invoice: &InvoiceRecord,
    ) -> Result<PaymentLinkData, ServiceError>;

    async fn get_payment_info(&self, order_code: u64) -> Result<OrderInfo, ServiceError>;

    async fn cancel_payment(&self, order_code: u64, reason: &str) -> Result<(), ServiceError>;

    /// Recomputes the webhook signature over `payload` and compares in
    /// constant time.
    fn verify_webhook(&self, payload: &serde_json::Value, signature: &str) -> bool;
}

/// PayOS-style merchant API client.
pub struct PayOsClient {
    http: reqwest::Client,
    config: GatewayConfig,
    codec: SignatureCodec,
}

impl PayOsClient {
    pub fn new(config: GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        let codec = SignatureCodec::new(config.checksum_key.clone());
        Self {
            http,
            config,
            codec,
        }
    }

    /// Order codes are the last 10 digits of the creation timestamp in
    /// milliseconds, which keeps them numeric and unique per millisecond.
    fn next_order_code() -> u64 {
        (Utc::now().timestamp_millis() % 10_000_000_000) as u64
    }

    fn signed_request(
        &self,
        request: reqwest::RequestBuilder,
        signature: String,
    ) -> reqwest::RequestBuilder {
        let mut request = request
            .header("x-client-id", &self.config.client_id)
            .header("x-api-key", &self.config.api_key)
            .header("x-signature", signature);
        if let Some(partner_code) = &self.config.partner_code {
            request = request.header("x-partner-code", partner_code);
        }
        request
    }

    fn unwrap_envelope<T>(
        envelope: GatewayEnvelope<T>,
        context: &str,
    ) -> Result<T, ServiceError> {
        if envelope.code != GATEWAY_SUCCESS_CODE {
            warn!(code = %envelope.code, desc = %envelope.desc, "{context} rejected by gateway");
            return Err(ServiceError::Gateway(format!(
                "{context} failed: {} ({})",
                envelope.desc, envelope.code
            )));
        }
        envelope.data.ok_or_else(|| {
            ServiceError::Gateway(format!("{context} returned an empty payload"))
        })
    }
}

#[async_trait]
impl PaymentGateway for PayOsClient {
    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id))]
    async fn create_payment_link(
        &self,
        invoice: &InvoiceRecord,
    ) -> Result<PaymentLinkData, ServiceError> {
        let order_code = Self::next_order_code();
        let amount = invoice.payable_amount();
        // The gateway caps description length
        let description: String = invoice.product_name.chars().take(25).collect();

        let signature = self.codec.sign(&json!({
            "amount": amount,
            "cancelUrl": self.config.cancel_url,
            "description": description,
            "orderCode": order_code,
            "returnUrl": self.config.return_url,
        }));

        let body = json!({
            "orderCode": order_code,
            "amount": amount,
            "description": description,
            "items": [OrderItem {
                name: invoice.product_name.clone(),
                quantity: 1,
                price: amount,
            }],
            "returnUrl": self.config.return_url,
            "cancelUrl": self.config.cancel_url,
        });

        let response = self
            .signed_request(
                self.http.post(format!("{}/order", self.config.base_url)),
                signature,
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("create order: {e}")))?;

        let envelope: GatewayEnvelope<PaymentLinkData> = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("create order response: {e}")))?;

        Self::unwrap_envelope(envelope, "order creation")
    }

    #[instrument(skip(self))]
    async fn get_payment_info(&self, order_code: u64) -> Result<OrderInfo, ServiceError> {
        let signature = self.codec.sign(&json!({ "orderCode": order_code }));

        let response = self
            .signed_request(
                self.http
                    .get(format!("{}/order/{}", self.config.base_url, order_code)),
                signature,
            )
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("order lookup: {e}")))?;

        let envelope: GatewayEnvelope<OrderInfo> = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("order lookup response: {e}")))?;

        Self::unwrap_envelope(envelope, "order lookup")
    }

    #[instrument(skip(self, reason))]
    async fn cancel_payment(&self, order_code: u64, reason: &str) -> Result<(), ServiceError> {
        let body = json!({
            "orderCode": order_code,
            "cancellationReason": reason,
        });
        let signature = self.codec.sign(&body);

        let response = self
            .signed_request(
                self.http.put(format!(
                    "{}/order/{}/cancel",
                    self.config.base_url, order_code
                )),
                signature,
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("order cancel: {e}")))?;

        let envelope: GatewayEnvelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("order cancel response: {e}")))?;

        if envelope.code != GATEWAY_SUCCESS_CODE {
            warn!(code = %envelope.code, desc = %envelope.desc, "order cancel rejected by gateway");
            return Err(ServiceError::Gateway(format!(
                "order cancel failed: {} ({})",
                envelope.desc, envelope.code
            )));
        }
        Ok(())
    }

    fn verify_webhook(&self, payload: &serde_json::Value, signature: &str) -> bool {
        self.codec.verify(payload, signature)
    }
}
