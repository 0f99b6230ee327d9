//! PayPal REST implementation of the gateway boundary: checkout orders v2
//! for intent/capture, payouts v1 for seller disbursement, OAuth2
//! client-credentials for auth.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    CreateIntentRequest, GatewayCapture, GatewayEnvironment, GatewayError, GatewayOrder,
    PaymentGateway, PayoutReceipt, PayoutRequest,
};
use crate::config::AppConfig;

/// Tokens are refreshed this long before their advertised expiry so an
/// in-flight request never races the deadline.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct PayPalGateway {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalGateway {
    pub fn new(
        environment: GatewayEnvironment,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Self::with_base_url(
            environment.api_base().to_string(),
            client_id,
            client_secret,
            timeout,
        )
    }

    /// Point the client at an explicit base URL instead of the environment
    /// default; used against local gateway stubs.
    pub fn with_base_url(
        base_url: String,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    pub fn from_app_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        let base_url = cfg
            .gateway_base_url
            .clone()
            .unwrap_or_else(|| cfg.gateway_environment.api_base().to_string());

        Self::with_base_url(
            base_url,
            cfg.gateway_client_id.clone(),
            cfg.gateway_client_secret.clone(),
            Duration::from_secs(cfg.gateway_timeout_secs),
        )
    }

    /// Returns a valid bearer token, exchanging client credentials when the
    /// cached one is absent or about to expire. The cache lock is released
    /// while the token request is in flight; a concurrent refresh merely
    /// overwrites the slot with an equally fresh token.
    async fn bearer_token(&self) -> Result<String, GatewayError> {
        {
            let guard = self.token.lock().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        debug!("requesting new gateway access token");
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| GatewayError::AuthFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::AuthFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::AuthFailed(e.to_string()))?;

        let ttl = token
            .expires_in
            .saturating_sub(TOKEN_REFRESH_MARGIN_SECS)
            .max(1);
        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        };
        *self.token.lock().await = Some(cached);

        Ok(token.access_token)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, GatewayError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "gateway rejected request");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
    async fn create_order(
        &self,
        request: CreateIntentRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": request.currency,
                    "value": money_string(request.amount),
                }
            }],
            "application_context": {
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW",
            }
        });

        let response = self.post_json("/v2/checkout/orders", &body).await?;
        let order: CheckoutOrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let approve_link = order
            .approve_link()
            .ok_or_else(|| {
                GatewayError::MalformedResponse("approve link missing from order response".into())
            })?
            .to_string();

        Ok(GatewayOrder {
            gateway_order_id: order.id,
            approve_link,
        })
    }

    #[instrument(skip(self))]
    async fn capture_order(&self, gateway_order_id: &str) -> Result<GatewayCapture, GatewayError> {
        let response = self
            .post_json(
                &format!("/v2/checkout/orders/{gateway_order_id}/capture"),
                &json!({}),
            )
            .await?;

        let capture: CaptureResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        Ok(GatewayCapture {
            capture_id: capture.first_capture_id().map(str::to_string),
            status: capture.status,
        })
    }

    #[instrument(skip(self, request), fields(amount = %request.amount))]
    async fn send_payout(&self, request: PayoutRequest) -> Result<PayoutReceipt, GatewayError> {
        let body = json!({
            "sender_batch_header": {
                "sender_batch_id": Uuid::new_v4().to_string(),
                "email_subject": "You have a payout from Atelier",
            },
            "items": [{
                "recipient_type": "EMAIL",
                "receiver": request.receiver,
                "note": request.note,
                "sender_item_id": Uuid::new_v4().to_string(),
                "amount": {
                    "currency": request.currency,
                    "value": money_string(request.amount),
                }
            }]
        });

        let response = self.post_json("/v1/payments/payouts", &body).await?;
        let payout: PayoutResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        Ok(PayoutReceipt {
            batch_id: payout.batch_header.payout_batch_id,
            payout_item_id: payout.items.into_iter().next().map(|i| i.payout_item_id),
        })
    }
}

/// Gateway amounts are decimal strings with exactly two fraction digits.
fn money_string(amount: Decimal) -> String {
    let mut value = amount.round_dp(2);
    value.rescale(2);
    value.to_string()
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct CheckoutOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<LinkDescription>,
}

impl CheckoutOrderResponse {
    fn approve_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.as_str())
    }
}

#[derive(Deserialize)]
struct LinkDescription {
    href: String,
    rel: String,
}

#[derive(Deserialize)]
struct CaptureResponse {
    status: String,
    #[serde(default)]
    purchase_units: Vec<CapturePurchaseUnit>,
}

impl CaptureResponse {
    fn first_capture_id(&self) -> Option<&str> {
        self.purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .map(|capture| capture.id.as_str())
            .next()
    }
}

#[derive(Deserialize)]
struct CapturePurchaseUnit {
    #[serde(default)]
    payments: Option<CapturePayments>,
}

#[derive(Deserialize)]
struct CapturePayments {
    #[serde(default)]
    captures: Vec<CaptureRecord>,
}

#[derive(Deserialize)]
struct CaptureRecord {
    id: String,
}

#[derive(Deserialize)]
struct PayoutResponse {
    batch_header: PayoutBatchHeader,
    #[serde(default)]
    items: Vec<PayoutItemRecord>,
}

#[derive(Deserialize)]
struct PayoutBatchHeader {
    payout_batch_id: String,
}

#[derive(Deserialize)]
struct PayoutItemRecord {
    payout_item_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn money_string_always_has_two_fraction_digits() {
        assert_eq!(money_string(dec!(100)), "100.00");
        assert_eq!(money_string(dec!(49.9)), "49.90");
        assert_eq!(money_string(dec!(12.346)), "12.35");
        assert_eq!(money_string(dec!(0.004)), "0.00");
    }

    #[test]
    fn approve_link_is_extracted_from_order_response() {
        let order: CheckoutOrderResponse = serde_json::from_value(json!({
            "id": "5O190127TN364715T",
            "status": "CREATED",
            "links": [
                {"href": "https://api-m.sandbox.paypal.com/v2/checkout/orders/5O1", "rel": "self", "method": "GET"},
                {"href": "https://www.sandbox.paypal.com/checkoutnow?token=5O1", "rel": "approve", "method": "GET"}
            ]
        }))
        .expect("order response should parse");

        assert_eq!(order.id, "5O190127TN364715T");
        assert_eq!(
            order.approve_link(),
            Some("https://www.sandbox.paypal.com/checkoutnow?token=5O1")
        );
    }

    #[test]
    fn missing_approve_link_is_detected() {
        let order: CheckoutOrderResponse = serde_json::from_value(json!({
            "id": "5O190127TN364715T",
            "links": []
        }))
        .expect("order response should parse");

        assert!(order.approve_link().is_none());
    }

    #[test]
    fn capture_id_is_read_from_nested_purchase_units() {
        let capture: CaptureResponse = serde_json::from_value(json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": {
                    "captures": [{"id": "3C679366HH908993F", "status": "COMPLETED"}]
                }
            }]
        }))
        .expect("capture response should parse");

        assert_eq!(capture.status, "COMPLETED");
        assert_eq!(capture.first_capture_id(), Some("3C679366HH908993F"));
    }

    #[test]
    fn capture_without_captures_yields_no_id() {
        let capture: CaptureResponse = serde_json::from_value(json!({
            "status": "PENDING",
            "purchase_units": []
        }))
        .expect("capture response should parse");

        assert_eq!(capture.first_capture_id(), None);
    }

    #[test]
    fn payout_response_parses_batch_and_item() {
        let payout: PayoutResponse = serde_json::from_value(json!({
            "batch_header": {
                "payout_batch_id": "5UXD2E8A7EBQJ",
                "batch_status": "PENDING"
            },
            "items": [{"payout_item_id": "8AELMXH8UB2P8"}]
        }))
        .expect("payout response should parse");

        assert_eq!(payout.batch_header.payout_batch_id, "5UXD2E8A7EBQJ");
        assert_eq!(
            payout.items.first().map(|i| i.payout_item_id.as_str()),
            Some("8AELMXH8UB2P8")
        );
    }
}
