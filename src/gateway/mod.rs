//! Payment gateway boundary.
//!
//! The settlement engine talks to the gateway exclusively through
//! [`PaymentGateway`]; the concrete provider is interchangeable. The shipped
//! implementation is [`paypal::PayPalGateway`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

pub mod paypal;

pub use paypal::PayPalGateway;

/// Capture status string the gateway treats as money actually moved.
pub const CAPTURE_COMPLETED: &str = "COMPLETED";

/// Which gateway deployment to talk to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayEnvironment {
    #[default]
    Sandbox,
    Live,
}

impl GatewayEnvironment {
    pub fn api_base(self) -> &'static str {
        match self {
            GatewayEnvironment::Sandbox => "https://api-m.sandbox.paypal.com",
            GatewayEnvironment::Live => "https://api-m.paypal.com",
        }
    }
}

/// Input for creating a gateway order (a purchase intent on the gateway side).
#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub currency: String,
    pub amount: Decimal,
    /// System-owned callback URLs; the gateway redirects the buyer's browser
    /// here after approval or cancellation.
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    /// Link the buyer follows to approve the payment on the gateway's site.
    pub approve_link: String,
}

#[derive(Debug, Clone)]
pub struct GatewayCapture {
    /// Raw gateway status; anything other than `COMPLETED` means the buyer's
    /// funds did not move.
    pub status: String,
    pub capture_id: Option<String>,
}

impl GatewayCapture {
    pub fn is_completed(&self) -> bool {
        self.status == CAPTURE_COMPLETED
    }
}

#[derive(Debug, Clone)]
pub struct PayoutRequest {
    /// Email-like identifier of the receiving seller.
    pub receiver: String,
    pub currency: String,
    pub amount: Decimal,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    pub batch_id: String,
    pub payout_item_id: Option<String>,
}

/// Errors surfaced by the gateway client. Transport and rejection failures
/// leave no order state behind; translation to domain error kinds happens in
/// the service layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway authentication failed: {0}")]
    AuthFailed(String),

    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    MalformedResponse(String),
}

/// The three remote operations the settlement engine needs.
///
/// All calls may block on network I/O; implementations must not hold internal
/// locks across a request.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a purchase intent with the gateway and returns the id it
    /// assigned plus the buyer-facing approval link.
    async fn create_order(&self, request: CreateIntentRequest) -> Result<GatewayOrder, GatewayError>;

    /// Captures the buyer's funds for a previously approved gateway order.
    async fn capture_order(&self, gateway_order_id: &str) -> Result<GatewayCapture, GatewayError>;

    /// Forwards the seller's share from platform custody to the seller.
    async fn send_payout(&self, request: PayoutRequest) -> Result<PayoutReceipt, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_selects_api_base() {
        assert!(GatewayEnvironment::Sandbox.api_base().contains("sandbox"));
        assert!(!GatewayEnvironment::Live.api_base().contains("sandbox"));
    }

    #[test]
    fn only_completed_counts_as_captured() {
        let completed = GatewayCapture {
            status: "COMPLETED".into(),
            capture_id: Some("CAP-1".into()),
        };
        let declined = GatewayCapture {
            status: "DECLINED".into(),
            capture_id: None,
        };
        let pending = GatewayCapture {
            status: "PENDING".into(),
            capture_id: None,
        };

        assert!(completed.is_completed());
        assert!(!declined.is_completed());
        assert!(!pending.is_completed());
    }
}
