use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::OrderState;
use crate::gateway::GatewayError;

/// Wire shape for every error the API returns.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Conflict", "Not Found")
    pub error: String,
    /// Stable machine-readable error kind (e.g. "order_already_pending")
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Structured payload for errors the caller can act on, such as the
    /// existing order behind an `order_already_pending` conflict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Errors of the order settlement engine.
///
/// Validation variants are terminal; state-conflict variants carry the ids
/// the caller needs to resume instead of retry; gateway variants leave the
/// order in its last consistent state and are safe to retry.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("project not found")]
    ItemNotFound,

    #[error("project is not published for sale")]
    ItemNotPurchasable,

    #[error("buyers cannot purchase their own project")]
    SelfPurchaseDenied,

    #[error("project price must be a positive amount")]
    InvalidPrice,

    #[error("seller has no payout destination configured")]
    SellerPayoutMissing,

    #[error("a pending order for this project already exists")]
    OrderAlreadyPending {
        order_id: Uuid,
        gateway_order_id: Option<String>,
        state: OrderState,
    },

    #[error("order has already been processed")]
    OrderAlreadyProcessed { order_id: Uuid, state: OrderState },

    #[error("order was canceled")]
    OrderCanceled,

    #[error("operation is not allowed while the order is {state}")]
    InvalidOrderState { state: OrderState },

    #[error("order not found")]
    OrderNotFound,

    #[error("access denied")]
    AccessDenied,

    #[error("gateway authentication failed: {0}")]
    GatewayAuthFailed(String),

    #[error("gateway reported capture status {gateway_status}")]
    CaptureFailed { gateway_status: String },

    #[error("gateway payout failed: {0}")]
    PayoutFailed(String),

    #[error("gateway request failed: {0}")]
    GatewayUnavailable(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl From<GatewayError> for OrderError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::AuthFailed(msg) => OrderError::GatewayAuthFailed(msg),
            other => OrderError::GatewayUnavailable(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for OrderError {
    fn from(err: validator::ValidationErrors) -> Self {
        OrderError::Validation(err.to_string())
    }
}

impl OrderError {
    /// Single source of truth for error-to-status mapping; business logic
    /// never sees HTTP codes.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ItemNotFound | Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::ItemNotPurchasable | Self::InvalidPrice | Self::SellerPayoutMissing => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::SelfPurchaseDenied | Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::OrderAlreadyPending { .. }
            | Self::OrderAlreadyProcessed { .. }
            | Self::OrderCanceled
            | Self::InvalidOrderState { .. } => StatusCode::CONFLICT,
            Self::GatewayAuthFailed(_) | Self::CaptureFailed { .. } | Self::PayoutFailed(_)
            | Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, independent of the display message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ItemNotFound => "item_not_found",
            Self::ItemNotPurchasable => "item_not_purchasable",
            Self::SelfPurchaseDenied => "self_purchase_denied",
            Self::InvalidPrice => "invalid_price",
            Self::SellerPayoutMissing => "seller_payout_missing",
            Self::OrderAlreadyPending { .. } => "order_already_pending",
            Self::OrderAlreadyProcessed { .. } => "order_already_processed",
            Self::OrderCanceled => "order_canceled",
            Self::InvalidOrderState { .. } => "invalid_order_state",
            Self::OrderNotFound => "order_not_found",
            Self::AccessDenied => "access_denied",
            Self::GatewayAuthFailed(_) => "gateway_auth_failed",
            Self::CaptureFailed { .. } => "capture_failed",
            Self::PayoutFailed(_) => "payout_failed",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
            Self::Validation(_) => "validation_error",
            Self::Database(_) => "database_error",
        }
    }

    /// Resume payload for state-conflict errors: enough for the caller to
    /// pick up the existing order instead of retrying blindly.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::OrderAlreadyPending {
                order_id,
                gateway_order_id,
                state,
            } => Some(json!({
                "order_id": order_id,
                "gateway_order_id": gateway_order_id,
                "status": state,
            })),
            Self::OrderAlreadyProcessed { order_id, state } => Some(json!({
                "order_id": order_id,
                "status": state,
            })),
            _ => None,
        }
    }

    /// Internal errors return generic messages to avoid leaking details.
    fn response_message(&self) -> String {
        match self {
            Self::Database(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_map_to_409_with_resume_payload() {
        let order_id = Uuid::new_v4();
        let err = OrderError::OrderAlreadyPending {
            order_id,
            gateway_order_id: Some("GW-1".into()),
            state: OrderState::Created,
        };

        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "order_already_pending");
        let details = err.details().expect("conflict carries details");
        assert_eq!(details["order_id"], json!(order_id));
        assert_eq!(details["gateway_order_id"], json!("GW-1"));
    }

    #[test]
    fn gateway_errors_map_to_bad_gateway() {
        assert_eq!(
            OrderError::GatewayAuthFailed("token endpoint returned 401".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            OrderError::CaptureFailed {
                gateway_status: "DECLINED".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn database_errors_do_not_leak_details() {
        let err = OrderError::Database(sea_orm::DbErr::Custom("secret dsn".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.response_message().contains("secret"));
    }

    #[test]
    fn auth_failures_translate_from_gateway_errors() {
        let err: OrderError = GatewayError::AuthFailed("bad credentials".into()).into();
        assert_eq!(err.code(), "gateway_auth_failed");

        let err: OrderError = GatewayError::Rejected {
            status: 500,
            body: "oops".into(),
        }
        .into();
        assert_eq!(err.code(), "gateway_unavailable");
    }
}
