use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::errors::OrderError;
use crate::handlers::AppState;
use crate::services::settlement::{OrderStatusView, PurchaseIntent};
use crate::ApiResponse;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    /// Project the buyer wants a usage license for
    pub project_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CaptureOrderRequest {
    /// Gateway-assigned order id returned by the create endpoint
    #[validate(length(min = 1, message = "gateway order id is required"))]
    pub gateway_order_id: String,
}

/// Query parameters of the gateway's browser redirects. The gateway passes
/// its own order id as `token`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct GatewayCallbackParams {
    pub token: String,
}

/// Create a purchase intent for a project
#[utoipa::path(
    post,
    path = "/api/v1/orders/create",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Purchase intent created; buyer follows the approve link", body = PurchaseIntent),
        (status = 404, description = "Project not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "A pending order already exists; details carry its ids", body = crate::errors::ErrorResponse),
        (status = 422, description = "Project not purchasable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<PurchaseIntent>>, OrderError> {
    let intent = state
        .settlement
        .create_purchase_intent(user.user_id, request.project_id)
        .await?;

    Ok(Json(ApiResponse::success(intent)))
}

/// Capture an approved order and settle the seller payout
#[utoipa::path(
    post,
    path = "/api/v1/orders/capture",
    request_body = CaptureOrderRequest,
    responses(
        (status = 200, description = "Funds captured; payout settled when possible", body = OrderStatusView),
        (status = 409, description = "Order already processed or canceled", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway capture or payout failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn capture_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CaptureOrderRequest>,
) -> Result<Json<ApiResponse<OrderStatusView>>, OrderError> {
    request.validate()?;

    let status = state
        .settlement
        .capture(user.user_id, &request.gateway_order_id)
        .await?;

    Ok(Json(ApiResponse::success(status)))
}

/// Gateway redirect target after the buyer approves on the gateway's site
#[utoipa::path(
    get,
    path = "/api/v1/orders/gateway-return",
    params(GatewayCallbackParams),
    responses(
        (status = 200, description = "Current order status", body = OrderStatusView),
        (status = 404, description = "Unknown gateway order id", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn gateway_return(
    State(state): State<AppState>,
    Query(params): Query<GatewayCallbackParams>,
) -> Result<Json<ApiResponse<OrderStatusView>>, OrderError> {
    let status = state.settlement.handle_gateway_return(&params.token).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Gateway redirect target after the buyer cancels on the gateway's site
#[utoipa::path(
    get,
    path = "/api/v1/orders/gateway-cancel",
    params(GatewayCallbackParams),
    responses(
        (status = 200, description = "Current order status", body = OrderStatusView),
        (status = 404, description = "Unknown gateway order id", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn gateway_cancel(
    State(state): State<AppState>,
    Query(params): Query<GatewayCallbackParams>,
) -> Result<Json<ApiResponse<OrderStatusView>>, OrderError> {
    let status = state.settlement.handle_gateway_cancel(&params.token).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Get one of the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order status", body = OrderStatusView),
        (status = 403, description = "Not the order's buyer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> Result<Json<ApiResponse<OrderStatusView>>, OrderError> {
    let status = state.settlement.get_order(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Cancel one of the caller's still-open orders
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order canceled", body = OrderStatusView),
        (status = 403, description = "Not the order's buyer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not open", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> Result<Json<ApiResponse<OrderStatusView>>, OrderError> {
    let status = state.settlement.cancel_own_order(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Order settlement routes
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_order))
        .route("/capture", post(capture_order))
        .route("/gateway-return", get(gateway_return))
        .route("/gateway-cancel", get(gateway_cancel))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
}
