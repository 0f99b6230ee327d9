use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::order::OrderState;
use crate::errors::ErrorResponse;
use crate::handlers::orders::{CaptureOrderRequest, CreateOrderRequest};
use crate::services::settlement::{OrderStatusView, PurchaseIntent};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Atelier API",
        description = r#"
# Atelier Order Settlement API

Purchase flow for usage licenses on the Atelier design marketplace.

A buyer creates a purchase intent, approves the payment on the gateway's
site via the returned approve link, and then captures the order. A
successful capture settles the seller payout in the same request when the
seller has a payout destination configured.

## Authentication

Buyer-scoped endpoints require a JWT issued by the marketplace identity
service in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

The gateway-return and gateway-cancel endpoints are redirect targets for
the payment gateway and take no auth header.

## Errors

Errors carry a stable machine-readable `code` plus a human message. The
`order_already_pending` conflict additionally carries the pending order's
ids in `details` so clients can resume instead of retrying.
"#
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::capture_order,
        crate::handlers::orders::gateway_return,
        crate::handlers::orders::gateway_cancel,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
    ),
    components(schemas(
        CreateOrderRequest,
        CaptureOrderRequest,
        PurchaseIntent,
        OrderStatusView,
        OrderState,
        ErrorResponse,
    )),
    tags(
        (name = "Orders", description = "Usage-license purchase and settlement")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at /docs, serving the generated document.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
