use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dispatch API",
        version = "0.1.0",
        description = r#"
# Order Lifecycle & Delivery Assignment API

The backend engine of an on-demand delivery marketplace: customer carts and
checkout, the order status state machine, atomic courier claims over the
delivery pool, and realtime tracking of orders in flight.

## Roles

Every call acts as one of four roles: `customer`, `merchant`, `courier` or
`system`. Customers shop and cancel, merchants drive preparation, couriers
claim and deliver, and `system` covers operator tooling such as reassignment.

## Authentication

Authentication happens upstream at the API gateway, which injects the caller
identity into every request:

```
X-User-Id: <uuid>
X-User-Role: customer | merchant | courier | system
```

Requests without both headers are rejected.

## Error Handling

Failures share one body shape with a stable machine-readable `code`:

```json
{
  "error": "Conflict",
  "code": "assignment_conflict",
  "message": "Delivery for order ... was claimed by another courier",
  "request_id": "req-abc123",
  "timestamp": "2025-03-14T10:30:00Z"
}
```

## Pagination

List endpoints take `page` (default 1) and `per_page` (default 20) query
parameters and return `items`, `total`, `page`, `per_page` and `total_pages`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "cart", description = "Customer cart management"),
        (name = "checkout", description = "Cart to order conversion"),
        (name = "orders", description = "Order lifecycle and status transitions"),
        (name = "deliveries", description = "Courier claims over the delivery pool"),
        (name = "tracking", description = "Courier locations and live order events")
    ),
    paths(
        // Cart
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_cart_item,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,
        crate::handlers::carts::clear_cart,

        // Checkout
        crate::handlers::checkout::checkout,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::get_order_history,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,

        // Deliveries
        crate::handlers::deliveries::available_deliveries,
        crate::handlers::deliveries::claim_delivery,
        crate::handlers::deliveries::release_delivery,
        crate::handlers::deliveries::reassign_delivery,

        // Tracking
        crate::handlers::tracking::report_location,
        crate::handlers::tracking::order_events,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Entities
            crate::entities::order::Model,
            crate::entities::order_item::Model,
            crate::entities::order_status_history::Model,
            crate::entities::order::OrderStatus,
            crate::entities::order::DeliveryType,
            crate::entities::order_status_history::ActorRole,

            // Cart and checkout types
            crate::services::carts::CartView,
            crate::services::carts::CartLineView,
            crate::services::carts::AddItemInput,
            crate::handlers::carts::UpdateQuantityRequest,
            crate::services::checkout::CheckoutInput,

            // Order types
            crate::services::orders::OrderDetails,
            crate::services::orders::UpdateStatusInput,
            crate::services::orders::CancelOrderInput,
            crate::services::orders::OrderListFilter,

            // Delivery and tracking types
            crate::services::assignment::AvailableDelivery,
            crate::handlers::deliveries::ReleaseRequest,
            crate::handlers::deliveries::ReassignRequest,
            crate::handlers::tracking::LocationReport,
            crate::services::geo::GeoPoint,
            crate::services::realtime::LocationOutcome,
            crate::services::realtime::TrackingEvent,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
