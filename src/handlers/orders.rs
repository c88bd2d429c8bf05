use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::{
    auth::Identity,
    entities::{order, order_status_history},
    errors::ServiceError,
    services::orders::{
        is_participant, CancelOrderInput, OrderDetails, OrderListFilter, UpdateStatusInput,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

/// List orders visible to the caller
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Get a paginated list of orders scoped to the caller: customers see \
        their own orders, merchants their store's, couriers their assigned deliveries. \
        A system caller sees everything.",
    params(OrderListFilter),
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<PaginatedResponse<order::Model>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 403, description = "Missing or malformed identity headers", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    identity: Identity,
    Query(filter): Query<OrderListFilter>,
) -> ApiResult<PaginatedResponse<order::Model>> {
    let page = filter.page.max(1);
    let per_page = filter.per_page.max(1);

    let (items, total) = state.services.orders.list_orders(identity, filter).await?;
    let total_pages = (total + per_page - 1) / per_page;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        per_page,
        total_pages,
    })))
}

/// Get one order with its items and status history
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    description = "Fetch an order with line items and the full status trail. Only \
        participants (the customer, the merchant, the assigned courier) may view it.",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderDetails>),
        (status = 403, description = "Caller is not a participant", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    let details = state.services.orders.get_order_details(id).await?;
    if !is_participant(&details.order, &identity) {
        return Err(ServiceError::AccessDenied(
            "Only order participants may view this order".to_string(),
        ));
    }
    Ok(Json(ApiResponse::success(details)))
}

/// Look up an order by its human-facing number
#[utoipa::path(
    get,
    path = "/api/v1/orders/number/{order_number}",
    summary = "Get order by number",
    description = "Fetch an order by the short number printed on receipts.",
    params(
        ("order_number" = String, Path, description = "Order number, e.g. ORD-9F2C41AA")
    ),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderDetails>),
        (status = 403, description = "Caller is not a participant", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    identity: Identity,
    Path(order_number): Path<String>,
) -> ApiResult<OrderDetails> {
    let order = state
        .services
        .orders
        .get_order_by_number(&order_number)
        .await?;
    if !is_participant(&order, &identity) {
        return Err(ServiceError::AccessDenied(
            "Only order participants may view this order".to_string(),
        ));
    }
    let details = state.services.orders.get_order_details(order.id).await?;
    Ok(Json(ApiResponse::success(details)))
}

/// Get the status trail of an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/history",
    summary = "Get order history",
    description = "Every status transition recorded for the order, oldest first.",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "History retrieved successfully", body = ApiResponse<Vec<order_status_history::Model>>),
        (status = 403, description = "Caller is not a participant", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order_history(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<order_status_history::Model>> {
    let order = state.services.orders.get_order(id).await?;
    if !is_participant(&order, &identity) {
        return Err(ServiceError::AccessDenied(
            "Only order participants may view this order".to_string(),
        ));
    }
    let history = state.services.orders.get_status_history(id).await?;
    Ok(Json(ApiResponse::success(history)))
}

/// Move an order to a new status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    description = "Request a status transition. The transition must be legal for the \
        order's current status and permitted for the caller's role; merchants drive \
        preparation, couriers drive the delivery leg.",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = UpdateStatusInput,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<order::Model>),
        (status = 403, description = "Role may not request this transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
        (status = 422, description = "Transition not legal from the current status", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateStatusInput>,
) -> ApiResult<order::Model> {
    let order = state
        .services
        .orders
        .update_status(id, identity, input)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancel an order. Customers may cancel free-form only while the \
        order is still pending or confirmed, and during preparation only within the \
        cancellation window; merchants and operators can cancel any non-terminal \
        order that has not left the store.",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = CancelOrderInput,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<order::Model>),
        (status = 403, description = "Caller may not cancel this order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is past the point of cancellation", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(input): Json<CancelOrderInput>,
) -> ApiResult<order::Model> {
    let order = state
        .services
        .orders
        .cancel_order(id, identity, input.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
