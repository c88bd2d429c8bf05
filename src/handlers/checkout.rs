use crate::{
    auth::Identity,
    entities::ActorRole,
    errors::ServiceError,
    services::{checkout::CheckoutInput, orders::OrderDetails},
    ApiResponse, AppState,
};
use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

/// Convert the calling customer's cart into an order
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Checkout",
    description = "Converts the calling customer's cart into an order. Every line is \
        re-validated and re-priced from the live catalog; on any failure the cart is \
        left untouched and no order is created.",
    request_body = CheckoutInput,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderDetails>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid delivery details", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse),
        (status = 422, description = "Empty cart, unavailable listing or minimum order not met", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    identity: Identity,
    Json(input): Json<CheckoutInput>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetails>>), ServiceError> {
    identity.require_role(ActorRole::Customer)?;
    input.validate()?;

    let order = state
        .services
        .checkout
        .checkout(identity.user_id, input)
        .await?;
    let details = state.services.orders.get_order_details(order.id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(details))))
}
