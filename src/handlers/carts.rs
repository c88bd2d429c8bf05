use crate::{
    auth::Identity,
    entities::ActorRole,
    errors::ServiceError,
    services::carts::{AddItemInput, CartView},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({ "quantity": 3 }))]
pub struct UpdateQuantityRequest {
    /// Absolute quantity for the line. Zero or negative removes it.
    #[schema(example = 3)]
    pub quantity: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart fetched", body = ApiResponse<CartView>),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse)
    ),
    tag = "cart"
)]
pub async fn get_cart(State(state): State<AppState>, identity: Identity) -> ApiResult<CartView> {
    identity.require_role(ActorRole::Customer)?;
    let cart = state.services.carts.get_cart(identity.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Add a listing to the cart. A listing from a different merchant replaces
/// the cart contents first.
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemInput,
    responses(
        (status = 200, description = "Cart updated", body = ApiResponse<CartView>),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Listing not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Listing unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "cart"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Json(input): Json<AddItemInput>,
) -> ApiResult<CartView> {
    identity.require_role(ActorRole::Customer)?;
    let cart = state
        .services
        .carts
        .add_item(identity.user_id, input)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{listing_id}",
    params(
        ("listing_id" = Uuid, Path, description = "Listing to update")
    ),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Cart updated", body = ApiResponse<CartView>),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Listing is not in the cart", body = crate::errors::ErrorResponse)
    ),
    tag = "cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(listing_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> ApiResult<CartView> {
    identity.require_role(ActorRole::Customer)?;
    let cart = state
        .services
        .carts
        .set_item_quantity(identity.user_id, listing_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Remove a listing from the cart. Removing a listing that is not present
/// succeeds and returns the cart unchanged.
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{listing_id}",
    params(
        ("listing_id" = Uuid, Path, description = "Listing to remove")
    ),
    responses(
        (status = 200, description = "Cart updated", body = ApiResponse<CartView>),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse)
    ),
    tag = "cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(listing_id): Path<Uuid>,
) -> ApiResult<CartView> {
    identity.require_role(ActorRole::Customer)?;
    let cart = state
        .services
        .carts
        .remove_item(identity.user_id, listing_id)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses(
        (status = 204, description = "Cart cleared"),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse)
    ),
    tag = "cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<StatusCode, ServiceError> {
    identity.require_role(ActorRole::Customer)?;
    state.services.carts.clear_cart(identity.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
