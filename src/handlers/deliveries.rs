use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::Identity,
    entities::{order, ActorRole},
    errors::ServiceError,
    services::{assignment::AvailableDelivery, geo::GeoPoint},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct AvailabilityQuery {
    /// Courier latitude. Overrides the last reported position.
    pub lat: Option<f64>,
    /// Courier longitude. Overrides the last reported position.
    pub lng: Option<f64>,
    /// Search radius in kilometers. Defaults to the configured radius.
    pub radius_km: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({ "reason": "Vehicle broke down" }))]
pub struct ReleaseRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "courier_id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
    "reason": "Courier unreachable for 10 minutes"
}))]
pub struct ReassignRequest {
    pub courier_id: Uuid,
    pub reason: Option<String>,
}

/// Deliveries open to the calling courier
#[utoipa::path(
    get,
    path = "/api/v1/deliveries/available",
    summary = "List available deliveries",
    description = "Unclaimed courier deliveries near the caller, closest first, plus \
        the caller's own active deliveries regardless of distance. Position comes \
        from the query or, failing that, the courier's last reported location.",
    params(AvailabilityQuery),
    responses(
        (status = 200, description = "Feed retrieved successfully", body = ApiResponse<Vec<AvailableDelivery>>),
        (status = 400, description = "Invalid coordinates", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a courier", body = crate::errors::ErrorResponse),
    ),
    tag = "deliveries"
)]
pub async fn available_deliveries(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Vec<AvailableDelivery>> {
    identity.require_role(ActorRole::Courier)?;

    let near = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => {
            let point = GeoPoint::new(lat, lng);
            if !point.is_valid() {
                return Err(ServiceError::ValidationError(
                    "Coordinates must lie within [-90, 90] x [-180, 180]".to_string(),
                ));
            }
            Some(point)
        }
        (None, None) => None,
        _ => {
            return Err(ServiceError::ValidationError(
                "lat and lng must be provided together".to_string(),
            ))
        }
    };

    let feed = state
        .services
        .assignment
        .available_deliveries(identity.user_id, near, query.radius_km)
        .await?;
    Ok(Json(ApiResponse::success(feed)))
}

/// Claim a delivery for the calling courier
#[utoipa::path(
    post,
    path = "/api/v1/deliveries/{order_id}/claim",
    summary = "Claim delivery",
    description = "Atomically assign the delivery to the caller. Exactly one courier \
        wins a contested order; the rest get a conflict. Re-claiming an order the \
        caller already holds succeeds without changing anything.",
    params(
        ("order_id" = Uuid, Path, description = "Order to claim")
    ),
    responses(
        (status = 200, description = "Delivery claimed", body = ApiResponse<order::Model>),
        (status = 403, description = "Caller is not a courier", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Another courier holds the delivery", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is not claimable", body = crate::errors::ErrorResponse),
    ),
    tag = "deliveries"
)]
pub async fn claim_delivery(
    State(state): State<AppState>,
    identity: Identity,
    Path(order_id): Path<Uuid>,
) -> ApiResult<order::Model> {
    identity.require_role(ActorRole::Courier)?;
    let order = state
        .services
        .assignment
        .claim_delivery(identity.user_id, order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Release a delivery back to the pool
#[utoipa::path(
    post,
    path = "/api/v1/deliveries/{order_id}/release",
    summary = "Release delivery",
    description = "Give up a claimed delivery. The order returns to `ready` and \
        becomes claimable again; any progress past pickup is rolled back to the \
        handoff point.",
    params(
        ("order_id" = Uuid, Path, description = "Order to release")
    ),
    request_body = ReleaseRequest,
    responses(
        (status = 200, description = "Delivery released", body = ApiResponse<order::Model>),
        (status = 403, description = "Caller does not hold this delivery", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is not in a releasable status", body = crate::errors::ErrorResponse),
    ),
    tag = "deliveries"
)]
pub async fn release_delivery(
    State(state): State<AppState>,
    identity: Identity,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<ReleaseRequest>,
) -> ApiResult<order::Model> {
    identity.require_role(ActorRole::Courier)?;
    let order = state
        .services
        .assignment
        .release_delivery(identity.user_id, order_id, payload.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Hand a delivery to a different courier
#[utoipa::path(
    post,
    path = "/api/v1/deliveries/{order_id}/reassign",
    summary = "Reassign delivery",
    description = "Operator action: release the current courier, if any, and assign \
        the named one in a single step. Reassigning to the courier already holding \
        the order is a no-op.",
    params(
        ("order_id" = Uuid, Path, description = "Order to reassign")
    ),
    request_body = ReassignRequest,
    responses(
        (status = 200, description = "Delivery reassigned", body = ApiResponse<order::Model>),
        (status = 403, description = "Caller is not a system operator", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order cannot be handed off", body = crate::errors::ErrorResponse),
    ),
    tag = "deliveries"
)]
pub async fn reassign_delivery(
    State(state): State<AppState>,
    identity: Identity,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<ReassignRequest>,
) -> ApiResult<order::Model> {
    identity.require_role(ActorRole::System)?;
    let order = state
        .services
        .assignment
        .reassign_delivery(order_id, payload.courier_id, payload.reason)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
