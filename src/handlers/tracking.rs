use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Identity,
    entities::ActorRole,
    errors::ServiceError,
    services::{
        geo::GeoPoint,
        realtime::{LocationOutcome, TrackingEvent},
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({ "lat": 52.5208, "lng": 13.4095 }))]
pub struct LocationReport {
    pub lat: f64,
    pub lng: f64,
}

/// Report the courier's position for an order in delivery
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/location",
    summary = "Report courier location",
    description = "Accepts a position ping from the assigned courier. Pings that \
        arrive too soon or too close to the last accepted one are suppressed rather \
        than broadcast; both outcomes are a success.",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = LocationReport,
    responses(
        (status = 200, description = "Ping processed", body = ApiResponse<LocationOutcome>),
        (status = 400, description = "Malformed coordinates", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not the assigned courier", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is not being delivered", body = crate::errors::ErrorResponse),
    ),
    tag = "tracking"
)]
pub async fn report_location(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(report): Json<LocationReport>,
) -> ApiResult<LocationOutcome> {
    identity.require_role(ActorRole::Courier)?;
    let outcome = state
        .services
        .realtime
        .report_location(identity.user_id, id, GeoPoint::new(report.lat, report.lng))
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Live status and location events for an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/events",
    summary = "Subscribe to order events",
    description = "Server-sent events carrying status changes and courier positions \
        for one order. The stream closes after a `tracking_ended` event when the \
        order reaches a terminal status. Only participants may subscribe.",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Event stream opened", content_type = "text/event-stream"),
        (status = 403, description = "Caller is not a participant", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Tracking for the order has ended", body = crate::errors::ErrorResponse),
    ),
    tag = "tracking"
)]
pub async fn order_events(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ServiceError> {
    let receiver = state.services.realtime.subscribe(id, identity).await?;

    let stream = stream::unfold(Some(receiver), |state| async move {
        let mut receiver = state?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let ended = matches!(event, TrackingEvent::TrackingEnded { .. });
                    let sse = match SseEvent::default()
                        .event(event_name(&event))
                        .json_data(&event)
                    {
                        Ok(sse) => sse,
                        Err(_) => continue,
                    };
                    let next = if ended { None } else { Some(receiver) };
                    return Some((Ok::<_, Infallible>(sse), next));
                }
                // Slow consumers skip what they missed and pick up from the
                // next event; clients resync by re-fetching the order.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn event_name(event: &TrackingEvent) -> &'static str {
    match event {
        TrackingEvent::StatusChanged { .. } => "status_changed",
        TrackingEvent::CourierLocation { .. } => "courier_location",
        TrackingEvent::TrackingEnded { .. } => "tracking_ended",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn event_names_match_wire_tags() {
        let ended = TrackingEvent::TrackingEnded {
            order_id: Uuid::new_v4(),
        };
        assert_eq!(event_name(&ended), "tracking_ended");

        let status = TrackingEvent::StatusChanged {
            order_id: Uuid::new_v4(),
            status: crate::entities::OrderStatus::Ready,
            actor_role: ActorRole::Merchant,
            occurred_at: Utc::now(),
        };
        // The SSE event name agrees with the JSON "type" tag.
        let body = serde_json::to_value(&status).unwrap();
        assert_eq!(body["type"], event_name(&status));
    }
}
