//! Tests for live tracking: courier location pings, the movement gate and
//! the per-order event stream. Broadcast delivery is asserted through real
//! service subscriptions; the SSE endpoint is exercised over HTTP.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::*;
use dispatch_api::{
    auth::Identity,
    entities::{ActorRole, OrderStatus},
    errors::ServiceError,
    services::realtime::TrackingEvent,
};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;
use uuid::Uuid;

async fn claim(app: &TestApp, order_id: Uuid, courier: Uuid) {
    let response = app
        .post_empty(
            &format!("/api/v1/deliveries/{}/claim", order_id),
            (courier, "courier"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

async fn ping(app: &TestApp, order_id: Uuid, courier: Uuid, lat: f64, lng: f64) -> serde_json::Value {
    let response = app
        .post(
            &format!("/api/v1/orders/{}/location", order_id),
            (courier, "courier"),
            json!({ "lat": lat, "lng": lng }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

// ==================== Location Reporting ====================

#[tokio::test]
async fn the_assigned_courier_streams_positions() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;
    let courier = Uuid::new_v4();
    drive_to_ready(&app, placed.order_id, placed.merchant_id).await;
    claim(&app, placed.order_id, courier).await;

    let mut rx = app
        .state
        .services
        .realtime
        .subscribe(
            placed.order_id,
            Identity::new(placed.customer_id, ActorRole::Customer),
        )
        .await
        .unwrap();

    let body = ping(&app, placed.order_id, courier, 52.5210, 13.4060).await;
    assert_eq!(body["data"], "accepted");

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .unwrap();
    match event {
        TrackingEvent::CourierLocation {
            courier_id,
            location,
            ..
        } => {
            assert_eq!(courier_id, courier);
            assert!((location.lat - 52.5210).abs() < 1e-9);
        }
        other => panic!("expected a courier location, got {:?}", other),
    }
}

#[tokio::test]
async fn rapid_pings_are_suppressed_but_still_update_presence() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;
    let courier = Uuid::new_v4();
    drive_to_ready(&app, placed.order_id, placed.merchant_id).await;
    claim(&app, placed.order_id, courier).await;

    let mut rx = app
        .state
        .services
        .realtime
        .subscribe(
            placed.order_id,
            Identity::new(placed.customer_id, ActorRole::Customer),
        )
        .await
        .unwrap();

    let body = ping(&app, placed.order_id, courier, 52.5210, 13.4060).await;
    assert_eq!(body["data"], "accepted");

    // Second ping lands immediately, well inside the minimum interval.
    let body = ping(&app, placed.order_id, courier, 52.5230, 13.4080).await;
    assert_eq!(body["data"], "suppressed");

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .unwrap();
    assert!(matches!(event, TrackingEvent::CourierLocation { .. }));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    // The suppressed ping still refreshed the courier's known position.
    let presence = app
        .state
        .services
        .realtime
        .courier_position(courier)
        .unwrap();
    assert!((presence.location.lat - 52.5230).abs() < 1e-9);
}

#[tokio::test]
async fn unmoved_couriers_do_not_spam_subscribers() {
    let app = spawn_app_with(|config| {
        config.location_min_interval_secs = 0;
    })
    .await;
    let placed = place_order(&app).await;
    let courier = Uuid::new_v4();
    drive_to_ready(&app, placed.order_id, placed.merchant_id).await;
    claim(&app, placed.order_id, courier).await;

    let body = ping(&app, placed.order_id, courier, 52.5200, 13.4050).await;
    assert_eq!(body["data"], "accepted");

    // Same spot again: the interval gate is off but the courier has not moved.
    let body = ping(&app, placed.order_id, courier, 52.5200, 13.4050).await;
    assert_eq!(body["data"], "suppressed");

    // Roughly 300 meters north clears the distance gate.
    let body = ping(&app, placed.order_id, courier, 52.5227, 13.4050).await;
    assert_eq!(body["data"], "accepted");
}

#[tokio::test]
async fn only_the_assigned_courier_reports_locations() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;
    let courier = Uuid::new_v4();
    drive_to_ready(&app, placed.order_id, placed.merchant_id).await;

    // Nobody holds the order yet.
    let response = app
        .post(
            &format!("/api/v1/orders/{}/location", placed.order_id),
            (courier, "courier"),
            json!({ "lat": 52.52, "lng": 13.405 }),
        )
        .await;
    expect_error(response, StatusCode::FORBIDDEN, "access_denied").await;

    claim(&app, placed.order_id, courier).await;

    let response = app
        .post(
            &format!("/api/v1/orders/{}/location", placed.order_id),
            (Uuid::new_v4(), "courier"),
            json!({ "lat": 52.52, "lng": 13.405 }),
        )
        .await;
    let body = expect_error(response, StatusCode::FORBIDDEN, "access_denied").await;
    assert!(body["message"].as_str().unwrap().contains("assigned courier"));
}

#[tokio::test]
async fn pings_stop_once_the_delivery_concludes() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;
    let courier = Uuid::new_v4();
    drive_to_ready(&app, placed.order_id, placed.merchant_id).await;
    claim(&app, placed.order_id, courier).await;

    for status in ["picked_up", "in_transit", "delivered"] {
        let response = put_status(&app, placed.order_id, (courier, "courier"), status).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .post(
            &format!("/api/v1/orders/{}/location", placed.order_id),
            (courier, "courier"),
            json!({ "lat": 52.52, "lng": 13.405 }),
        )
        .await;
    let body = expect_error(response, StatusCode::UNPROCESSABLE_ENTITY, "not_eligible").await;
    assert!(body["message"].as_str().unwrap().contains("not being delivered"));
}

#[tokio::test]
async fn malformed_coordinates_are_rejected() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;
    let courier = Uuid::new_v4();
    drive_to_ready(&app, placed.order_id, placed.merchant_id).await;
    claim(&app, placed.order_id, courier).await;

    let response = app
        .post(
            &format!("/api/v1/orders/{}/location", placed.order_id),
            (courier, "courier"),
            json!({ "lat": 123.0, "lng": 13.405 }),
        )
        .await;
    let body = expect_error(response, StatusCode::BAD_REQUEST, "validation_error").await;
    assert!(body["message"].as_str().unwrap().contains("Coordinates"));
}

// ==================== Subscriptions ====================

#[tokio::test]
async fn subscriptions_are_scoped_to_participants() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;

    let err = app
        .state
        .services
        .realtime
        .subscribe(
            placed.order_id,
            Identity::new(Uuid::new_v4(), ActorRole::Customer),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied(_)));

    let err = app
        .state
        .services
        .realtime
        .subscribe(
            Uuid::new_v4(),
            Identity::new(placed.customer_id, ActorRole::Customer),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // Once the order is terminal there is nothing left to follow.
    let response = app
        .post(
            &format!("/api/v1/orders/{}/cancel", placed.order_id),
            (Uuid::new_v4(), "system"),
            json!({ "reason": "Test shutdown" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let err = app
        .state
        .services
        .realtime
        .subscribe(
            placed.order_id,
            Identity::new(placed.customer_id, ActorRole::Customer),
        )
        .await
        .unwrap_err();
    match err {
        ServiceError::NotEligible(message) => assert!(message.contains("ended")),
        other => panic!("expected a tracking-over rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn status_changes_reach_subscribers_live() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;

    let mut rx = app
        .state
        .services
        .realtime
        .subscribe(
            placed.order_id,
            Identity::new(placed.customer_id, ActorRole::Customer),
        )
        .await
        .unwrap();

    let response = put_status(&app, placed.order_id, (placed.merchant_id, "merchant"), "confirmed").await;
    assert_eq!(response.status(), StatusCode::OK);

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .unwrap();
    match event {
        TrackingEvent::StatusChanged {
            status, actor_role, ..
        } => {
            assert_eq!(status, OrderStatus::Confirmed);
            assert_eq!(actor_role, ActorRole::Merchant);
        }
        other => panic!("expected a status change, got {:?}", other),
    }
}

#[tokio::test]
async fn the_event_stream_closes_after_a_terminal_transition() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;

    let response = app
        .get(
            &format!("/api/v1/orders/{}/events", placed.order_id),
            (placed.customer_id, "customer"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let cancel = app
        .post(
            &format!("/api/v1/orders/{}/cancel", placed.order_id),
            (Uuid::new_v4(), "system"),
            json!({ "reason": "Merchant closed early" }),
        )
        .await;
    assert_eq!(cancel.status(), StatusCode::OK);

    // The terminal transition ends the stream, so the body drains to EOF.
    let bytes = timeout(
        Duration::from_secs(5),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("stream did not close")
    .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("status_changed"));
    assert!(text.contains("\"cancelled\""));
    assert!(text.contains("tracking_ended"));
}

#[tokio::test]
async fn strangers_cannot_open_the_event_stream() {
    let app = spawn_app().await;
    let placed = place_order(&app).await;

    let response = app
        .get(
            &format!("/api/v1/orders/{}/events", placed.order_id),
            (Uuid::new_v4(), "customer"),
        )
        .await;
    expect_error(response, StatusCode::FORBIDDEN, "access_denied").await;
}
