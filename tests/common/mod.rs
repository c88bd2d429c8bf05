//! Shared harness for the integration tests.
//!
//! Each test gets its own in-process app over a fresh in-memory SQLite
//! database, and talks to it through the real router with `tower::oneshot`.
//! No network, no shared state between tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

use dispatch_api::auth::{USER_ID_HEADER, USER_ROLE_HEADER};
use dispatch_api::config::AppConfig;
use dispatch_api::entities::{listing, merchant};
use dispatch_api::events::{self, EventSender};
use dispatch_api::handlers::AppServices;
use dispatch_api::{api_v1_routes, db, AppState};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _event_task: JoinHandle<()>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Boots the app with test defaults, letting the caller tweak the config
/// before anything is wired up.
pub async fn spawn_app_with(tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let mut config: AppConfig =
        serde_json::from_value(json!({})).expect("defaults deserialize");

    // An in-memory SQLite database lives exactly as long as its connection,
    // so the pool is pinned to a single connection for the whole test.
    config.database_url = "sqlite::memory:".to_string();
    config.db_max_connections = 1;
    config.db_min_connections = 1;
    config.auto_migrate = true;
    tweak(&mut config);

    let pool = db::establish_connection_from_app_config(&config)
        .await
        .expect("test database connects");
    db::run_migrations(&pool).await.expect("migrations apply");

    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = Arc::new(EventSender::new(event_tx));
    let event_task = tokio::spawn(events::process_events(event_rx));

    let db = Arc::new(pool);
    let config = Arc::new(config);
    let services = AppServices::new(db.clone(), event_sender.clone(), config.clone());
    let state = AppState {
        db,
        config,
        event_sender,
        services,
    };

    let router = Router::new()
        .nest("/api/v1", api_v1_routes())
        .with_state(state.clone());

    TestApp {
        router,
        state,
        _event_task: event_task,
    }
}

/// An actor as the gateway would present it: a user id plus a role string.
pub type Actor<'a> = (Uuid, &'a str);

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        actor: Option<Actor<'_>>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user_id, role)) = actor {
            builder = builder
                .header(USER_ID_HEADER, user_id.to_string())
                .header(USER_ROLE_HEADER, role);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router never fails")
    }

    pub async fn get(&self, uri: &str, actor: Actor<'_>) -> Response<Body> {
        self.request(Method::GET, uri, Some(actor), None).await
    }

    pub async fn post(&self, uri: &str, actor: Actor<'_>, body: Value) -> Response<Body> {
        self.request(Method::POST, uri, Some(actor), Some(body)).await
    }

    /// POST without a body, for endpoints like claim that take none.
    pub async fn post_empty(&self, uri: &str, actor: Actor<'_>) -> Response<Body> {
        self.request(Method::POST, uri, Some(actor), None).await
    }

    pub async fn put(&self, uri: &str, actor: Actor<'_>, body: Value) -> Response<Body> {
        self.request(Method::PUT, uri, Some(actor), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, actor: Actor<'_>) -> Response<Body> {
        self.request(Method::DELETE, uri, Some(actor), None).await
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    serde_json::from_slice(&bytes).expect("body is JSON")
}

/// Parses a serialized money field into a `Decimal`, so comparisons ignore
/// trailing-zero scale differences.
pub fn money(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("money serializes as a string")
        .parse()
        .expect("money parses")
}

/// Asserts an error response and returns its body for closer inspection.
pub async fn expect_error(
    response: Response<Body>,
    status: StatusCode,
    code: &str,
) -> Value {
    assert_eq!(response.status(), status);
    let body = body_json(response).await;
    assert_eq!(body["code"], code, "unexpected error body: {}", body);
    body
}

pub async fn seed_merchant(
    app: &TestApp,
    name: &str,
    delivery_fee: Decimal,
    minimum_order: Decimal,
    pickup: (f64, f64),
) -> merchant::Model {
    merchant::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        delivery_fee: Set(delivery_fee),
        minimum_order: Set(minimum_order),
        pickup_lat: Set(pickup.0),
        pickup_lng: Set(pickup.1),
        created_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("merchant inserts")
}

pub async fn seed_listing(
    app: &TestApp,
    merchant_id: Uuid,
    name: &str,
    price: Decimal,
    is_available: bool,
) -> listing::Model {
    listing::ActiveModel {
        id: Set(Uuid::new_v4()),
        merchant_id: Set(merchant_id),
        name: Set(name.to_string()),
        price: Set(price),
        is_available: Set(is_available),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("listing inserts")
}

/// Well-formed delivery details for checkout requests.
pub fn checkout_payload() -> Value {
    json!({
        "street": "12 Market Lane",
        "city": "Springfield",
        "lat": 52.5200,
        "lng": 13.4050,
        "contact_phone": "+49 151 2345 6789",
        "payment_method": "cash"
    })
}

pub struct PlacedOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub merchant_id: Uuid,
    pub listing_id: Uuid,
}

/// Seeds a merchant with one listing and walks a fresh customer through
/// cart and checkout. The order comes back in `pending`.
pub async fn place_order(app: &TestApp) -> PlacedOrder {
    let customer_id = Uuid::new_v4();
    let merchant =
        seed_merchant(app, "Trattoria Uno", dec!(3.00), dec!(10.00), (52.5200, 13.4050)).await;
    let listing = seed_listing(app, merchant.id, "Margherita", dec!(11.50), true).await;

    let response = app
        .post(
            "/api/v1/cart/items",
            (customer_id, "customer"),
            json!({ "listing_id": listing.id, "quantity": 2 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post("/api/v1/checkout", (customer_id, "customer"), checkout_payload())
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;

    PlacedOrder {
        order_id: body["data"]["id"].as_str().unwrap().parse().unwrap(),
        order_number: body["data"]["order_number"].as_str().unwrap().to_string(),
        customer_id,
        merchant_id: merchant.id,
        listing_id: listing.id,
    }
}

pub async fn put_status(
    app: &TestApp,
    order_id: Uuid,
    actor: Actor<'_>,
    status: &str,
) -> Response<Body> {
    app.put(
        &format!("/api/v1/orders/{}/status", order_id),
        actor,
        json!({ "status": status }),
    )
    .await
}

/// Walks a pending order to `ready` through the merchant transitions.
pub async fn drive_to_ready(app: &TestApp, order_id: Uuid, merchant_id: Uuid) {
    for status in ["confirmed", "preparing", "ready"] {
        let response = put_status(app, order_id, (merchant_id, "merchant"), status).await;
        assert_eq!(
            response.status(),
            StatusCode::OK,
            "transition to {} failed",
            status
        );
    }
}
