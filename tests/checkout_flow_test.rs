//! Integration tests for the cart to order checkout flow.
//!
//! Checkout re-prices every line from the live catalog, enforces the
//! merchant minimum and commits order plus cart clear atomically; a failed
//! checkout must leave the cart exactly as it was.

mod common;

use axum::http::StatusCode;
use common::*;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use dispatch_api::entities::listing;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

// ==================== Happy Path ====================

#[tokio::test]
async fn checkout_turns_the_cart_into_a_priced_order() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();
    let merchant = seed_merchant(&app, "Trattoria Uno", dec!(3.00), dec!(10.00), (52.52, 13.405)).await;
    let pizza = seed_listing(&app, merchant.id, "Margherita", dec!(11.50), true).await;
    let salad = seed_listing(&app, merchant.id, "Caprese", dec!(4.25), true).await;

    for (listing_id, quantity) in [(pizza.id, 2), (salad.id, 3)] {
        let response = app
            .post(
                "/api/v1/cart/items",
                (customer, "customer"),
                json!({ "listing_id": listing_id, "quantity": quantity }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .post("/api/v1/checkout", (customer, "customer"), checkout_payload())
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let order = &body["data"];

    assert_eq!(order["status"], "pending");
    assert_eq!(order["delivery_type"], "courier");
    assert_eq!(order["customer_id"], customer.to_string());
    assert_eq!(order["merchant_id"], merchant.id.to_string());
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
    assert_eq!(order["payment_status"], "pending");

    // 2 x 11.50 + 3 x 4.25 plus the 10% service fee and 8% tax defaults.
    assert_eq!(money(&order["subtotal"]), dec!(35.75));
    assert_eq!(money(&order["delivery_fee"]), dec!(3.00));
    assert_eq!(money(&order["service_fee"]), dec!(3.58));
    assert_eq!(money(&order["tax"]), dec!(2.86));
    assert_eq!(money(&order["total"]), dec!(45.19));

    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    let pizza_line = items
        .iter()
        .find(|item| item["name"] == "Margherita")
        .expect("pizza line present");
    assert_eq!(money(&pizza_line["unit_price"]), dec!(11.50));
    assert_eq!(pizza_line["quantity"], 2);
    assert_eq!(money(&pizza_line["total_price"]), dec!(23.00));

    let history = order["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["status"], "pending");
    assert_eq!(history[0]["actor_role"], "customer");

    // The cart was cleared in the same transaction.
    let response = app.get("/api/v1/cart", (customer, "customer")).await;
    let cart = body_json(response).await;
    assert!(cart["data"]["items"].as_array().unwrap().is_empty());
    assert!(cart["data"]["merchant_id"].is_null());
}

#[tokio::test]
async fn checkout_reprices_lines_from_the_live_catalog() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();
    let merchant = seed_merchant(&app, "Pho Corner", dec!(2.00), dec!(5.00), (52.52, 13.405)).await;
    let bowl = seed_listing(&app, merchant.id, "Pho Bo", dec!(11.50), true).await;

    let response = app
        .post(
            "/api/v1/cart/items",
            (customer, "customer"),
            json!({ "listing_id": bowl.id, "quantity": 2 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The merchant raises the price after the cart snapshot was taken.
    let mut repriced: listing::ActiveModel = listing::Entity::find_by_id(bowl.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    repriced.price = Set(dec!(13.00));
    repriced.update(&*app.state.db).await.unwrap();

    let response = app
        .post("/api/v1/checkout", (customer, "customer"), checkout_payload())
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;

    assert_eq!(money(&body["data"]["subtotal"]), dec!(26.00));
    assert_eq!(money(&body["data"]["items"][0]["unit_price"]), dec!(13.00));
}

#[tokio::test]
async fn order_money_is_frozen_at_checkout() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();
    let merchant = seed_merchant(&app, "Ramen Ya", dec!(2.50), dec!(5.00), (52.52, 13.405)).await;
    let ramen = seed_listing(&app, merchant.id, "Shoyu Ramen", dec!(12.00), true).await;

    let response = app
        .post(
            "/api/v1/cart/items",
            (customer, "customer"),
            json!({ "listing_id": ramen.id, "quantity": 2 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post("/api/v1/checkout", (customer, "customer"), checkout_payload())
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let order_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();
    let placed_subtotal = money(&body["data"]["subtotal"]);
    let placed_total = money(&body["data"]["total"]);

    // The catalog moves on after checkout; the order must not.
    let mut repriced: listing::ActiveModel = listing::Entity::find_by_id(ramen.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    repriced.price = Set(dec!(99.00));
    repriced.update(&*app.state.db).await.unwrap();

    let response = put_status(&app, order_id, (merchant.id, "merchant"), "confirmed").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get(&format!("/api/v1/orders/{}", order_id), (customer, "customer"))
        .await;
    let body = body_json(response).await;
    assert_eq!(money(&body["data"]["subtotal"]), placed_subtotal);
    assert_eq!(money(&body["data"]["total"]), placed_total);
    assert_eq!(
        money(&body["data"]["items"][0]["unit_price"]),
        dec!(12.00)
    );
}

#[tokio::test]
async fn pickup_checkout_waives_the_delivery_fee() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();
    let merchant = seed_merchant(&app, "Taqueria", dec!(4.00), dec!(5.00), (52.52, 13.405)).await;
    let tacos = seed_listing(&app, merchant.id, "Tacos al Pastor", dec!(9.00), true).await;

    let response = app
        .post(
            "/api/v1/cart/items",
            (customer, "customer"),
            json!({ "listing_id": tacos.id, "quantity": 2 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut payload = checkout_payload();
    payload["delivery_type"] = json!("pickup");
    let response = app.post("/api/v1/checkout", (customer, "customer"), payload).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;

    assert_eq!(body["data"]["delivery_type"], "pickup");
    assert_eq!(money(&body["data"]["delivery_fee"]), dec!(0));
}

// ==================== Rejections ====================

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();

    let response = app
        .post("/api/v1/checkout", (customer, "customer"), checkout_payload())
        .await;
    expect_error(response, StatusCode::UNPROCESSABLE_ENTITY, "empty_cart").await;
}

#[tokio::test]
async fn subtotal_below_the_merchant_minimum_is_rejected() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();
    let merchant = seed_merchant(&app, "Steakhouse", dec!(5.00), dec!(50.00), (52.52, 13.405)).await;
    let fries = seed_listing(&app, merchant.id, "Fries", dec!(4.00), true).await;

    let response = app
        .post(
            "/api/v1/cart/items",
            (customer, "customer"),
            json!({ "listing_id": fries.id, "quantity": 2 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post("/api/v1/checkout", (customer, "customer"), checkout_payload())
        .await;
    let body = expect_error(
        response,
        StatusCode::UNPROCESSABLE_ENTITY,
        "minimum_order_not_met",
    )
    .await;
    assert!(body["message"].as_str().unwrap().contains("minimum"));

    // The failed checkout left the cart untouched.
    let response = app.get("/api/v1/cart", (customer, "customer")).await;
    let cart = body_json(response).await;
    assert_eq!(cart["data"]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unavailable_items_block_checkout_and_keep_the_cart() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();
    let merchant = seed_merchant(&app, "Sushi Ya", dec!(3.00), dec!(5.00), (52.52, 13.405)).await;
    let rolls = seed_listing(&app, merchant.id, "Dragon Roll", dec!(14.00), true).await;

    let response = app
        .post(
            "/api/v1/cart/items",
            (customer, "customer"),
            json!({ "listing_id": rolls.id, "quantity": 1 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The kitchen runs out while the cart sits idle.
    let mut gone: listing::ActiveModel = listing::Entity::find_by_id(rolls.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    gone.is_available = Set(false);
    gone.update(&*app.state.db).await.unwrap();

    let response = app
        .post("/api/v1/checkout", (customer, "customer"), checkout_payload())
        .await;
    let body = expect_error(response, StatusCode::UNPROCESSABLE_ENTITY, "item_unavailable").await;
    assert!(body["message"].as_str().unwrap().contains("Dragon Roll"));

    let response = app.get("/api/v1/cart", (customer, "customer")).await;
    let cart = body_json(response).await;
    assert_eq!(cart["data"]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_delivery_details_are_rejected_before_any_write() {
    let app = spawn_app().await;
    let customer = Uuid::new_v4();
    let merchant = seed_merchant(&app, "Curry House", dec!(3.00), dec!(5.00), (52.52, 13.405)).await;
    let curry = seed_listing(&app, merchant.id, "Madras", dec!(12.00), true).await;

    let response = app
        .post(
            "/api/v1/cart/items",
            (customer, "customer"),
            json!({ "listing_id": curry.id, "quantity": 1 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut bad_phone = checkout_payload();
    bad_phone["contact_phone"] = json!("555-CALL");
    let response = app.post("/api/v1/checkout", (customer, "customer"), bad_phone).await;
    expect_error(response, StatusCode::BAD_REQUEST, "invalid_delivery_info").await;

    let mut bad_coords = checkout_payload();
    bad_coords["lat"] = json!(123.0);
    let response = app.post("/api/v1/checkout", (customer, "customer"), bad_coords).await;
    expect_error(response, StatusCode::BAD_REQUEST, "invalid_delivery_info").await;

    let mut blank_street = checkout_payload();
    blank_street["street"] = json!("   ");
    let response = app
        .post("/api/v1/checkout", (customer, "customer"), blank_street)
        .await;
    expect_error(response, StatusCode::BAD_REQUEST, "invalid_delivery_info").await;

    let mut no_payment = checkout_payload();
    no_payment["payment_method"] = json!("");
    let response = app.post("/api/v1/checkout", (customer, "customer"), no_payment).await;
    expect_error(response, StatusCode::BAD_REQUEST, "validation_error").await;

    // Nothing was ordered and the cart still holds its line.
    let response = app.get("/api/v1/cart", (customer, "customer")).await;
    let cart = body_json(response).await;
    assert_eq!(cart["data"]["items"].as_array().unwrap().len(), 1);

    let response = app.get("/api/v1/orders", (customer, "customer")).await;
    let orders = body_json(response).await;
    assert_eq!(orders["data"]["total"], 0);
}

#[tokio::test]
async fn checkout_requires_the_customer_role() {
    let app = spawn_app().await;

    let response = app
        .post(
            "/api/v1/checkout",
            (Uuid::new_v4(), "courier"),
            checkout_payload(),
        )
        .await;
    expect_error(response, StatusCode::FORBIDDEN, "access_denied").await;
}
