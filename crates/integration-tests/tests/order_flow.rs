//! Cart, order placement, the status state machine and payment
//! reconciliation over HTTP.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::{Value, json};

use ratna_integration_tests::ratna_core::{Clock, Price, ShippingRateId};
use ratna_integration_tests::{TestApp, address, price};

/// A customer with two Rs. 2500 pieces in the cart and a Rs. 100 rate.
async fn stocked(app: &TestApp, email: &str) -> (String, ShippingRateId) {
    let token = app.signed_up(email).await;
    let bangle = app.product("Gold bangle", 2500).await;
    app.add_to_cart(&token, bangle, 2).await;
    let rate = app.shipping_rate("Inside valley", 100).await;
    (token, rate)
}

fn number_of(order: &Value) -> String {
    order["order_number"].as_str().unwrap().to_owned()
}

fn event(kind: &str, order: &Value) -> Vec<u8> {
    json!({
        "id": "evt_int_1",
        "type": kind,
        "data": {"object": {
            "id": "cs_test_1",
            "payment_intent": "pi_int_1",
            "payment_status": "paid",
            "metadata": {
                "order_id": order["id"].to_string(),
                "order_number": number_of(order),
            }
        }}
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn test_paid_order_reads_back_confirmed() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let (token, rate) = stocked(&app, "buyer@example.com").await;

    let order = app.place_order(&token, rate, "CASH_ON_DELIVERY").await;
    assert_eq!(price(&order["subtotal"]), Price::from_rupees(5000));
    assert_eq!(price(&order["total"]), Price::from_rupees(5100));
    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["payment"]["status"], "PENDING");

    let (_, cart) = app.get("/api/cart", Some(&token)).await;
    assert!(cart["items"].as_array().unwrap().is_empty());

    let number = number_of(&order);
    let (status, _) = app
        .put(
            &format!("/api/admin/orders/{number}/payment"),
            Some(&admin),
            json!({"status": "PAID", "transaction_id": "bank-ref-77"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, stored) = app.get(&format!("/api/orders/{number}"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["status"], "CONFIRMED");
    assert_eq!(stored["payment"]["status"], "PAID");
    assert_eq!(stored["payment"]["transaction_id"], "bank-ref-77");
    assert_eq!(price(&stored["total"]), Price::from_rupees(5100));

    let (_, notes) = app.get("/api/account/notifications", Some(&token)).await;
    assert!(notes.as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn test_card_checkout_then_webhook_confirms() {
    let app = TestApp::new();
    let (token, rate) = stocked(&app, "card@example.com").await;
    let order = app.place_order(&token, rate, "CARD_PROVIDER").await;
    let number = number_of(&order);

    let (status, session) = app
        .post(&format!("/api/orders/{number}/checkout"), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{session}");
    assert!(session["url"].as_str().unwrap().starts_with("https://checkout.example/"));

    let requests = app.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, Price::from_rupees(5100));
    assert_eq!(requests[0].order_number.as_str(), number);
    assert!(requests[0].success_url.starts_with("https://shop.example/orders/"));

    let body = event("checkout.session.completed", &order);
    let (status, outcome) = app.webhook(&body, Some(&app.sign(&body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["result"], "applied");
    assert_eq!(outcome["order_status"], "CONFIRMED");

    let (_, stored) = app.get(&format!("/api/orders/{number}"), Some(&token)).await;
    assert_eq!(stored["status"], "CONFIRMED");
    assert_eq!(stored["payment"]["status"], "PAID");
    assert_eq!(stored["payment"]["transaction_id"], "pi_int_1");

    // Once paid, no second checkout.
    let (status, _) = app
        .post(&format!("/api/orders/{number}/checkout"), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let app = TestApp::new();
    let (token, rate) = stocked(&app, "sig@example.com").await;
    let order = app.place_order(&token, rate, "CARD_PROVIDER").await;
    let number = number_of(&order);
    let body = event("checkout.session.completed", &order);

    let (status, _) = app.webhook(&body, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let forged = format!("t={},v1={}", app.clock.now().timestamp(), "ab".repeat(32));
    let (status, _) = app.webhook(&body, Some(&forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A valid signature over a different body.
    let other = event("payment_intent.payment_failed", &order);
    let (status, _) = app.webhook(&body, Some(&app.sign(&other))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Stale delivery.
    let signature = app.sign(&body);
    app.clock.advance(Duration::minutes(6));
    let (status, _) = app.webhook(&body, Some(&signature)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stored) = app.get(&format!("/api/orders/{number}"), Some(&token)).await;
    assert_eq!(stored["status"], "PENDING");
    assert_eq!(stored["payment"]["status"], "PENDING");
}

#[tokio::test]
async fn test_unhandled_and_orphan_events_are_acknowledged() {
    let app = TestApp::new();
    let (token, rate) = stocked(&app, "orphan@example.com").await;
    let order = app.place_order(&token, rate, "CARD_PROVIDER").await;

    let body = event("customer.created", &order);
    let (status, outcome) = app.webhook(&body, Some(&app.sign(&body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["result"], "ignored");

    let orphan = json!({
        "id": "evt_orphan",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_x", "metadata": {"order_number": "RTN-ZZZ-9999"}}}
    })
    .to_string()
    .into_bytes();
    let (status, outcome) = app.webhook(&orphan, Some(&app.sign(&orphan))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["result"], "order_missing");
}

#[tokio::test]
async fn test_failed_payment_leaves_order_pending() {
    let app = TestApp::new();
    let (token, rate) = stocked(&app, "declined@example.com").await;
    let order = app.place_order(&token, rate, "CARD_PROVIDER").await;

    let body = event("payment_intent.payment_failed", &order);
    let (status, outcome) = app.webhook(&body, Some(&app.sign(&body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["payment_status"], "FAILED");
    assert_eq!(outcome["order_status"], "PENDING");
}

#[tokio::test]
async fn test_order_creation_rejections() {
    let app = TestApp::new();
    let token = app.signed_up("reject@example.com").await;
    let admin = app.admin().await;
    let rate = app.shipping_rate("Courier", 150).await;

    // Empty cart.
    let (status, _) = app
        .post(
            "/api/orders",
            Some(&token),
            json!({"shipping_rate_id": rate, "payment_method": "CASH_ON_DELIVERY", "shipping_address": address()}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let ring = app.product("Silver ring", 1200).await;
    app.add_to_cart(&token, ring, 1).await;

    // Inactive rate: rejected and the cart is kept.
    let (status, retired) = app
        .post(
            "/api/admin/shipping-rates",
            Some(&admin),
            json!({"name": "Retired", "cost": "80", "is_active": false}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app
        .post(
            "/api/orders",
            Some(&token),
            json!({"shipping_rate_id": retired["id"], "payment_method": "CASH_ON_DELIVERY", "shipping_address": address()}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, cart) = app.get("/api/cart", Some(&token)).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);

    // Incomplete address.
    let mut partial = address();
    partial["city"] = json!("  ");
    let (status, _) = app
        .post(
            "/api/orders",
            Some(&token),
            json!({"shipping_rate_id": rate, "payment_method": "CASH_ON_DELIVERY", "shipping_address": partial}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Public listing shows only active rates.
    let (_, rates) = app.get("/api/shipping-rates", None).await;
    let names: Vec<_> = rates
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Courier"]);
}

#[tokio::test]
async fn test_owner_cancel_and_admin_state_machine() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let (token, rate) = stocked(&app, "owner@example.com").await;
    let first = number_of(&app.place_order(&token, rate, "CASH_ON_DELIVERY").await);

    let (status, cancelled) = app
        .post(&format!("/api/orders/{first}/cancel"), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");
    assert_eq!(cancelled["payment"]["status"], "PENDING");

    let (status, _) = app
        .post(&format!("/api/orders/{first}/cancel"), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app
        .put(
            &format!("/api/admin/orders/{first}/status"),
            Some(&admin),
            json!({"status": "CONFIRMED"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let piece = app.product("Pendant", 900).await;
    app.add_to_cart(&token, piece, 1).await;
    let second = number_of(&app.place_order(&token, rate, "CASH_ON_DELIVERY").await);
    for target in ["CONFIRMED", "SHIPPED", "DELIVERED"] {
        let (status, order) = app
            .put(
                &format!("/api/admin/orders/{second}/status"),
                Some(&admin),
                json!({"status": target}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], target);
    }
    let (_, delivered) = app.get(&format!("/api/orders/{second}"), Some(&token)).await;
    assert_eq!(delivered["next_statuses"], json!([]));
    let (status, _) = app
        .put(
            &format!("/api/admin/orders/{second}/status"),
            Some(&admin),
            json!({"status": "PENDING"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(&format!("/api/orders/{second}/cancel"), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, listed) = app
        .get("/api/admin/orders?status=delivered", Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["order_number"], second.as_str());

    let (status, _) = app.get("/api/admin/orders?status=LOST", Some(&admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_orders_are_private() {
    let app = TestApp::new();
    let (token, rate) = stocked(&app, "mine@example.com").await;
    let number = number_of(&app.place_order(&token, rate, "CASH_ON_DELIVERY").await);
    let stranger = app.signed_up("theirs@example.com").await;

    let (status, _) = app.get(&format!("/api/orders/{number}"), Some(&stranger)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .post(&format!("/api/orders/{number}/cancel"), Some(&stranger), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, listed) = app.get("/api/orders", Some(&stranger)).await;
    assert!(listed.as_array().unwrap().is_empty());

    let (status, _) = app.get("/api/orders/not-a-number", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_hundred_orders_get_distinct_numbers() {
    let app = TestApp::new();
    let (token, rate) = stocked(&app, "bulk@example.com").await;
    let charm = app.product("Charm", 300).await;

    let mut numbers = HashSet::new();
    for i in 0..100 {
        if i > 0 {
            app.add_to_cart(&token, charm, 1).await;
        }
        let order = app.place_order(&token, rate, "CASH_ON_DELIVERY").await;
        numbers.insert(number_of(&order));
    }
    assert_eq!(numbers.len(), 100);

    let (_, listed) = app.get("/api/orders", Some(&token)).await;
    assert_eq!(listed.as_array().unwrap().len(), 100);
}
