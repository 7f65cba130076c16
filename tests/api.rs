mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use resale_fulfillment::api::router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    let request = match body {
        Some(b) => request.body(Body::from(b.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_health() {
    let (_store, app) = app().await;
    let (status, body) = call(&router(app), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_order_round_trip_over_http() {
    let (_store, app) = app().await;
    let api = router(app);

    let (status, order) = call(&api, "POST", "/api/v1/orders", Some(json!({
        "reseller_id": LAGOS,
        "items": [{"product_id": BOOTS, "quantity": 2}],
        "new_shipment": {"weight_grams": 1400.0, "cost": "18.50"}
    }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = order["id"].as_str().unwrap().to_string();
    let shipment_id = order["shipment_ref"].as_str().unwrap().to_string();

    let (status, stock) = call(&api, "GET", &format!("/api/v1/stock/{BOOTS}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock[0]["quantity"], 8);

    let (status, shipment) = call(&api, "POST", &format!("/api/v1/shipments/{shipment_id}/status"), Some(json!({"status": "in-transit", "tracking_number": "1Z999"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shipment["tracking_number"], "1Z999");

    let (_, fetched) = call(&api, "GET", &format!("/api/v1/orders/{id}"), None).await;
    assert_eq!(fetched["status"], "in-transit");

    let (status, positions) = call(&api, "GET", &format!("/api/v1/resellers/{LAGOS}/positions"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(positions[0]["in_transit"], 2);
}

#[tokio::test]
async fn test_errors_map_to_statuses() {
    let (_store, app) = app().await;
    let api = router(app);

    let (status, _) = call(&api, "GET", "/api/v1/orders/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&api, "POST", "/api/v1/orders", Some(json!({"reseller_id": LAGOS, "items": [{"product_id": BOOTS, "quantity": 50}]}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&api, "POST", "/api/v1/orders", Some(json!({"reseller_id": LAGOS, "items": [{"product_id": BOOTS, "quantity": 0}]}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&api, "POST", "/api/v1/orders", Some(json!({"reseller_id": "ghost", "items": [{"product_id": BOOTS, "quantity": 1}]}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_pack_and_reconcile_endpoints() {
    let (_store, app) = app().await;
    let api = router(app);

    let (status, outcome) = call(&api, "POST", "/api/v1/packing/proposals", Some(json!({"seed": 5}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "packed");

    let (status, order) = call(&api, "POST", "/api/v1/orders/from-proposal", Some(json!({"reseller_id": ACCRA, "proposal": outcome["detail"]}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["reseller_id"], ACCRA);

    let (status, report) = call(&api, "POST", "/api/v1/reconciliation/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["passes"].as_array().unwrap().len(), 6);
}
