//! End-to-end tests for callback URL validation and the audit trail.

mod common;

use common::TestServer;
use reqwest::StatusCode;

#[tokio::test]
async fn test_validated_callback_is_persisted() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    let response = server
        .update_callback(&box_id, "client-1", "https://customer.example/cb")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["successful"], true);

    // the gateway probed the candidate URL before persistence
    let probes = server.gateway.validate_requests();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0]["callbackUrl"], "https://customer.example/cb");

    // the box now carries a push subscriber
    let found = server
        .client()
        .get(format!(
            "{}/box?boxName=box-a&clientId=client-1",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    let box_body: serde_json::Value = found.json().await.unwrap();
    assert_eq!(
        box_body["subscriber"]["subscriptionType"],
        "API_PUSH_SUBSCRIBER"
    );
    assert_eq!(
        box_body["subscriber"]["callBackUrl"],
        "https://customer.example/cb"
    );
}

#[tokio::test]
async fn test_rejected_callback_leaves_box_unchanged_and_emits_nothing() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;
    server.gateway.set_validate_response(false, Some("DNS"));

    let response = server
        .update_callback(&box_id, "client-1", "https://bad")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["successful"], false);
    assert_eq!(body["errorMessage"], "DNS");

    let found = server
        .client()
        .get(format!(
            "{}/box?boxName=box-a&clientId=client-1",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    let box_body: serde_json::Value = found.json().await.unwrap();
    assert!(box_body.get("subscriber").is_none());

    assert!(server.events.received_events().is_empty());
}

#[tokio::test]
async fn test_callback_change_emits_one_audit_event_with_both_urls() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    server
        .update_callback(&box_id, "client-1", "https://old")
        .await;
    server
        .update_callback(&box_id, "client-1", "https://new")
        .await;

    let events = server.events.received_events();
    assert_eq!(events.len(), 2);

    let change = &events[1];
    assert_eq!(change["eventType"], "PPNS_CALLBACK_URI_UPDATED");
    assert_eq!(change["oldCallbackUrl"], "https://old");
    assert_eq!(change["newCallbackUrl"], "https://new");
    assert_eq!(change["boxId"], box_id.as_str());
    assert_eq!(change["boxName"], "box-a");
    assert_eq!(change["actor"]["actorType"], "UNKNOWN");
    assert!(change["eventId"].is_string());
}

#[tokio::test]
async fn test_unchanged_callback_emits_no_second_event() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    server
        .update_callback(&box_id, "client-1", "https://same")
        .await;
    server
        .update_callback(&box_id, "client-1", "https://same")
        .await;

    assert_eq!(server.events.received_events().len(), 1);
}

#[tokio::test]
async fn test_empty_callback_clears_subscriber_without_validation() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    server
        .update_callback(&box_id, "client-1", "https://old")
        .await;
    let probes_before = server.gateway.validate_requests().len();

    let response = server.update_callback(&box_id, "client-1", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["successful"], true);

    // no extra probe for the empty URL
    assert_eq!(server.gateway.validate_requests().len(), probes_before);

    let found = server
        .client()
        .get(format!(
            "{}/box?boxName=box-a&clientId=client-1",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    let box_body: serde_json::Value = found.json().await.unwrap();
    assert!(box_body.get("subscriber").is_none());
}

#[tokio::test]
async fn test_client_mismatch_is_unauthorized() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    let response = server
        .update_callback(&box_id, "intruder", "https://customer.example/cb")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(server.gateway.validate_requests().is_empty());
}

#[tokio::test]
async fn test_unknown_box_is_not_found() {
    let server = TestServer::spawn().await;

    let response = server
        .update_callback(
            "0a8f0a60-0d30-4ab9-a62b-b4e2b0b3d2d7",
            "client-1",
            "https://customer.example/cb",
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
