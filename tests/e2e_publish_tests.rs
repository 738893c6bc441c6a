//! End-to-end tests for publishing, pull consumption and the signed push
//! path.

mod common;

use common::TestServer;
use pushbox_server::clients::ClientStore;
use pushbox_server::push::sign_envelope;
use reqwest::StatusCode;

async fn set_push_callback(server: &TestServer, box_id: &str, url: &str) {
    let response = server.update_callback(box_id, "client-1", url).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["successful"], true);
}

#[tokio::test]
async fn test_happy_path_push_is_signed_and_acknowledged() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;
    set_push_callback(&server, &box_id, "https://customer.example/cb").await;

    let response = server
        .publish(&box_id, "application/json", r#"{"a":1}"#, None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // the ingest-time push succeeds, so the notification is acknowledged
    let acknowledged = server.wait_for_status(&box_id, "ACKNOWLEDGED").await;
    assert_eq!(acknowledged["message"], r#"{"a":1}"#);
    assert!(acknowledged["pushedDateTime"].is_string());

    let pushes = server.gateway.notify_requests();
    assert_eq!(pushes.len(), 1);
    let outbound = &pushes[0];
    assert_eq!(outbound["destinationUrl"], "https://customer.example/cb");

    // exactly one X-Hub-Signature header, HMAC-SHA1 of the envelope bytes
    // under the client's active secret
    let headers = outbound["forwardedHeaders"].as_array().unwrap();
    let signatures: Vec<_> = headers
        .iter()
        .filter(|h| h["key"] == "X-Hub-Signature")
        .collect();
    assert_eq!(signatures.len(), 1);

    let secrets = server
        .hub_store
        .get_client_secrets(&pushbox_server::clients::ClientId::new("client-1"))
        .unwrap()
        .expect("client should have been created on first push");
    let payload = outbound["payload"].as_str().unwrap();
    let expected = sign_envelope(secrets[0].as_str(), payload.as_bytes());
    assert_eq!(signatures[0]["value"].as_str().unwrap(), expected);

    // tamper detection: any payload change breaks the signature
    let tampered = sign_envelope(secrets[0].as_str(), format!("{} ", payload).as_bytes());
    assert_ne!(signatures[0]["value"].as_str().unwrap(), tampered);

    // the envelope carries the notification fields
    let envelope: serde_json::Value = serde_json::from_str(payload).unwrap();
    assert_eq!(envelope["boxId"], box_id.as_str());
    assert_eq!(envelope["message"], r#"{"a":1}"#);
    assert_eq!(envelope["messageContentType"], "application/json");

    // gateway calls carry the configured authorization token
    assert_eq!(
        server.gateway.notify_auth_headers()[0].as_deref(),
        Some("test-gateway-token")
    );
}

#[tokio::test]
async fn test_pull_only_flow_list_and_acknowledge() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    let mut ids = Vec::new();
    for i in 1..=3 {
        let response = server
            .publish(
                &box_id,
                "application/json",
                &format!(r#"{{"n":{}}}"#, i),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = response.json().await.unwrap();
        ids.push(body["notificationId"].as_str().unwrap().to_string());
        // distinct createdDateTime values keep the ordering observable
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    // no push subscriber, so the gateway was never called
    assert!(server.gateway.notify_requests().is_empty());

    // all three pending, in insertion order
    let response = server.list_notifications(&box_id, "?status=PENDING").await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed: serde_json::Value = response.json().await.unwrap();
    let listed_ids: Vec<_> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["notificationId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(listed_ids, ids);

    // acknowledge the first and third
    let response = server
        .acknowledge(&box_id, &[&ids[0], &ids[2]])
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = server.list_notifications(&box_id, "?status=PENDING").await;
    let pending: serde_json::Value = response.json().await.unwrap();
    let pending_ids: Vec<_> = pending
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["notificationId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(pending_ids, vec![ids[1].clone()]);

    // acknowledging the same ids again is a no-op, not a failure
    let response = server
        .acknowledge(&box_id, &[&ids[0], &ids[2]])
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_duplicate_ingest_is_suppressed() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;
    set_push_callback(&server, &box_id, "https://customer.example/cb").await;

    let notification_id = "f468e4b5-9d37-4f6a-ae28-c7d2a86fdfd1";
    let first = server
        .publish(&box_id, "application/json", "{}", Some(notification_id))
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = server
        .publish(&box_id, "application/json", "{}", Some(notification_id))
        .await;
    assert_eq!(second.status(), StatusCode::OK);

    // one stored row, one push
    let response = server.list_notifications(&box_id, "").await;
    let listed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["notificationId"], notification_id);
    assert_eq!(server.gateway.notify_requests().len(), 1);
}

#[tokio::test]
async fn test_xml_payload_round_trips() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    let payload = "<movement><mrn>MRN123</mrn></movement>";
    let response = server
        .publish(&box_id, "application/xml", payload, None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server.list_notifications(&box_id, "").await;
    let listed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(listed[0]["message"], payload);
    assert_eq!(listed[0]["messageContentType"], "application/xml");
}

#[tokio::test]
async fn test_publish_rejections() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    let unknown_box = server
        .publish(
            "0a8f0a60-0d30-4ab9-a62b-b4e2b0b3d2d7",
            "application/json",
            "{}",
            None,
        )
        .await;
    assert_eq!(unknown_box.status(), StatusCode::NOT_FOUND);

    let bad_content_type = server
        .publish(&box_id, "text/plain", "hello", None)
        .await;
    assert_eq!(bad_content_type.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let invalid_json = server
        .publish(&box_id, "application/json", "not json", None)
        .await;
    assert_eq!(invalid_json.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_filters_by_date_range() {
    let server = TestServer::spawn().await;
    let box_id = server.create_box_id("box-a", "client-1").await;

    server
        .publish(&box_id, "application/json", "{}", None)
        .await;

    let all = server
        .list_notifications(&box_id, "?fromDate=2000-01-01T00:00:00Z")
        .await;
    let body: serde_json::Value = all.json().await.unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);

    let none = server
        .list_notifications(&box_id, "?toDate=2000-01-01T00:00:00Z")
        .await;
    let body: serde_json::Value = none.json().await.unwrap();
    assert!(body.as_array().unwrap().is_empty());

    let invalid = server
        .list_notifications(&box_id, "?fromDate=yesterday")
        .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}
