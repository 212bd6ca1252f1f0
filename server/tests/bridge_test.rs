//! Integration tests for the backend bridge listener and fan-out to clients.

mod common;

use common::*;
use relay_server::config::RelaySettings;
use serde_json::json;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_bridge_notifies_only_the_recipient() {
    let relay = start_relay().await;
    let mut student = connect_as(&relay, 41, "student").await;
    let mut tutor = connect_as(&relay, 52, "tutor").await;

    let resp = post_bridge(
        &relay,
        json!({
            "secret": BRIDGE_SECRET,
            "recipients": [41],
            "thread_id": 7,
            "preview": "hi",
            "sender_id": 52,
            "sender_role": "tutor"
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");

    let note = recv_json(&mut student).await;
    assert_eq!(note["type"], "message_notification");
    assert_eq!(note["thread_id"], 7);
    assert_eq!(note["preview"], "hi");
    assert_eq!(note["sender_id"], 52);
    assert_eq!(note["sender_role"], "tutor");
    assert_eq!(note["metadata"], json!({}));
    assert!(note["created_at"].as_str().unwrap().ends_with('Z'));

    expect_silence(&mut tutor, QUIET).await;
}

#[tokio::test]
async fn test_every_tab_of_a_user_is_notified_once() {
    let relay = start_relay().await;
    let mut tabs = vec![
        connect_as(&relay, 41, "student").await,
        connect_as(&relay, 41, "student").await,
        connect_as(&relay, 41, "student").await,
    ];

    let resp = post_bridge(
        &relay,
        json!({"secret": BRIDGE_SECRET, "recipients": ["41", 41], "threadId": 3, "preview": "x"}),
    )
    .await;
    assert_eq!(resp.status(), 200);

    for tab in tabs.iter_mut() {
        assert_eq!(recv_json(tab).await["thread_id"], 3);
        expect_silence(tab, QUIET).await;
    }
}

#[tokio::test]
async fn test_body_with_both_thread_id_keys_is_accepted() {
    let relay = start_relay().await;
    let mut student = connect_as(&relay, 41, "student").await;

    let resp = post_bridge(
        &relay,
        json!({"secret": BRIDGE_SECRET, "recipients": [41], "thread_id": 7, "threadId": 9}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(recv_json(&mut student).await["thread_id"], 9);
}

#[tokio::test]
async fn test_unattributed_payload_uses_system_sender() {
    let relay = start_relay().await;
    let mut student = connect_as(&relay, 41, "student").await;

    let resp = post_bridge(
        &relay,
        json!({
            "secret": BRIDGE_SECRET,
            "recipients": [41],
            "thread_id": 9,
            "preview": "Your booking was confirmed",
            "metadata": {"booking_id": 12}
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let note = recv_json(&mut student).await;
    assert_eq!(note["sender_id"], 0);
    assert_eq!(note["sender_role"], "system");
    assert_eq!(note["metadata"]["booking_id"], 12);
}

#[tokio::test]
async fn test_preview_is_truncated() {
    let relay = start_relay().await;
    let mut student = connect_as(&relay, 41, "student").await;

    let long = "é".repeat(400);
    let resp = post_bridge(
        &relay,
        json!({"secret": BRIDGE_SECRET, "recipients": [41], "thread_id": 1, "preview": long}),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let note = recv_json(&mut student).await;
    assert_eq!(note["preview"].as_str().unwrap().chars().count(), 180);
}

#[tokio::test]
async fn test_role_targeted_message() {
    let relay = start_relay().await;
    let mut student = connect_as(&relay, 41, "student").await;
    let mut tutor = connect_as(&relay, 52, "tutor").await;
    let mut admin = connect_as(&relay, 1, "admin").await;

    let resp = post_bridge(
        &relay,
        json!({
            "secret": BRIDGE_SECRET,
            "roles": ["tutor", "admin"],
            "thread_id": 4,
            "preview": "maintenance"
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    assert_eq!(recv_json(&mut tutor).await["thread_id"], 4);
    assert_eq!(recv_json(&mut admin).await["thread_id"], 4);
    expect_silence(&mut student, QUIET).await;
}

#[tokio::test]
async fn test_alert_body_reaches_admins() {
    let relay = start_relay().await;
    let mut admin = connect_as(&relay, 1, "admin").await;
    let mut tutor = connect_as(&relay, 52, "tutor").await;

    let resp = post_bridge(
        &relay,
        json!({"secret": BRIDGE_SECRET, "alert": {"type": "suspicious_ip", "ip": "203.0.113.7"}}),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let alert = recv_json(&mut admin).await;
    assert_eq!(alert["type"], "security_alert");
    assert_eq!(alert["data"]["ip"], "203.0.113.7");
    expect_silence(&mut tutor, QUIET).await;

    let resp = post_bridge(&relay, json!({"secret": BRIDGE_SECRET, "alert": {"type": ""}})).await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_nobody_connected_still_succeeds() {
    let relay = start_relay().await;
    let resp = post_bridge(
        &relay,
        json!({"secret": BRIDGE_SECRET, "recipients": [999], "thread_id": 1}),
    )
    .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_secret_is_enforced() {
    let relay = start_relay().await;
    let mut student = connect_as(&relay, 41, "student").await;

    for body in [
        json!({"secret": "wrong", "recipients": [41], "thread_id": 7}),
        json!({"recipients": [41], "thread_id": 7}),
        json!({"secret": 12345, "recipients": [41], "thread_id": 7}),
    ] {
        let resp = post_bridge(&relay, body).await;
        assert_eq!(resp.status(), 401);
        assert_eq!(resp.text().await.unwrap(), "Unauthorized");
    }

    // Empty body counts as an empty object
    let resp = reqwest::Client::new()
        .post(relay.bridge_url())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    expect_silence(&mut student, QUIET).await;
}

#[tokio::test]
async fn test_invalid_payloads_are_rejected_without_side_effects() {
    let relay = start_relay().await;
    let mut student = connect_as(&relay, 41, "student").await;

    for body in [
        json!({"secret": BRIDGE_SECRET, "recipients": [], "thread_id": 7}),
        json!({"secret": BRIDGE_SECRET, "recipients": [0, -2, "x"], "thread_id": 7}),
        json!({"secret": BRIDGE_SECRET, "recipients": [41], "thread_id": 0}),
        json!({"secret": BRIDGE_SECRET, "recipients": [41]}),
        json!({"secret": BRIDGE_SECRET, "recipients": 41, "thread_id": 7}),
    ] {
        let resp = post_bridge(&relay, body.clone()).await;
        assert_eq!(resp.status(), 400, "body: {}", body);
        assert_eq!(resp.text().await.unwrap(), "Invalid payload");
    }

    let resp = reqwest::Client::new()
        .post(relay.bridge_url())
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    expect_silence(&mut student, QUIET).await;
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let relay = start_relay_with(RelaySettings {
        max_body_bytes: 1024,
        ..RelaySettings::default()
    })
    .await;

    let resp = post_bridge(
        &relay,
        json!({
            "secret": BRIDGE_SECRET,
            "recipients": [41],
            "thread_id": 1,
            "preview": "x".repeat(4096)
        }),
    )
    .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_other_paths_and_methods_are_not_found() {
    let relay = start_relay().await;
    let client = reqwest::Client::new();

    let resp = client.get(relay.bridge_url()).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "Not found");

    let resp = client
        .post(format!("http://{}/notify/other", relay.bridge_addr))
        .json(&json!({"secret": BRIDGE_SECRET}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(format!("http://{}/health", relay.bridge_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
