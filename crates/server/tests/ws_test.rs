mod common;

use common::ws_helpers::{drain_messages, recv_event, send_json, start_server, ws_connect};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use futures::SinkExt;
use murmur_server::AppState;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn is_online(state: &AppState, user_id: &str) -> bool {
    sqlx::query_scalar::<_, bool>("SELECT is_online FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&state.db)
        .await
        .unwrap()
}

/// Poll until the stored presence flag matches.
async fn wait_for_presence(state: &AppState, user_id: &str, online: bool) -> bool {
    for _ in 0..50 {
        if is_online(state, user_id).await == online {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn connect_rejects_bad_token() {
    let (base, _state) = start_server().await;
    let url = format!("{}/gateway?token=garbage", base.replace("http://", "ws://"));
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());

    let url = format!("{}/gateway", base.replace("http://", "ws://"));
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}

#[tokio::test]
async fn connect_rejects_deactivated_user() {
    let (base, state) = start_server().await;
    let (alice_id, token) = common::create_test_user(&state, "alice").await;
    state.users().deactivate(&alice_id).await.unwrap();

    let url = format!(
        "{}/gateway?token={}",
        base.replace("http://", "ws://"),
        token
    );
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}

#[tokio::test]
async fn message_and_read_receipt_flow() {
    let (base, state) = start_server().await;
    let (alice_id, alice_token) = common::create_test_user(&state, "alice").await;
    let (bob_id, bob_token) = common::create_test_user(&state, "bob").await;
    let convo = common::create_direct(&state, &alice_id, &bob_id).await;

    let mut ws_alice = ws_connect(&base, &alice_token).await;
    let mut ws_bob = ws_connect(&base, &bob_token).await;

    send_json(
        &mut ws_alice,
        &json!({
            "type": "new_message",
            "payload": { "conversationId": convo.id, "content": "hi" }
        }),
    )
    .await;

    let event = recv_event(&mut ws_bob, "new_message").await.unwrap();
    let message = &event["payload"]["message"];
    assert_eq!(message["content"], "hi");
    assert_eq!(message["senderId"], alice_id.as_str());
    let message_id = message["id"].as_str().unwrap().to_string();

    // The sender's own connection sees it too
    recv_event(&mut ws_alice, "new_message").await.unwrap();

    send_json(
        &mut ws_bob,
        &json!({ "type": "message_read", "payload": { "conversationId": convo.id } }),
    )
    .await;

    let receipt = recv_event(&mut ws_alice, "message_read").await.unwrap();
    assert_eq!(receipt["payload"]["userId"], bob_id.as_str());
    assert_eq!(receipt["payload"]["messageIds"][0], message_id.as_str());

    let view = state.messages().get(&message_id, &alice_id).await.unwrap();
    assert_eq!(view.status.as_str(), "read");
}

#[tokio::test]
async fn http_send_reaches_live_clients() {
    let (base, state) = start_server().await;
    let (alice_id, alice_token) = common::create_test_user(&state, "alice").await;
    let (bob_id, bob_token) = common::create_test_user(&state, "bob").await;
    let convo = common::create_direct(&state, &alice_id, &bob_id).await;

    let mut ws_bob = ws_connect(&base, &bob_token).await;

    // Same state, so the same hub
    let http = TestServer::new(common::create_test_app(state.clone())).unwrap();
    http.post(&format!("/api/conversations/{}/messages", convo.id))
        .add_header(
            HeaderName::from_static("authorization"),
            format!("Bearer {alice_token}").parse::<HeaderValue>().unwrap(),
        )
        .json(&json!({ "content": "over http" }))
        .await
        .assert_status(StatusCode::CREATED);

    let event = recv_event(&mut ws_bob, "new_message").await.unwrap();
    assert_eq!(event["payload"]["message"]["content"], "over http");
}

#[tokio::test]
async fn outsiders_receive_nothing() {
    let (base, state) = start_server().await;
    let (alice_id, alice_token) = common::create_test_user(&state, "alice").await;
    let (bob_id, _) = common::create_test_user(&state, "bob").await;
    let (_, carol_token) = common::create_test_user(&state, "carol").await;
    let convo = common::create_direct(&state, &alice_id, &bob_id).await;

    let mut ws_alice = ws_connect(&base, &alice_token).await;
    let mut ws_carol = ws_connect(&base, &carol_token).await;

    send_json(
        &mut ws_alice,
        &json!({
            "type": "new_message",
            "payload": { "conversationId": convo.id, "content": "private" }
        }),
    )
    .await;
    recv_event(&mut ws_alice, "new_message").await.unwrap();

    let leaked = drain_messages(&mut ws_carol).await;
    assert!(leaked.is_empty(), "carol got {leaked:?}");
}

#[tokio::test]
async fn non_participant_send_is_rejected() {
    let (base, state) = start_server().await;
    let (alice_id, _) = common::create_test_user(&state, "alice").await;
    let (bob_id, _) = common::create_test_user(&state, "bob").await;
    let (_, carol_token) = common::create_test_user(&state, "carol").await;
    let convo = common::create_direct(&state, &alice_id, &bob_id).await;

    let mut ws_carol = ws_connect(&base, &carol_token).await;
    send_json(
        &mut ws_carol,
        &json!({
            "type": "new_message",
            "payload": { "conversationId": convo.id, "content": "sneaky" }
        }),
    )
    .await;

    let error = recv_event(&mut ws_carol, "error").await.unwrap();
    assert_eq!(error["payload"]["message"], "not found");

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
        .fetch_one(&state.db)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn typing_skips_the_originating_connection() {
    let (base, state) = start_server().await;
    let (alice_id, alice_token) = common::create_test_user(&state, "alice").await;
    let (bob_id, bob_token) = common::create_test_user(&state, "bob").await;
    let convo = common::create_direct(&state, &alice_id, &bob_id).await;

    let mut ws_alice = ws_connect(&base, &alice_token).await;
    let mut ws_alice_phone = ws_connect(&base, &alice_token).await;
    let mut ws_bob = ws_connect(&base, &bob_token).await;

    send_json(
        &mut ws_alice,
        &json!({ "type": "typing_start", "payload": { "conversationId": convo.id } }),
    )
    .await;

    let typing = recv_event(&mut ws_bob, "typing_start").await.unwrap();
    assert_eq!(typing["payload"]["userId"], alice_id.as_str());
    recv_event(&mut ws_alice_phone, "typing_start").await.unwrap();

    let own = drain_messages(&mut ws_alice).await;
    assert!(own.iter().all(|e| e["type"] != "typing_start"));

    send_json(
        &mut ws_alice,
        &json!({ "type": "typing_stop", "payload": { "conversationId": convo.id } }),
    )
    .await;
    recv_event(&mut ws_bob, "typing_stop").await.unwrap();
}

#[tokio::test]
async fn edit_and_delete_are_broadcast() {
    let (base, state) = start_server().await;
    let (alice_id, alice_token) = common::create_test_user(&state, "alice").await;
    let (bob_id, bob_token) = common::create_test_user(&state, "bob").await;
    let convo = common::create_direct(&state, &alice_id, &bob_id).await;

    let mut ws_alice = ws_connect(&base, &alice_token).await;
    let mut ws_bob = ws_connect(&base, &bob_token).await;

    send_json(
        &mut ws_alice,
        &json!({
            "type": "new_message",
            "payload": { "conversationId": convo.id, "content": "frist" }
        }),
    )
    .await;
    let created = recv_event(&mut ws_bob, "new_message").await.unwrap();
    let message_id = created["payload"]["message"]["id"].as_str().unwrap().to_string();

    send_json(
        &mut ws_alice,
        &json!({
            "type": "message_updated",
            "payload": { "messageId": message_id, "content": "first" }
        }),
    )
    .await;
    let updated = recv_event(&mut ws_bob, "message_updated").await.unwrap();
    assert_eq!(updated["payload"]["message"]["content"], "first");
    assert_eq!(updated["payload"]["message"]["isEdited"], true);

    send_json(
        &mut ws_alice,
        &json!({ "type": "message_deleted", "payload": { "messageId": message_id } }),
    )
    .await;
    let deleted = recv_event(&mut ws_bob, "message_deleted").await.unwrap();
    assert_eq!(deleted["payload"]["messageId"], message_id.as_str());
    assert_eq!(deleted["payload"]["conversationId"], convo.id.as_str());
}

#[tokio::test]
async fn malformed_frame_gets_error_event() {
    let (base, state) = start_server().await;
    let (_, token) = common::create_test_user(&state, "alice").await;
    let mut ws = ws_connect(&base, &token).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let error = recv_event(&mut ws, "error").await.unwrap();
    assert!(error["payload"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid event"));

    send_json(&mut ws, &json!({ "type": "teleport", "payload": {} })).await;
    recv_event(&mut ws, "error").await.unwrap();

    // Connection stays usable
    send_json(&mut ws, &json!({ "type": "ping" })).await;
    recv_event(&mut ws, "pong").await.unwrap();
}

#[tokio::test]
async fn presence_follows_last_connection() {
    let (base, state) = start_server().await;
    let (alice_id, token) = common::create_test_user(&state, "alice").await;

    let mut first = ws_connect(&base, &token).await;
    let mut second = ws_connect(&base, &token).await;
    assert!(wait_for_presence(&state, &alice_id, true).await);
    assert!(state.gateway.is_online(&alice_id).await);

    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(is_online(&state, &alice_id).await);

    second.close(None).await.unwrap();
    assert!(wait_for_presence(&state, &alice_id, false).await);
    assert!(!state.gateway.is_online(&alice_id).await);
}
