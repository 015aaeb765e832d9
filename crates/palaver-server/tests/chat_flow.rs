//! End-to-end flows over a real listener: REST writes, presence broadcasts,
//! realtime pushes, and call signaling relay.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use palaver_media::MemoryBucket;
use palaver_server::api::{build_router, AppState};
use palaver_server::config::ServerConfig;
use palaver_server::presence::PresenceRegistry;
use palaver_shared::protocol::{ClientEvent, ServerEvent};
use palaver_shared::types::{CallId, CallKind, UserId};
use palaver_store::Database;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (String, String, MemoryBucket) {
    let db = Database::open_in_memory().expect("in-memory db");
    let bucket = MemoryBucket::new();
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        presence: PresenceRegistry::new(),
        bucket: Arc::new(bucket.clone()),
        config: Arc::new(ServerConfig::default()),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = build_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });

    (format!("http://{addr}"), format!("ws://{addr}"), bucket)
}

async fn signup(
    client: &reqwest::Client,
    base: &str,
    email: &str,
    name: &str,
) -> (String, UserId) {
    let response = client
        .post(format!("{base}/api/auth/signup"))
        .json(&json!({
            "email": email,
            "displayName": name,
            "password": "hunter22",
        }))
        .send()
        .await
        .expect("signup request");
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.expect("signup body");
    let token = body["token"].as_str().expect("token").to_string();
    let user_id = body["user"]["id"]
        .as_str()
        .expect("user id")
        .parse()
        .expect("uuid");
    (token, user_id)
}

async fn connect_ws(ws_base: &str, token: &str) -> WsClient {
    let (ws, _) = connect_async(format!("{ws_base}/ws?token={token}"))
        .await
        .expect("ws connect");
    ws
}

async fn next_event(ws: &mut WsClient) -> ServerEvent {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        if let WsMessage::Text(raw) = message {
            return ServerEvent::from_json(&raw).expect("valid server event");
        }
    }
}

async fn send_event(ws: &mut WsClient, event: &ClientEvent) {
    ws.send(WsMessage::Text(event.to_json().expect("encode")))
        .await
        .expect("ws send");
}

fn online_set(event: ServerEvent) -> HashSet<UserId> {
    match event {
        ServerEvent::GetOnlineUsers { users } => users.into_iter().collect(),
        other => panic!("expected getOnlineUsers, got {other:?}"),
    }
}

#[tokio::test]
async fn offline_send_then_catch_up() {
    let (base, _, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let (token_a, a) = signup(&client, &base, "a@example.com", "Alice").await;
    let (token_b, b) = signup(&client, &base, "b@example.com", "Bob").await;

    // A sends "hi" to B while B is offline.
    let response = client
        .post(format!("{base}/api/messages/send/{b}"))
        .bearer_auth(&token_a)
        .json(&json!({ "text": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let sent: Value = response.json().await.unwrap();
    assert_eq!(sent["status"], "sent");
    assert_eq!(sent["text"], "hi");

    // B fetches the conversation later and sees the message.
    let conversation: Vec<Value> = client
        .get(format!("{base}/api/messages/{a}"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0]["text"], "hi");

    // Unread counts show {A: 1} until B marks the thread read.
    let counts: Value = client
        .get(format!("{base}/api/messages/unread/counts"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(counts[a.to_string()], 1);

    let marked: Value = client
        .put(format!("{base}/api/messages/read/{a}"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(marked["messageIds"].as_array().unwrap().len(), 1);

    let counts: Value = client
        .get(format!("{base}/api/messages/unread/counts"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(counts.get(a.to_string()).is_none());

    // The sender's copy now carries the read receipt.
    let conversation: Vec<Value> = client
        .get(format!("{base}/api/messages/{b}"))
        .bearer_auth(&token_a)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(conversation[0]["status"], "read");
    assert_eq!(
        conversation[0]["readBy"][0]["userId"],
        b.to_string()
    );
}

#[tokio::test]
async fn rest_guards_are_enforced() {
    let (base, _, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let (token_a, _a) = signup(&client, &base, "a@example.com", "Alice").await;
    let (token_b, b) = signup(&client, &base, "b@example.com", "Bob").await;

    // No token.
    let response = client
        .get(format!("{base}/api/messages/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Wrong password.
    let response = client
        .post(format!("{base}/api/auth/login"))
        .json(&json!({ "email": "a@example.com", "password": "wrong-pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Duplicate email.
    let response = client
        .post(format!("{base}/api/auth/signup"))
        .json(&json!({
            "email": "a@example.com",
            "displayName": "Impostor",
            "password": "hunter22",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let sent: Value = client
        .post(format!("{base}/api/messages/send/{b}"))
        .bearer_auth(&token_a)
        .json(&json!({ "text": "mine" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let message_id = sent["id"].as_str().unwrap();

    // Only the sender can edit.
    let response = client
        .put(format!("{base}/api/messages/{message_id}/edit"))
        .bearer_auth(&token_b)
        .json(&json!({ "text": "hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Duplicate identical reaction is a conflict.
    let response = client
        .post(format!("{base}/api/messages/{message_id}/reaction"))
        .bearer_auth(&token_b)
        .json(&json!({ "emoji": "👍" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .post(format!("{base}/api/messages/{message_id}/reaction"))
        .bearer_auth(&token_b)
        .json(&json!({ "emoji": "👍" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Empty send is a validation reject.
    let response = client
        .post(format!("{base}/api/messages/send/{b}"))
        .bearer_auth(&token_a)
        .json(&json!({ "text": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn presence_and_realtime_push() {
    let (base, ws_base, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let (token_a, a) = signup(&client, &base, "a@example.com", "Alice").await;
    let (token_b, b) = signup(&client, &base, "b@example.com", "Bob").await;

    let mut ws_b = connect_ws(&ws_base, &token_b).await;
    assert_eq!(online_set(next_event(&mut ws_b).await), HashSet::from([b]));

    let mut ws_a = connect_ws(&ws_base, &token_a).await;
    let both = HashSet::from([a, b]);
    assert_eq!(online_set(next_event(&mut ws_a).await), both);
    assert_eq!(online_set(next_event(&mut ws_b).await), both);

    // A REST send is pushed to B's live connection.
    let sent: Value = client
        .post(format!("{base}/api/messages/send/{b}"))
        .bearer_auth(&token_a)
        .json(&json!({ "text": "you there?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    match next_event(&mut ws_b).await {
        ServerEvent::NewMessage { message } => {
            assert_eq!(message.id.to_string(), sent["id"].as_str().unwrap());
            assert_eq!(message.sender_id, a);
            assert_eq!(message.text.as_deref(), Some("you there?"));
        }
        other => panic!("expected newMessage, got {other:?}"),
    }

    // Typing flows through the relay with `from` attached.
    send_event(&mut ws_a, &ClientEvent::Typing { to: b }).await;
    assert_eq!(next_event(&mut ws_b).await, ServerEvent::Typing { from: a });

    send_event(&mut ws_a, &ClientEvent::StopTyping { to: b }).await;
    assert_eq!(
        next_event(&mut ws_b).await,
        ServerEvent::StopTyping { from: a }
    );

    // A reaction is pushed to both participants.
    let message_id = sent["id"].as_str().unwrap();
    client
        .post(format!("{base}/api/messages/{message_id}/reaction"))
        .bearer_auth(&token_b)
        .json(&json!({ "emoji": "👍" }))
        .send()
        .await
        .unwrap();

    for ws in [&mut ws_a, &mut ws_b] {
        match next_event(ws).await {
            ServerEvent::MessageReactionUpdate { reactions, .. } => {
                assert_eq!(reactions.len(), 1);
                assert_eq!(reactions[0].emoji, "👍");
            }
            other => panic!("expected reaction update, got {other:?}"),
        }
    }

    // Disconnect shrinks the broadcast set.
    ws_a.close(None).await.unwrap();
    assert_eq!(online_set(next_event(&mut ws_b).await), HashSet::from([b]));
}

#[tokio::test]
async fn call_initiation_to_offline_peer_fails() {
    let (base, ws_base, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let (token_a, _a) = signup(&client, &base, "a@example.com", "Alice").await;
    let (_token_b, b) = signup(&client, &base, "b@example.com", "Bob").await;

    let mut ws_a = connect_ws(&ws_base, &token_a).await;
    next_event(&mut ws_a).await; // own presence broadcast

    send_event(
        &mut ws_a,
        &ClientEvent::InitiateCall {
            to: b,
            call_id: CallId::new(),
            kind: CallKind::Audio,
        },
    )
    .await;

    match next_event(&mut ws_a).await {
        ServerEvent::CallFailed { reason } => assert_eq!(reason, "user is offline"),
        other => panic!("expected callFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn call_signaling_is_relayed_verbatim() {
    let (base, ws_base, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let (token_a, a) = signup(&client, &base, "a@example.com", "Alice").await;
    let (token_b, b) = signup(&client, &base, "b@example.com", "Bob").await;

    let mut ws_a = connect_ws(&ws_base, &token_a).await;
    next_event(&mut ws_a).await;
    let mut ws_b = connect_ws(&ws_base, &token_b).await;
    next_event(&mut ws_a).await;
    next_event(&mut ws_b).await;

    let call_id = CallId::new();
    send_event(
        &mut ws_a,
        &ClientEvent::InitiateCall {
            to: b,
            call_id,
            kind: CallKind::Video,
        },
    )
    .await;

    match next_event(&mut ws_b).await {
        ServerEvent::IncomingCall {
            call_id: incoming_id,
            kind,
            caller,
            ..
        } => {
            assert_eq!(incoming_id, call_id);
            assert_eq!(kind, CallKind::Video);
            assert_eq!(caller.id, a);
            assert_eq!(caller.display_name, "Alice");
        }
        other => panic!("expected incomingCall, got {other:?}"),
    }

    send_event(&mut ws_b, &ClientEvent::AnswerCall { to: a, call_id }).await;
    assert_eq!(
        next_event(&mut ws_a).await,
        ServerEvent::CallAnswered { call_id, from: b }
    );

    let sdp = json!({ "sdp": "v=0 mock-offer", "type": "offer" });
    send_event(
        &mut ws_a,
        &ClientEvent::Offer {
            to: b,
            call_id,
            payload: sdp.clone(),
        },
    )
    .await;

    match next_event(&mut ws_b).await {
        ServerEvent::Offer { payload, from, .. } => {
            assert_eq!(from, a);
            assert_eq!(payload, sdp);
        }
        other => panic!("expected offer, got {other:?}"),
    }

    send_event(&mut ws_b, &ClientEvent::EndCall { to: a, call_id }).await;
    assert_eq!(
        next_event(&mut ws_a).await,
        ServerEvent::CallEnded { call_id, from: b }
    );
}

#[tokio::test]
async fn media_upload_policy_degrades_voice_and_fails_images() {
    let (base, _, bucket) = spawn_server().await;
    let client = reqwest::Client::new();

    let (token_a, _a) = signup(&client, &base, "a@example.com", "Alice").await;
    let (_token_b, b) = signup(&client, &base, "b@example.com", "Bob").await;

    let payload_b64 = "aGVsbG8gd29ybGQ="; // "hello world"

    // Happy path: a voice message gets a durable URL and keeps its duration.
    let sent: Value = client
        .post(format!("{base}/api/messages/send/{b}"))
        .bearer_auth(&token_a)
        .json(&json!({ "voice": payload_b64, "voiceDuration": 7 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(sent["voiceUrl"].as_str().unwrap().starts_with("mem://voice/"));
    assert_eq!(sent["voiceDuration"], 7);

    bucket.set_failing(true);

    // A failing voice upload degrades: the message still goes out with the
    // remaining content.
    let response = client
        .post(format!("{base}/api/messages/send/{b}"))
        .bearer_auth(&token_a)
        .json(&json!({ "text": "listen to this", "voice": payload_b64, "voiceDuration": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let sent: Value = response.json().await.unwrap();
    assert_eq!(sent["text"], "listen to this");
    assert!(sent["voiceUrl"].is_null());

    // A failing image upload fails the whole send.
    let response = client
        .post(format!("{base}/api/messages/send/{b}"))
        .bearer_auth(&token_a)
        .json(&json!({ "text": "look at this", "image": payload_b64 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}
