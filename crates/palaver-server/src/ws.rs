//! The realtime event router.
//!
//! Each live WebSocket is bound to exactly one authenticated user, resolved
//! from the session token in the handshake query -- never from a
//! client-supplied id.  Inbound ephemeral events (typing, call signaling) are
//! relayed to the target user's connection with a `from` field attached;
//! persisted-write pushes come from the REST handlers, not from here.
//!
//! Offline targets: events are silently dropped (no queueing, no retries),
//! except call initiation, which answers the caller with `callFailed`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use palaver_shared::protocol::{ClientEvent, ServerEvent};
use palaver_shared::types::UserId;

use crate::api::AppState;
use crate::error::ServerError;
use crate::presence::ConnectionHandle;

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Uuid,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    // The binding is authenticated: the connection belongs to whoever the
    // session token resolves to.
    let user_id = {
        let db = state.db.lock().await;
        db.get_session(query.token)
            .map_err(|_| ServerError::Unauthorized("invalid or expired token".into()))?
            .user_id
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(state, user_id, socket)))
}

async fn handle_socket(state: AppState, user_id: UserId, mut socket: WebSocket) {
    let (tx, mut outbound) = mpsc::unbounded_channel::<ServerEvent>();
    let handle = ConnectionHandle::new(tx);
    let conn_id = handle.conn_id();

    state.presence.register(user_id, handle).await;
    if let Err(e) = state
        .db
        .lock()
        .await
        .set_presence(user_id, true, Utc::now())
    {
        tracing::warn!(user = %user_id, error = %e, "failed to mark user online");
    }
    tracing::info!(user = %user_id, conn = %conn_id, "peer connected");

    loop {
        tokio::select! {
            maybe_event = outbound.recv() => {
                match maybe_event {
                    Some(event) => {
                        let raw = match event.to_json() {
                            Ok(raw) => raw,
                            Err(e) => {
                                tracing::error!(error = %e, "failed to encode outbound event");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(raw)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => match ClientEvent::from_json(&raw) {
                        Ok(event) => route_event(&state, user_id, event).await,
                        Err(e) => {
                            tracing::warn!(user = %user_id, error = %e, "dropping malformed client event");
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    // Mandatory on-disconnect cleanup.  The conn-id guard keeps a stale close
    // from evicting a newer connection, and only the owning connection flips
    // the user offline.
    if state.presence.unregister(user_id, conn_id).await {
        if let Err(e) = state
            .db
            .lock()
            .await
            .set_presence(user_id, false, Utc::now())
        {
            tracing::warn!(user = %user_id, error = %e, "failed to mark user offline");
        }
    }
    tracing::info!(user = %user_id, conn = %conn_id, "peer disconnected");
}

/// Relay one inbound event.  The match is exhaustive: adding a variant to
/// [`ClientEvent`] will not compile until it is routed here.
async fn route_event(state: &AppState, from: UserId, event: ClientEvent) {
    match event {
        ClientEvent::Typing { to } => {
            state.presence.send_to(to, ServerEvent::Typing { from }).await;
        }
        ClientEvent::StopTyping { to } => {
            state
                .presence
                .send_to(to, ServerEvent::StopTyping { from })
                .await;
        }
        ClientEvent::InitiateCall { to, call_id, kind } => {
            match state.presence.lookup(to).await {
                Some(callee) => {
                    let caller = {
                        let db = state.db.lock().await;
                        db.get_user(from)
                    };
                    match caller {
                        Ok(user) => {
                            tracing::info!(call = %call_id, from = %from, to = %to, "relaying call initiation");
                            callee.send(ServerEvent::IncomingCall {
                                call_id,
                                kind,
                                caller: user.public(),
                                timestamp: Utc::now(),
                            });
                        }
                        Err(e) => {
                            tracing::error!(user = %from, error = %e, "caller profile lookup failed");
                        }
                    }
                }
                None => {
                    tracing::info!(call = %call_id, from = %from, to = %to, "callee offline");
                    state
                        .presence
                        .send_to(
                            from,
                            ServerEvent::CallFailed {
                                reason: "user is offline".into(),
                            },
                        )
                        .await;
                }
            }
        }
        ClientEvent::AnswerCall { to, call_id } => {
            state
                .presence
                .send_to(to, ServerEvent::CallAnswered { call_id, from })
                .await;
        }
        ClientEvent::RejectCall { to, call_id } => {
            state
                .presence
                .send_to(to, ServerEvent::CallRejected { call_id, from })
                .await;
        }
        ClientEvent::EndCall { to, call_id } => {
            state
                .presence
                .send_to(to, ServerEvent::CallEnded { call_id, from })
                .await;
        }
        ClientEvent::Offer { to, call_id, payload } => {
            state
                .presence
                .send_to(to, ServerEvent::Offer { call_id, from, payload })
                .await;
        }
        ClientEvent::Answer { to, call_id, payload } => {
            state
                .presence
                .send_to(to, ServerEvent::Answer { call_id, from, payload })
                .await;
        }
        ClientEvent::IceCandidate { to, call_id, payload } => {
            state
                .presence
                .send_to(to, ServerEvent::IceCandidate { call_id, from, payload })
                .await;
        }
    }
}
