//! The REST surface and application state.
//!
//! Every persisted write goes store-first: the handler commits the
//! transaction, then pushes the matching [`ServerEvent`] to the affected
//! peer(s) through the presence registry.  A failed push (peer offline)
//! never fails the write -- delivery is best-effort and the peer catches up
//! on its next conversation fetch.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tokio::sync::Mutex;
use tracing::info;

use palaver_media::{MediaBucket, MediaError, MediaKind};
use palaver_shared::protocol::{MessageRecord, Reaction, ServerEvent, UserPublic};
use palaver_shared::types::{MessageId, UserId};
use palaver_store::{Database, MessageContent, VoiceAttachment};

use crate::auth::{self, AuthSession};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub presence: PresenceRegistry,
    pub bucket: Arc<dyn MediaBucket>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let auth_layer = middleware::from_fn_with_state(state.clone(), auth::require_auth);

    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/check", get(auth::check))
        .route("/api/auth/update-profile", put(auth::update_profile))
        .route("/api/messages/users", get(list_sidebar))
        .route("/api/messages/unread/counts", get(unread_counts))
        .route("/api/messages/read/:id", put(mark_read))
        .route("/api/messages/send/:id", post(send_message))
        .route(
            "/api/messages/:id/reaction",
            post(add_reaction).delete(remove_reaction),
        )
        .route("/api/messages/:id/edit", put(edit_message))
        .route(
            "/api/messages/:id",
            get(get_conversation).delete(delete_message),
        )
        .route_layer(auth_layer);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/ws", get(ws::ws_upgrade))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Sidebar and conversation reads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SidebarEntry {
    #[serde(flatten)]
    user: UserPublic,
    unread_count: i64,
}

/// Peers sorted by most recent activity, each with the caller's unread count
/// for that peer.
async fn list_sidebar(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> Result<Json<Vec<SidebarEntry>>, ServerError> {
    let db = state.db.lock().await;
    let peers = db.list_peers(session.user.id)?;
    let counts = db.unread_counts(session.user.id)?;

    let entries = peers
        .into_iter()
        .map(|peer| {
            let unread_count = counts.get(&peer.id).copied().unwrap_or(0);
            SidebarEntry {
                user: peer.public(),
                unread_count,
            }
        })
        .collect();

    Ok(Json(entries))
}

async fn get_conversation(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(peer_id): Path<UserId>,
) -> Result<Json<Vec<MessageRecord>>, ServerError> {
    let db = state.db.lock().await;
    db.get_user(peer_id)?;
    let messages = db.fetch_conversation(session.user.id, peer_id)?;
    Ok(Json(messages))
}

async fn unread_counts(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> Result<Json<HashMap<UserId, i64>>, ServerError> {
    let counts = state.db.lock().await.unread_counts(session.user.id)?;
    Ok(Json(counts))
}

// ---------------------------------------------------------------------------
// Send
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    text: Option<String>,
    /// Base64-encoded image payload.
    image: Option<String>,
    /// Base64-encoded voice payload.
    voice: Option<String>,
    voice_duration: Option<u32>,
    reply_to: Option<MessageId>,
}

pub(crate) fn image_upload_error(e: MediaError) -> ServerError {
    match e {
        MediaError::InvalidPayload(msg) => ServerError::BadRequest(msg),
        MediaError::NotConfigured => {
            ServerError::BadRequest("media uploads are not configured".into())
        }
        MediaError::UploadFailed(msg) => {
            tracing::error!(error = %msg, "image upload failed");
            ServerError::Internal("image upload failed".into())
        }
    }
}

async fn send_message(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(peer_id): Path<UserId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageRecord>), ServerError> {
    let sender_id = session.user.id;

    // An image that cannot be uploaded fails the whole send.
    let image_url = match &req.image {
        Some(payload) => Some(
            state
                .bucket
                .upload(payload, MediaKind::Image)
                .await
                .map_err(image_upload_error)?,
        ),
        None => None,
    };

    // A voice attachment that cannot be uploaded degrades: the message goes
    // out without it.
    let voice = match &req.voice {
        Some(payload) => match state.bucket.upload(payload, MediaKind::Voice).await {
            Ok(url) => Some(VoiceAttachment {
                url,
                duration_secs: req.voice_duration.unwrap_or(0),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "voice upload failed, sending without attachment");
                None
            }
        },
        None => None,
    };

    let content = MessageContent::from_parts(req.text.clone(), image_url, voice)?;

    let message = state
        .db
        .lock()
        .await
        .create_message(sender_id, peer_id, content, req.reply_to)?;

    info!(id = %message.id, sender = %sender_id, receiver = %peer_id, "message sent");

    state
        .presence
        .send_to(
            peer_id,
            ServerEvent::NewMessage {
                message: message.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ReactionRequest {
    emoji: String,
}

#[derive(Serialize)]
struct ReactionResponse {
    reactions: Vec<Reaction>,
}

async fn add_reaction(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(id): Path<MessageId>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<ReactionResponse>, ServerError> {
    let (reactions, message) = {
        let db = state.db.lock().await;
        let reactions = db.add_reaction(id, session.user.id, &req.emoji)?;
        (reactions, db.get_message(id)?)
    };

    push_reaction_update(&state, &message, reactions.clone()).await;
    Ok(Json(ReactionResponse { reactions }))
}

async fn remove_reaction(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(id): Path<MessageId>,
) -> Result<Json<ReactionResponse>, ServerError> {
    let (reactions, message) = {
        let db = state.db.lock().await;
        let reactions = db.remove_reaction(id, session.user.id)?;
        (reactions, db.get_message(id)?)
    };

    push_reaction_update(&state, &message, reactions.clone()).await;
    Ok(Json(ReactionResponse { reactions }))
}

async fn push_reaction_update(state: &AppState, message: &MessageRecord, reactions: Vec<Reaction>) {
    let event = ServerEvent::MessageReactionUpdate {
        message_id: message.id,
        reactions,
    };
    push_to_participants(state, message, event).await;
}

// ---------------------------------------------------------------------------
// Edit / delete
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct EditMessageRequest {
    text: String,
}

async fn edit_message(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(id): Path<MessageId>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<MessageRecord>, ServerError> {
    let message = state
        .db
        .lock()
        .await
        .edit_message(id, session.user.id, &req.text)?;

    push_to_participants(
        &state,
        &message,
        ServerEvent::MessageEdited {
            message: message.clone(),
        },
    )
    .await;

    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(id): Path<MessageId>,
) -> Result<Json<MessageRecord>, ServerError> {
    let message = state.db.lock().await.soft_delete(id, session.user.id)?;

    push_to_participants(
        &state,
        &message,
        ServerEvent::MessageDeleted {
            message: message.clone(),
        },
    )
    .await;

    Ok(Json(message))
}

// ---------------------------------------------------------------------------
// Read receipts
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    message_ids: Vec<MessageId>,
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(peer_id): Path<UserId>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let reader_id = session.user.id;

    let message_ids = {
        let db = state.db.lock().await;
        db.get_user(peer_id)?;
        db.mark_read(reader_id, peer_id)?
    };

    if !message_ids.is_empty() {
        state
            .presence
            .send_to(
                peer_id,
                ServerEvent::MessagesRead {
                    reader_id,
                    message_ids: message_ids.clone(),
                },
            )
            .await;
    }

    Ok(Json(MarkReadResponse { message_ids }))
}

// ---------------------------------------------------------------------------
// Push helpers
// ---------------------------------------------------------------------------

/// Best-effort push to both participants of a message.  The sender sees
/// their own mutation confirmed; the receiver sees the change live.
async fn push_to_participants(state: &AppState, message: &MessageRecord, event: ServerEvent) {
    state
        .presence
        .send_to(message.sender_id, event.clone())
        .await;
    state.presence.send_to(message.receiver_id, event).await;
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
