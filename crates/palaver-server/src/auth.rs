//! Account and session handling: signup, login, logout, session check, and
//! avatar updates.
//!
//! Passwords are stored as salted BLAKE3 hashes and compared in constant
//! time.  Sessions are opaque bearer tokens resolved against the store; the
//! same lookup authenticates both REST requests (via [`require_auth`]) and
//! the WebSocket handshake.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use palaver_media::MediaKind;
use palaver_shared::constants::MIN_PASSWORD_LEN;
use palaver_shared::protocol::UserPublic;
use palaver_store::{StoreError, User};

use crate::api::AppState;
use crate::error::ServerError;

/// The authenticated caller, inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub token: Uuid,
}

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

pub(crate) fn generate_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

pub(crate) fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Constant-time comparison to prevent timing attacks on credentials.
pub(crate) fn verify_password(password: &str, salt: &str, expected_hex: &str) -> bool {
    use subtle::ConstantTimeEq;
    let computed = hash_password(password, salt);
    let computed_bytes = computed.as_bytes();
    let expected_bytes = expected_hex.as_bytes();
    computed_bytes.len() == expected_bytes.len()
        && computed_bytes.ct_eq(expected_bytes).unwrap_u8() == 1
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

fn bearer_token(req: &Request) -> Result<Uuid, ServerError> {
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Unauthorized("no token provided".into()))?;

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);
    token
        .parse::<Uuid>()
        .map_err(|_| ServerError::Unauthorized("invalid token".into()))
}

/// Resolve the bearer token to a user and stash an [`AuthSession`] in the
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = bearer_token(&req)?;

    let user = {
        let db = state.db.lock().await;
        let session = db
            .get_session(token)
            .map_err(|_| ServerError::Unauthorized("invalid or expired token".into()))?;
        db.get_user(session.user_id)?
    };

    req.extensions_mut().insert(AuthSession { user, token });
    Ok(next.run(req).await)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: Uuid,
    pub user: UserPublic,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    /// Base64-encoded avatar image.
    pub avatar: String,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ServerError> {
    if req.email.trim().is_empty() || req.display_name.trim().is_empty() {
        return Err(ServerError::BadRequest("all fields are required".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ServerError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let salt = generate_salt();
    let hash = hash_password(&req.password, &salt);

    let db = state.db.lock().await;
    let user = db
        .create_user(req.email.trim(), req.display_name.trim(), &hash, &salt)
        .map_err(|e| match e {
            StoreError::Conflict(_) => ServerError::Conflict("email already exists".into()),
            other => other.into(),
        })?;
    let session = db.insert_session(user.id, state.config.session_ttl)?;

    tracing::info!(user = %user.id, "user signed up");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token: session.token,
            user: user.public(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ServerError::BadRequest("all fields are required".into()));
    }

    // A wrong email and a wrong password are indistinguishable to the caller.
    let invalid = || ServerError::Unauthorized("invalid credentials".into());

    let db = state.db.lock().await;
    let user = db.get_user_by_email(req.email.trim()).map_err(|_| invalid())?;

    if !verify_password(&req.password, &user.password_salt, &user.password_hash) {
        return Err(invalid());
    }

    let session = db.insert_session(user.id, state.config.session_ttl)?;

    tracing::info!(user = %user.id, "user logged in");

    Ok(Json(AuthResponse {
        token: session.token,
        user: user.public(),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    axum::Extension(session): axum::Extension<AuthSession>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.db.lock().await.delete_session(session.token)?;
    Ok(Json(serde_json::json!({ "loggedOut": true })))
}

pub async fn check(
    axum::Extension(session): axum::Extension<AuthSession>,
) -> Json<UserPublic> {
    Json(session.user.public())
}

pub async fn update_profile(
    State(state): State<AppState>,
    axum::Extension(session): axum::Extension<AuthSession>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserPublic>, ServerError> {
    if req.avatar.is_empty() {
        return Err(ServerError::BadRequest("avatar is required".into()));
    }

    // Avatar uploads follow the image policy: a bucket failure fails the
    // whole update.
    let url = state
        .bucket
        .upload(&req.avatar, MediaKind::Avatar)
        .await
        .map_err(crate::api::image_upload_error)?;

    let user = state.db.lock().await.set_avatar(session.user.id, &url)?;
    Ok(Json(user.public()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_salted_and_deterministic() {
        let salt = generate_salt();
        let other_salt = generate_salt();

        let hash = hash_password("hunter22", &salt);
        assert_eq!(hash, hash_password("hunter22", &salt));
        assert_ne!(hash, hash_password("hunter22", &other_salt));
        assert_ne!(hash, hash_password("hunter23", &salt));
    }

    #[test]
    fn verify_accepts_only_the_original_password() {
        let salt = generate_salt();
        let hash = hash_password("hunter22", &salt);

        assert!(verify_password("hunter22", &salt, &hash));
        assert!(!verify_password("hunter23", &salt, &hash));
        assert!(!verify_password("hunter22", &salt, "deadbeef"));
    }
}
