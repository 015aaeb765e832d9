//! Domain model structs persisted in the server database.
//!
//! [`User`] is the full row including credential fields; the
//! [`UserPublic`] projection handed to other users is derived via
//! [`User::public`].  Message rows are never exposed raw -- queries in
//! `messages.rs` assemble them into [`MessageRecord`]s with children
//! attached.
//!
//! [`MessageRecord`]: palaver_shared::protocol::MessageRecord

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use palaver_shared::protocol::UserPublic;
use palaver_shared::types::{DeliveryStatus, MessageId, UserId};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.  Created at signup; never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Unique login identifier.
    pub email: String,
    pub display_name: String,
    /// Hex-encoded salted BLAKE3 hash of the password.
    pub password_hash: String,
    /// Hex-encoded random salt.
    pub password_salt: String,
    /// Durable URL in the media bucket, empty when unset.
    pub avatar_url: String,
    /// Mutated on every connect/disconnect of the user's live connection.
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Profile projection safe to hand to other users.
    pub fn public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            is_online: self.is_online,
            last_seen: self.last_seen,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An issued bearer session.  Created at signup/login, removed at logout,
/// ignored once past `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token: Uuid,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message content
// ---------------------------------------------------------------------------

/// A voice attachment: durable bucket URL plus recorded length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceAttachment {
    pub url: String,
    pub duration_secs: u32,
}

/// What a new message carries.  Media fields are durable bucket URLs -- the
/// upload happened before the store is involved.  At least one part must be
/// present; [`MessageContent::from_parts`] enforces that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContent {
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub voice: Option<VoiceAttachment>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self {
            image_url: Some(image_url.into()),
            ..Self::default()
        }
    }

    pub fn text_and_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_url: Some(image_url.into()),
            voice: None,
        }
    }

    pub fn voice(url: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            voice: Some(VoiceAttachment {
                url: url.into(),
                duration_secs,
            }),
            ..Self::default()
        }
    }

    /// Build content from the optional request parts.  Whitespace-only text
    /// counts as absent; fully empty content is rejected before anything is
    /// written.
    pub fn from_parts(
        text: Option<String>,
        image_url: Option<String>,
        voice: Option<VoiceAttachment>,
    ) -> Result<Self> {
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && image_url.is_none() && voice.is_none() {
            return Err(StoreError::Validation(
                "message requires text, image, or voice content".into(),
            ));
        }
        Ok(Self {
            text,
            image_url,
            voice,
        })
    }

    pub(crate) fn into_columns(self) -> (Option<String>, Option<String>, Option<String>, u32) {
        let (voice_url, voice_duration) = match self.voice {
            Some(v) => (Some(v.url), v.duration_secs),
            None => (None, 0),
        };
        (self.text, self.image_url, voice_url, voice_duration)
    }
}

// ---------------------------------------------------------------------------
// Raw message row (crate-internal)
// ---------------------------------------------------------------------------

/// One `messages` row without its child collections.
#[derive(Debug, Clone)]
pub(crate) struct MessageRow {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub voice_url: Option<String>,
    pub voice_duration: u32,
    pub status: DeliveryStatus,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply_to: Option<MessageId>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

pub(crate) fn column_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn column_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
