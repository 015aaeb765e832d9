//! Wire protocol shared by the REST surface and the realtime channel.
//!
//! Realtime events are two closed enums, [`ClientEvent`] inbound and
//! [`ServerEvent`] outbound, serialized as JSON text frames with a `type`
//! tag.  Keeping the set closed means a misspelled event name is a parse
//! error on arrival, not a handler that silently never fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallId, CallKind, DeliveryStatus, MessageId, UserId};

/// A user profile as exposed to other users.  Credential fields never leave
/// the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One user's reaction to a message.  At most one per user per message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Per-reader acknowledgment attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Resolved preview of the message a reply points at.
///
/// The referenced message may itself have been soft-deleted; in that case the
/// preview keeps the identity but carries cleared content and the tombstone
/// flag, and consumers render a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: MessageId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub is_deleted: bool,
}

/// A message as stored and as pushed over the realtime channel, with its
/// reply reference resolved and child collections attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub voice_url: Option<String>,
    /// Voice attachment length in seconds; 0 when there is no attachment.
    pub voice_duration: u32,
    pub status: DeliveryStatus,
    pub reactions: Vec<Reaction>,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply_to: Option<Box<ReplyPreview>>,
    pub read_by: Vec<ReadReceipt>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Events a connected client may send over its realtime connection.
///
/// These are the ephemeral flows only: typing indicators and call
/// signaling.  Persisted writes (send/edit/react/delete/read) go through the
/// REST surface, and the server pushes the matching [`ServerEvent`] after the
/// store transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Typing {
        to: UserId,
    },
    StopTyping {
        to: UserId,
    },
    InitiateCall {
        to: UserId,
        call_id: CallId,
        kind: CallKind,
    },
    AnswerCall {
        to: UserId,
        call_id: CallId,
    },
    RejectCall {
        to: UserId,
        call_id: CallId,
    },
    EndCall {
        to: UserId,
        call_id: CallId,
    },
    /// SDP offer.  The payload is relayed verbatim, never interpreted.
    Offer {
        to: UserId,
        call_id: CallId,
        payload: serde_json::Value,
    },
    /// SDP answer.
    Answer {
        to: UserId,
        call_id: CallId,
        payload: serde_json::Value,
    },
    /// ICE candidate.
    IceCandidate {
        to: UserId,
        call_id: CallId,
        payload: serde_json::Value,
    },
}

/// Events pushed by the server to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Full set of currently online user ids, broadcast to every live
    /// connection whenever the set changes.
    GetOnlineUsers {
        users: Vec<UserId>,
    },
    NewMessage {
        message: MessageRecord,
    },
    MessageReactionUpdate {
        message_id: MessageId,
        reactions: Vec<Reaction>,
    },
    MessageEdited {
        message: MessageRecord,
    },
    MessageDeleted {
        message: MessageRecord,
    },
    /// Sent to the author of the affected messages when their peer reads
    /// them.
    MessagesRead {
        reader_id: UserId,
        message_ids: Vec<MessageId>,
    },
    Typing {
        from: UserId,
    },
    StopTyping {
        from: UserId,
    },
    IncomingCall {
        call_id: CallId,
        kind: CallKind,
        caller: UserPublic,
        timestamp: DateTime<Utc>,
    },
    CallAnswered {
        call_id: CallId,
        from: UserId,
    },
    CallRejected {
        call_id: CallId,
        from: UserId,
    },
    CallEnded {
        call_id: CallId,
        from: UserId,
    },
    CallFailed {
        reason: String,
    },
    Offer {
        call_id: CallId,
        from: UserId,
        payload: serde_json::Value,
    },
    Answer {
        call_id: CallId,
        from: UserId,
        payload: serde_json::Value,
    },
    IceCandidate {
        call_id: CallId,
        from: UserId,
        payload: serde_json::Value,
    },
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
