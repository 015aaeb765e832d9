//! The REST seam.
//!
//! [`MessageApi`] mirrors the server's conversation surface; [`HttpApi`] is
//! the production implementation.  The reconciler only ever talks to the
//! trait, so tests drive it with a scripted double.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use palaver_shared::protocol::{MessageRecord, Reaction, UserPublic};
use palaver_shared::types::{MessageId, UserId};

use crate::error::ClientError;

/// A sidebar row: the peer's public profile plus the caller's unread count
/// for that peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SidebarPeer {
    #[serde(flatten)]
    pub user: UserPublic,
    pub unread_count: i64,
}

/// A draft going out through the send endpoint.  Media travels as base64;
/// the server uploads it and persists only the durable URL.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn list_sidebar(&self) -> Result<Vec<SidebarPeer>, ClientError>;
    async fn fetch_conversation(&self, peer: UserId) -> Result<Vec<MessageRecord>, ClientError>;
    async fn send_message(
        &self,
        peer: UserId,
        draft: &OutgoingMessage,
    ) -> Result<MessageRecord, ClientError>;
    async fn add_reaction(
        &self,
        message: MessageId,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ClientError>;
    async fn remove_reaction(&self, message: MessageId) -> Result<Vec<Reaction>, ClientError>;
    async fn edit_message(
        &self,
        message: MessageId,
        text: &str,
    ) -> Result<MessageRecord, ClientError>;
    async fn delete_message(&self, message: MessageId) -> Result<MessageRecord, ClientError>;
    async fn mark_read(&self, peer: UserId) -> Result<Vec<MessageId>, ClientError>;
    async fn unread_counts(&self) -> Result<HashMap<UserId, i64>, ClientError>;
}

/// Bearer-token REST client.
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = builder.bearer_auth(&self.token).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| {
                    body.get("error")
                        .and_then(|e| e.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct ReactionResponse {
    reactions: Vec<Reaction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    message_ids: Vec<MessageId>,
}

#[async_trait]
impl MessageApi for HttpApi {
    async fn list_sidebar(&self) -> Result<Vec<SidebarPeer>, ClientError> {
        self.expect_json(self.client.get(self.url("/api/messages/users")))
            .await
    }

    async fn fetch_conversation(&self, peer: UserId) -> Result<Vec<MessageRecord>, ClientError> {
        self.expect_json(self.client.get(self.url(&format!("/api/messages/{peer}"))))
            .await
    }

    async fn send_message(
        &self,
        peer: UserId,
        draft: &OutgoingMessage,
    ) -> Result<MessageRecord, ClientError> {
        self.expect_json(
            self.client
                .post(self.url(&format!("/api/messages/send/{peer}")))
                .json(draft),
        )
        .await
    }

    async fn add_reaction(
        &self,
        message: MessageId,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ClientError> {
        let body: ReactionResponse = self
            .expect_json(
                self.client
                    .post(self.url(&format!("/api/messages/{message}/reaction")))
                    .json(&json!({ "emoji": emoji })),
            )
            .await?;
        Ok(body.reactions)
    }

    async fn remove_reaction(&self, message: MessageId) -> Result<Vec<Reaction>, ClientError> {
        let body: ReactionResponse = self
            .expect_json(
                self.client
                    .delete(self.url(&format!("/api/messages/{message}/reaction"))),
            )
            .await?;
        Ok(body.reactions)
    }

    async fn edit_message(
        &self,
        message: MessageId,
        text: &str,
    ) -> Result<MessageRecord, ClientError> {
        self.expect_json(
            self.client
                .put(self.url(&format!("/api/messages/{message}/edit")))
                .json(&json!({ "text": text })),
        )
        .await
    }

    async fn delete_message(&self, message: MessageId) -> Result<MessageRecord, ClientError> {
        self.expect_json(
            self.client
                .delete(self.url(&format!("/api/messages/{message}"))),
        )
        .await
    }

    async fn mark_read(&self, peer: UserId) -> Result<Vec<MessageId>, ClientError> {
        let body: MarkReadResponse = self
            .expect_json(
                self.client
                    .put(self.url(&format!("/api/messages/read/{peer}"))),
            )
            .await?;
        Ok(body.message_ids)
    }

    async fn unread_counts(&self) -> Result<HashMap<UserId, i64>, ClientError> {
        self.expect_json(self.client.get(self.url("/api/messages/unread/counts")))
            .await
    }
}
