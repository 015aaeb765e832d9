//! The [`MediaBucket`] seam and its implementations.
//!
//! Payloads arrive from clients as base64 (optionally as a
//! `data:<mime>;base64,<data>` URL); the bucket stores the decoded object and
//! returns a durable URL, which is all the message store ever persists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MediaError;

/// What kind of object is being uploaded.  The bucket may use it to pick a
/// storage class or file extension; Palaver treats it as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Voice,
    Avatar,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Avatar => "avatar",
        }
    }
}

/// Upload capability over the external object-storage service.
#[async_trait]
pub trait MediaBucket: Send + Sync {
    /// Upload a base64 payload and return its durable URL.
    async fn upload(&self, payload_b64: &str, kind: MediaKind) -> Result<String, MediaError>;
}

/// Strip an optional `data:<mime>;base64,` prefix and validate the payload.
fn decode_payload(payload_b64: &str) -> Result<Vec<u8>, MediaError> {
    let data = match payload_b64.split_once(";base64,") {
        Some((_, data)) => data,
        None => payload_b64,
    };

    if data.is_empty() {
        return Err(MediaError::InvalidPayload("empty payload".into()));
    }

    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| MediaError::InvalidPayload(e.to_string()))
}

// ---------------------------------------------------------------------------
// HTTP bucket
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct UploadRequest<'a> {
    data: &'a str,
    kind: &'static str,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

/// Bucket client talking JSON to a remote upload endpoint.
#[derive(Clone)]
pub struct HttpBucket {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBucket {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl MediaBucket for HttpBucket {
    async fn upload(&self, payload_b64: &str, kind: MediaKind) -> Result<String, MediaError> {
        // Reject garbage locally before paying for a round trip.
        let decoded = decode_payload(payload_b64)?;

        let response = self
            .client
            .post(&self.endpoint)
            .json(&UploadRequest {
                data: payload_b64,
                kind: kind.as_str(),
            })
            .send()
            .await
            .map_err(|e| MediaError::UploadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MediaError::UploadFailed(format!(
                "bucket returned {}",
                response.status()
            )));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| MediaError::UploadFailed(e.to_string()))?;

        tracing::debug!(
            kind = kind.as_str(),
            bytes = decoded.len(),
            url = %body.url,
            "media uploaded"
        );

        Ok(body.url)
    }
}

// ---------------------------------------------------------------------------
// In-memory bucket
// ---------------------------------------------------------------------------

/// In-process bucket used by tests and by deployments without an external
/// bucket.  Mints `mem://` URLs and can be toggled to fail every upload to
/// exercise the degrade paths.
#[derive(Clone, Default)]
pub struct MemoryBucket {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fetch a stored object back by its `mem://` URL.
    pub fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("bucket lock").get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("bucket lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MediaBucket for MemoryBucket {
    async fn upload(&self, payload_b64: &str, kind: MediaKind) -> Result<String, MediaError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MediaError::UploadFailed("bucket unavailable".into()));
        }

        let decoded = decode_payload(payload_b64)?;
        let url = format!("mem://{}/{}", kind.as_str(), Uuid::new_v4());
        self.objects
            .lock()
            .expect("bucket lock")
            .insert(url.clone(), decoded);
        Ok(url)
    }
}
