use thiserror::Error;

/// Errors produced by the media bucket accessor.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The payload is not valid base64 or is empty.
    #[error("Invalid media payload: {0}")]
    InvalidPayload(String),

    /// The bucket rejected the upload or could not be reached.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// No bucket endpoint is configured.
    #[error("Media uploads are not configured")]
    NotConfigured,
}
