use thiserror::Error;

/// Errors surfaced to the UI layer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected the request.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The operation does not apply in the current local state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e.to_string())
    }
}
