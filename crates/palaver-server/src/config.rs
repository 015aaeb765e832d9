//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use palaver_shared::constants::{DEFAULT_HTTP_PORT, EDIT_WINDOW, SESSION_TTL};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./palaver.db`
    pub db_path: PathBuf,

    /// Upload endpoint of the external media bucket.
    /// Env: `BUCKET_URL`
    /// Default: unset (media uploads disabled; image sends are rejected).
    pub bucket_url: Option<String>,

    /// How long after creation a message may still be edited or deleted.
    /// Env: `EDIT_WINDOW_SECS`
    /// Default: 900 (15 minutes).
    pub edit_window: Duration,

    /// Lifetime of issued session tokens.
    /// Env: `SESSION_TTL_SECS`
    /// Default: 7 days.
    pub session_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_path: PathBuf::from("./palaver.db"),
            bucket_url: None,
            edit_window: EDIT_WINDOW,
            session_ttl: SESSION_TTL,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("BUCKET_URL") {
            if !url.is_empty() {
                config.bucket_url = Some(url);
            }
        }

        if let Ok(val) = std::env::var("EDIT_WINDOW_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.edit_window = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid EDIT_WINDOW_SECS, using default");
                }
            }
        }

        if let Ok(val) = std::env::var("SESSION_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.session_ttl = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid SESSION_TTL_SECS, using default");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
