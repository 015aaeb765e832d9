use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Palaver";

/// How long after creation a message may still be edited or deleted by its
/// sender.
pub const EDIT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// How long an outgoing call rings before it is auto-ended as missed.
pub const CALL_RING_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace delay between a call reaching `ended` and the coordinator reverting
/// to `idle`.
pub const CALL_RESET_DELAY: Duration = Duration::from_secs(1);

/// Idle time after the last keystroke before an outgoing typing indicator is
/// self-cleared.
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(1);

/// Lifetime of an issued session token.
pub const SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Minimum accepted password length at signup.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Default HTTP/WebSocket listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
