//! # palaver-server
//!
//! The Palaver chat server:
//! - **REST API** (axum) for auth and all persisted message writes
//! - **WebSocket channel** pushing realtime events to connected peers
//! - **Presence registry** tracking who is online, one connection per user
//! - **Signaling relay** forwarding opaque call-negotiation payloads
//!
//! Everything is wired from [`api::AppState`]; the binary in `main.rs` only
//! loads configuration and hands off to [`api::serve`].

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod presence;
pub mod ws;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
pub use presence::{ConnectionHandle, PresenceRegistry};
