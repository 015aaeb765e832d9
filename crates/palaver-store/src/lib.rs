//! # palaver-store
//!
//! Persistent storage for the Palaver chat server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers for users, sessions,
//! messages, reactions and read receipts.  Message queries return
//! fully-assembled [`palaver_shared::protocol::MessageRecord`]s with child
//! collections attached and reply references resolved, so callers never see
//! raw rows.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod sessions;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
