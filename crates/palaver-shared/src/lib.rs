//! # palaver-shared
//!
//! Types shared by the Palaver server and client crates: domain identifiers,
//! the realtime wire protocol, message text utilities, and the tunable
//! business constants (edit window, call timeout, debounce intervals).

pub mod constants;
pub mod protocol;
pub mod text;
pub mod types;
