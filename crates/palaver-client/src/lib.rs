//! # palaver-client
//!
//! Client-side synchronization for Palaver:
//! - [`ChatStore`]: the per-session reconciler holding the open conversation,
//!   applying optimistic local mutations and merging server pushes
//! - [`ChatClient`]: drives the two-phase send protocol around a
//!   [`MessageApi`] implementation
//! - [`CallCoordinator`]: the per-attempt call state machine with ring
//!   timeout and grace reset
//! - [`TypingNotifier`]: debounced outgoing typing indicator
//!
//! The store is single-threaded-cooperative: every mutation runs on `&mut
//! self`, and the only suspension points are the `MessageApi` awaits in
//! [`ChatClient`].

pub mod api;
pub mod call;
pub mod store;
pub mod typing;

mod error;

pub use api::{HttpApi, MessageApi, OutgoingMessage, SidebarPeer};
pub use call::{ActiveCall, CallConfig, CallCoordinator, CallOutcome, CallStatus, IncomingCall};
pub use error::ClientError;
pub use store::{ChatClient, ChatStore, StoreChange};
pub use typing::{TypingConfig, TypingNotifier};
