//! # palaver-media
//!
//! Accessor for the external media bucket: an object-storage service that
//! accepts base64 payloads and hands back a durable URL.  The bucket is an
//! opaque collaborator -- this crate only knows how to upload and how to fail.

pub mod bucket;

mod error;

pub use bucket::{HttpBucket, MediaBucket, MediaKind, MemoryBucket};
pub use error::MediaError;
