use thiserror::Error;

/// Errors produced by the store layer.
///
/// The domain variants (`NotFound`, `Conflict`, `Forbidden`, `Validation`)
/// carry the rejection taxonomy of the REST surface; the server maps them
/// onto status codes without inspecting messages.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// The write collides with existing state (duplicate email, duplicate
    /// identical reaction).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller is not allowed to perform this mutation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The input is malformed or incomplete; nothing was written.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Timestamp parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
