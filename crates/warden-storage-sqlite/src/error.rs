//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored value could not be interpreted
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for warden_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(what) => warden_core::Error::NotFound(what),
            other => warden_core::Error::Storage(other.to_string()),
        }
    }
}
