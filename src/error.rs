//! Error types for MemoryMesh

use thiserror::Error;

/// Result type alias for MemoryMesh operations
pub type Result<T> = std::result::Result<T, MemoryMeshError>;

/// Main error type for MemoryMesh
#[derive(Error, Debug)]
pub enum MemoryMeshError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryMeshError {
    /// True for errors the caller may retry (transient transport failures).
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoryMeshError::Http(_) | MemoryMeshError::Embedding(_))
    }
}
