use thiserror::Error;

pub type Result<T> = std::result::Result<T, SemsearchError>;

/// Identifier of a stored document
pub type DocumentId = i64;
/// Identifier of a stored chunk; also the key of its vector index entry
pub type ChunkId = i64;

#[derive(Error, Debug)]
pub enum SemsearchError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Embedding model unavailable ({context}): {message}")]
    EmbeddingUnavailable { context: String, message: String },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index corruption detected: {0}; rebuild the index")]
    IndexCorruptionDetected(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Deleting document {document_id} left storage and index out of sync: {message}")]
    CascadeFailed {
        document_id: DocumentId,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SemsearchError {
    /// Wrap an embedding backend failure with the operation it belongs to
    #[inline]
    pub fn embedding(context: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::EmbeddingUnavailable {
            context: context.into(),
            message: error.to_string(),
        }
    }

    /// Wrap a database failure with the operation it belongs to
    #[inline]
    pub fn storage(context: impl std::fmt::Display, error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound(context.to_string()),
            other => Self::Storage(format!("{context}: {other}")),
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<config::ConfigError> for SemsearchError {
    #[inline]
    fn from(error: config::ConfigError) -> Self {
        Self::InvalidConfiguration(error.to_string())
    }
}

impl From<sqlx::Error> for SemsearchError {
    #[inline]
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod engine;
pub mod index;
pub mod ranking;
