//! Storage and transport error types for semdraft-storage.
//!
//! [`StorageError`] covers the failure modes of the backends themselves
//! (serialization, SQLite, migrations, missing records). [`TransportError`]
//! is what a [`DraftTransport`](crate::DraftTransport) caller sees; its
//! `Display` output is a human-readable message suitable for showing to the
//! user as-is.

use semdraft_core::ModelId;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite reported an error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A model with the given ID was not found.
    #[error("semantic model not found: {0}")]
    ModelNotFound(ModelId),

    /// A stored record could not be interpreted.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}

/// Errors surfaced by a draft transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend refused the request (validation, conflict).
    #[error("{message}")]
    Rejected { message: String },

    /// The backend could not be reached.
    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TransportError {
    pub fn rejected(message: impl Into<String>) -> Self {
        TransportError::Rejected {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        TransportError::Unavailable {
            message: message.into(),
        }
    }
}
