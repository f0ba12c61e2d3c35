//! Session error types.
//!
//! [`SessionError`] is returned by every fallible store, editor and session
//! operation. Lower-layer errors convert into it with `?`.

use semdraft_core::{CoreError, Path};
use semdraft_storage::{StorageError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A store path does not resolve to a value, typically a stale id.
    #[error("nothing at {path}")]
    NotFound { path: Path },

    /// A change listener tried to update the store that is notifying it.
    #[error("store updated from inside its own change listener")]
    Reentrant,

    /// The edit session was closed.
    #[error("edit session is closed")]
    Closed,

    /// An editor operation was rejected (for example a duplicate level).
    #[error("{0}")]
    Rejected(String),

    /// The last save failed; carries the transport's message.
    #[error("save failed: {0}")]
    SaveFailed(String),

    /// The query engine reported an error.
    #[error("query engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    pub fn not_found(path: Path) -> Self {
        SessionError::NotFound { path }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound { .. } | SessionError::Core(CoreError::NotFound { .. })
        )
    }
}
