//! Core error types for semdraft-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the draft data model and its addressing scheme.

use thiserror::Error;

use crate::id::EntityId;
use crate::path::Path;

/// Core errors produced by the semdraft-core crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A path did not resolve to a value in the document.
    #[error("no entity at path {path}")]
    NotFound { path: Path },

    /// An entity with the same id already exists in the collection.
    #[error("duplicate entity id: {id}")]
    DuplicateId { id: EntityId },

    /// An entity stored under `id` was replaced by one carrying `found`.
    #[error("entity id {id} cannot change (found {found})")]
    IdChanged { id: EntityId, found: EntityId },

    /// A named item (table, level, cube grant) already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// A positional argument fell outside a collection.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}
