//! Persistence for semantic-model drafts.
//!
//! Provides the [`DraftTransport`] contract the save pipeline talks to, the
//! [`ModelRepository`] record surface, and two interchangeable backends:
//! [`InMemoryTransport`] and [`SqliteTransport`].
//!
//! # Modules
//!
//! - [`error`]: StorageError and TransportError
//! - [`types`]: SaveReceipt, ModelSummary
//! - [`traits`]: DraftTransport and ModelRepository
//! - [`hash`]: blake3 content hashes of drafts and entities
//! - [`dirty`]: entity-level DirtySet between two drafts
//! - [`checklist`]: draft validation assigned on save
//! - [`memory`]: InMemoryTransport
//! - [`schema`]: opening and migrating the model database
//! - [`sqlite`]: SqliteTransport

pub mod checklist;
pub mod dirty;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use checklist::{validate_draft, ChecklistItem, ChecklistLevel};
pub use dirty::{compute_dirty_set, diff_drafts, DirtySet};
pub use error::{StorageError, TransportError};
pub use hash::{hash_draft, hash_entities, hash_value, EntityKind};
pub use memory::InMemoryTransport;
pub use sqlite::SqliteTransport;
pub use traits::{DraftTransport, ModelRepository};
pub use types::{ModelSummary, SaveReceipt};
