//! The editing core of a semantic-model draft.
//!
//! One [`EditSession`] per open model owns a live and a pristine
//! [`DocumentStore`], the undo [`History`], the whole-draft dirty check and
//! the save scheduler. Editors ([`editors`]) bind [`SubStore`]s to single
//! entities and report per-entity dirty flags into the session's
//! [`DirtyRegistry`].
//!
//! # Modules
//!
//! - [`store`]: the `Store` contract, `DocumentStore`, ordered broadcaster
//! - [`substore`]: lens-bound derived stores
//! - [`dirty_check`]: live/pristine comparison and the per-entity registry
//! - [`history`]: bounded undo/redo over snapshots
//! - [`scheduler`]: debounced, serialized draft saves
//! - [`bridge`]: query-engine contract and registration
//! - [`session`]: `EditSession` and its builder
//! - [`model_ops`]: model-level draft operations
//! - [`editors`]: cube, dimension, hierarchy and role editors

pub mod bridge;
pub mod config;
pub mod dirty_check;
pub mod editors;
pub mod error;
pub mod history;
pub mod model_ops;
pub mod notifier;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod substore;

pub use bridge::{DataSource, EntityType, ModelRegistration, QueryEngine, RegistrationBridge};
pub use config::SessionConfig;
pub use dirty_check::{DirtyCheck, DirtyCheckOptions, DirtyRegistry, DirtyStatus};
pub use editors::{CubeEditor, DimensionEditor, HierarchyEditor, RoleEditor};
pub use error::SessionError;
pub use history::History;
pub use model_ops::{ColumnRole, EntitySummary, NewColumn, NewEntity};
pub use notifier::{Notifier, RecordingNotifier, TracingNotifier};
pub use scheduler::{SavePhase, SaveStatus};
pub use session::{EditSession, SessionBuilder};
pub use store::{DocumentStore, Store, Subscription, Validator};
pub use substore::SubStore;
