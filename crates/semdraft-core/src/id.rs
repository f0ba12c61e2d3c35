//! Stable identifier newtypes for draft entities and model records.
//!
//! Ids are opaque strings. They are assigned once at creation, never reused,
//! and never derived from an entity's business name, so renaming a cube does
//! not invalidate a store bound to it.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a cube, dimension, hierarchy, level, virtual cube,
/// measure or role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps an existing id (for example one read back from a saved draft).
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    /// Allocates a fresh random id.
    pub fn generate() -> Self {
        EntityId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId(value)
    }
}

/// Identity of a persisted semantic model record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        ModelId(id.into())
    }

    pub fn generate() -> Self {
        ModelId(Uuid::new_v4().to_string())
    }
}

// Display implementations -- just print the inner value.

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
