//! Entity-level change detection between two drafts.
//!
//! Compares per-entity content hashes of a baseline draft (last loaded or
//! saved) with the current draft and reports which top-level entities were
//! added, modified or removed. This is the structural diff attached to the
//! whole-draft dirty check.

use std::collections::{BTreeMap, BTreeSet};

use semdraft_core::{Draft, EntityId};

use crate::error::StorageError;
use crate::hash::{hash_entities, EntityKind};

/// The set of entities that differ from the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    /// Entities added since the baseline.
    pub new: BTreeSet<EntityId>,
    /// Entities whose content changed since the baseline.
    pub modified: BTreeSet<EntityId>,
    /// Entities present in the baseline but gone now.
    pub removed: BTreeSet<EntityId>,
}

impl DirtySet {
    /// Returns true if nothing changed.
    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total count of changed entities (new + modified + removed).
    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.removed.len()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.new.contains(id) || self.modified.contains(id) || self.removed.contains(id)
    }
}

/// Computes the dirty set of `current` against previously taken entity hashes.
pub fn compute_dirty_set(
    current: &Draft,
    previous: &BTreeMap<EntityId, (EntityKind, blake3::Hash)>,
) -> Result<DirtySet, StorageError> {
    let current_hashes = hash_entities(current)?;
    let mut dirty = DirtySet::default();

    for (id, (_, hash)) in &current_hashes {
        match previous.get(id) {
            Some((_, prev)) if prev != hash => {
                dirty.modified.insert(id.clone());
            }
            Some(_) => {}
            None => {
                dirty.new.insert(id.clone());
            }
        }
    }

    for id in previous.keys() {
        if !current_hashes.contains_key(id) {
            dirty.removed.insert(id.clone());
        }
    }

    Ok(dirty)
}

/// Dirty set of `live` relative to `pristine`.
pub fn diff_drafts(pristine: &Draft, live: &Draft) -> Result<DirtySet, StorageError> {
    compute_dirty_set(live, &hash_entities(pristine)?)
}
