//! Deterministic content hashing for drafts and their entities using blake3.
//!
//! Hashes are derived state, never stored. They serve two purposes: the
//! save pipeline compares draft hashes to skip no-op saves, and the
//! entity-level dirty set compares per-entity hashes against a baseline.
//!
//! # Determinism
//!
//! Serialization goes through `serde_json::to_vec`. Entity collections
//! serialize in display order and free-form maps are ordered by key, so the
//! same content always produces the same bytes.

use std::collections::BTreeMap;

use serde::Serialize;

use semdraft_core::{Draft, Entity, EntityId};

use crate::error::StorageError;

/// Hashes any serializable value.
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<blake3::Hash, StorageError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes))
}

/// Hash of the draft content that is worth saving.
///
/// The server-assigned fields (`version`, `checklist`, `savedAt`) are
/// excluded: a save that only changes them must not schedule another save.
pub fn hash_draft(draft: &Draft) -> Result<blake3::Hash, StorageError> {
    hash_value(&draft.without_volatile())
}

/// Which top-level collection an entity hash came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Cube,
    Dimension,
    VirtualCube,
    Role,
}

/// Hashes every top-level entity of the draft (cubes, shared dimensions,
/// virtual cubes, roles), keyed by id.
pub fn hash_entities(
    draft: &Draft,
) -> Result<BTreeMap<EntityId, (EntityKind, blake3::Hash)>, StorageError> {
    let mut hashes = BTreeMap::new();
    collect(&mut hashes, EntityKind::Cube, draft.schema.cubes.iter())?;
    collect(&mut hashes, EntityKind::Dimension, draft.schema.dimensions.iter())?;
    collect(
        &mut hashes,
        EntityKind::VirtualCube,
        draft.schema.virtual_cubes.iter(),
    )?;
    collect(&mut hashes, EntityKind::Role, draft.roles.iter())?;
    Ok(hashes)
}

fn collect<'a, T: Entity + Serialize + 'a>(
    into: &mut BTreeMap<EntityId, (EntityKind, blake3::Hash)>,
    kind: EntityKind,
    entities: impl Iterator<Item = &'a T>,
) -> Result<(), StorageError> {
    for entity in entities {
        into.insert(entity.id().clone(), (kind, hash_value(entity)?));
    }
    Ok(())
}
