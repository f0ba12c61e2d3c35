//! Shared dimension editor.
//!
//! Bound at `draft.schema.dimensions[id]`. Hierarchy editors opened from it
//! bind relative to its store and report their dirty flags into its
//! hierarchy registry, a child of the session registry: whenever the whole
//! draft turns clean, the hierarchy flags are cleared with it.

use std::sync::Arc;

use semdraft_core::lens::{self, DimensionLens, Lens};
use semdraft_core::{Dimension, Entity, EntityId, EntityList, Hierarchy};

use crate::dirty_check::DirtyRegistry;
use crate::editors::{ensure_bound, registry_sink, Binding};
use crate::error::SessionError;
use crate::session::{EditSession, RootStore};
use crate::store::Store;
use crate::substore::SubStore;

/// Store of the dimension an editor is bound to.
pub type DimensionStore = SubStore<RootStore, DimensionLens>;

pub struct DimensionEditor {
    session: EditSession,
    binding: Binding<RootStore, DimensionLens>,
    hierarchies: Arc<DirtyRegistry>,
}

impl DimensionEditor {
    pub fn init(session: &EditSession, id: EntityId) -> Result<DimensionEditor, SessionError> {
        session.ensure_open()?;
        let binding = Binding::new(
            Arc::clone(session.store()),
            Arc::clone(session.pristine_store()),
            id.clone(),
            lens::dimension_at(id),
            registry_sink(session.registry()),
        )?;
        Ok(DimensionEditor {
            session: session.clone(),
            binding,
            hierarchies: session.registry().child(),
        })
    }

    pub fn connect(&self, id: EntityId) -> Result<(), SessionError> {
        ensure_bound(&self.binding)?;
        self.binding.rebind(id.clone(), lens::dimension_at(id))?;
        self.hierarchies.clear();
        Ok(())
    }

    pub fn id(&self) -> EntityId {
        self.binding.id()
    }

    pub fn dimension(&self) -> Result<Dimension, SessionError> {
        self.binding.live.get()
    }

    pub fn dirty(&self) -> bool {
        self.binding.dirty()
    }

    /// Flag last reported by the editor of hierarchy `id`.
    pub fn hierarchy_dirty(&self, id: &EntityId) -> bool {
        self.hierarchies.get(id)
    }

    pub fn dirty_hierarchies(&self) -> Vec<EntityId> {
        self.hierarchies.dirty_ids()
    }

    pub(crate) fn session(&self) -> &EditSession {
        &self.session
    }

    pub(crate) fn hierarchy_flags(&self) -> &Arc<DirtyRegistry> {
        &self.hierarchies
    }

    /// Live and pristine stores of the bound dimension.
    pub(crate) fn stores(&self) -> (Arc<DimensionStore>, Arc<DimensionStore>) {
        (
            Arc::new(self.binding.live.clone()),
            Arc::new(self.binding.pristine.clone()),
        )
    }

    fn apply<R>(
        &self,
        f: impl FnOnce(&mut Dimension) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.session.ensure_open()?;
        ensure_bound(&self.binding)?;
        self.binding.live.update(f)
    }

    /// Applies `f` to the dimension record.
    pub fn update(&self, f: impl FnOnce(&mut Dimension)) -> Result<(), SessionError> {
        self.apply(|dimension| {
            f(dimension);
            Ok(())
        })
    }

    /// Appends `hierarchy` (a blank one when `None`), captioned
    /// "New Hierarchy" unless it has a caption. Returns its id.
    pub fn new_hierarchy(&self, hierarchy: Option<Hierarchy>) -> Result<EntityId, SessionError> {
        let mut hierarchy =
            hierarchy.unwrap_or_else(|| Hierarchy::new(EntityId::generate(), ""));
        if hierarchy.caption.is_none() {
            hierarchy.caption = Some("New Hierarchy".to_string());
        }
        let id = hierarchy.id().clone();
        self.apply(|dimension| Ok(dimension.hierarchies.push(hierarchy)?))?;
        Ok(id)
    }

    /// Removes hierarchy `id` and returns the neighbour to show next: the
    /// one before it, or the last one when it was first.
    pub fn remove_hierarchy(&self, id: &EntityId) -> Result<Option<EntityId>, SessionError> {
        let next = self.apply(|dimension| {
            let Some(index) = dimension.hierarchies.position(id) else {
                return Ok(None);
            };
            dimension.hierarchies.remove(id);
            let remaining = &dimension.hierarchies;
            let neighbour = match index {
                0 => remaining.last(),
                i => remaining.get_index(i - 1),
            };
            Ok(neighbour.map(|h| h.id().clone()))
        })?;
        self.hierarchies.remove(id);
        Ok(next)
    }

    /// Applies `f` to hierarchy `id`.
    pub fn update_hierarchy(
        &self,
        id: &EntityId,
        f: impl FnOnce(&mut Hierarchy),
    ) -> Result<(), SessionError> {
        let path = self.binding.live.path().join(&lens::hierarchy(id.clone()).path());
        self.apply(|dimension| {
            let hierarchy = dimension
                .hierarchies
                .get_mut(id)
                .ok_or_else(|| SessionError::not_found(path))?;
            f(hierarchy);
            Ok(())
        })
    }

    /// Appends a copy of hierarchy `id` under `new_id`, with fresh level
    /// ids, a `_copy` name suffix and a ` Copy` caption suffix.
    pub fn duplicate_hierarchy(&self, id: &EntityId, new_id: EntityId) -> Result<EntityId, SessionError> {
        let path = self.binding.live.path().join(&lens::hierarchy(id.clone()).path());
        self.apply(|dimension| {
            let source = dimension
                .hierarchies
                .get(id)
                .ok_or_else(|| SessionError::not_found(path))?;
            let mut copy = source.clone().with_id(new_id.clone());
            copy.name = if copy.name.is_empty() {
                "copy".to_string()
            } else {
                format!("{}_copy", copy.name)
            };
            copy.caption = Some(format!("{} Copy", copy.caption.as_deref().unwrap_or_default()));
            copy.levels = EntityList::from_vec(
                copy.levels
                    .iter()
                    .map(|level| level.clone().with_id(EntityId::generate()))
                    .collect(),
            )?;
            dimension.hierarchies.push(copy)?;
            Ok(new_id)
        })
    }

    /// Replaces the hierarchy with the same name (keeping its id), or
    /// appends `hierarchy`. Returns the id of the stored hierarchy.
    pub fn upsert_hierarchy(&self, hierarchy: Hierarchy) -> Result<EntityId, SessionError> {
        self.apply(|dimension| {
            let existing = dimension
                .hierarchies
                .iter()
                .find(|h| h.name == hierarchy.name)
                .map(|h| h.id().clone());
            match existing {
                Some(id) => {
                    dimension.hierarchies.upsert(hierarchy.with_id(id.clone()));
                    Ok(id)
                }
                None => {
                    let id = hierarchy.id().clone();
                    dimension.hierarchies.push(hierarchy)?;
                    Ok(id)
                }
            }
        })
    }

    pub fn move_item_in_hierarchies(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.apply(|dimension| Ok(dimension.hierarchies.move_item(from, to)?))
    }

    pub fn close(&self) {
        self.binding.close();
        self.hierarchies.clear();
    }
}

impl Drop for DimensionEditor {
    fn drop(&mut self) {
        self.binding.close();
    }
}
