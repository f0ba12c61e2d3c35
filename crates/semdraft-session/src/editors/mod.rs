//! Per-entity editors.
//!
//! An editor binds a pair of sub-stores (live and pristine) to one entity of
//! an open [`EditSession`](crate::EditSession) and keeps a dirty check on
//! the pair. The check reports into the session's
//! [`DirtyRegistry`](crate::DirtyRegistry) under the entity id, so the
//! entity list can show per-entity markers while the editor is open.
//!
//! Editors never own data. Closing one drops its bindings and its check;
//! the session's save pipeline is not affected.

pub mod cube;
pub mod dimension;
pub mod hierarchy;
pub mod role;

pub use cube::CubeEditor;
pub use dimension::DimensionEditor;
pub use hierarchy::HierarchyEditor;
pub use role::RoleEditor;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use semdraft_core::{EntityId, Lens};

use crate::dirty_check::{DirtyCheck, DirtyCheckOptions, DirtyRegistry, Reporter};
use crate::error::SessionError;
use crate::store::{lock, Store};
use crate::substore::SubStore;

/// Receives the dirty flag of the entity an editor is bound to.
pub(crate) type DirtySink = Arc<dyn Fn(&EntityId, bool) + Send + Sync>;

/// A sink writing into the session registry.
pub(crate) fn registry_sink(registry: &Arc<DirtyRegistry>) -> DirtySink {
    let registry = Arc::downgrade(registry);
    Arc::new(move |id, dirty| {
        if let Some(registry) = registry.upgrade() {
            registry.set(id.clone(), dirty);
        }
    })
}

/// Live and pristine views of one entity plus their dirty check.
pub(crate) struct Binding<P: Store, L: Lens<P::Value>> {
    pub(crate) live: SubStore<P, L>,
    pub(crate) pristine: SubStore<P, L>,
    check: Mutex<Option<DirtyCheck<L::Target>>>,
    id: RwLock<EntityId>,
    sink: DirtySink,
}

impl<P, L> Binding<P, L>
where
    P: Store,
    L: Lens<P::Value>,
    L::Target: Clone + PartialEq + Send + Sync + 'static,
{
    /// Binds both parents at `lens`. Fails with `NotFound` when the live
    /// document has nothing there.
    pub(crate) fn new(
        live: Arc<P>,
        pristine: Arc<P>,
        id: EntityId,
        lens: L,
        sink: DirtySink,
    ) -> Result<Self, SessionError> {
        ensure_resolves(&live, &lens)?;
        let binding = Binding {
            live: SubStore::new(live, lens.clone()),
            pristine: SubStore::new(pristine, lens),
            check: Mutex::new(None),
            id: RwLock::new(id.clone()),
            sink,
        };
        binding.attach(id);
        Ok(binding)
    }

    /// Moves the binding to another entity.
    pub(crate) fn rebind(&self, id: EntityId, lens: L) -> Result<(), SessionError> {
        ensure_resolves(self.live.parent(), &lens)?;
        // The old check must not see the re-targeted projections.
        lock(&self.check).take();
        self.live.connect(lens.clone());
        self.pristine.connect(lens);
        *self.id.write().unwrap_or_else(PoisonError::into_inner) = id.clone();
        self.attach(id);
        Ok(())
    }

    fn attach(&self, id: EntityId) {
        let report: Reporter = {
            let sink = Arc::clone(&self.sink);
            let id = id.clone();
            Arc::new(move |dirty| sink(&id, dirty))
        };
        let check = DirtyCheck::new(
            &self.live,
            &self.pristine,
            DirtyCheckOptions::default().report(report),
        );
        (self.sink)(&id, check.dirty());
        debug!(entity = %id, path = %self.live.path(), dirty = check.dirty(), "editor bound");
        *lock(&self.check) = Some(check);
    }

    pub(crate) fn id(&self) -> EntityId {
        self.id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn dirty(&self) -> bool {
        lock(&self.check).as_ref().is_some_and(DirtyCheck::dirty)
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.check).is_none()
    }

    /// Drops the dirty check and stops following the parents.
    pub(crate) fn close(&self) {
        if lock(&self.check).take().is_some() {
            debug!(entity = %self.id(), "editor closed");
        }
        self.live.disconnect();
        self.pristine.disconnect();
    }
}

fn ensure_resolves<P, L>(parent: &Arc<P>, lens: &L) -> Result<(), SessionError>
where
    P: Store,
    L: Lens<P::Value>,
{
    if parent.read(|value| value.and_then(|v| lens.view(v)).is_some()) {
        Ok(())
    } else {
        Err(SessionError::not_found(parent.path().join(&lens.path())))
    }
}

/// Fails with `Closed` once the editor was closed.
pub(crate) fn ensure_bound<P, L>(binding: &Binding<P, L>) -> Result<(), SessionError>
where
    P: Store,
    L: Lens<P::Value>,
    L::Target: Clone + PartialEq + Send + Sync + 'static,
{
    if binding.is_closed() {
        Err(SessionError::Closed)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use semdraft_core::lens::cube_at;
    use semdraft_core::{Cube, ModelState};

    fn state() -> ModelState {
        let mut state = ModelState::default();
        for name in ["a", "b"] {
            state
                .draft
                .schema
                .cubes
                .push(Cube::new(EntityId::from(name), name))
                .unwrap();
        }
        state
    }

    fn stores() -> (Arc<DocumentStore<ModelState>>, Arc<DocumentStore<ModelState>>) {
        (
            Arc::new(DocumentStore::new(state())),
            Arc::new(DocumentStore::new(state())),
        )
    }

    #[test]
    fn missing_entity_is_not_found() {
        let (live, pristine) = stores();
        let registry = Arc::new(DirtyRegistry::new());
        let result = Binding::new(
            live,
            pristine,
            EntityId::from("zz"),
            cube_at(EntityId::from("zz")),
            registry_sink(&registry),
        );
        let err = result.err().unwrap();
        assert_eq!(err.to_string(), "nothing at draft.schema.cubes[zz]");
    }

    #[test]
    fn rebind_reports_under_new_id() {
        let (live, pristine) = stores();
        let registry = Arc::new(DirtyRegistry::new());
        let a = EntityId::from("a");
        let b = EntityId::from("b");
        let binding = Binding::new(
            Arc::clone(&live),
            pristine,
            a.clone(),
            cube_at(a.clone()),
            registry_sink(&registry),
        )
        .unwrap();

        binding.live.update(|c| Ok(c.caption = Some("x".into()))).unwrap();
        assert!(registry.get(&a));

        binding.rebind(b.clone(), cube_at(b.clone())).unwrap();
        assert_eq!(binding.id(), b);
        assert!(!binding.dirty());
        binding.live.update(|c| Ok(c.caption = Some("y".into()))).unwrap();
        assert!(registry.get(&b));
        // The flag of the previous entity is left as it was reported.
        assert!(registry.get(&a));
    }

    #[test]
    fn closed_binding_stops_reporting() {
        let (live, pristine) = stores();
        let registry = Arc::new(DirtyRegistry::new());
        let a = EntityId::from("a");
        let binding = Binding::new(
            Arc::clone(&live),
            pristine,
            a.clone(),
            cube_at(a.clone()),
            registry_sink(&registry),
        )
        .unwrap();
        binding.close();
        assert!(ensure_bound(&binding).is_err());

        live.update(|s| {
            s.draft.schema.cubes.get_mut(&a).unwrap().name = "renamed".into();
            Ok(())
        })
        .unwrap();
        assert!(!registry.get(&a));
    }
}
