//! Derived stores bound to a sub-tree of a parent store.
//!
//! A [`SubStore`] owns no data. It reads by projecting the parent's value
//! through a [`Lens`] and writes by splicing the updated sub-tree back via
//! the parent's `update`, so the parent's change stream stays the single
//! source of truth. It notifies its own listeners only when the projected
//! value actually changed.
//!
//! The binding can be re-targeted with [`SubStore::connect`]; the new
//! projection is computed (and announced) immediately. When the lens does
//! not resolve, for example because the entity was deleted, reads see `None`
//! and `get`/`update` fail with [`SessionError::NotFound`].

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tracing::debug;

use semdraft_core::{Lens, Path};

use crate::error::SessionError;
use crate::store::{lock, Broadcaster, Store, Subscription};

struct Binding<P: Store, L: Lens<P::Value>> {
    parent: Arc<P>,
    lens: RwLock<L>,
    last: Mutex<Option<L::Target>>,
    changes: Arc<Broadcaster<L::Target>>,
    parent_subscription: Mutex<Option<Subscription>>,
}

impl<P, L> Binding<P, L>
where
    P: Store,
    L: Lens<P::Value>,
    L::Target: Clone + PartialEq + Send + Sync + 'static,
{
    fn lens(&self) -> L {
        self.lens.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stores `projected` as the latest value and notifies if it differs.
    fn publish(&self, projected: Option<L::Target>) {
        {
            let mut last = lock(&self.last);
            if *last == projected {
                return;
            }
            last.clone_from(&projected);
        }
        self.changes.emit(projected.as_ref());
    }

    fn on_parent_change(&self, value: Option<&P::Value>) {
        let lens = self.lens();
        let projected = value.and_then(|v| lens.view(v)).cloned();
        self.publish(projected);
    }
}

/// A live, bidirectional view onto `parent` at the location of a lens.
pub struct SubStore<P: Store, L: Lens<P::Value>> {
    binding: Arc<Binding<P, L>>,
}

impl<P, L> SubStore<P, L>
where
    P: Store,
    L: Lens<P::Value>,
    L::Target: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(parent: Arc<P>, lens: L) -> Self {
        let initial = parent.read(|value| value.and_then(|v| lens.view(v)).cloned());
        let binding = Arc::new(Binding {
            parent: Arc::clone(&parent),
            lens: RwLock::new(lens),
            last: Mutex::new(initial),
            changes: Broadcaster::new(),
            parent_subscription: Mutex::new(None),
        });

        let weak: Weak<Binding<P, L>> = Arc::downgrade(&binding);
        let subscription = parent.subscribe(move |value| {
            if let Some(binding) = weak.upgrade() {
                binding.on_parent_change(value);
            }
        });
        *lock(&binding.parent_subscription) = Some(subscription);

        SubStore { binding }
    }

    /// Re-binds to a new location and re-projects immediately.
    pub fn connect(&self, lens: L) {
        debug!(path = %self.parent_path().join(&lens.path()), "sub-store connected");
        let projected = {
            let mut current = self.binding.lens.write().unwrap_or_else(PoisonError::into_inner);
            *current = lens;
            self.binding
                .parent
                .read(|value| value.and_then(|v| current.view(v)).cloned())
        };
        self.binding.publish(projected);
    }

    /// Stops following the parent. Reads still work; listeners are no
    /// longer notified.
    pub fn disconnect(&self) {
        lock(&self.binding.parent_subscription).take();
    }

    pub fn lens(&self) -> L {
        self.binding.lens()
    }

    pub fn parent(&self) -> &Arc<P> {
        &self.binding.parent
    }

    fn parent_path(&self) -> Path {
        self.binding.parent.path()
    }
}

impl<P, L> Store for SubStore<P, L>
where
    P: Store,
    L: Lens<P::Value>,
    L::Target: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = L::Target;

    fn read<R>(&self, f: impl FnOnce(Option<&L::Target>) -> R) -> R {
        let lens = self.binding.lens();
        self.binding
            .parent
            .read(|value| f(value.and_then(|v| lens.view(v))))
    }

    fn update<R>(
        &self,
        f: impl FnOnce(&mut L::Target) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        let lens = self.binding.lens();
        let path = self.path();
        self.binding.parent.update(move |value| {
            let target = lens
                .view_mut(value)
                .ok_or_else(|| SessionError::not_found(path))?;
            f(target)
        })
    }

    fn subscribe(
        &self,
        listener: impl Fn(Option<&L::Target>) + Send + Sync + 'static,
    ) -> Subscription {
        self.binding.changes.subscribe(listener)
    }

    fn path(&self) -> Path {
        self.parent_path().join(&self.binding.lens().path())
    }
}

impl<P: Store, L: Lens<P::Value>> Clone for SubStore<P, L> {
    fn clone(&self) -> Self {
        SubStore {
            binding: Arc::clone(&self.binding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use proptest::prelude::*;
    use semdraft_core::lens::{cube_at, cube_dimension, hierarchy};
    use semdraft_core::{Cube, Dimension, EntityId, Hierarchy, ModelState};

    fn state() -> ModelState {
        let mut state = ModelState::default();
        for name in ["a", "b"] {
            let mut cube = Cube::new(EntityId::from(name), name);
            let mut dimension = Dimension::new(EntityId::from(format!("{name}-d")), "Time");
            dimension
                .hierarchies
                .push(Hierarchy::new(EntityId::from(format!("{name}-h")), ""))
                .unwrap();
            cube.dimensions.push(dimension).unwrap();
            state.draft.schema.cubes.push(cube).unwrap();
        }
        state
    }

    fn counter<S: Store>(store: &S) -> (Arc<Mutex<usize>>, Subscription) {
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let sub = store.subscribe(move |_| *sink.lock().unwrap() += 1);
        (count, sub)
    }

    #[test]
    fn writes_splice_back_into_parent() {
        let root = Arc::new(DocumentStore::new(state()));
        let cube = SubStore::new(Arc::clone(&root), cube_at(EntityId::from("b")));

        cube.update(|c| {
            c.caption = Some("Stock".into());
            Ok(())
        })
        .unwrap();

        let snapshot = root.snapshot();
        let stored = snapshot.draft.schema.cubes.get(&EntityId::from("b")).unwrap();
        assert_eq!(stored.caption.as_deref(), Some("Stock"));
        assert_eq!(cube.path().to_string(), "draft.schema.cubes[b]");
    }

    #[test]
    fn only_relevant_changes_notify() {
        let root = Arc::new(DocumentStore::new(state()));
        let a = SubStore::new(Arc::clone(&root), cube_at(EntityId::from("a")));
        let (count, _sub) = counter(&a);

        root.update(|s| {
            s.draft.schema.cubes.get_mut(&EntityId::from("b")).unwrap().caption = Some("x".into());
            Ok(())
        })
        .unwrap();
        assert_eq!(*count.lock().unwrap(), 0);

        a.update(|c| Ok(c.visible = Some(false))).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn binding_survives_reordering() {
        let root = Arc::new(DocumentStore::new(state()));
        let a = SubStore::new(Arc::clone(&root), cube_at(EntityId::from("a")));
        root.update(|s| Ok(s.draft.schema.cubes.move_item(0, 1)?)).unwrap();
        assert_eq!(a.get().unwrap().name, "a");
    }

    #[test]
    fn deleted_entity_is_not_found() {
        let root = Arc::new(DocumentStore::new(state()));
        let a = SubStore::new(Arc::clone(&root), cube_at(EntityId::from("a")));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = a.subscribe(move |c| sink.lock().unwrap().push(c.is_some()));

        root.update(|s| {
            s.draft.schema.cubes.remove(&EntityId::from("a"));
            Ok(())
        })
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![false]);
        assert!(a.get().unwrap_err().is_not_found());
        let err = a.update(|c| Ok(c.name.clear())).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(root.snapshot().draft.schema.cubes.len(), 1);
    }

    #[test]
    fn connect_retargets_and_reprojects() {
        let root = Arc::new(DocumentStore::new(state()));
        let cube = SubStore::new(Arc::clone(&root), cube_at(EntityId::from("a")));
        let (count, _sub) = counter(&cube);

        cube.connect(cube_at(EntityId::from("b")));
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(cube.get().unwrap().name, "b");

        cube.connect(cube_at(EntityId::from("missing")));
        assert!(!cube.is_resolved());
    }

    #[test]
    fn nested_sub_stores_chain_to_root() {
        let root = Arc::new(DocumentStore::new(state()));
        let cube = Arc::new(SubStore::new(Arc::clone(&root), cube_at(EntityId::from("a"))));
        let dimension = Arc::new(SubStore::new(
            Arc::clone(&cube),
            cube_dimension(EntityId::from("a-d")),
        ));
        let hier = SubStore::new(Arc::clone(&dimension), hierarchy(EntityId::from("a-h")));
        let (count, _sub) = counter(&hier);

        hier.update(|h| Ok(h.has_all = Some(false))).unwrap();

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(
            hier.path().to_string(),
            "draft.schema.cubes[a].dimensions[a-d].hierarchies[a-h]"
        );
        let snapshot = root.snapshot();
        let stored = snapshot.draft.schema.cubes.get(&EntityId::from("a")).unwrap();
        let h = stored.dimensions.first().unwrap().hierarchies.first().unwrap();
        assert_eq!(h.has_all, Some(false));
    }

    #[test]
    fn disconnect_stops_notifications() {
        let root = Arc::new(DocumentStore::new(state()));
        let cube = SubStore::new(Arc::clone(&root), cube_at(EntityId::from("a")));
        let (count, _sub) = counter(&cube);
        cube.disconnect();
        cube.update(|c| Ok(c.name = "renamed".into())).unwrap();
        assert_eq!(*count.lock().unwrap(), 0);
        assert_eq!(cube.get().unwrap().name, "renamed");
    }

    proptest! {
        #[test]
        fn sub_store_write_back(
            pick_b in any::<bool>(),
            caption in "[A-Za-z0-9 ]{0,16}",
            expression in proptest::option::of("[a-z_]{1,10}"),
        ) {
            let root = Arc::new(DocumentStore::new(state()));
            let id = EntityId::from(if pick_b { "b" } else { "a" });
            let lens = cube_at(id.clone());
            let sub = SubStore::new(Arc::clone(&root), lens.clone());

            let mut value = sub.get().unwrap();
            value.caption = Some(caption);
            value.expression = expression;
            sub.set(value.clone()).unwrap();

            let snapshot = root.snapshot();
            prop_assert_eq!(lens.view(&*snapshot), Some(&value));
            prop_assert_eq!(sub.get().unwrap(), value);
        }
    }
}
