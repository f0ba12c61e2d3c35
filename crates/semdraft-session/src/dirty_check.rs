//! Dirty tracking of a live store against its pristine pair.
//!
//! A [`DirtyCheck`] follows two stores bound to the same path, one holding
//! the user's edits and one holding the last loaded or saved snapshot, and
//! recomputes on every emission of either. Dirty means the comparator says
//! the two differ; by default any structural difference counts.
//!
//! A failing comparator or differ never reports clean: the pair is treated
//! as dirty and a warning is logged.
//!
//! [`DirtyRegistry`] is the per-entity view: a map from entity id to the
//! flag last reported by that entity's own check. Registries nest: clearing
//! one clears every child created from it, so a clean whole draft leaves no
//! entity flagged at any depth.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use tracing::warn;

use semdraft_core::EntityId;

use crate::error::SessionError;
use crate::store::{lock, Store, Subscription};

/// Returns `true` when `live` should count as dirty against `pristine`.
pub type Comparator<T> =
    Arc<dyn Fn(Option<&T>, Option<&T>) -> Result<bool, SessionError> + Send + Sync>;

/// Structural diff of `pristine` (first) and `live` (second).
pub type Differ<T, D> = Arc<dyn Fn(&T, &T) -> Result<D, SessionError> + Send + Sync>;

/// Called with the new flag whenever it flips.
pub type Reporter = Arc<dyn Fn(bool) + Send + Sync>;

/// Any difference is dirty.
pub fn not_equal<T: PartialEq>() -> Comparator<T>
where
    T: 'static,
{
    Arc::new(|live, pristine| Ok(live != pristine))
}

pub struct DirtyCheckOptions<T, D> {
    comparator: Comparator<T>,
    differ: Option<Differ<T, D>>,
    reporter: Option<Reporter>,
}

impl<T: PartialEq + 'static, D> Default for DirtyCheckOptions<T, D> {
    fn default() -> Self {
        DirtyCheckOptions {
            comparator: not_equal(),
            differ: None,
            reporter: None,
        }
    }
}

impl<T, D> DirtyCheckOptions<T, D> {
    pub fn comparator(mut self, comparator: Comparator<T>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn differ(mut self, differ: Differ<T, D>) -> Self {
        self.differ = Some(differ);
        self
    }

    pub fn report(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

/// Latest result of a dirty check.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyStatus<D> {
    pub dirty: bool,
    /// Present when a differ is configured and the pair is dirty.
    pub diff: Option<D>,
}

impl<D> Default for DirtyStatus<D> {
    fn default() -> Self {
        DirtyStatus {
            dirty: false,
            diff: None,
        }
    }
}

struct Pair<T, D> {
    live: Mutex<Option<T>>,
    pristine: Mutex<Option<T>>,
    status: Mutex<DirtyStatus<D>>,
    comparator: Comparator<T>,
    differ: Option<Differ<T, D>>,
    reporter: Option<Reporter>,
}

impl<T, D> Pair<T, D> {
    fn recompute(&self) {
        let (dirty, diff) = {
            let live = lock(&self.live);
            let pristine = lock(&self.pristine);
            match (self.comparator)(live.as_ref(), pristine.as_ref()) {
                Err(err) => {
                    warn!(error = %err, "dirty comparison failed; treating as dirty");
                    (true, None)
                }
                Ok(false) => (false, None),
                Ok(true) => match (&self.differ, live.as_ref(), pristine.as_ref()) {
                    (Some(differ), Some(live), Some(pristine)) => match differ(pristine, live) {
                        Ok(diff) => (true, Some(diff)),
                        Err(err) => {
                            warn!(error = %err, "dirty diff failed; treating as dirty");
                            (true, None)
                        }
                    },
                    _ => (true, None),
                },
            }
        };

        let flipped = {
            let mut status = lock(&self.status);
            let flipped = status.dirty != dirty;
            *status = DirtyStatus { dirty, diff };
            flipped
        };
        if flipped {
            if let Some(report) = &self.reporter {
                report(dirty);
            }
        }
    }
}

/// Continuously computed dirty flag (and optional diff) of a store pair.
pub struct DirtyCheck<T, D = ()> {
    pair: Arc<Pair<T, D>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T, D> DirtyCheck<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
{
    pub fn new<L, P>(live: &L, pristine: &P, options: DirtyCheckOptions<T, D>) -> Self
    where
        L: Store<Value = T>,
        P: Store<Value = T>,
    {
        let pair = Arc::new(Pair {
            live: Mutex::new(live.read(|v| v.cloned())),
            pristine: Mutex::new(pristine.read(|v| v.cloned())),
            status: Mutex::new(DirtyStatus::default()),
            comparator: options.comparator,
            differ: options.differ,
            reporter: options.reporter,
        });
        pair.recompute();

        let weak = Arc::downgrade(&pair);
        let live_sub = live.subscribe(move |value| {
            if let Some(pair) = weak.upgrade() {
                *lock(&pair.live) = value.cloned();
                pair.recompute();
            }
        });
        let weak = Arc::downgrade(&pair);
        let pristine_sub = pristine.subscribe(move |value| {
            if let Some(pair) = weak.upgrade() {
                *lock(&pair.pristine) = value.cloned();
                pair.recompute();
            }
        });

        DirtyCheck {
            pair,
            subscriptions: Mutex::new(vec![live_sub, pristine_sub]),
        }
    }

    /// Stops following both stores. The last status is kept.
    pub fn detach(&self) {
        lock(&self.subscriptions).clear();
    }

    pub fn dirty(&self) -> bool {
        lock(&self.pair.status).dirty
    }

    pub fn diff(&self) -> Option<D> {
        lock(&self.pair.status).diff.clone()
    }

    pub fn status(&self) -> DirtyStatus<D> {
        lock(&self.pair.status).clone()
    }
}

impl<T, D> fmt::Debug for DirtyCheck<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirtyCheck")
            .field("dirty", &lock(&self.pair.status).dirty)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DirtyRegistry
// ---------------------------------------------------------------------------

/// Per-entity dirty flags, keyed by entity id.
#[derive(Debug, Default)]
pub struct DirtyRegistry {
    flags: DashMap<EntityId, bool>,
    children: Mutex<Vec<Weak<DirtyRegistry>>>,
}

impl DirtyRegistry {
    pub fn new() -> Self {
        DirtyRegistry::default()
    }

    /// A registry for entities nested below one of ours (hierarchies of a
    /// dimension). It is cleared together with this one while alive.
    pub fn child(&self) -> Arc<DirtyRegistry> {
        let child = Arc::new(DirtyRegistry::new());
        let mut children = lock(&self.children);
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        child
    }

    pub fn set(&self, id: EntityId, dirty: bool) {
        self.flags.insert(id, dirty);
    }

    pub fn get(&self, id: &EntityId) -> bool {
        self.flags.get(id).is_some_and(|flag| *flag)
    }

    pub fn remove(&self, id: &EntityId) {
        self.flags.remove(id);
    }

    /// Marks every entity clean, in this registry and all live children.
    pub fn clear(&self) {
        self.flags.clear();
        let children: Vec<Arc<DirtyRegistry>> = {
            let mut children = lock(&self.children);
            children.retain(|weak| weak.strong_count() > 0);
            children.iter().filter_map(Weak::upgrade).collect()
        };
        for child in children {
            child.clear();
        }
    }

    /// Ids currently flagged dirty, sorted.
    pub fn dirty_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .flags
            .iter()
            .filter(|entry| *entry.value())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// A reporter that records flips under `id`.
    pub fn reporter(self: &Arc<Self>, id: EntityId) -> Reporter {
        let registry = Arc::downgrade(self);
        Arc::new(move |dirty| {
            if let Some(registry) = registry.upgrade() {
                registry.set(id.clone(), dirty);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;

    #[derive(Debug, Clone, PartialEq)]
    struct Doc {
        name: String,
        size: u32,
    }

    fn doc(name: &str) -> Doc {
        Doc {
            name: name.into(),
            size: 1,
        }
    }

    #[test]
    fn dirty_roundtrip() {
        let live = DocumentStore::new(doc("a"));
        let pristine = DocumentStore::new(doc("a"));
        let check: DirtyCheck<Doc> = DirtyCheck::new(&live, &pristine, DirtyCheckOptions::default());
        assert!(!check.dirty());

        live.update(|d| Ok(d.name = "b".into())).unwrap();
        assert!(check.dirty());

        live.update(|d| Ok(d.name = "a".into())).unwrap();
        assert!(!check.dirty());
    }

    #[test]
    fn pristine_refresh_clears_dirty() {
        let live = DocumentStore::new(doc("a"));
        let pristine = DocumentStore::new(doc("a"));
        let check: DirtyCheck<Doc> = DirtyCheck::new(&live, &pristine, DirtyCheckOptions::default());
        live.update(|d| Ok(d.size = 7)).unwrap();
        assert!(check.dirty());
        pristine.replace(live.snapshot().as_ref().clone()).unwrap();
        assert!(!check.dirty());
    }

    #[test]
    fn differ_runs_only_when_dirty() {
        let live = DocumentStore::new(doc("a"));
        let pristine = DocumentStore::new(doc("a"));
        let differ: Differ<Doc, (String, String)> =
            Arc::new(|p, l| Ok((p.name.clone(), l.name.clone())));
        let check = DirtyCheck::new(&live, &pristine, DirtyCheckOptions::default().differ(differ));
        assert_eq!(check.diff(), None);

        live.update(|d| Ok(d.name = "z".into())).unwrap();
        assert_eq!(check.diff(), Some(("a".to_string(), "z".to_string())));
    }

    #[test]
    fn failures_are_treated_as_dirty() {
        let live = DocumentStore::new(doc("a"));
        let pristine = DocumentStore::new(doc("a"));
        let comparator: Comparator<Doc> = Arc::new(|live, _| match live {
            Some(d) if d.size == 0 => Err(SessionError::Rejected("malformed".into())),
            _ => Ok(false),
        });
        let check: DirtyCheck<Doc> =
            DirtyCheck::new(&live, &pristine, DirtyCheckOptions::default().comparator(comparator));
        assert!(!check.dirty());
        live.update(|d| Ok(d.size = 0)).unwrap();
        assert!(check.dirty());

        let failing: Differ<Doc, ()> = Arc::new(|_, _| Err(SessionError::Rejected("boom".into())));
        let check = DirtyCheck::new(&live, &pristine, DirtyCheckOptions::default().differ(failing));
        assert!(check.dirty());
        assert_eq!(check.diff(), None);
    }

    #[test]
    fn reporter_feeds_registry() {
        let registry = Arc::new(DirtyRegistry::new());
        let live = DocumentStore::new(doc("a"));
        let pristine = DocumentStore::new(doc("a"));
        let id = EntityId::from("e1");
        let _check: DirtyCheck<Doc> = DirtyCheck::new(
            &live,
            &pristine,
            DirtyCheckOptions::default().report(registry.reporter(id.clone())),
        );

        live.update(|d| Ok(d.size = 2)).unwrap();
        assert!(registry.get(&id));
        assert_eq!(registry.dirty_ids(), vec![id.clone()]);

        live.update(|d| Ok(d.size = 1)).unwrap();
        assert!(!registry.get(&id));
        assert!(registry.dirty_ids().is_empty());
    }

    #[test]
    fn clearing_a_registry_clears_its_children() {
        let registry = DirtyRegistry::new();
        let child = registry.child();
        let grandchild = child.child();
        registry.set(EntityId::from("dim"), true);
        child.set(EntityId::from("h1"), true);
        grandchild.set(EntityId::from("l1"), true);

        registry.clear();
        assert!(registry.dirty_ids().is_empty());
        assert!(!child.get(&EntityId::from("h1")));
        assert!(!grandchild.get(&EntityId::from("l1")));

        // a dropped child is forgotten, not kept alive
        drop(child);
        registry.clear();
        assert_eq!(lock(&registry.children).len(), 0);
    }

    #[test]
    fn detached_check_keeps_its_last_status() {
        let live = DocumentStore::new(doc("a"));
        let pristine = DocumentStore::new(doc("a"));
        let check: DirtyCheck<Doc> = DirtyCheck::new(&live, &pristine, DirtyCheckOptions::default());
        live.update(|d| Ok(d.size = 9)).unwrap();
        check.detach();
        live.update(|d| Ok(d.size = 1)).unwrap();
        assert!(check.dirty());
    }
}
