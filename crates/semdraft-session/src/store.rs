//! The document store and its change broadcaster.
//!
//! [`DocumentStore`] owns one value and is the single source of truth for
//! it. Every mutation goes through [`Store::update`], which runs the updater
//! on a private copy and commits only if the updater succeeded and the value
//! actually changed. A commit emits exactly once, synchronously, to every
//! listener in registration order, before the next update may start.
//!
//! A store may carry a [`Validator`]: a changed value it rejects is never
//! committed and the update fails with the validator's error.
//!
//! Listeners must not update the store that is notifying them: the store is
//! still dispatching and the attempt fails with [`SessionError::Reentrant`].

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::debug;

use semdraft_core::Path;

use crate::error::SessionError;

/// Read/update/subscribe contract shared by the root store and every
/// derived store.
pub trait Store: Send + Sync + 'static {
    type Value: Clone + PartialEq + Send + Sync + 'static;

    /// Runs `f` on the current value, or on `None` when the store's path
    /// does not resolve.
    fn read<R>(&self, f: impl FnOnce(Option<&Self::Value>) -> R) -> R;

    /// Applies `f` to a copy of the value and commits it.
    ///
    /// If `f` fails nothing is committed and nothing is emitted.
    fn update<R>(
        &self,
        f: impl FnOnce(&mut Self::Value) -> Result<R, SessionError>,
    ) -> Result<R, SessionError>;

    /// Registers a listener called after every committed change.
    fn subscribe(&self, listener: impl Fn(Option<&Self::Value>) + Send + Sync + 'static) -> Subscription;

    /// Location of this store's value in the root document.
    fn path(&self) -> Path;

    fn get(&self) -> Result<Self::Value, SessionError> {
        self.read(|value| value.cloned())
            .ok_or_else(|| SessionError::not_found(self.path()))
    }

    fn set(&self, value: Self::Value) -> Result<(), SessionError> {
        self.update(move |slot| {
            *slot = value;
            Ok(())
        })
    }

    fn is_resolved(&self) -> bool {
        self.read(|value| value.is_some())
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

type Listener<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

/// Ordered, synchronous fan-out of change notifications.
pub struct Broadcaster<T> {
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T: 'static> Broadcaster<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Broadcaster {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(Option<&T>) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));

        let weak = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(broadcaster) = weak.upgrade() {
                lock(&broadcaster.listeners).retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Calls every listener in registration order.
    ///
    /// Works on a snapshot of the listener list, so a listener removed
    /// during this emission may still receive it.
    pub fn emit(&self, value: Option<&T>) {
        let snapshot: Vec<Listener<T>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

/// Handle that keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatch tracking
// ---------------------------------------------------------------------------

thread_local! {
    static DISPATCHING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct DispatchGuard(usize);

impl DispatchGuard {
    fn enter(key: usize) -> Self {
        DISPATCHING.with(|stack| stack.borrow_mut().push(key));
        DispatchGuard(key)
    }

    fn active(key: usize) -> bool {
        DISPATCHING.with(|stack| stack.borrow().contains(&key))
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|k| *k == self.0) {
                stack.remove(pos);
            }
        });
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Checks a changed value before a [`DocumentStore`] commits it.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<(), SessionError> + Send + Sync>;

/// Root store holding one value.
pub struct DocumentStore<T> {
    state: RwLock<Arc<T>>,
    validator: Option<Validator<T>>,
    /// Serializes updates: each runs to completion, emission included,
    /// before the next one starts.
    writer: Mutex<()>,
    changes: Arc<Broadcaster<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> DocumentStore<T> {
    pub fn new(initial: T) -> Self {
        DocumentStore {
            state: RwLock::new(Arc::new(initial)),
            validator: None,
            writer: Mutex::new(()),
            changes: Broadcaster::new(),
        }
    }

    pub fn with_validator(mut self, validator: Validator<T>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Cheap shared handle to the current value.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the whole value. Returns whether anything changed.
    pub fn replace(&self, value: T) -> Result<bool, SessionError> {
        self.commit(move |slot| {
            *slot = value;
            Ok(())
        })
        .map(|(_, changed)| changed)
    }

    pub fn listener_count(&self) -> usize {
        self.changes.listener_count()
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn commit<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, SessionError>,
    ) -> Result<(R, bool), SessionError> {
        if DispatchGuard::active(self.key()) {
            return Err(SessionError::Reentrant);
        }
        let _writer = lock(&self.writer);

        let current = self.snapshot();
        let mut next = T::clone(&current);
        let out = f(&mut next)?;
        if next == *current {
            return Ok((out, false));
        }
        if let Some(validate) = &self.validator {
            validate(&next)?;
        }

        let next = Arc::new(next);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);

        let _dispatch = DispatchGuard::enter(self.key());
        debug!(listeners = self.changes.listener_count(), "document changed");
        self.changes.emit(Some(&next));
        Ok((out, true))
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Store for DocumentStore<T> {
    type Value = T;

    fn read<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let snapshot = self.snapshot();
        f(Some(&snapshot))
    }

    fn update<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.commit(f).map(|(out, _)| out)
    }

    fn subscribe(&self, listener: impl Fn(Option<&T>) + Send + Sync + 'static) -> Subscription {
        self.changes.subscribe(listener)
    }

    fn path(&self) -> Path {
        Path::root()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
