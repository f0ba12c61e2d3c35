//! Linear undo/redo over a [`DocumentStore`].
//!
//! Every committed change while recording pushes the previous value onto
//! the past list and discards the future list. `undo` and `redo` move the
//! cursor and write the restored snapshot back into the store; those
//! writes are not recorded.
//!
//! While suspended (bulk loads, server-assigned fields after a save) changes
//! update the present value without creating an entry. A carry function can
//! copy such non-undoable fields from the current value into whatever
//! snapshot is being restored.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::SessionError;
use crate::store::{lock, DocumentStore, Store, Subscription};

/// Copies non-undoable fields from the current value (first) into a
/// snapshot about to be restored (second).
pub type Carry<T> = Arc<dyn Fn(&T, &mut T) + Send + Sync>;

#[derive(Clone)]
struct Timeline<T> {
    past: VecDeque<Arc<T>>,
    present: Arc<T>,
    /// Stack: the next redo is at the end.
    future: Vec<Arc<T>>,
    suspended: usize,
    restoring: bool,
    limit: usize,
}

impl<T> Timeline<T> {
    fn push_past(&mut self, value: Arc<T>) {
        self.past.push_back(value);
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
    }
}

struct HistoryInner<T> {
    store: Arc<DocumentStore<T>>,
    timeline: Mutex<Timeline<T>>,
    carry: Option<Carry<T>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<T: Clone + PartialEq> HistoryInner<T> {
    fn on_change(&self, value: &T) {
        let mut timeline = lock(&self.timeline);
        if timeline.restoring || timeline.suspended > 0 {
            timeline.present = Arc::new(value.clone());
            return;
        }
        if *timeline.present == *value {
            return;
        }
        let previous = mem::replace(&mut timeline.present, Arc::new(value.clone()));
        timeline.push_past(previous);
        timeline.future.clear();
    }

    fn carried(&self, present: &T, target: Arc<T>) -> Arc<T> {
        match &self.carry {
            Some(carry) => {
                let mut value = T::clone(&target);
                carry(present, &mut value);
                if value == *target {
                    target
                } else {
                    Arc::new(value)
                }
            }
            None => target,
        }
    }
}

/// Undo/redo manager bound to one store.
pub struct History<T> {
    inner: Arc<HistoryInner<T>>,
}

impl<T> Clone for History<T> {
    fn clone(&self) -> Self {
        History {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> History<T> {
    /// Starts recording `store`, keeping at most `limit` undo steps.
    pub fn new(store: Arc<DocumentStore<T>>, limit: usize) -> Self {
        Self::build(store, limit, None)
    }

    pub fn with_carry(store: Arc<DocumentStore<T>>, limit: usize, carry: Carry<T>) -> Self {
        Self::build(store, limit, Some(carry))
    }

    fn build(store: Arc<DocumentStore<T>>, limit: usize, carry: Option<Carry<T>>) -> Self {
        let inner = Arc::new(HistoryInner {
            timeline: Mutex::new(Timeline {
                past: VecDeque::new(),
                present: store.snapshot(),
                future: Vec::new(),
                suspended: 0,
                restoring: false,
                limit,
            }),
            store: Arc::clone(&store),
            carry,
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = store.subscribe(move |value| {
            if let (Some(inner), Some(value)) = (weak.upgrade(), value) {
                inner.on_change(value);
            }
        });
        *lock(&inner.subscription) = Some(subscription);

        History { inner }
    }

    /// Restores the previous snapshot. Returns `false` at the bottom.
    pub fn undo(&self) -> Result<bool, SessionError> {
        self.travel(|timeline, inner| {
            let previous = timeline.past.pop_back()?;
            let target = inner.carried(&timeline.present, previous);
            let current = mem::replace(&mut timeline.present, Arc::clone(&target));
            timeline.future.push(current);
            Some(target)
        })
    }

    /// Re-applies the last undone snapshot. Returns `false` at the top.
    pub fn redo(&self) -> Result<bool, SessionError> {
        self.travel(|timeline, inner| {
            let next = timeline.future.pop()?;
            let target = inner.carried(&timeline.present, next);
            let current = mem::replace(&mut timeline.present, Arc::clone(&target));
            timeline.push_past(current);
            Some(target)
        })
    }

    /// Restores past entry `index` (0 is the oldest). Everything after it
    /// moves to the redo list. Out-of-range indexes are a no-op.
    pub fn jump_to_past(&self, index: usize) -> Result<bool, SessionError> {
        self.travel(|timeline, inner| {
            if index >= timeline.past.len() {
                return None;
            }
            let mut tail: Vec<Arc<T>> = timeline.past.drain(index..).collect();
            let target = inner.carried(&timeline.present, tail.remove(0));
            let current = mem::replace(&mut timeline.present, Arc::clone(&target));
            timeline.future.push(current);
            timeline.future.extend(tail.into_iter().rev());
            Some(target)
        })
    }

    /// Number of past entries; the value to pass to [`jump_to_past`]
    /// later to come back to the present.
    ///
    /// [`jump_to_past`]: History::jump_to_past
    pub fn cursor(&self) -> usize {
        lock(&self.inner.timeline).past.len()
    }

    pub fn can_undo(&self) -> bool {
        !lock(&self.inner.timeline).past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !lock(&self.inner.timeline).future.is_empty()
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.inner.timeline).suspended == 0
    }

    /// Stops recording until the returned guard is dropped.
    pub fn suspend(&self) -> SuspendGuard<T> {
        lock(&self.inner.timeline).suspended += 1;
        SuspendGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stops following the store. Undo and redo still work on the entries
    /// recorded so far.
    pub fn detach(&self) {
        lock(&self.inner.subscription).take();
    }

    /// Forgets all entries and takes the store's current value as present.
    pub fn clear(&self) {
        let mut timeline = lock(&self.inner.timeline);
        timeline.past.clear();
        timeline.future.clear();
        timeline.present = self.inner.store.snapshot();
    }

    /// Moves the timeline with `step` and writes the resulting snapshot into
    /// the store. If the write fails the timeline is put back.
    fn travel(
        &self,
        step: impl FnOnce(&mut Timeline<T>, &HistoryInner<T>) -> Option<Arc<T>>,
    ) -> Result<bool, SessionError> {
        let (target, saved) = {
            let mut timeline = lock(&self.inner.timeline);
            let saved = timeline.clone();
            match step(&mut timeline, &self.inner) {
                Some(target) => {
                    timeline.restoring = true;
                    (target, saved)
                }
                None => return Ok(false),
            }
        };

        let result = self.inner.store.replace(T::clone(&target));

        let mut timeline = lock(&self.inner.timeline);
        timeline.restoring = false;
        match result {
            Ok(_) => {
                debug!(
                    past = timeline.past.len(),
                    future = timeline.future.len(),
                    "history moved"
                );
                Ok(true)
            }
            Err(err) => {
                *timeline = saved;
                Err(err)
            }
        }
    }
}

/// Keeps history suspended while alive.
pub struct SuspendGuard<T> {
    inner: Arc<HistoryInner<T>>,
}

impl<T> Drop for SuspendGuard<T> {
    fn drop(&mut self) {
        let mut timeline = lock(&self.inner.timeline);
        timeline.suspended = timeline.suspended.saturating_sub(1);
    }
}
