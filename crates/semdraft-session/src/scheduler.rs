//! Debounced, serialized draft persistence.
//!
//! [`SaveMachine`] is the pure state machine: it is fed change, deadline,
//! manual-save and settle events and answers whether a save must start now.
//! Phases:
//!
//! - `Idle`: nothing pending.
//! - `Debouncing`: a change is waiting out the quiet period.
//! - `Saving`: one save in flight.
//! - `SavingWithPending`: one save in flight and another one owed after it.
//!
//! Changes are compared by content hash (volatile server fields excluded), so
//! a change that only reverts to the last saved content cancels the pending
//! save and server-assigned fields never schedule one.
//!
//! [`SaveScheduler`] drives the machine from a tokio task: a store listener
//! feeds changes synchronously, the task owns the debounce timer and the
//! single in-flight save slot.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use semdraft_core::{Draft, ModelState};
use semdraft_storage::{hash_draft, DraftTransport, SaveReceipt, TransportError};

use crate::bridge::RegistrationBridge;
use crate::error::SessionError;
use crate::history::History;
use crate::notifier::Notifier;
use crate::store::{lock, DocumentStore, Store, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePhase {
    Idle,
    Debouncing,
    Saving,
    SavingWithPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Debouncing { deadline: Instant },
    Saving,
    SavingWithPending { manual: bool },
}

/// Snapshot of the save pipeline for frontends and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStatus {
    pub phase: SavePhase,
    /// The draft differs from what was last saved (or loaded).
    pub unsaved: bool,
    pub saved_at: Option<DateTime<Utc>>,
    /// Message of the last failed save, cleared by the next success.
    pub error: Option<String>,
    pub saves_started: u64,
    pub saves_settled: u64,
}

// ---------------------------------------------------------------------------
// SaveMachine
// ---------------------------------------------------------------------------

/// The save state machine. `None` hashes stand for drafts that could not be
/// hashed and always count as changed.
#[derive(Debug, Clone)]
pub struct SaveMachine {
    debounce: Duration,
    phase: Phase,
    baseline: Option<blake3::Hash>,
    latest: Option<blake3::Hash>,
    in_flight: Option<blake3::Hash>,
    unsaved: bool,
    error: Option<String>,
    saved_at: Option<DateTime<Utc>>,
    saves_started: u64,
    saves_settled: u64,
}

impl SaveMachine {
    /// A machine whose baseline is the loaded draft's hash.
    pub fn new(debounce: Duration, loaded: Option<blake3::Hash>, saved_at: Option<DateTime<Utc>>) -> Self {
        SaveMachine {
            debounce,
            phase: Phase::Idle,
            baseline: loaded,
            latest: loaded,
            in_flight: None,
            unsaved: false,
            error: None,
            saved_at,
            saves_started: 0,
            saves_settled: 0,
        }
    }

    pub fn phase(&self) -> SavePhase {
        match self.phase {
            Phase::Idle => SavePhase::Idle,
            Phase::Debouncing { .. } => SavePhase::Debouncing,
            Phase::Saving => SavePhase::Saving,
            Phase::SavingWithPending { .. } => SavePhase::SavingWithPending,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Debouncing { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn status(&self) -> SaveStatus {
        SaveStatus {
            phase: self.phase(),
            unsaved: self.unsaved,
            saved_at: self.saved_at,
            error: self.error.clone(),
            saves_started: self.saves_started,
            saves_settled: self.saves_settled,
        }
    }

    fn differs_from_baseline(&self) -> bool {
        self.latest.is_none() || self.latest != self.baseline
    }

    /// A draft change with content hash `hash`.
    pub fn on_change(&mut self, hash: Option<blake3::Hash>, now: Instant) {
        if hash.is_some() && hash == self.latest {
            return;
        }
        self.latest = hash;
        self.unsaved = self.differs_from_baseline();

        self.phase = match self.phase {
            Phase::Idle | Phase::Debouncing { .. } if !self.unsaved => Phase::Idle,
            Phase::Idle | Phase::Debouncing { .. } => Phase::Debouncing {
                deadline: now + self.debounce,
            },
            Phase::Saving if hash.is_none() || hash != self.in_flight => {
                Phase::SavingWithPending { manual: false }
            }
            Phase::SavingWithPending { manual: false } if hash.is_some() && hash == self.in_flight => {
                Phase::Saving
            }
            phase => phase,
        };
        debug!(phase = ?self.phase(), unsaved = self.unsaved, "draft change scheduled");
    }

    /// The debounce timer fired. Returns whether a save must start.
    pub fn on_deadline(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Debouncing { deadline } if now >= deadline => {
                if self.unsaved {
                    true
                } else {
                    self.phase = Phase::Idle;
                    false
                }
            }
            _ => false,
        }
    }

    /// Explicit "save now". Returns whether a save must start immediately;
    /// otherwise it is queued behind the one in flight.
    pub fn on_manual(&mut self) -> bool {
        match self.phase {
            Phase::Idle | Phase::Debouncing { .. } => true,
            Phase::Saving | Phase::SavingWithPending { .. } => {
                self.phase = Phase::SavingWithPending { manual: true };
                false
            }
        }
    }

    /// A save of the draft with hash `hash` was handed to the transport.
    pub fn begin_save(&mut self, hash: Option<blake3::Hash>) {
        self.phase = Phase::Saving;
        self.in_flight = hash;
        self.saves_started += 1;
    }

    /// The in-flight save finished. Returns whether the next save must start
    /// immediately.
    pub fn on_settled(&mut self, outcome: Result<DateTime<Utc>, String>, now: Instant) -> bool {
        self.saves_settled += 1;
        match outcome {
            Ok(saved_at) => {
                self.baseline = self.in_flight;
                self.saved_at = Some(saved_at);
                self.error = None;
            }
            Err(message) => self.error = Some(message),
        }
        self.in_flight = None;
        self.unsaved = self.differs_from_baseline();

        match self.phase {
            Phase::SavingWithPending { manual: true } => true,
            Phase::SavingWithPending { manual: false } if self.unsaved => {
                self.phase = Phase::Debouncing {
                    deadline: now + self.debounce,
                };
                false
            }
            _ => {
                self.phase = Phase::Idle;
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Everything a save needs besides the machine.
pub(crate) struct SaveContext {
    pub live: Arc<DocumentStore<ModelState>>,
    pub pristine: Arc<DocumentStore<ModelState>>,
    pub history: History<ModelState>,
    pub transport: Arc<dyn DraftTransport>,
    pub bridge: RegistrationBridge,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Changed,
    Manual,
    Close,
}

/// Machine plus its published status; every transition republishes.
struct Shared {
    machine: Mutex<SaveMachine>,
    status: watch::Sender<SaveStatus>,
}

impl Shared {
    fn with<R>(&self, f: impl FnOnce(&mut SaveMachine) -> R) -> R {
        let mut machine = lock(&self.machine);
        let out = f(&mut machine);
        self.status.send_replace(machine.status());
        out
    }
}

type SaveOutcome = (Draft, Result<SaveReceipt, TransportError>);

pub(crate) struct SaveScheduler {
    shared: Arc<Shared>,
    wake: mpsc::UnboundedSender<Wake>,
    task: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<Subscription>>,
}

impl SaveScheduler {
    /// Subscribes to the live store and spawns the driver task.
    pub fn start(ctx: SaveContext, debounce: Duration) -> Self {
        let snapshot = ctx.live.snapshot();
        let loaded = hash_of(&snapshot.draft);
        let machine = SaveMachine::new(debounce, loaded, snapshot.draft.saved_at);
        let (status, _) = watch::channel(machine.status());
        let shared = Arc::new(Shared {
            machine: Mutex::new(machine),
            status,
        });
        let (wake, rx) = mpsc::unbounded_channel();

        let listener = {
            let shared = Arc::clone(&shared);
            let wake = wake.clone();
            ctx.live.subscribe(move |state| {
                let hash = state.and_then(|s| hash_of(&s.draft));
                shared.with(|machine| machine.on_change(hash, Instant::now()));
                let _ = wake.send(Wake::Changed);
            })
        };

        let task = tokio::spawn(drive(Arc::new(ctx), Arc::clone(&shared), rx));
        SaveScheduler {
            shared,
            wake,
            task: Mutex::new(Some(task)),
            listener: Mutex::new(Some(listener)),
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.shared.status.subscribe()
    }

    /// Requests a save without waiting for it.
    pub fn save_now(&self) -> Result<(), SessionError> {
        self.wake.send(Wake::Manual).map_err(|_| SessionError::Closed)
    }

    /// Requests a save and waits until it (and any manual save queued behind
    /// an in-flight one) has settled.
    pub async fn flush(&self) -> Result<(), SessionError> {
        let mut rx = self.shared.status.subscribe();
        let before = rx.borrow().saves_settled;
        self.save_now()?;
        let status = rx
            .wait_for(|s| {
                s.saves_settled > before
                    && !matches!(s.phase, SavePhase::Saving | SavePhase::SavingWithPending)
            })
            .await
            .map_err(|_| SessionError::Closed)?
            .clone();
        match status.error {
            Some(message) => Err(SessionError::SaveFailed(message)),
            None => Ok(()),
        }
    }

    /// Stops the driver after the in-flight save (if any) has settled, then
    /// stops following the live store.
    pub async fn close(&self) {
        let _ = self.wake.send(Wake::Close);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "save scheduler task ended abnormally");
            }
        }
        lock(&self.listener).take();
    }
}

fn hash_of(draft: &Draft) -> Option<blake3::Hash> {
    match hash_draft(draft) {
        Ok(hash) => Some(hash),
        Err(err) => {
            warn!(error = %err, "could not hash draft; treating as changed");
            None
        }
    }
}

async fn drive(ctx: Arc<SaveContext>, shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Wake>) {
    let mut in_flight: Option<JoinHandle<SaveOutcome>> = None;
    let mut closing = false;

    loop {
        let deadline = lock(&shared.machine).deadline();
        tokio::select! {
            wake = rx.recv(), if !closing => match wake {
                Some(Wake::Changed) => {}
                Some(Wake::Manual) => {
                    if shared.with(SaveMachine::on_manual) {
                        in_flight = Some(start_save(&ctx, &shared));
                    }
                }
                Some(Wake::Close) | None => closing = true,
            },
            _ = sleep_until(deadline), if !closing => {
                if shared.with(|machine| machine.on_deadline(Instant::now())) {
                    in_flight = Some(start_save(&ctx, &shared));
                }
            }
            joined = settled(&mut in_flight) => {
                in_flight = None;
                let outcome = match joined {
                    Ok((sent, Ok(receipt))) => finish_save(&ctx, sent, receipt).await,
                    Ok((_, Err(err))) => Err(err.to_string()),
                    Err(err) => Err(err.to_string()),
                };
                if let Err(message) = &outcome {
                    warn!(error = %message, "draft save failed");
                    ctx.notifier.error(message);
                }
                if shared.with(|machine| machine.on_settled(outcome, Instant::now())) {
                    in_flight = Some(start_save(&ctx, &shared));
                }
            }
        }

        if closing && in_flight.is_none() {
            debug!("save scheduler stopped");
            break;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn settled(
    handle: &mut Option<JoinHandle<SaveOutcome>>,
) -> Result<SaveOutcome, tokio::task::JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn start_save(ctx: &Arc<SaveContext>, shared: &Shared) -> JoinHandle<SaveOutcome> {
    let snapshot = ctx.live.snapshot();
    let draft = snapshot.draft.clone();
    let model_id = snapshot.model.id.clone();
    let hash = hash_of(&draft);
    shared.with(|machine| machine.begin_save(hash));

    info!(model = %model_id, "saving draft");
    let transport = Arc::clone(&ctx.transport);
    tokio::spawn(async move {
        let result = transport.save_draft(&model_id, &draft).await;
        (draft, result)
    })
}

/// Applies the receipt to the live and pristine stores and re-registers the
/// model. Returns the save time, or the message to surface.
async fn finish_save(
    ctx: &SaveContext,
    mut sent: Draft,
    receipt: SaveReceipt,
) -> Result<DateTime<Utc>, String> {
    let checklist = receipt.checklist_value();
    let stamp = |draft: &mut Draft| {
        draft.saved_at = Some(receipt.saved_at);
        draft.version = Some(receipt.version);
        draft.checklist = Some(checklist.clone());
    };

    let applied = {
        let _quiet = ctx.history.suspend();
        ctx.live.update(|state| {
            stamp(&mut state.draft);
            Ok(())
        })
    };
    if let Err(err) = applied {
        return Err(err.to_string());
    }

    stamp(&mut sent);
    let model = ctx.live.snapshot().model.clone();
    if let Err(err) = ctx.pristine.replace(ModelState { model, draft: sent }) {
        return Err(err.to_string());
    }
    info!(version = receipt.version, "draft saved");

    let state = ctx.live.snapshot();
    if let Err(err) = ctx.bridge.after_save(&state).await {
        warn!(error = %err, "query engine registration failed");
        ctx.notifier.error(&err.to_string());
    }
    Ok(receipt.saved_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_secs(2);

    fn hash(byte: u8) -> Option<blake3::Hash> {
        Some(blake3::hash(&[byte]))
    }

    fn machine() -> (SaveMachine, Instant) {
        (SaveMachine::new(DEBOUNCE, hash(0), None), Instant::now())
    }

    #[test]
    fn burst_collapses_into_one_deadline() {
        let (mut m, t0) = machine();
        m.on_change(hash(1), t0);
        m.on_change(hash(2), t0 + Duration::from_millis(500));
        assert_eq!(m.deadline(), Some(t0 + Duration::from_millis(500) + DEBOUNCE));
        assert!(!m.on_deadline(t0 + DEBOUNCE));
        assert!(m.on_deadline(t0 + Duration::from_millis(2500)));
    }

    #[test]
    fn revert_to_baseline_cancels() {
        let (mut m, t0) = machine();
        m.on_change(hash(1), t0);
        assert!(m.status().unsaved);
        m.on_change(hash(0), t0 + Duration::from_millis(100));
        assert_eq!(m.phase(), SavePhase::Idle);
        assert!(!m.status().unsaved);
        assert!(!m.on_deadline(t0 + DEBOUNCE * 2));
    }

    #[test]
    fn same_hash_does_not_restart_timer() {
        let (mut m, t0) = machine();
        m.on_change(hash(1), t0);
        m.on_change(hash(1), t0 + Duration::from_secs(1));
        assert_eq!(m.deadline(), Some(t0 + DEBOUNCE));
    }

    #[test]
    fn change_during_save_is_queued_and_debounced() {
        let (mut m, t0) = machine();
        m.on_change(hash(1), t0);
        assert!(m.on_deadline(t0 + DEBOUNCE));
        m.begin_save(hash(1));
        m.on_change(hash(2), t0 + DEBOUNCE);
        assert_eq!(m.phase(), SavePhase::SavingWithPending);

        let t1 = t0 + DEBOUNCE * 2;
        assert!(!m.on_settled(Ok(Utc::now()), t1));
        assert_eq!(m.phase(), SavePhase::Debouncing);
        assert!(m.status().unsaved);
        assert_eq!(m.deadline(), Some(t1 + DEBOUNCE));
    }

    #[test]
    fn returning_to_in_flight_content_drops_pending() {
        let (mut m, t0) = machine();
        m.on_change(hash(1), t0);
        m.begin_save(hash(1));
        m.on_change(hash(2), t0);
        m.on_change(hash(1), t0);
        assert_eq!(m.phase(), SavePhase::Saving);
        assert!(!m.on_settled(Ok(Utc::now()), t0));
        assert_eq!(m.phase(), SavePhase::Idle);
        assert!(!m.status().unsaved);
    }

    #[test]
    fn manual_during_save_runs_right_after() {
        let (mut m, t0) = machine();
        m.on_change(hash(1), t0);
        assert!(m.on_manual());
        m.begin_save(hash(1));
        assert!(!m.on_manual());
        assert_eq!(m.phase(), SavePhase::SavingWithPending);
        assert!(m.on_settled(Ok(Utc::now()), t0));
        assert_eq!(m.status().saves_settled, 1);
    }

    #[test]
    fn failure_keeps_unsaved_and_waits() {
        let (mut m, t0) = machine();
        m.on_change(hash(1), t0);
        m.begin_save(hash(1));
        assert!(!m.on_settled(Err("offline".into()), t0));
        let status = m.status();
        assert_eq!(status.phase, SavePhase::Idle);
        assert!(status.unsaved);
        assert_eq!(status.error.as_deref(), Some("offline"));

        assert!(m.on_manual());
        m.begin_save(hash(1));
        m.on_settled(Ok(Utc::now()), t0);
        assert_eq!(m.status().error, None);
        assert!(!m.status().unsaved);
    }

    #[test]
    fn unhashable_draft_always_counts_as_changed() {
        let (mut m, t0) = machine();
        m.on_change(None, t0);
        assert!(m.status().unsaved);
        m.on_change(None, t0 + Duration::from_secs(1));
        assert_eq!(m.deadline(), Some(t0 + Duration::from_secs(1) + DEBOUNCE));
    }
}
