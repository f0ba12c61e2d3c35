//! The edit session: one open model, one document, one history, one save
//! pipeline.
//!
//! [`EditSession`] is a cheap, clonable handle. Editors borrow it to build
//! their sub-stores; nothing is resolved through globals. Opening a session
//! loads the model into a live and a pristine [`DocumentStore`], then wires
//! the listeners in a fixed order so every committed change reaches them in
//! that order before the next change starts:
//!
//! 1. history (records the previous snapshot),
//! 2. the whole-draft dirty check,
//! 3. the save scheduler,
//! 4. editors opened later (per-entity dirty checks, cube previews).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use semdraft_core::lens::{self, FieldLens};
use semdraft_core::{Draft, EntityId, ModelState, SemanticModel};
use semdraft_storage::{diff_drafts, DirtySet, DraftTransport};

use crate::bridge::{EntityType, QueryEngine, RegistrationBridge};
use crate::config::SessionConfig;
use crate::dirty_check::{DirtyCheck, DirtyCheckOptions, DirtyRegistry, Differ, Reporter};
use crate::error::SessionError;
use crate::history::{Carry, History};
use crate::notifier::{Notifier, TracingNotifier};
use crate::scheduler::{SaveContext, SaveScheduler, SaveStatus};
use crate::store::{DocumentStore, Store, Validator};
use crate::substore::SubStore;

/// Root store of a session.
pub type RootStore = DocumentStore<ModelState>;

/// The `draft` field of a root store.
pub type DraftStore = SubStore<RootStore, FieldLens<ModelState, Draft>>;

pub struct SessionBuilder {
    model: SemanticModel,
    transport: Arc<dyn DraftTransport>,
    engine: Option<Arc<dyn QueryEngine>>,
    config: SessionConfig,
    notifier: Arc<dyn Notifier>,
}

impl SessionBuilder {
    pub fn engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Loads the model and starts the save pipeline. Must run inside a
    /// tokio runtime.
    pub async fn open(self) -> Result<EditSession, SessionError> {
        let SessionBuilder {
            model,
            transport,
            engine,
            config,
            notifier,
        } = self;

        let bridge = match engine {
            Some(engine) => RegistrationBridge::new(engine, model.engine_key()),
            None => RegistrationBridge::disabled(),
        };
        let state = ModelState::from_model(model);
        let model_id = state.model.id.clone();
        let opened_with_draft = state.model.draft.is_some();

        let live = Arc::new(DocumentStore::new(state.clone()).with_validator(stable_ids()));
        let pristine = Arc::new(DocumentStore::new(state));
        let history = History::with_carry(Arc::clone(&live), config.history_limit, server_fields());

        let registry = Arc::new(DirtyRegistry::new());
        let live_draft = SubStore::new(Arc::clone(&live), lens::draft());
        let pristine_draft = SubStore::new(Arc::clone(&pristine), lens::draft());
        let differ: Differ<Draft, DirtySet> =
            Arc::new(|pristine, live| diff_drafts(pristine, live).map_err(SessionError::from));
        let whole = DirtyCheck::new(
            &live_draft,
            &pristine_draft,
            DirtyCheckOptions::default()
                .differ(differ)
                .report(clear_when_clean(&registry)),
        );

        let scheduler = SaveScheduler::start(
            SaveContext {
                live: Arc::clone(&live),
                pristine: Arc::clone(&pristine),
                history: history.clone(),
                transport: Arc::clone(&transport),
                bridge: bridge.clone(),
                notifier: Arc::clone(&notifier),
            },
            config.save_debounce,
        );

        let session = EditSession {
            inner: Arc::new(SessionInner {
                live,
                pristine,
                history,
                whole,
                registry,
                scheduler,
                bridge,
                transport,
                notifier,
                config,
                opened_with_draft,
                closed: AtomicBool::new(false),
                draft_views: (live_draft, pristine_draft),
            }),
        };

        if session.inner.config.register_on_open {
            let state = session.inner.live.snapshot();
            if let Err(err) = session.inner.bridge.register(&state).await {
                warn!(error = %err, "initial model registration failed");
                session.inner.notifier.error(&err.to_string());
            }
        }
        info!(model = %model_id, "edit session opened");
        Ok(session)
    }
}

/// Copies what only the server changes from the current state into a
/// snapshot being restored by undo/redo.
fn server_fields() -> Carry<ModelState> {
    Arc::new(|current: &ModelState, restored: &mut ModelState| {
        restored.draft.version = current.draft.version;
        restored.draft.saved_at = current.draft.saved_at;
        restored.draft.checklist.clone_from(&current.draft.checklist);

        let (from, to) = (&current.model, &mut restored.model);
        to.schema.clone_from(&from.schema);
        to.tables.clone_from(&from.tables);
        to.roles.clone_from(&from.roles);
        to.db_initialization.clone_from(&from.db_initialization);
        to.draft.clone_from(&from.draft);
        to.published_at = from.published_at;
        to.release_notes.clone_from(&from.release_notes);
    })
}

/// Rejects a change that swaps an entity for one with another id.
fn stable_ids() -> Validator<ModelState> {
    Arc::new(|state: &ModelState| {
        state
            .draft
            .check_ids()
            .map_err(|err| SessionError::Rejected(err.to_string()))
    })
}

/// Whole-draft reporter: a clean draft has no dirty entities.
fn clear_when_clean(registry: &Arc<DirtyRegistry>) -> Reporter {
    let registry = Arc::downgrade(registry);
    Arc::new(move |dirty| {
        if !dirty {
            if let Some(registry) = registry.upgrade() {
                registry.clear();
            }
        }
    })
}

pub(crate) struct SessionInner {
    pub(crate) live: Arc<RootStore>,
    pub(crate) pristine: Arc<RootStore>,
    pub(crate) history: History<ModelState>,
    whole: DirtyCheck<Draft, DirtySet>,
    pub(crate) registry: Arc<DirtyRegistry>,
    scheduler: SaveScheduler,
    pub(crate) bridge: RegistrationBridge,
    transport: Arc<dyn DraftTransport>,
    notifier: Arc<dyn Notifier>,
    config: SessionConfig,
    opened_with_draft: bool,
    closed: AtomicBool,
    draft_views: (DraftStore, DraftStore),
}

/// Handle to an open edit session.
#[derive(Clone)]
pub struct EditSession {
    pub(crate) inner: Arc<SessionInner>,
}

impl EditSession {
    pub fn builder(model: SemanticModel, transport: Arc<dyn DraftTransport>) -> SessionBuilder {
        SessionBuilder {
            model,
            transport,
            engine: None,
            config: SessionConfig::default(),
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Opens a session with default settings and no query engine.
    pub async fn open(
        model: SemanticModel,
        transport: Arc<dyn DraftTransport>,
    ) -> Result<EditSession, SessionError> {
        EditSession::builder(model, transport).open().await
    }

    // -- stores ------------------------------------------------------------

    pub fn store(&self) -> &Arc<RootStore> {
        &self.inner.live
    }

    pub fn pristine_store(&self) -> &Arc<RootStore> {
        &self.inner.pristine
    }

    pub fn state(&self) -> Arc<ModelState> {
        self.inner.live.snapshot()
    }

    pub fn draft(&self) -> Draft {
        self.inner.live.snapshot().draft.clone()
    }

    pub fn model(&self) -> SemanticModel {
        self.inner.live.snapshot().model.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn bridge(&self) -> &RegistrationBridge {
        &self.inner.bridge
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    // -- dirty state -------------------------------------------------------

    /// Whether the draft differs from the pristine baseline.
    pub fn dirty(&self) -> bool {
        self.inner.whole.dirty()
    }

    /// Entity-level diff against the pristine baseline, when dirty.
    pub fn dirty_diff(&self) -> Option<DirtySet> {
        self.inner.whole.diff()
    }

    /// Flag last reported by the editor of entity `id`.
    pub fn entity_dirty(&self, id: &EntityId) -> bool {
        self.inner.registry.get(id)
    }

    pub fn dirty_entities(&self) -> Vec<EntityId> {
        self.inner.registry.dirty_ids()
    }

    pub fn registry(&self) -> &Arc<DirtyRegistry> {
        &self.inner.registry
    }

    /// Takes the current draft as the new baseline ("discard/resume").
    pub fn resume_pristine(&self) -> Result<(), SessionError> {
        let current = self.inner.live.snapshot();
        self.inner.pristine.replace(ModelState::clone(&current))?;
        self.inner.registry.clear();
        Ok(())
    }

    // -- history -----------------------------------------------------------

    pub fn undo(&self) -> Result<bool, SessionError> {
        self.inner.history.undo()
    }

    pub fn redo(&self) -> Result<bool, SessionError> {
        self.inner.history.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.inner.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.history.can_redo()
    }

    pub fn history_cursor(&self) -> usize {
        self.inner.history.cursor()
    }

    /// Jumps back to a cursor returned by [`history_cursor`]. Cursors past
    /// the current position are ignored.
    ///
    /// [`history_cursor`]: EditSession::history_cursor
    pub fn goto_history_cursor(&self, index: usize) -> Result<bool, SessionError> {
        self.inner.history.jump_to_past(index)
    }

    // -- saving ------------------------------------------------------------

    /// Requests an immediate save (queued behind one in flight).
    pub fn save_now(&self) -> Result<(), SessionError> {
        self.inner.scheduler.save_now()
    }

    /// Saves now and waits for the result.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.inner.scheduler.flush().await
    }

    pub fn save_status(&self) -> SaveStatus {
        self.inner.scheduler.status()
    }

    pub fn watch_save_status(&self) -> watch::Receiver<SaveStatus> {
        self.inner.scheduler.subscribe()
    }

    pub fn unsaved(&self) -> bool {
        self.save_status().unsaved
    }

    pub fn save_error(&self) -> Option<String> {
        self.save_status().error
    }

    pub fn draft_saved_date(&self) -> Option<DateTime<Utc>> {
        self.save_status()
            .saved_at
            .or_else(|| self.inner.live.snapshot().draft.saved_at)
    }

    /// A stored draft exists, either from before the session or saved by it.
    pub fn can_publish(&self) -> bool {
        self.inner.opened_with_draft || self.save_status().saved_at.is_some()
    }

    // -- server actions ----------------------------------------------------

    /// Saves pending changes, then promotes the draft. The returned record
    /// replaces the session's model without creating an undo step.
    pub async fn publish(&self, release_notes: Option<&str>) -> Result<SemanticModel, SessionError> {
        self.ensure_open()?;
        if self.unsaved() {
            self.flush().await?;
        }
        let model_id = self.inner.live.snapshot().model.id.clone();
        let published = self.inner.transport.publish(&model_id, release_notes).await?;
        {
            let _quiet = self.inner.history.suspend();
            let record = published.clone();
            self.inner.live.update(move |state| {
                state.model = record;
                Ok(())
            })?;
        }
        info!(model = %model_id, "model published");
        Ok(published)
    }

    /// Drops the server-side result cache and the data source's own cache.
    pub async fn delete_cache(&self) -> Result<(), SessionError> {
        let model_id = self.inner.live.snapshot().model.id.clone();
        self.inner.transport.delete_cache(&model_id).await?;
        self.inner.bridge.clear_cache().await
    }

    pub async fn query(&self, statement: &str) -> Result<serde_json::Value, SessionError> {
        self.inner.bridge.query(statement).await
    }

    pub async fn select_entity_set(&self, name: &str) -> Result<EntityType, SessionError> {
        self.inner.bridge.select_entity_set(name).await
    }

    /// Stops the save pipeline. A save already in flight is awaited, not
    /// cancelled. Then the session's own listeners are dropped; editors
    /// release theirs when closed. Later mutations through the session fail
    /// with `Closed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.scheduler.close().await;
        self.inner.history.detach();
        self.inner.whole.detach();
        let (live_draft, pristine_draft) = &self.inner.draft_views;
        live_draft.disconnect();
        pristine_draft.disconnect();
        info!(model = %self.inner.live.snapshot().model.id, "edit session closed");
    }
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("model", &self.inner.live.snapshot().model.id)
            .field("dirty", &self.dirty())
            .field("status", &self.save_status())
            .finish()
    }
}
