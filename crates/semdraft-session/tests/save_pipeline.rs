//! End-to-end behaviour of an edit session against the in-memory transport,
//! on a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use semdraft_core::{Cube, Dimension, EntityId, Hierarchy, ModelId, SemanticModel};
use semdraft_session::bridge::testing::{EngineCall, RecordingEngine};
use semdraft_session::{
    CubeEditor, DimensionEditor, EditSession, HierarchyEditor, RecordingNotifier, SavePhase,
    SessionError,
};
use semdraft_storage::InMemoryTransport;

const DEBOUNCE: Duration = Duration::from_secs(2);
const LATENCY: Duration = Duration::from_millis(100);

fn model() -> SemanticModel {
    SemanticModel::new(ModelId::new("m1"), "Retail")
}

fn transport_with(model: &SemanticModel, latency: Duration) -> Arc<InMemoryTransport> {
    let transport = Arc::new(InMemoryTransport::with_latency(latency));
    transport.insert_model(model.clone());
    transport
}

async fn open(model: SemanticModel, transport: &Arc<InMemoryTransport>) -> EditSession {
    EditSession::open(model, transport.clone()).await.unwrap()
}

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

fn rename_cube(session: &EditSession, id: &EntityId, caption: &str) {
    session
        .update_draft(|draft| {
            draft.schema.cubes.get_mut(id).unwrap().caption = Some(caption.to_string());
            Ok(())
        })
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn new_cube_is_dirty_recorded_and_saved_once() {
    let model = model();
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;
    assert!(!session.dirty());
    assert!(!session.can_publish());

    let id = session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();
    assert!(session.dirty());
    assert!(session.unsaved());
    assert_eq!(session.history_cursor(), 1);
    assert_eq!(session.save_status().phase, SavePhase::Debouncing);

    advance(DEBOUNCE + Duration::from_millis(500)).await;

    assert_eq!(transport.save_count(), 1);
    assert!(transport.saved_drafts()[0].schema.cubes.contains(&id));
    assert!(!session.unsaved());
    assert!(!session.dirty());
    assert!(session.can_publish());
    assert_eq!(session.draft().version, Some(1));
    assert!(session.draft_saved_date().is_some());
    // applying the receipt is not an undo step
    assert_eq!(session.history_cursor(), 1);
}

#[tokio::test(start_paused = true)]
async fn edits_inside_the_quiet_period_share_one_save() {
    let model = model();
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;

    let id = session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();
    advance(Duration::from_millis(300)).await;
    rename_cube(&session, &id, "Final");

    advance(Duration::from_millis(1900)).await;
    assert_eq!(transport.save_count(), 0);

    advance(Duration::from_secs(1)).await;
    assert_eq!(transport.save_count(), 1);
    let saved = &transport.saved_drafts()[0];
    assert_eq!(saved.schema.cubes.get(&id).unwrap().caption.as_deref(), Some("Final"));
}

#[tokio::test(start_paused = true)]
async fn a_burst_of_edits_is_saved_once_with_the_last_value() {
    let model = model();
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;
    let id = session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();

    for i in 0..10 {
        rename_cube(&session, &id, &format!("v{i}"));
        advance(Duration::from_millis(100)).await;
    }
    advance(DEBOUNCE * 2).await;

    assert_eq!(transport.save_count(), 1);
    let saved = &transport.saved_drafts()[0];
    assert_eq!(saved.schema.cubes.get(&id).unwrap().caption.as_deref(), Some("v9"));
}

#[tokio::test(start_paused = true)]
async fn undoing_back_to_the_saved_content_saves_nothing() {
    let model = model();
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;

    session
        .new_dimension(Dimension::new(EntityId::generate(), "Time"))
        .unwrap();
    assert!(session.dirty());
    assert!(session.undo().unwrap());
    assert!(!session.dirty());
    assert!(!session.unsaved());
    assert_eq!(session.save_status().phase, SavePhase::Idle);

    advance(DEBOUNCE * 2).await;
    assert_eq!(transport.save_count(), 0);

    assert!(session.redo().unwrap());
    assert!(session.dirty());
}

#[tokio::test(start_paused = true)]
async fn manual_save_during_a_save_runs_once_after_it() {
    let model = model();
    let transport = transport_with(&model, Duration::from_secs(1));
    let session = open(model, &transport).await;

    let id = session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();
    session.save_now().unwrap();
    advance(Duration::from_millis(10)).await;
    assert_eq!(session.save_status().phase, SavePhase::Saving);

    rename_cube(&session, &id, "Second");
    session.save_now().unwrap();
    advance(Duration::from_millis(10)).await;
    assert_eq!(session.save_status().phase, SavePhase::SavingWithPending);
    assert_eq!(transport.save_count(), 1);

    advance(Duration::from_secs(5)).await;
    assert_eq!(transport.save_count(), 2);
    assert_eq!(transport.max_concurrent_saves(), 1);
    let second = &transport.saved_drafts()[1];
    assert_eq!(second.schema.cubes.get(&id).unwrap().caption.as_deref(), Some("Second"));
    assert!(!session.unsaved());
}

#[tokio::test(start_paused = true)]
async fn edit_during_a_save_is_saved_after_the_quiet_period() {
    let model = model();
    let transport = transport_with(&model, Duration::from_secs(1));
    let session = open(model, &transport).await;

    let id = session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();
    advance(DEBOUNCE + Duration::from_millis(100)).await;
    assert_eq!(session.save_status().phase, SavePhase::Saving);

    rename_cube(&session, &id, "Later");
    advance(Duration::from_secs(1)).await;
    assert_eq!(transport.save_count(), 1);
    assert!(session.unsaved());

    advance(DEBOUNCE * 2).await;
    assert_eq!(transport.save_count(), 2);
    assert_eq!(transport.max_concurrent_saves(), 1);
    assert!(!session.unsaved());
    assert!(!session.dirty());
}

#[tokio::test(start_paused = true)]
async fn failed_save_keeps_changes_unsaved_and_notifies() {
    let model = model();
    let transport = transport_with(&model, LATENCY);
    let notifier = Arc::new(RecordingNotifier::new());
    let session = EditSession::builder(model, transport.clone())
        .notifier(notifier.clone())
        .open()
        .await
        .unwrap();

    transport.fail_next_save("draft rejected");
    session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();

    let err = session.flush().await.unwrap_err();
    assert!(matches!(&err, SessionError::SaveFailed(m) if m == "draft rejected"));
    assert!(session.unsaved());
    assert!(session.dirty());
    assert_eq!(session.save_error().as_deref(), Some("draft rejected"));
    assert_eq!(notifier.messages(), vec!["draft rejected".to_string()]);
    assert!(!session.can_publish());

    session.flush().await.unwrap();
    assert_eq!(session.save_error(), None);
    assert!(!session.unsaved());
    assert_eq!(transport.save_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn publish_saves_pending_changes_first() {
    let model = model();
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;
    let id = session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();

    let published = session.publish(Some("first release")).await.unwrap();
    assert_eq!(transport.save_count(), 1);
    assert!(published.published_at.is_some());
    assert!(published.schema.as_ref().unwrap().cubes.contains(&id));
    assert_eq!(session.model().release_notes.as_deref(), Some("first release"));
    // the model record update is not undoable
    assert_eq!(session.history_cursor(), 1);

    session.delete_cache().await.unwrap();
    assert_eq!(transport.cache_clears(&ModelId::new("m1")), 1);
}

#[tokio::test(start_paused = true)]
async fn cube_editor_previews_and_save_reregisters() {
    let mut model = model();
    let mut draft = model.extract_draft();
    draft.schema.cubes.push(Cube::new(EntityId::from("c1"), "Sales")).unwrap();
    model.draft = Some(draft);
    let transport = transport_with(&model, LATENCY);
    let engine = Arc::new(RecordingEngine::new());
    let session = EditSession::builder(model, transport.clone())
        .engine(engine.clone())
        .open()
        .await
        .unwrap();
    assert_eq!(engine.registrations().len(), 1);
    assert!(session.can_publish());
    engine.clear_calls();

    let editor = CubeEditor::init(&session, EntityId::from("c1")).unwrap();
    editor.new_measure(None, Some("amount")).unwrap();
    assert_eq!(engine.pushed_cubes().len(), 1);
    assert!(session.entity_dirty(&EntityId::from("c1")));

    session.flush().await.unwrap();
    let calls = engine.calls();
    let tail = &calls[calls.len() - 3..];
    assert!(matches!(&tail[0], EngineCall::Register(r) if r.is_draft));
    assert_eq!(&tail[1..], &[EngineCall::ClearCache, EngineCall::Refresh]);

    // the saved draft is the new baseline
    assert!(!editor.dirty());
    assert!(!session.entity_dirty(&EntityId::from("c1")));
    assert!(session.dirty_entities().is_empty());
}

#[tokio::test(start_paused = true)]
async fn entity_flags_outlive_their_editor_until_clean() {
    let mut model = model();
    let mut draft = model.extract_draft();
    let mut time = Dimension::new(EntityId::from("time"), "Time");
    time.hierarchies.push(Hierarchy::new(EntityId::from("h1"), "")).unwrap();
    draft.schema.dimensions.push(time).unwrap();
    model.draft = Some(draft);
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;

    {
        let editor = DimensionEditor::init(&session, EntityId::from("time")).unwrap();
        editor.update(|d| d.caption = Some("Calendar".into())).unwrap();
        assert!(editor.dirty());
    }
    assert!(session.entity_dirty(&EntityId::from("time")));
    assert_eq!(session.dirty_diff().unwrap().modified.len(), 1);

    session.resume_pristine().unwrap();
    assert!(!session.dirty());
    assert!(session.dirty_entities().is_empty());
}

#[tokio::test(start_paused = true)]
async fn close_lets_the_in_flight_save_finish() {
    let model = model();
    let transport = transport_with(&model, Duration::from_secs(1));
    let session = open(model, &transport).await;

    session.new_cube(Cube::new(EntityId::generate(), "Sales")).unwrap();
    session.save_now().unwrap();
    advance(Duration::from_millis(10)).await;
    session.close().await;

    assert_eq!(transport.save_count(), 1);
    assert!(!session.unsaved());
    assert!(session.is_closed());
    assert!(!session.dirty());
    assert_eq!(session.store().listener_count(), 0);
    assert_eq!(session.pristine_store().listener_count(), 0);
    let err = session.new_cube(Cube::new(EntityId::generate(), "Stock")).unwrap_err();
    assert!(matches!(err, SessionError::Closed));
    assert!(CubeEditor::init(&session, EntityId::generate()).is_err());
}

#[tokio::test(start_paused = true)]
async fn history_cursor_jumps_back_and_redo_walks_forward() {
    let model = model();
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;

    let mark = session.history_cursor();
    for name in ["A", "B", "C"] {
        session.new_cube(Cube::new(EntityId::generate(), name)).unwrap();
    }
    assert!(session.goto_history_cursor(mark).unwrap());
    assert!(session.cubes().is_empty());
    assert!(!session.dirty());

    session.redo().unwrap();
    session.redo().unwrap();
    let names: Vec<_> = session.cubes().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[tokio::test(start_paused = true)]
async fn closed_hierarchy_editor_flag_clears_after_save() {
    let mut model = model();
    let mut draft = model.extract_draft();
    let mut time = Dimension::new(EntityId::from("time"), "Time");
    time.hierarchies.push(Hierarchy::new(EntityId::from("h1"), "")).unwrap();
    draft.schema.dimensions.push(time).unwrap();
    model.draft = Some(draft);
    let transport = transport_with(&model, LATENCY);
    let session = open(model, &transport).await;

    let dimension = DimensionEditor::init(&session, EntityId::from("time")).unwrap();
    {
        let hierarchy = HierarchyEditor::init(&dimension, EntityId::from("h1")).unwrap();
        hierarchy.update(|h| h.caption = Some("Calendar".into())).unwrap();
    }
    assert!(dimension.hierarchy_dirty(&EntityId::from("h1")));

    session.flush().await.unwrap();
    assert!(!session.dirty());
    assert!(!session.unsaved());
    assert!(!dimension.hierarchy_dirty(&EntityId::from("h1")));
}
