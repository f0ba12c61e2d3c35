//! SQLite transport against a real database file.

use semdraft_core::{Cube, Draft, EntityId, Measure};
use semdraft_storage::{DraftTransport, ModelRepository, SqliteTransport};

fn sales_draft() -> Draft {
    let mut cube = Cube::new(EntityId::from("c1"), "Sales");
    cube.measures
        .push(Measure::new(EntityId::from("m1"), "amount"))
        .unwrap();
    let mut draft = Draft::default();
    draft.schema.cubes.push(cube).unwrap();
    draft
}

#[tokio::test]
async fn draft_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models.db");
    let path = path.to_str().unwrap();

    let id = {
        let transport = SqliteTransport::new(path).unwrap();
        let model = transport.create_model("Sales").await.unwrap();
        let receipt = transport.save_draft(&model.id, &sales_draft()).await.unwrap();
        assert!(receipt.checklist.is_empty());
        model.id
    };

    let transport = SqliteTransport::new(path).unwrap();
    let model = transport.load_model(&id).await.unwrap();
    let draft = model.draft.unwrap();
    assert_eq!(draft.schema, sales_draft().schema);
    assert_eq!(draft.version, Some(1));
}

#[tokio::test]
async fn publish_moves_draft_into_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models.db");
    let transport = SqliteTransport::new(path.to_str().unwrap()).unwrap();

    let model = transport.create_model("Sales").await.unwrap();
    transport.save_draft(&model.id, &sales_draft()).await.unwrap();
    transport.delete_cache(&model.id).await.unwrap();
    let published = transport.publish(&model.id, Some("v1")).await.unwrap();
    assert!(published.published_at.is_some());

    let reloaded = transport.load_model(&model.id).await.unwrap();
    assert!(reloaded.draft.is_none());
    assert_eq!(reloaded.schema.unwrap().cubes.len(), 1);
    assert_eq!(reloaded.release_notes.as_deref(), Some("v1"));

    let list = transport.list_models().await.unwrap();
    assert!(list[0].published_at.is_some());
}
