//! In-memory implementation of [`DraftTransport`] and [`ModelRepository`].
//!
//! [`InMemoryTransport`] is a first-class backend for tests and ephemeral
//! sessions. It has the same semantics as the SQLite backend and adds a few
//! test hooks: a simulated round-trip latency, one-shot failure injection,
//! and a log of every draft it was asked to save.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use semdraft_core::{Draft, ModelId, SemanticModel};

use crate::checklist::validate_draft;
use crate::error::{StorageError, TransportError};
use crate::traits::{DraftTransport, ModelRepository};
use crate::types::{ModelSummary, SaveReceipt};

#[derive(Debug, Clone)]
struct StoredModel {
    model: SemanticModel,
    version: u64,
    cache_clears: u64,
}

#[derive(Debug, Default)]
struct Inner {
    models: HashMap<ModelId, StoredModel>,
    /// Every draft passed to `save_draft`, in call order.
    saves: Vec<(ModelId, Draft)>,
    fail_next: Option<String>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory draft transport.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    inner: Mutex<Inner>,
    latency: Duration,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        InMemoryTransport::default()
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        InMemoryTransport {
            inner: Mutex::default(),
            latency,
        }
    }

    /// Registers an existing model record.
    pub fn insert_model(&self, model: SemanticModel) {
        let mut inner = self.lock();
        inner.models.insert(
            model.id.clone(),
            StoredModel {
                version: model.draft.as_ref().and_then(|d| d.version).unwrap_or(0),
                model,
                cache_clears: 0,
            },
        );
    }

    /// Makes the next `save_draft` call fail with `message`.
    pub fn fail_next_save(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    /// Drafts passed to `save_draft` so far, in call order.
    pub fn saved_drafts(&self) -> Vec<Draft> {
        self.lock().saves.iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves.len()
    }

    /// Highest number of `save_draft` calls that were ever running at once.
    pub fn max_concurrent_saves(&self) -> usize {
        self.lock().max_in_flight
    }

    pub fn cache_clears(&self, model_id: &ModelId) -> u64 {
        self.lock()
            .models
            .get(model_id)
            .map_or(0, |stored| stored.cache_clears)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-call; the
        // data is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl DraftTransport for InMemoryTransport {
    async fn save_draft(
        &self,
        model_id: &ModelId,
        draft: &Draft,
    ) -> Result<SaveReceipt, TransportError> {
        {
            let mut inner = self.lock();
            inner.saves.push((model_id.clone(), draft.clone()));
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        self.round_trip().await;

        let mut inner = self.lock();
        inner.in_flight -= 1;
        if let Some(message) = inner.fail_next.take() {
            return Err(TransportError::rejected(message));
        }
        let stored = inner
            .models
            .get_mut(model_id)
            .ok_or_else(|| StorageError::ModelNotFound(model_id.clone()))?;

        stored.version += 1;
        let receipt = SaveReceipt {
            saved_at: Utc::now(),
            version: stored.version,
            checklist: validate_draft(draft),
        };
        let mut persisted = draft.clone();
        persisted.saved_at = Some(receipt.saved_at);
        persisted.version = Some(receipt.version);
        persisted.checklist = Some(receipt.checklist_value());
        stored.model.draft = Some(persisted);

        debug!(model = %model_id, version = receipt.version, "draft saved");
        Ok(receipt)
    }

    async fn publish(
        &self,
        model_id: &ModelId,
        release_notes: Option<&str>,
    ) -> Result<SemanticModel, TransportError> {
        self.round_trip().await;
        let mut inner = self.lock();
        let stored = inner
            .models
            .get_mut(model_id)
            .ok_or_else(|| StorageError::ModelNotFound(model_id.clone()))?;
        publish_draft(&mut stored.model, release_notes)?;
        Ok(stored.model.clone())
    }

    async fn delete_cache(&self, model_id: &ModelId) -> Result<(), TransportError> {
        self.round_trip().await;
        let mut inner = self.lock();
        let stored = inner
            .models
            .get_mut(model_id)
            .ok_or_else(|| StorageError::ModelNotFound(model_id.clone()))?;
        stored.cache_clears += 1;
        Ok(())
    }
}

#[async_trait]
impl ModelRepository for InMemoryTransport {
    async fn create_model(&self, name: &str) -> Result<SemanticModel, TransportError> {
        let model = SemanticModel::new(ModelId::generate(), name);
        self.insert_model(model.clone());
        Ok(model)
    }

    async fn load_model(&self, model_id: &ModelId) -> Result<SemanticModel, TransportError> {
        self.round_trip().await;
        self.lock()
            .models
            .get(model_id)
            .map(|stored| stored.model.clone())
            .ok_or_else(|| StorageError::ModelNotFound(model_id.clone()).into())
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, TransportError> {
        let inner = self.lock();
        let mut summaries: Vec<ModelSummary> = inner
            .models
            .values()
            .map(|stored| ModelSummary {
                id: stored.model.id.clone(),
                name: stored.model.name.clone(),
                version: stored.version,
                saved_at: stored.model.draft.as_ref().and_then(|d| d.saved_at),
                published_at: stored.model.published_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

/// Copies the stored draft into the published fields of `model`.
///
/// Fails when there is no draft to publish.
pub(crate) fn publish_draft(
    model: &mut SemanticModel,
    release_notes: Option<&str>,
) -> Result<(), TransportError> {
    let draft = model
        .draft
        .take()
        .ok_or_else(|| TransportError::rejected(format!("model '{}' has no draft to publish", model.name)))?;
    model.schema = Some(draft.schema);
    model.tables = draft.tables;
    model.roles = draft.roles;
    model.db_initialization = draft.db_initialization;
    model.published_at = Some(Utc::now());
    model.release_notes = release_notes.map(str::to_string);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use semdraft_core::{Cube, EntityId};

    fn draft_with_cube(name: &str) -> Draft {
        let mut draft = Draft::default();
        draft
            .schema
            .cubes
            .push(Cube::new(EntityId::from("c1"), name))
            .unwrap();
        draft
    }

    #[tokio::test]
    async fn test_save_assigns_version_and_checklist() {
        let transport = InMemoryTransport::new();
        let model = transport.create_model("Sales").await.unwrap();

        let first = transport
            .save_draft(&model.id, &draft_with_cube("Sales"))
            .await
            .unwrap();
        let second = transport
            .save_draft(&model.id, &draft_with_cube("Sales"))
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        // The cube has no measures.
        assert_eq!(second.checklist.len(), 1);

        let loaded = transport.load_model(&model.id).await.unwrap();
        let stored = loaded.draft.unwrap();
        assert_eq!(stored.version, Some(2));
        assert_eq!(stored.saved_at, Some(second.saved_at));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let transport = InMemoryTransport::new();
        let model = transport.create_model("Sales").await.unwrap();
        transport.fail_next_save("validation failed: name");

        let err = transport
            .save_draft(&model.id, &Draft::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "validation failed: name");
        assert!(transport.save_draft(&model.id, &Draft::default()).await.is_ok());
        assert_eq!(transport.save_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_promotes_draft() {
        let transport = InMemoryTransport::new();
        let model = transport.create_model("Sales").await.unwrap();
        assert!(transport.publish(&model.id, None).await.is_err());

        transport
            .save_draft(&model.id, &draft_with_cube("Revenue"))
            .await
            .unwrap();
        let published = transport.publish(&model.id, Some("first")).await.unwrap();
        assert!(published.draft.is_none());
        assert_eq!(published.schema.unwrap().cubes.len(), 1);
        assert_eq!(published.release_notes.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_unknown_model_is_not_found() {
        let transport = InMemoryTransport::new();
        let err = transport
            .delete_cache(&ModelId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Storage(StorageError::ModelNotFound(_))
        ));
    }
}
