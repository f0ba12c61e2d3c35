//! The persistence contracts consumed by the editing core.
//!
//! [`DraftTransport`] is what the save pipeline talks to: save a draft,
//! publish it, drop the server-side result cache. [`ModelRepository`] is the
//! record-level surface used to create and open models.
//!
//! Both are async because a real deployment puts a network round-trip behind
//! every call. All backends (`InMemoryTransport`, `SqliteTransport`) implement
//! both traits with identical semantics, so they are swappable.

use async_trait::async_trait;

use semdraft_core::{Draft, ModelId, SemanticModel};

use crate::error::TransportError;
use crate::types::{ModelSummary, SaveReceipt};

#[async_trait]
pub trait DraftTransport: Send + Sync {
    /// Persists `draft` as the model's working draft.
    ///
    /// The backend stamps the save time, increments the draft version and
    /// validates the draft; those server-assigned fields come back in the
    /// receipt.
    async fn save_draft(
        &self,
        model_id: &ModelId,
        draft: &Draft,
    ) -> Result<SaveReceipt, TransportError>;

    /// Promotes the stored draft to the published schema.
    async fn publish(
        &self,
        model_id: &ModelId,
        release_notes: Option<&str>,
    ) -> Result<SemanticModel, TransportError>;

    /// Drops any server-side query result cache for the model.
    async fn delete_cache(&self, model_id: &ModelId) -> Result<(), TransportError>;
}

#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn create_model(&self, name: &str) -> Result<SemanticModel, TransportError>;

    /// Loads the model record, including its stored draft.
    async fn load_model(&self, model_id: &ModelId) -> Result<SemanticModel, TransportError>;

    async fn list_models(&self) -> Result<Vec<ModelSummary>, TransportError>;
}
