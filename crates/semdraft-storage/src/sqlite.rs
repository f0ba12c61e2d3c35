//! SQLite implementation of [`DraftTransport`] and [`ModelRepository`].
//!
//! [`SqliteTransport`] persists model records in one `semantic_models`
//! table. The published model and the draft are JSON TEXT columns; version,
//! timestamps and the cache-clear counter are scalar columns so they can be
//! listed and bumped without decoding the documents. Every write runs in a
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use semdraft_core::{Draft, ModelId, SemanticModel};

use crate::checklist::validate_draft;
use crate::error::{StorageError, TransportError};
use crate::memory::publish_draft;
use crate::schema::Location;
use crate::traits::{DraftTransport, ModelRepository};
use crate::types::{ModelSummary, SaveReceipt};

/// SQLite-backed draft transport.
pub struct SqliteTransport {
    conn: Mutex<Connection>,
}

impl SqliteTransport {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open(Location::File(path))?;
        Ok(SqliteTransport {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open(Location::Memory)?;
        Ok(SqliteTransport {
            conn: Mutex::new(conn),
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Reads a model row and reassembles the record (model JSON + draft JSON).
    fn read_model(conn: &Connection, id: &ModelId) -> Result<SemanticModel, StorageError> {
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT model, draft FROM semantic_models WHERE id = ?1",
                params![id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (model_json, draft_json) = row.ok_or_else(|| StorageError::ModelNotFound(id.clone()))?;

        let mut model: SemanticModel = serde_json::from_str(&model_json)?;
        model.draft = draft_json
            .map(|json| serde_json::from_str::<Draft>(&json))
            .transpose()?;
        Ok(model)
    }

    /// Serializes the model without its draft; the draft has its own column.
    fn model_json(model: &SemanticModel) -> Result<String, StorageError> {
        let detached = SemanticModel {
            draft: None,
            ..model.clone()
        };
        Ok(serde_json::to_string(&detached)?)
    }

    fn parse_time(value: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
        value
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StorageError::IntegrityError {
                        reason: format!("bad timestamp '{s}': {e}"),
                    })
            })
            .transpose()
    }
}

#[async_trait]
impl DraftTransport for SqliteTransport {
    async fn save_draft(
        &self,
        model_id: &ModelId,
        draft: &Draft,
    ) -> Result<SaveReceipt, TransportError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(StorageError::from)?;

        let version: Option<i64> = tx
            .query_row(
                "SELECT version FROM semantic_models WHERE id = ?1",
                params![model_id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        let version = version.ok_or_else(|| StorageError::ModelNotFound(model_id.clone()))?;

        let receipt = SaveReceipt {
            saved_at: Utc::now(),
            version: version.max(0) as u64 + 1,
            checklist: validate_draft(draft),
        };
        let mut persisted = draft.clone();
        persisted.saved_at = Some(receipt.saved_at);
        persisted.version = Some(receipt.version);
        persisted.checklist = Some(receipt.checklist_value());
        let draft_json = serde_json::to_string(&persisted).map_err(StorageError::from)?;

        tx.execute(
            "UPDATE semantic_models SET draft = ?1, version = ?2, saved_at = ?3 WHERE id = ?4",
            params![
                draft_json,
                receipt.version as i64,
                receipt.saved_at.to_rfc3339(),
                model_id.0
            ],
        )
        .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;

        debug!(model = %model_id, version = receipt.version, "draft saved");
        Ok(receipt)
    }

    async fn publish(
        &self,
        model_id: &ModelId,
        release_notes: Option<&str>,
    ) -> Result<SemanticModel, TransportError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(StorageError::from)?;

        let mut model = Self::read_model(&tx, model_id)?;
        publish_draft(&mut model, release_notes)?;
        let published_at = model.published_at.map(|t| t.to_rfc3339());

        tx.execute(
            "UPDATE semantic_models SET model = ?1, draft = NULL, published_at = ?2 WHERE id = ?3",
            params![Self::model_json(&model)?, published_at, model_id.0],
        )
        .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;

        info!(model = %model_id, "model published");
        Ok(model)
    }

    async fn delete_cache(&self, model_id: &ModelId) -> Result<(), TransportError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE semantic_models SET cache_clears = cache_clears + 1 WHERE id = ?1",
                params![model_id.0],
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::ModelNotFound(model_id.clone()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl ModelRepository for SqliteTransport {
    async fn create_model(&self, name: &str) -> Result<SemanticModel, TransportError> {
        let model = SemanticModel::new(ModelId::generate(), name);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO semantic_models (id, name, model, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                model.id.0,
                model.name,
                Self::model_json(&model)?,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(StorageError::from)?;
        info!(model = %model.id, name, "model created");
        Ok(model)
    }

    async fn load_model(&self, model_id: &ModelId) -> Result<SemanticModel, TransportError> {
        let conn = self.conn.lock().await;
        Ok(Self::read_model(&conn, model_id)?)
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, TransportError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, version, saved_at, published_at
                 FROM semantic_models ORDER BY name",
            )
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(StorageError::from)?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, name, version, saved_at, published_at) = row.map_err(StorageError::from)?;
            summaries.push(ModelSummary {
                id: ModelId(id),
                name,
                version: version.max(0) as u64,
                saved_at: Self::parse_time(saved_at)?,
                published_at: Self::parse_time(published_at)?,
            });
        }
        Ok(summaries)
    }
}
