//! Bridge between the edit session and a live query engine.
//!
//! The engine itself is a collaborator: it owns data sources keyed by model
//! key, answers queries and caches results. The session talks to it through
//! two traits:
//!
//! - [`QueryEngine`]: look up a data source, (re-)register a model.
//! - [`DataSource`]: accept schema updates, clear caches, answer queries.
//!
//! [`RegistrationBridge`] decides *when* each call happens. Cube edits are
//! pushed synchronously on every commit so previews follow unsaved changes.
//! The full registration (register, clear cache, refresh) only runs after a
//! successful save.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use semdraft_core::{Cube, DataSourceRef, EntityList, ModelId, ModelState, Role, Schema, TableEntity};

use crate::error::SessionError;

// ---------------------------------------------------------------------------
// Collaborator contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Replaces one cube of the registered schema.
    fn update_cube(&self, cube: &Cube);

    fn set_entity_type(&self, entity_type: EntityType);

    async fn clear_cache(&self) -> Result<(), SessionError>;

    async fn refresh(&self) -> Result<(), SessionError>;

    async fn select_entity_set(&self, name: &str) -> Result<EntityType, SessionError>;

    async fn query(&self, statement: &str) -> Result<Value, SessionError>;
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    fn data_source(&self, key: &str) -> Option<Arc<dyn DataSource>>;

    async fn register_model(&self, registration: ModelRegistration) -> Result<(), SessionError>;
}

/// Queryable shape of one cube as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub properties: Vec<EntityProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProperty {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub role: PropertyRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyRole {
    Dimension,
    Measure,
}

impl EntityType {
    pub fn from_cube(cube: &Cube) -> Self {
        let dimensions = cube.dimensions.iter().map(|d| EntityProperty {
            name: d.name.clone(),
            caption: d.caption.clone(),
            role: PropertyRole::Dimension,
        });
        let usages = cube.dimension_usages.iter().map(|u| EntityProperty {
            name: u.name.clone(),
            caption: u.caption.clone(),
            role: PropertyRole::Dimension,
        });
        let measures = cube.measures.iter().map(|m| EntityProperty {
            name: m.name.clone(),
            caption: m.caption.clone(),
            role: PropertyRole::Measure,
        });
        EntityType {
            name: cube.name.clone(),
            caption: cube.caption.clone(),
            properties: dimensions.chain(usages).chain(measures).collect(),
        }
    }
}

/// What the engine needs to serve a model: the record merged with its draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistration {
    pub key: String,
    pub model_id: ModelId,
    pub name: String,
    pub is_draft: bool,
    pub schema: Schema,
    pub tables: Vec<TableEntity>,
    pub roles: EntityList<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceRef>,
}

impl ModelRegistration {
    /// Registration of the draft currently held in `state`.
    pub fn draft_of(state: &ModelState) -> Self {
        ModelRegistration {
            key: state.model.engine_key(),
            model_id: state.model.id.clone(),
            name: state.model.name.clone(),
            is_draft: true,
            schema: state.draft.schema.clone(),
            tables: state.draft.tables.clone(),
            roles: state.draft.roles.clone(),
            data_source: state.model.data_source.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistrationBridge
// ---------------------------------------------------------------------------

/// Pushes draft edits into the query engine bound to one model key.
#[derive(Clone)]
pub struct RegistrationBridge {
    engine: Option<Arc<dyn QueryEngine>>,
    key: String,
}

impl RegistrationBridge {
    pub fn new(engine: Arc<dyn QueryEngine>, key: impl Into<String>) -> Self {
        RegistrationBridge {
            engine: Some(engine),
            key: key.into(),
        }
    }

    /// A bridge with no engine behind it; every call is a no-op.
    pub fn disabled() -> Self {
        RegistrationBridge {
            engine: None,
            key: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data_source(&self) -> Option<Arc<dyn DataSource>> {
        self.engine.as_ref()?.data_source(&self.key)
    }

    /// Synchronous preview update after a cube commit.
    pub fn push_cube(&self, cube: &Cube) {
        if let Some(source) = self.data_source() {
            debug!(key = %self.key, cube = %cube.name, "pushing cube to data source");
            source.update_cube(cube);
        }
    }

    pub fn push_entity_type(&self, entity_type: EntityType) {
        if let Some(source) = self.data_source() {
            source.set_entity_type(entity_type);
        }
    }

    pub async fn register(&self, state: &ModelState) -> Result<(), SessionError> {
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        debug!(key = %self.key, "registering draft model");
        engine.register_model(ModelRegistration::draft_of(state)).await
    }

    /// Full re-registration after a persisted save: register the draft, then
    /// clear and refresh the data source.
    pub async fn after_save(&self, state: &ModelState) -> Result<(), SessionError> {
        self.register(state).await?;
        if let Some(source) = self.data_source() {
            source.clear_cache().await?;
            source.refresh().await?;
        }
        Ok(())
    }

    pub async fn clear_cache(&self) -> Result<(), SessionError> {
        match self.data_source() {
            Some(source) => source.clear_cache().await,
            None => Ok(()),
        }
    }

    pub async fn select_entity_set(&self, name: &str) -> Result<EntityType, SessionError> {
        self.require_source()?.select_entity_set(name).await
    }

    pub async fn query(&self, statement: &str) -> Result<Value, SessionError> {
        self.require_source()?.query(statement).await
    }

    fn require_source(&self) -> Result<Arc<dyn DataSource>, SessionError> {
        self.data_source()
            .ok_or_else(|| SessionError::Engine(format!("no data source registered for '{}'", self.key)))
    }
}

impl std::fmt::Debug for RegistrationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationBridge")
            .field("key", &self.key)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// An engine that records every call it receives.
pub mod testing {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use semdraft_core::Cube;

    use super::{DataSource, EntityType, ModelRegistration, QueryEngine};
    use crate::error::SessionError;
    use crate::store::lock;

    #[derive(Debug, Clone, PartialEq)]
    pub enum EngineCall {
        Register(ModelRegistration),
        UpdateCube(Cube),
        SetEntityType(EntityType),
        ClearCache,
        Refresh,
        SelectEntitySet(String),
        Query(String),
    }

    type CallLog = Arc<Mutex<Vec<EngineCall>>>;

    #[derive(Debug, Default)]
    pub struct RecordingDataSource {
        calls: CallLog,
        entity_type: Mutex<Option<EntityType>>,
    }

    #[async_trait]
    impl DataSource for RecordingDataSource {
        fn update_cube(&self, cube: &Cube) {
            lock(&self.calls).push(EngineCall::UpdateCube(cube.clone()));
        }

        fn set_entity_type(&self, entity_type: EntityType) {
            lock(&self.calls).push(EngineCall::SetEntityType(entity_type.clone()));
            *lock(&self.entity_type) = Some(entity_type);
        }

        async fn clear_cache(&self) -> Result<(), SessionError> {
            lock(&self.calls).push(EngineCall::ClearCache);
            Ok(())
        }

        async fn refresh(&self) -> Result<(), SessionError> {
            lock(&self.calls).push(EngineCall::Refresh);
            Ok(())
        }

        async fn select_entity_set(&self, name: &str) -> Result<EntityType, SessionError> {
            lock(&self.calls).push(EngineCall::SelectEntitySet(name.to_string()));
            lock(&self.entity_type)
                .clone()
                .filter(|entity_type| entity_type.name == name)
                .ok_or_else(|| SessionError::Engine(format!("unknown entity set '{name}'")))
        }

        async fn query(&self, statement: &str) -> Result<Value, SessionError> {
            lock(&self.calls).push(EngineCall::Query(statement.to_string()));
            Ok(json!({ "statement": statement, "rows": [] }))
        }
    }

    /// Query engine double with a single data source answering every key.
    #[derive(Debug, Default)]
    pub struct RecordingEngine {
        calls: CallLog,
        source: Arc<RecordingDataSource>,
        fail_register: Mutex<Option<String>>,
    }

    impl RecordingEngine {
        pub fn new() -> Self {
            let calls = CallLog::default();
            RecordingEngine {
                source: Arc::new(RecordingDataSource {
                    calls: Arc::clone(&calls),
                    entity_type: Mutex::new(None),
                }),
                calls,
                fail_register: Mutex::new(None),
            }
        }

        pub fn calls(&self) -> Vec<EngineCall> {
            lock(&self.calls).clone()
        }

        pub fn clear_calls(&self) {
            lock(&self.calls).clear();
        }

        pub fn registrations(&self) -> Vec<ModelRegistration> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    EngineCall::Register(registration) => Some(registration),
                    _ => None,
                })
                .collect()
        }

        pub fn pushed_cubes(&self) -> Vec<Cube> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    EngineCall::UpdateCube(cube) => Some(cube),
                    _ => None,
                })
                .collect()
        }

        /// Makes the next `register_model` call fail with `message`.
        pub fn fail_next_register(&self, message: impl Into<String>) {
            *lock(&self.fail_register) = Some(message.into());
        }
    }

    #[async_trait]
    impl QueryEngine for RecordingEngine {
        fn data_source(&self, _key: &str) -> Option<Arc<dyn DataSource>> {
            Some(Arc::clone(&self.source) as Arc<dyn DataSource>)
        }

        async fn register_model(&self, registration: ModelRegistration) -> Result<(), SessionError> {
            if let Some(message) = lock(&self.fail_register).take() {
                return Err(SessionError::Engine(message));
            }
            lock(&self.calls).push(EngineCall::Register(registration));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{EngineCall, RecordingEngine};
    use super::*;
    use semdraft_core::{EntityId, Measure, SemanticModel};

    fn state() -> ModelState {
        let mut state = ModelState::from_model(SemanticModel::new(ModelId::new("m1"), "Sales"));
        let mut cube = Cube::new(EntityId::from("c1"), "Orders");
        cube.measures
            .push(Measure::new(EntityId::from("m1"), "amount"))
            .unwrap();
        state.draft.schema.cubes.push(cube).unwrap();
        state
    }

    #[test]
    fn entity_type_lists_dimensions_before_measures() {
        let mut cube = Cube::new(EntityId::from("c1"), "Orders");
        cube.measures
            .push(Measure::new(EntityId::from("m1"), "amount"))
            .unwrap();
        cube.dimensions
            .push(semdraft_core::Dimension::new(EntityId::from("d1"), "Time"))
            .unwrap();
        let entity_type = EntityType::from_cube(&cube);
        let roles: Vec<_> = entity_type.properties.iter().map(|p| p.role).collect();
        assert_eq!(roles, vec![PropertyRole::Dimension, PropertyRole::Measure]);
    }

    #[tokio::test]
    async fn after_save_registers_then_refreshes() {
        let engine = Arc::new(RecordingEngine::new());
        let bridge = RegistrationBridge::new(engine.clone(), "m1");
        bridge.after_save(&state()).await.unwrap();

        let calls = engine.calls();
        assert!(matches!(&calls[0], EngineCall::Register(r) if r.is_draft && r.key == "m1"));
        assert_eq!(&calls[1..], &[EngineCall::ClearCache, EngineCall::Refresh]);
    }

    #[tokio::test]
    async fn register_failure_skips_refresh() {
        let engine = Arc::new(RecordingEngine::new());
        engine.fail_next_register("engine down");
        let bridge = RegistrationBridge::new(engine.clone(), "m1");
        let err = bridge.after_save(&state()).await.unwrap_err();
        assert!(matches!(err, SessionError::Engine(m) if m == "engine down"));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn disabled_bridge_is_silent() {
        let bridge = RegistrationBridge::disabled();
        bridge.push_cube(&Cube::new(EntityId::from("c1"), "Orders"));
        bridge.after_save(&state()).await.unwrap();
        assert!(matches!(bridge.query("SELECT 1").await, Err(SessionError::Engine(_))));
    }
}
