//! The editable draft document and the model record it belongs to.
//!
//! [`ModelState`] is the root of everything a live edit session holds:
//! the last-known saved [`SemanticModel`] record and the [`Draft`] being
//! edited. The draft is a plain tree (containment by collection
//! membership, no back references) and is therefore cheap to clone and
//! compare as a whole.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::EntityList;
use crate::error::CoreError;
use crate::id::ModelId;
use crate::schema::{null_as_default, Role, Schema};

/// Root value of a live edit session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub model: SemanticModel,
    pub draft: Draft,
}

impl ModelState {
    /// Seeds the session state from a persisted model record.
    pub fn from_model(model: SemanticModel) -> Self {
        let draft = model.extract_draft();
        ModelState { model, draft }
    }
}

/// The editable, unpublished version of a model's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    #[serde(default, deserialize_with = "null_as_default")]
    pub schema: Schema,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tables: Vec<TableEntity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: EntityList<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_initialization: Option<String>,
    /// Validation results assigned by the server on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Value>,
    /// Server-assigned save counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Draft {
    /// Copy with the server-assigned fields cleared.
    pub fn without_volatile(&self) -> Draft {
        Draft {
            checklist: None,
            version: None,
            saved_at: None,
            ..self.clone()
        }
    }

    pub fn check_ids(&self) -> Result<(), CoreError> {
        self.schema.check_ids()?;
        self.roles.check_ids()
    }

    pub fn table(&self, name: &str) -> Option<&TableEntity> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// A table defined inside the model (uploaded or declared), as opposed to a
/// warehouse table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableEntity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<TableColumn>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TableEntity {
    pub fn named(name: impl Into<String>) -> Self {
        TableEntity {
            name: name.into(),
            ..TableEntity::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Reference from a model to the data source it queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The persisted model record: published schema plus the stored draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticModel {
    pub id: ModelId,
    /// Key under which the model is registered with the query engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceRef>,
    /// Published schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tables: Vec<TableEntity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: EntityList<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_initialization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<Draft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SemanticModel {
    pub fn new(id: ModelId, name: impl Into<String>) -> Self {
        SemanticModel {
            id,
            name: name.into(),
            ..SemanticModel::default()
        }
    }

    /// The stored draft, or a fresh draft extracted from the published
    /// schema when the model has never been drafted.
    pub fn extract_draft(&self) -> Draft {
        match &self.draft {
            Some(draft) => draft.clone(),
            None => Draft {
                schema: self.schema.clone().unwrap_or_default(),
                tables: self.tables.clone(),
                roles: self.roles.clone(),
                db_initialization: self.db_initialization.clone(),
                ..Draft::default()
            },
        }
    }

    /// Key used to look the model up in the query engine.
    pub fn engine_key(&self) -> String {
        self.key.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityId;
    use crate::schema::Cube;
    use serde_json::json;

    #[test]
    fn extract_prefers_stored_draft() {
        let mut model = SemanticModel::new(ModelId::new("m1"), "Sales");
        let mut published = Schema::default();
        published
            .cubes
            .push(Cube::new(EntityId::from("c1"), "Published"))
            .unwrap();
        model.schema = Some(published);

        let fresh = model.extract_draft();
        assert_eq!(fresh.schema.cubes.first().unwrap().name, "Published");
        assert!(fresh.roles.is_empty());

        let mut draft = Draft::default();
        draft.version = Some(3);
        model.draft = Some(draft.clone());
        assert_eq!(model.extract_draft(), draft);
    }

    #[test]
    fn null_roles_default_to_empty() {
        let draft: Draft = serde_json::from_value(json!({
            "schema": {"cubes": []},
            "roles": null,
            "version": 2
        }))
        .unwrap();
        assert!(draft.roles.is_empty());
        assert_eq!(draft.version, Some(2));
    }

    #[test]
    fn without_volatile_clears_server_fields() {
        let draft = Draft {
            version: Some(4),
            checklist: Some(json!([])),
            saved_at: Some(Utc::now()),
            db_initialization: Some("create table t()".into()),
            ..Draft::default()
        };
        let stripped = draft.without_volatile();
        assert!(stripped.version.is_none());
        assert!(stripped.checklist.is_none());
        assert!(stripped.saved_at.is_none());
        assert_eq!(stripped.db_initialization, draft.db_initialization);
    }
}
