//! Multidimensional schema entities: cubes, dimensions, hierarchies, levels,
//! virtual cubes and model roles.
//!
//! Only identity, containment and the fields the editors manipulate are
//! typed. Everything else an entity carries is preserved verbatim in its
//! flattened `extra` map so a draft survives a load/save cycle unchanged.
//!
//! The id field of each entity is private: it is assigned at construction
//! (or by [`with_id`](Cube::with_id) on a detached copy) and cannot be
//! rewritten while the entity sits inside an [`EntityList`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::entity::{Entity, EntityList};
use crate::error::CoreError;
use crate::id::EntityId;

/// Treats an explicit JSON `null` like an absent field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

macro_rules! impl_entity {
    ($($ty:ident $({ $($list:ident),+ })?),* $(,)?) => {
        $(
            impl Entity for $ty {
                fn id(&self) -> &EntityId {
                    &self.id
                }

                fn check_nested_ids(&self) -> Result<(), CoreError> {
                    $($(self.$list.check_ids()?;)+)?
                    Ok(())
                }
            }

            impl $ty {
                /// Returns this (detached) entity under a different id.
                pub fn with_id(mut self, id: EntityId) -> Self {
                    self.id = id;
                    self
                }
            }
        )*
    };
}

impl_entity!(
    Cube { measures, calculated_members, dimension_usages, dimensions },
    Measure,
    CalculatedMember,
    DimensionUsage,
    Dimension { hierarchies },
    Hierarchy { levels },
    Level,
    VirtualCube,
    Role,
);

/// The schema section of a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cubes: EntityList<Cube>,
    /// Shared dimensions, usable from any cube through a dimension usage.
    #[serde(default, deserialize_with = "null_as_default")]
    pub dimensions: EntityList<Dimension>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub virtual_cubes: EntityList<VirtualCube>,
    /// Schema-level MDX roles, carried opaquely.
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cube {
    #[serde(rename = "__id__")]
    id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact: Option<Fact>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tables: Vec<Table>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub measures: EntityList<Measure>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub calculated_members: EntityList<CalculatedMember>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dimension_usages: EntityList<DimensionUsage>,
    /// Private (cube-local) dimensions.
    #[serde(default, deserialize_with = "null_as_default")]
    pub dimensions: EntityList<Dimension>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Schema {
    /// Id consistency of every entity in the schema, at any depth.
    pub fn check_ids(&self) -> Result<(), CoreError> {
        self.cubes.check_ids()?;
        self.dimensions.check_ids()?;
        self.virtual_cubes.check_ids()
    }
}

impl Cube {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Cube {
            id,
            name: name.into(),
            caption: None,
            visible: Some(true),
            expression: None,
            fact: None,
            tables: Vec::new(),
            measures: EntityList::new(),
            calculated_members: EntityList::new(),
            dimension_usages: EntityList::new(),
            dimensions: EntityList::new(),
            extra: Map::new(),
        }
    }

    /// Finds a hierarchy of one of the cube's private dimensions.
    pub fn hierarchy_mut(&mut self, id: &EntityId) -> Option<&mut Hierarchy> {
        self.dimensions
            .iter_mut()
            .find_map(|dimension| dimension.hierarchies.get_mut(id))
    }
}

/// The fact source of a cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Fact {
    Table { table: Table },
    View { view: Value },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Join>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Table {
    pub fn named(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            ..Table::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    #[serde(rename = "type")]
    pub kind: JoinType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<JoinField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinField {
    pub left_key: Option<String>,
    pub right_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    #[serde(rename = "__id__")]
    id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Measure {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Measure {
            id,
            name: name.into(),
            caption: None,
            column: None,
            aggregator: Some("sum".to_string()),
            visible: Some(true),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedMember {
    #[serde(rename = "__id__")]
    id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CalculatedMember {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        CalculatedMember {
            id,
            name: name.into(),
            caption: None,
            formula: None,
            extra: Map::new(),
        }
    }
}

/// Reference from a cube to a shared dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionUsage {
    #[serde(rename = "__id__")]
    id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Name of the shared dimension.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DimensionUsage {
    pub fn new(id: EntityId, name: impl Into<String>, source: impl Into<String>) -> Self {
        DimensionUsage {
            id,
            name: name.into(),
            caption: None,
            source: source.into(),
            foreign_key: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    #[serde(rename = "__id__")]
    id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hierarchies: EntityList<Hierarchy>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dimension {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Dimension {
            id,
            name: name.into(),
            caption: None,
            hierarchies: EntityList::new(),
            extra: Map::new(),
        }
    }

    /// Deep copy with fresh ids for every hierarchy and level.
    pub fn duplicate(&self, id: EntityId) -> Dimension {
        let mut copy = self.clone().with_id(id);
        copy.hierarchies = self
            .hierarchies
            .iter()
            .map(|hierarchy| {
                let mut h = hierarchy.clone().with_id(EntityId::generate());
                h.levels = h
                    .levels
                    .iter()
                    .map(|level| level.clone().with_id(EntityId::generate()))
                    .fold(EntityList::new(), |mut acc, level| {
                        acc.upsert(level);
                        acc
                    });
                h
            })
            .fold(EntityList::new(), |mut acc, h| {
                acc.upsert(h);
                acc
            });
        copy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    #[serde(rename = "__id__")]
    id: EntityId,
    /// May be empty: the default hierarchy of a dimension is unnamed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_all: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key_table: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tables: Vec<Table>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub levels: EntityList<Level>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Hierarchy {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Hierarchy {
            id,
            name: name.into(),
            caption: None,
            has_all: Some(true),
            visible: Some(true),
            primary_key: None,
            primary_key_table: None,
            tables: Vec::new(),
            levels: EntityList::new(),
            extra: Map::new(),
        }
    }

    /// Table a level without an explicit table reads from.
    pub fn primary_table(&self) -> Option<&str> {
        self.primary_key_table
            .as_deref()
            .or_else(|| self.tables.first().map(|t| t.name.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    #[serde(rename = "__id__")]
    id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Level {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Level {
            id,
            name: name.into(),
            caption: None,
            column: None,
            table: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualCube {
    #[serde(rename = "__id__")]
    id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cube_usages: Vec<CubeUsage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VirtualCube {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        VirtualCube {
            id,
            name: name.into(),
            caption: None,
            cube_usages: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeUsage {
    pub cube_name: String,
    #[serde(default)]
    pub ignore_unrelated_dimensions: bool,
}

/// Access-control role of the model. Keyed by `key` rather than `__id__`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(rename = "key")]
    id: EntityId,
    pub name: String,
    #[serde(default)]
    pub options: RoleOptions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Role {
    pub fn new(key: EntityId, name: impl Into<String>) -> Self {
        Role {
            id: key,
            name: name.into(),
            options: RoleOptions::default(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_grant: Option<SchemaGrant>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub role_usages: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaGrant {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cube_grants: Vec<CubeGrant>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeGrant {
    pub cube: String,
    pub access: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hierarchy_grants: Vec<Value>,
}
