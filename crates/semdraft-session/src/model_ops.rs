//! Model-level operations of an [`EditSession`].
//!
//! Each operation is one `update` of the root store, so it commits (and is
//! recorded by history, dirty checks and the save pipeline) as a single
//! change, or not at all when it fails.

use serde::{Deserialize, Serialize};

use semdraft_core::lens::{self, Lens};
use semdraft_core::schema::{Fact, Table};
use semdraft_core::{
    CoreError, Cube, CubeUsage, Dimension, DimensionUsage, Draft, Entity, EntityId, Hierarchy,
    Level, Measure, SemanticModel, TableEntity, VirtualCube,
};
use semdraft_storage::EntityKind;

use crate::error::SessionError;
use crate::session::EditSession;
use crate::store::Store;

/// Input of the "create entity" dialog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    pub name: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Fact table of a cube, or dimension table of a dimension.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub columns: Vec<NewColumn>,
}

impl NewEntity {
    pub fn named(name: impl Into<String>) -> Self {
        NewEntity {
            name: name.into(),
            ..NewEntity::default()
        }
    }
}

/// A table column picked while creating an entity, and what it becomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewColumn {
    pub name: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub role: ColumnRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ColumnRole {
    /// Becomes a measure aggregated with `aggregator` (default `sum`).
    Measure { aggregator: Option<String> },
    /// Becomes a private dimension with one level.
    Dimension,
    /// Becomes a usage of the shared dimension `dimension`.
    SharedDimension { dimension: String, caption: Option<String> },
    /// Not used by the entity.
    Ignore,
}

/// One row of the entity list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySummary {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub caption: Option<String>,
}

impl EditSession {
    /// Runs `f` on the draft as one committed change.
    pub fn update_draft<R>(
        &self,
        f: impl FnOnce(&mut Draft) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.ensure_open()?;
        self.inner.live.update(|state| f(&mut state.draft))
    }

    /// Runs `f` on the model record (name, description, data source).
    pub fn update_model<R>(
        &self,
        f: impl FnOnce(&mut SemanticModel) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.ensure_open()?;
        self.inner.live.update(|state| f(&mut state.model))
    }

    // -- tables ------------------------------------------------------------

    pub fn add_table(&self, table: TableEntity) -> Result<(), SessionError> {
        self.update_draft(|draft| {
            if draft.table(&table.name).is_some() {
                return Err(CoreError::AlreadyExists {
                    kind: "table",
                    name: table.name.clone(),
                }
                .into());
            }
            draft.tables.push(table);
            Ok(())
        })
    }

    /// Replaces the table with the same name, or appends it.
    pub fn edit_table(&self, table: TableEntity) -> Result<(), SessionError> {
        self.update_draft(|draft| {
            match draft.tables.iter_mut().find(|t| t.name == table.name) {
                Some(slot) => *slot = table,
                None => draft.tables.push(table),
            }
            Ok(())
        })
    }

    /// Returns whether a table was removed.
    pub fn delete_table(&self, name: &str) -> Result<bool, SessionError> {
        self.update_draft(|draft| {
            let before = draft.tables.len();
            draft.tables.retain(|t| t.name != name);
            Ok(draft.tables.len() != before)
        })
    }

    // -- cubes -------------------------------------------------------------

    pub fn new_cube(&self, cube: Cube) -> Result<EntityId, SessionError> {
        let id = cube.id().clone();
        self.update_draft(|draft| Ok(draft.schema.cubes.push(cube)?))?;
        Ok(id)
    }

    /// Builds a cube from the create dialog: fact table, then one measure,
    /// private dimension or dimension usage per selected column.
    pub fn create_cube(&self, entity: NewEntity) -> Result<EntityId, SessionError> {
        let mut cube = Cube::new(EntityId::generate(), entity.name);
        cube.caption = entity.caption;
        cube.expression = entity.expression;
        cube.fact = entity.table.map(|name| Fact::Table {
            table: Table::named(name),
        });

        for column in entity.columns {
            match column.role {
                ColumnRole::Measure { aggregator } => {
                    let mut measure = Measure::new(EntityId::generate(), column.name.clone());
                    measure.caption = column.caption;
                    measure.column = Some(column.name);
                    if aggregator.is_some() {
                        measure.aggregator = aggregator;
                    }
                    cube.measures.push(measure)?;
                }
                ColumnRole::Dimension => {
                    let mut dimension = Dimension::new(EntityId::generate(), column.name.clone());
                    dimension.caption.clone_from(&column.caption);
                    let mut hierarchy = Hierarchy::new(EntityId::generate(), "");
                    let mut level = Level::new(EntityId::generate(), column.name.clone());
                    level.caption = column.caption;
                    level.column = Some(column.name);
                    hierarchy.levels.push(level)?;
                    dimension.hierarchies.push(hierarchy)?;
                    cube.dimensions.push(dimension)?;
                }
                ColumnRole::SharedDimension { dimension, caption } => {
                    let mut usage =
                        DimensionUsage::new(EntityId::generate(), dimension.clone(), dimension);
                    usage.caption = caption;
                    usage.foreign_key = Some(column.name);
                    cube.dimension_usages.push(usage)?;
                }
                ColumnRole::Ignore => {}
            }
        }
        self.new_cube(cube)
    }

    /// Replaces the cube with the same id, or appends it.
    pub fn upsert_cube(&self, cube: Cube) -> Result<(), SessionError> {
        self.update_draft(|draft| {
            draft.schema.cubes.upsert(cube);
            Ok(())
        })
    }

    // -- dimensions --------------------------------------------------------

    pub fn new_dimension(&self, dimension: Dimension) -> Result<EntityId, SessionError> {
        let id = dimension.id().clone();
        self.update_draft(|draft| Ok(draft.schema.dimensions.push(dimension)?))?;
        Ok(id)
    }

    /// Builds a shared dimension with one default hierarchy over `table`,
    /// one level per selected column.
    pub fn create_dimension(&self, entity: NewEntity) -> Result<EntityId, SessionError> {
        let mut dimension = Dimension::new(EntityId::generate(), entity.name);
        dimension.caption.clone_from(&entity.caption);
        if let Some(expression) = entity.expression {
            dimension
                .extra
                .insert("expression".into(), serde_json::Value::String(expression));
        }

        let mut hierarchy = Hierarchy::new(EntityId::generate(), "");
        hierarchy.caption = entity.caption;
        hierarchy.primary_key = entity.primary_key;
        hierarchy.tables = entity.table.into_iter().map(Table::named).collect();
        for column in entity.columns {
            let mut level = Level::new(EntityId::generate(), column.name.clone());
            level.caption = column.caption;
            level.column = Some(column.name);
            hierarchy.levels.push(level)?;
        }
        dimension.hierarchies.push(hierarchy)?;
        self.new_dimension(dimension)
    }

    pub fn upsert_dimension(&self, dimension: Dimension) -> Result<(), SessionError> {
        self.update_draft(|draft| {
            draft.schema.dimensions.upsert(dimension);
            Ok(())
        })
    }

    /// Applies `f` to the shared dimension `id`.
    pub fn update_dimension(
        &self,
        id: &EntityId,
        f: impl FnOnce(&mut Dimension),
    ) -> Result<(), SessionError> {
        let lens = lens::dimension_at(id.clone());
        self.update_draft(|draft| {
            let dimension = draft
                .schema
                .dimensions
                .get_mut(id)
                .ok_or_else(|| SessionError::not_found(lens.path()))?;
            f(dimension);
            Ok(())
        })
    }

    /// Replaces the hierarchy with the same id in the shared dimension
    /// named `dimension`, or appends it. Returns the hierarchy id.
    pub fn upsert_hierarchy(
        &self,
        dimension: &str,
        hierarchy: Hierarchy,
    ) -> Result<EntityId, SessionError> {
        let id = hierarchy.id().clone();
        self.update_draft(|draft| {
            let target = draft
                .schema
                .dimensions
                .iter_mut()
                .find(|d| d.name == dimension)
                .ok_or_else(|| {
                    SessionError::Rejected(format!("no shared dimension named '{dimension}'"))
                })?;
            target.hierarchies.upsert(hierarchy);
            Ok(())
        })?;
        Ok(id)
    }

    // -- virtual cubes -----------------------------------------------------

    /// Adds a virtual cube combining the cubes named in `cubes`.
    pub fn create_virtual_cube(
        &self,
        entity: NewEntity,
        cubes: &[&str],
    ) -> Result<EntityId, SessionError> {
        let mut virtual_cube = VirtualCube::new(EntityId::generate(), entity.name);
        virtual_cube.caption = entity.caption;
        virtual_cube.cube_usages = cubes
            .iter()
            .map(|name| CubeUsage {
                cube_name: (*name).to_string(),
                ignore_unrelated_dimensions: true,
            })
            .collect();
        let id = virtual_cube.id().clone();
        self.update_draft(|draft| Ok(draft.schema.virtual_cubes.push(virtual_cube)?))?;
        Ok(id)
    }

    // -- generic entity operations -----------------------------------------

    /// Copies cube, shared dimension or virtual cube `id` under `new_id`,
    /// appending `_copy` to its name and ` (Copy)` to its caption.
    pub fn duplicate(
        &self,
        kind: EntityKind,
        id: &EntityId,
        new_id: EntityId,
    ) -> Result<EntityId, SessionError> {
        self.update_draft(|draft| {
            let schema = &mut draft.schema;
            match kind {
                EntityKind::Cube => {
                    let source = schema
                        .cubes
                        .get(id)
                        .ok_or_else(|| SessionError::not_found(lens::cube_at(id.clone()).path()))?;
                    let mut copy = source.clone().with_id(new_id.clone());
                    copy.caption = Some(copy_caption(copy.caption.take(), &copy.name));
                    copy.name = format!("{}_copy", copy.name);
                    schema.cubes.push(copy)?;
                }
                EntityKind::Dimension => {
                    let source = schema.dimensions.get(id).ok_or_else(|| {
                        SessionError::not_found(lens::dimension_at(id.clone()).path())
                    })?;
                    let mut copy = source.duplicate(new_id.clone());
                    copy.caption = Some(copy_caption(copy.caption.take(), &copy.name));
                    copy.name = format!("{}_copy", copy.name);
                    schema.dimensions.push(copy)?;
                }
                EntityKind::VirtualCube => {
                    let source = schema.virtual_cubes.get(id).ok_or_else(|| {
                        SessionError::not_found(
                            lens::draft()
                                .then(lens::schema())
                                .then(lens::virtual_cube(id.clone()))
                                .path(),
                        )
                    })?;
                    let mut copy = source.clone().with_id(new_id.clone());
                    copy.caption = Some(copy_caption(copy.caption.take(), &copy.name));
                    copy.name = format!("{}_copy", copy.name);
                    schema.virtual_cubes.push(copy)?;
                }
                EntityKind::Role => {
                    return Err(SessionError::Rejected("roles cannot be duplicated".into()));
                }
            }
            Ok(new_id)
        })
    }

    /// Removes `id` from cubes, shared dimensions and virtual cubes.
    /// Returns whether anything was removed.
    pub fn delete_entity(&self, id: &EntityId) -> Result<bool, SessionError> {
        self.update_draft(|draft| {
            let schema = &mut draft.schema;
            let removed = schema.cubes.remove(id).is_some()
                | schema.dimensions.remove(id).is_some()
                | schema.virtual_cubes.remove(id).is_some();
            Ok(removed)
        })
    }

    pub fn move_item_in_cubes(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.update_draft(|draft| Ok(draft.schema.cubes.move_item(from, to)?))
    }

    pub fn move_item_in_dimensions(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.update_draft(|draft| Ok(draft.schema.dimensions.move_item(from, to)?))
    }

    pub fn move_item_in_virtual_cubes(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.update_draft(|draft| Ok(draft.schema.virtual_cubes.move_item(from, to)?))
    }

    // -- queries -----------------------------------------------------------

    pub fn cubes(&self) -> Vec<Cube> {
        self.state().draft.schema.cubes.to_vec()
    }

    pub fn dimensions(&self) -> Vec<Dimension> {
        self.state().draft.schema.dimensions.to_vec()
    }

    pub fn virtual_cubes(&self) -> Vec<VirtualCube> {
        self.state().draft.schema.virtual_cubes.to_vec()
    }

    pub fn tables(&self) -> Vec<TableEntity> {
        self.state().draft.tables.clone()
    }

    /// Cubes then shared dimensions, in display order.
    pub fn entities(&self) -> Vec<EntitySummary> {
        let state = self.state();
        let schema = &state.draft.schema;
        let cubes = schema.cubes.iter().map(|c| EntitySummary {
            id: c.id().clone(),
            kind: EntityKind::Cube,
            name: c.name.clone(),
            caption: c.caption.clone(),
        });
        let dimensions = schema.dimensions.iter().map(|d| EntitySummary {
            id: d.id().clone(),
            kind: EntityKind::Dimension,
            name: d.name.clone(),
            caption: d.caption.clone(),
        });
        cubes.chain(dimensions).collect()
    }
}

fn copy_caption(caption: Option<String>, name: &str) -> String {
    format!("{} (Copy)", caption.as_deref().unwrap_or(name))
}
