//! Cube editor.
//!
//! Bound at `draft.schema.cubes[id]`. Every committed change of the bound
//! cube is pushed into the data source of the query engine, so previews and
//! queries see the edit before it is saved.

use std::sync::Arc;

use serde_json::Value;

use semdraft_core::lens::{self, CubeLens, Lens};
use semdraft_core::schema::{Join, JoinField, JoinType, Table};
use semdraft_core::{CoreError, Cube, Dimension, DimensionUsage, Entity, EntityId, Hierarchy, Level, Measure};

use crate::bridge::EntityType;
use crate::editors::{ensure_bound, registry_sink, Binding};
use crate::error::SessionError;
use crate::session::{EditSession, RootStore};
use crate::store::{Store, Subscription};

pub struct CubeEditor {
    session: EditSession,
    binding: Binding<RootStore, CubeLens>,
    _preview: Subscription,
}

impl CubeEditor {
    /// Opens an editor on cube `id`. Fails with `NotFound` if there is no
    /// such cube in the draft.
    pub fn init(session: &EditSession, id: EntityId) -> Result<CubeEditor, SessionError> {
        session.ensure_open()?;
        let binding = Binding::new(
            Arc::clone(session.store()),
            Arc::clone(session.pristine_store()),
            id.clone(),
            lens::cube_at(id),
            registry_sink(session.registry()),
        )?;

        let bridge = session.bridge().clone();
        let preview = binding.live.subscribe(move |cube| {
            if let Some(cube) = cube {
                bridge.push_cube(cube);
            }
        });

        Ok(CubeEditor {
            session: session.clone(),
            binding,
            _preview: preview,
        })
    }

    /// Re-targets the editor at another cube.
    pub fn connect(&self, id: EntityId) -> Result<(), SessionError> {
        ensure_bound(&self.binding)?;
        self.binding.rebind(id.clone(), lens::cube_at(id))
    }

    pub fn id(&self) -> EntityId {
        self.binding.id()
    }

    pub fn cube(&self) -> Result<Cube, SessionError> {
        self.binding.live.get()
    }

    pub fn pristine(&self) -> Option<Cube> {
        self.binding.pristine.read(|cube| cube.cloned())
    }

    pub fn dirty(&self) -> bool {
        self.binding.dirty()
    }

    fn update<R>(
        &self,
        f: impl FnOnce(&mut Cube) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.session.ensure_open()?;
        ensure_bound(&self.binding)?;
        self.binding.live.update(f)
    }

    pub fn update_cube(&self, f: impl FnOnce(&mut Cube)) -> Result<(), SessionError> {
        self.update(|cube| {
            f(cube);
            Ok(())
        })
    }

    pub fn set_expression(&self, expression: impl Into<String>) -> Result<(), SessionError> {
        let expression = expression.into();
        self.update(|cube| {
            cube.expression = Some(expression);
            Ok(())
        })
    }

    // -- tables ------------------------------------------------------------

    pub fn add_cube_table(&self, table: Table) -> Result<(), SessionError> {
        self.update(|cube| {
            cube.tables.push(table);
            Ok(())
        })
    }

    /// Returns whether a table was removed.
    pub fn remove_cube_table(&self, name: &str) -> Result<bool, SessionError> {
        self.update(|cube| {
            let index = cube.tables.iter().position(|t| t.name == name);
            Ok(index.map(|i| cube.tables.remove(i)).is_some())
        })
    }

    pub fn change_table_join_type(&self, table: &str, kind: JoinType) -> Result<(), SessionError> {
        self.update(|cube| {
            join_of(cube, table)?.kind = kind;
            Ok(())
        })
    }

    /// Appends an empty key pair to the join of `table`.
    pub fn add_cube_table_join(&self, table: &str) -> Result<(), SessionError> {
        self.update(|cube| {
            join_of(cube, table)?.fields.push(JoinField::default());
            Ok(())
        })
    }

    pub fn remove_join_field(&self, table: &str, index: usize) -> Result<(), SessionError> {
        self.update(|cube| {
            let join = join_of(cube, table)?;
            let len = join.fields.len();
            if index >= len {
                return Err(CoreError::IndexOutOfRange { index, len }.into());
            }
            join.fields.remove(index);
            Ok(())
        })
    }

    pub fn set_join_keys(
        &self,
        table: &str,
        index: usize,
        left_key: Option<String>,
        right_key: Option<String>,
    ) -> Result<(), SessionError> {
        self.update(|cube| {
            let join = join_of(cube, table)?;
            let len = join.fields.len();
            let field = join
                .fields
                .get_mut(index)
                .ok_or(CoreError::IndexOutOfRange { index, len })?;
            field.left_key = left_key;
            field.right_key = right_key;
            Ok(())
        })
    }

    // -- dimensions --------------------------------------------------------

    /// Adds a private dimension named `name` with one unnamed hierarchy.
    /// Names are unique among the cube's private dimensions.
    pub fn new_dimension(&self, name: &str) -> Result<EntityId, SessionError> {
        let mut dimension = Dimension::new(EntityId::generate(), name);
        dimension
            .hierarchies
            .push(Hierarchy::new(EntityId::generate(), ""))?;
        let id = dimension.id().clone();
        self.update(|cube| {
            if cube.dimensions.iter().any(|d| d.name == name) {
                return Err(CoreError::AlreadyExists {
                    kind: "dimension",
                    name: name.to_string(),
                }
                .into());
            }
            cube.dimensions.push(dimension)?;
            Ok(())
        })?;
        Ok(id)
    }

    /// Inserts `dimension` at `index` (appends when `None`).
    pub fn insert_dimension(
        &self,
        index: Option<usize>,
        dimension: Dimension,
    ) -> Result<EntityId, SessionError> {
        let id = dimension.id().clone();
        self.update(|cube| {
            let index = index.unwrap_or(cube.dimensions.len());
            Ok(cube.dimensions.insert(index, dimension)?)
        })?;
        Ok(id)
    }

    /// Inserts a usage of a shared dimension at `index`, clamped to the end.
    pub fn new_dimension_usage(
        &self,
        index: usize,
        usage: DimensionUsage,
    ) -> Result<EntityId, SessionError> {
        let usage = usage.with_id(EntityId::generate());
        let id = usage.id().clone();
        self.update(|cube| {
            let index = index.min(cube.dimension_usages.len());
            Ok(cube.dimension_usages.insert(index, usage)?)
        })?;
        Ok(id)
    }

    /// Adds a hierarchy to private dimension `dimension`. A named hierarchy
    /// is skipped if one with that name exists; at most two unnamed ones
    /// are allowed. Returns the new hierarchy id, if one was added.
    pub fn new_hierarchy(
        &self,
        dimension: &EntityId,
        name: &str,
    ) -> Result<Option<EntityId>, SessionError> {
        let path = self.binding.live.path().join(&lens::cube_dimension(dimension.clone()).path());
        self.update(|cube| {
            let dimension = cube
                .dimensions
                .get_mut(dimension)
                .ok_or_else(|| SessionError::not_found(path))?;
            let taken = if name.is_empty() {
                dimension.hierarchies.iter().filter(|h| h.name.is_empty()).count() > 1
            } else {
                dimension.hierarchies.iter().any(|h| h.name == name)
            };
            if taken {
                return Ok(None);
            }
            let hierarchy = Hierarchy::new(EntityId::generate(), name);
            let id = hierarchy.id().clone();
            dimension.hierarchies.push(hierarchy)?;
            Ok(Some(id))
        })
    }

    /// Appends a level to hierarchy `hierarchy` of any private dimension,
    /// unless a level with that name exists. Returns the new level id.
    pub fn new_level(
        &self,
        hierarchy: &EntityId,
        name: &str,
        column: Option<&str>,
    ) -> Result<Option<EntityId>, SessionError> {
        let path = self
            .binding
            .live
            .path()
            .field("dimensions")
            .field("hierarchies")
            .id(hierarchy.clone());
        self.update(|cube| {
            let hierarchy = cube
                .hierarchy_mut(hierarchy)
                .ok_or_else(|| SessionError::not_found(path))?;
            if hierarchy.levels.iter().any(|l| l.name == name) {
                return Ok(None);
            }
            let mut level = Level::new(EntityId::generate(), name);
            level.column = column.map(str::to_string);
            let id = level.id().clone();
            hierarchy.levels.push(level)?;
            Ok(Some(id))
        })
    }

    pub fn delete_dimension_usage(&self, id: &EntityId) -> Result<bool, SessionError> {
        self.update(|cube| Ok(cube.dimension_usages.remove(id).is_some()))
    }

    /// Removes a dimension usage, private dimension, hierarchy or level by
    /// id, whichever matches first.
    pub fn delete_dimension_property(&self, id: &EntityId) -> Result<bool, SessionError> {
        self.update(|cube| {
            if cube.dimension_usages.remove(id).is_some() || cube.dimensions.remove(id).is_some() {
                return Ok(true);
            }
            for dimension in cube.dimensions.iter_mut() {
                if dimension.hierarchies.remove(id).is_some() {
                    return Ok(true);
                }
                for hierarchy in dimension.hierarchies.iter_mut() {
                    if hierarchy.levels.remove(id).is_some() {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        })
    }

    pub fn move_item_in_dimensions(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.update(|cube| Ok(cube.dimensions.move_item(from, to)?))
    }

    // -- measures ----------------------------------------------------------

    /// Adds a `sum` measure over `column` at `index`, or an unnamed one at
    /// the end when `column` is `None` (skipped if an unnamed one exists).
    pub fn new_measure(
        &self,
        index: Option<usize>,
        column: Option<&str>,
    ) -> Result<Option<EntityId>, SessionError> {
        self.update(|cube| {
            let measure = match column {
                Some(column) => {
                    let mut measure = Measure::new(EntityId::generate(), column);
                    measure.column = Some(column.to_string());
                    measure
                }
                None if cube.measures.iter().any(|m| m.name.is_empty()) => return Ok(None),
                None => Measure::new(EntityId::generate(), ""),
            };
            let id = measure.id().clone();
            let index = index.unwrap_or(cube.measures.len()).min(cube.measures.len());
            cube.measures.insert(index, measure)?;
            Ok(Some(id))
        })
    }

    /// Copies measure `id` right after itself under `new_id`.
    pub fn duplicate_measure(&self, id: &EntityId, new_id: EntityId) -> Result<bool, SessionError> {
        self.update(|cube| {
            let Some(index) = cube.measures.position(id) else {
                return Ok(false);
            };
            let Some(source) = cube.measures.get(id) else {
                return Ok(false);
            };
            let mut copy = source.clone().with_id(new_id);
            copy.caption = Some(format!(
                "{} (copy)",
                copy.caption.as_deref().unwrap_or(&copy.name)
            ));
            copy.name = format!("{}_copy", copy.name);
            cube.measures.insert(index + 1, copy)?;
            Ok(true)
        })
    }

    pub fn delete_measure(&self, id: &EntityId) -> Result<bool, SessionError> {
        self.update(|cube| Ok(cube.measures.remove(id).is_some()))
    }

    pub fn move_item_in_measures(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.update(|cube| Ok(cube.measures.move_item(from, to)?))
    }

    // -- calculated members ------------------------------------------------

    pub fn delete_calculated_member(&self, id: &EntityId) -> Result<bool, SessionError> {
        self.update(|cube| Ok(cube.calculated_members.remove(id).is_some()))
    }

    // -- engine ------------------------------------------------------------

    /// Pushes the cube's entity type to the data source.
    pub fn refresh_entity_type(&self) -> Result<(), SessionError> {
        let cube = self.cube()?;
        self.session.bridge().push_entity_type(EntityType::from_cube(&cube));
        Ok(())
    }

    pub async fn query(&self, statement: &str) -> Result<Value, SessionError> {
        self.session.query(statement).await
    }

    /// Unbinds the editor. Pending saves are not affected.
    pub fn close(&self) {
        self.binding.close();
    }
}

impl Drop for CubeEditor {
    fn drop(&mut self) {
        self.binding.close();
    }
}

fn join_of<'a>(cube: &'a mut Cube, table: &str) -> Result<&'a mut Join, SessionError> {
    let slot = cube
        .tables
        .iter_mut()
        .find(|t| t.name == table)
        .ok_or_else(|| SessionError::Rejected(format!("cube has no table '{table}'")))?;
    Ok(slot.join.get_or_insert_with(|| Join {
        kind: JoinType::Inner,
        fields: Vec::new(),
    }))
}
