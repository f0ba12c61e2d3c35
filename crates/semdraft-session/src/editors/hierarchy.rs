//! Hierarchy editor.
//!
//! Bound at `hierarchies[id]` relative to a [`DimensionEditor`]'s store, so
//! it follows the dimension the parent editor is bound to. Its dirty flag
//! goes into the parent's hierarchy registry.

use semdraft_core::lens::{self, ById};
use semdraft_core::schema::{Join, JoinType, Table};
use semdraft_core::{CoreError, Dimension, Entity, EntityId, Hierarchy, Level};

use crate::editors::dimension::{DimensionEditor, DimensionStore};
use crate::editors::{ensure_bound, registry_sink, Binding};
use crate::error::SessionError;
use crate::session::EditSession;
use crate::store::Store;

type HierarchyLens = ById<Dimension, Hierarchy>;

pub struct HierarchyEditor {
    session: EditSession,
    binding: Binding<DimensionStore, HierarchyLens>,
}

impl HierarchyEditor {
    pub fn init(dimension: &DimensionEditor, id: EntityId) -> Result<HierarchyEditor, SessionError> {
        let session = dimension.session().clone();
        session.ensure_open()?;
        let (live, pristine) = dimension.stores();

        let sink = registry_sink(dimension.hierarchy_flags());
        let binding = Binding::new(live, pristine, id.clone(), lens::hierarchy(id), sink)?;
        Ok(HierarchyEditor { session, binding })
    }

    /// Re-targets the editor at another hierarchy of the same dimension.
    pub fn connect(&self, id: EntityId) -> Result<(), SessionError> {
        ensure_bound(&self.binding)?;
        self.binding.rebind(id.clone(), lens::hierarchy(id))
    }

    pub fn id(&self) -> EntityId {
        self.binding.id()
    }

    pub fn hierarchy(&self) -> Result<Hierarchy, SessionError> {
        self.binding.live.get()
    }

    pub fn dirty(&self) -> bool {
        self.binding.dirty()
    }

    fn apply<R>(
        &self,
        f: impl FnOnce(&mut Hierarchy) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.session.ensure_open()?;
        ensure_bound(&self.binding)?;
        self.binding.live.update(f)
    }

    /// Applies `f` to the hierarchy record.
    pub fn update(&self, f: impl FnOnce(&mut Hierarchy)) -> Result<(), SessionError> {
        self.apply(|hierarchy| {
            f(hierarchy);
            Ok(())
        })
    }

    // -- tables ------------------------------------------------------------

    pub fn set_tables(&self, tables: Vec<Table>) -> Result<(), SessionError> {
        self.apply(|hierarchy| {
            hierarchy.tables = tables;
            Ok(())
        })
    }

    /// Appends table `name` unless present. Every table after the first is
    /// joined with an empty inner join.
    pub fn append_table(&self, name: &str) -> Result<bool, SessionError> {
        self.apply(|hierarchy| {
            if hierarchy.tables.iter().any(|t| t.name == name) {
                return Ok(false);
            }
            let mut table = Table::named(name);
            if !hierarchy.tables.is_empty() {
                table.join = Some(Join {
                    kind: JoinType::Inner,
                    fields: Vec::new(),
                });
            }
            hierarchy.tables.push(table);
            Ok(true)
        })
    }

    pub fn remove_table(&self, name: &str) -> Result<bool, SessionError> {
        self.apply(|hierarchy| {
            let index = hierarchy.tables.iter().position(|t| t.name == name);
            Ok(index.map(|i| hierarchy.tables.remove(i)).is_some())
        })
    }

    pub fn move_table(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.apply(|hierarchy| {
            let len = hierarchy.tables.len();
            for index in [from, to] {
                if index >= len {
                    return Err(CoreError::IndexOutOfRange { index, len }.into());
                }
            }
            let table = hierarchy.tables.remove(from);
            hierarchy.tables.insert(to, table);
            Ok(())
        })
    }

    // -- levels ------------------------------------------------------------

    /// Adds a level reading `column` from `table` (the primary table when
    /// `None`).
    ///
    /// The first level over a column is named after it. A second level over
    /// the same column from a different table is named `column (table)`.
    /// The same column from the same table is rejected.
    pub fn append_level(&self, column: &str, table: Option<&str>) -> Result<EntityId, SessionError> {
        self.apply(|hierarchy| {
            let mut level;
            if hierarchy.levels.iter().any(|l| l.column.as_deref() == Some(column)) {
                let primary = hierarchy.primary_table();
                let same = hierarchy.levels.iter().any(|l| {
                    l.column.as_deref() == Some(column) && l.table.as_deref().or(primary) == table
                });
                if same {
                    return Err(SessionError::Rejected("The same level already exists".into()));
                }
                let source = table.or(primary).unwrap_or_default();
                level = Level::new(EntityId::generate(), format!("{column} ({source})"));
            } else {
                level = Level::new(EntityId::generate(), column);
            }
            level.column = Some(column.to_string());
            level.table = table.map(str::to_string);
            let id = level.id().clone();
            hierarchy.levels.push(level)?;
            Ok(id)
        })
    }

    pub fn remove_level(&self, id: &EntityId) -> Result<bool, SessionError> {
        self.apply(|hierarchy| Ok(hierarchy.levels.remove(id).is_some()))
    }

    /// Replaces the level with the same id, or appends it.
    pub fn update_level(&self, level: Level) -> Result<(), SessionError> {
        self.apply(|hierarchy| {
            hierarchy.levels.upsert(level);
            Ok(())
        })
    }

    pub fn move_level(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.apply(|hierarchy| Ok(hierarchy.levels.move_item(from, to)?))
    }

    pub fn close(&self) {
        self.binding.close();
    }
}

impl Drop for HierarchyEditor {
    fn drop(&mut self) {
        self.binding.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use semdraft_core::{ModelId, SemanticModel};
    use semdraft_storage::InMemoryTransport;

    fn model() -> SemanticModel {
        let mut model = SemanticModel::new(ModelId::new("m1"), "Sales");
        let mut draft = model.extract_draft();
        let mut product = Dimension::new(EntityId::from("product"), "Product");
        let mut hierarchy = Hierarchy::new(EntityId::from("h1"), "");
        hierarchy.tables.push(Table::named("products"));
        hierarchy.levels.push(Level::new(EntityId::from("l1"), "Category")).unwrap();
        product.hierarchies.push(hierarchy).unwrap();
        product.hierarchies.push(Hierarchy::new(EntityId::from("h2"), "Brand")).unwrap();
        draft.schema.dimensions.push(product).unwrap();
        model.draft = Some(draft);
        model
    }

    async fn editors() -> (EditSession, DimensionEditor, HierarchyEditor) {
        let session = EditSession::open(model(), Arc::new(InMemoryTransport::new()))
            .await
            .unwrap();
        let dimension = DimensionEditor::init(&session, EntityId::from("product")).unwrap();
        let hierarchy = HierarchyEditor::init(&dimension, EntityId::from("h1")).unwrap();
        (session, dimension, hierarchy)
    }

    #[tokio::test]
    async fn second_table_gets_inner_join() {
        let (_session, _dimension, editor) = editors().await;
        assert!(editor.append_table("brands").unwrap());
        assert!(!editor.append_table("brands").unwrap());

        let hierarchy = editor.hierarchy().unwrap();
        assert!(hierarchy.tables[0].join.is_none());
        let join = hierarchy.tables[1].join.as_ref().unwrap();
        assert_eq!(join.kind, JoinType::Inner);
        assert!(join.fields.is_empty());

        editor.move_table(1, 0).unwrap();
        assert_eq!(editor.hierarchy().unwrap().tables[0].name, "brands");
        assert!(editor.move_table(0, 5).is_err());
        assert!(editor.remove_table("products").unwrap());
    }

    #[tokio::test]
    async fn append_level_duplicate_column_rule() {
        let (_session, _dimension, editor) = editors().await;
        editor.append_level("category", None).unwrap();
        editor.append_level("category", Some("brands")).unwrap();

        // same column, primary table given explicitly
        let err = editor.append_level("category", Some("products")).unwrap_err();
        assert_eq!(err.to_string(), "The same level already exists");

        let names: Vec<_> = editor
            .hierarchy()
            .unwrap()
            .levels
            .iter()
            .map(|l| l.name.clone())
            .collect();
        assert_eq!(names, vec!["Category", "category", "category (brands)"]);
    }

    #[tokio::test]
    async fn level_edits_report_into_dimension() {
        let (session, dimension, editor) = editors().await;
        let mut level = Level::new(EntityId::from("l1"), "Category");
        level.caption = Some("Product Category".into());
        editor.update_level(level).unwrap();

        assert!(editor.dirty());
        assert!(dimension.hierarchy_dirty(&EntityId::from("h1")));
        assert_eq!(dimension.dirty_hierarchies(), vec![EntityId::from("h1")]);
        assert!(dimension.dirty());
        assert!(session.entity_dirty(&EntityId::from("product")));
        // hierarchies are tracked by their dimension, not the session
        assert!(!session.entity_dirty(&EntityId::from("h1")));

        editor.connect(EntityId::from("h2")).unwrap();
        assert!(!editor.dirty());
        assert!(!dimension.hierarchy_dirty(&EntityId::from("h2")));
    }

    #[tokio::test]
    async fn removed_hierarchy_is_not_found() {
        let (_session, dimension, editor) = editors().await;
        dimension.remove_hierarchy(&EntityId::from("h1")).unwrap();
        assert!(editor.hierarchy().unwrap_err().is_not_found());
        assert!(editor.remove_level(&EntityId::from("l1")).unwrap_err().is_not_found());
        assert!(HierarchyEditor::init(&dimension, EntityId::from("h1")).is_err());
    }

    #[tokio::test]
    async fn move_and_remove_levels() {
        let (_session, _dimension, editor) = editors().await;
        let year = editor.append_level("year", None).unwrap();
        editor.move_level(1, 0).unwrap();
        assert_eq!(editor.hierarchy().unwrap().levels.first().unwrap().id(), &year);
        assert!(editor.remove_level(&year).unwrap());
        assert!(!editor.remove_level(&year).unwrap());
    }

    #[tokio::test]
    async fn hierarchy_flag_clears_when_the_draft_is_saved() {
        let (session, dimension, editor) = editors().await;
        editor.update(|h| h.caption = Some("Catalog".into())).unwrap();
        drop(editor);
        assert!(dimension.hierarchy_dirty(&EntityId::from("h1")));

        session.flush().await.unwrap();
        assert!(!session.dirty());
        assert!(!dimension.hierarchy_dirty(&EntityId::from("h1")));
        assert!(dimension.dirty_hierarchies().is_empty());
    }

    #[tokio::test]
    async fn hierarchy_flag_clears_when_undone_to_pristine() {
        let (session, dimension, editor) = editors().await;
        editor.update(|h| h.has_all = Some(false)).unwrap();
        editor.close();
        assert!(dimension.hierarchy_dirty(&EntityId::from("h1")));

        session.undo().unwrap();
        assert!(!session.dirty());
        assert!(!dimension.hierarchy_dirty(&EntityId::from("h1")));
    }
}
