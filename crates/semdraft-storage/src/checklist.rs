//! Draft validation run by the backend on every save.
//!
//! The result is the draft's checklist: a flat list of findings, each tagged
//! with a rule code and, where it applies, the entity it concerns.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use semdraft_core::{Dimension, Draft, Entity, EntityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistLevel {
    Error,
    Warning,
    Info,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub level: ChecklistLevel,
    pub rule_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityId>,
}

impl ChecklistItem {
    fn new(level: ChecklistLevel, rule_code: &str, message: String, entity: Option<&EntityId>) -> Self {
        ChecklistItem {
            level,
            rule_code: rule_code.to_string(),
            message,
            entity: entity.cloned(),
        }
    }
}

/// Validates cubes, shared dimensions, virtual cubes and roles of a draft.
pub fn validate_draft(draft: &Draft) -> Vec<ChecklistItem> {
    let mut items = Vec::new();
    let schema = &draft.schema;

    let mut seen = HashSet::new();
    for cube in schema.cubes.iter() {
        if cube.name.trim().is_empty() {
            items.push(ChecklistItem::new(
                ChecklistLevel::Error,
                "cube_name_required",
                "Cube name is required".to_string(),
                Some(cube.id()),
            ));
        } else if !seen.insert(cube.name.as_str()) {
            items.push(ChecklistItem::new(
                ChecklistLevel::Error,
                "cube_name_duplicate",
                format!("Cube name '{}' is used more than once", cube.name),
                Some(cube.id()),
            ));
        }
        if cube.measures.is_empty() {
            items.push(ChecklistItem::new(
                ChecklistLevel::Warning,
                "cube_measures_empty",
                format!("Cube '{}' has no measures", cube.name),
                Some(cube.id()),
            ));
        }
        for dimension in cube.dimensions.iter() {
            check_hierarchies(dimension, &mut items);
        }
    }

    for dimension in schema.dimensions.iter() {
        if dimension.hierarchies.is_empty() {
            items.push(ChecklistItem::new(
                ChecklistLevel::Error,
                "dimension_hierarchies_empty",
                format!("Dimension '{}' has no hierarchies", dimension.name),
                Some(dimension.id()),
            ));
        }
        check_hierarchies(dimension, &mut items);
    }

    for virtual_cube in schema.virtual_cubes.iter() {
        for usage in &virtual_cube.cube_usages {
            if !seen.contains(usage.cube_name.as_str()) {
                items.push(ChecklistItem::new(
                    ChecklistLevel::Error,
                    "virtual_cube_unknown_cube",
                    format!(
                        "Virtual cube '{}' uses unknown cube '{}'",
                        virtual_cube.name, usage.cube_name
                    ),
                    Some(virtual_cube.id()),
                ));
            }
        }
    }

    for role in draft.roles.iter() {
        if role.name.trim().is_empty() {
            items.push(ChecklistItem::new(
                ChecklistLevel::Error,
                "role_name_required",
                "Role name is required".to_string(),
                Some(role.id()),
            ));
        }
    }

    items
}

fn check_hierarchies(dimension: &Dimension, items: &mut Vec<ChecklistItem>) {
    for hierarchy in dimension.hierarchies.iter() {
        if hierarchy.levels.is_empty() {
            let label = if hierarchy.name.is_empty() {
                dimension.name.as_str()
            } else {
                hierarchy.name.as_str()
            };
            items.push(ChecklistItem::new(
                ChecklistLevel::Error,
                "hierarchy_levels_empty",
                format!("Hierarchy '{label}' of dimension '{}' has no levels", dimension.name),
                Some(hierarchy.id()),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semdraft_core::schema::CubeUsage;
    use semdraft_core::{Cube, Hierarchy, Level, Measure, Role, VirtualCube};

    fn codes(items: &[ChecklistItem]) -> Vec<&str> {
        items.iter().map(|i| i.rule_code.as_str()).collect()
    }

    #[test]
    fn test_empty_draft_is_clean() {
        assert!(validate_draft(&Draft::default()).is_empty());
    }

    #[test]
    fn test_cube_rules() {
        let mut draft = Draft::default();
        let mut sales = Cube::new(EntityId::from("c1"), "Sales");
        sales
            .measures
            .push(Measure::new(EntityId::from("m1"), "amount"))
            .unwrap();
        draft.schema.cubes.push(sales).unwrap();
        draft
            .schema
            .cubes
            .push(Cube::new(EntityId::from("c2"), "Sales"))
            .unwrap();
        draft
            .schema
            .cubes
            .push(Cube::new(EntityId::from("c3"), " "))
            .unwrap();

        let items = validate_draft(&draft);
        assert_eq!(
            codes(&items),
            vec![
                "cube_name_duplicate",
                "cube_measures_empty",
                "cube_name_required",
                "cube_measures_empty"
            ]
        );
        assert_eq!(items[0].entity, Some(EntityId::from("c2")));
    }

    #[test]
    fn test_dimension_and_hierarchy_rules() {
        let mut draft = Draft::default();
        draft
            .schema
            .dimensions
            .push(Dimension::new(EntityId::from("d1"), "Empty"))
            .unwrap();
        let mut time = Dimension::new(EntityId::from("d2"), "Time");
        time.hierarchies
            .push(Hierarchy::new(EntityId::from("h1"), ""))
            .unwrap();
        let mut full = Hierarchy::new(EntityId::from("h2"), "Fiscal");
        full.levels
            .push(Level::new(EntityId::from("l1"), "Year"))
            .unwrap();
        time.hierarchies.push(full).unwrap();
        draft.schema.dimensions.push(time).unwrap();

        let items = validate_draft(&draft);
        assert_eq!(
            codes(&items),
            vec!["dimension_hierarchies_empty", "hierarchy_levels_empty"]
        );
        assert_eq!(items[1].message, "Hierarchy 'Time' of dimension 'Time' has no levels");
    }

    #[test]
    fn test_virtual_cube_and_role_rules() {
        let mut draft = Draft::default();
        let mut virtual_cube = VirtualCube::new(EntityId::from("v1"), "All");
        virtual_cube.cube_usages.push(CubeUsage {
            cube_name: "Missing".into(),
            ignore_unrelated_dimensions: false,
        });
        draft.schema.virtual_cubes.push(virtual_cube).unwrap();
        draft.roles.push(Role::new(EntityId::from("r1"), "")).unwrap();

        let items = validate_draft(&draft);
        assert_eq!(
            codes(&items),
            vec!["virtual_cube_unknown_cube", "role_name_required"]
        );
        assert_eq!(items[0].level, ChecklistLevel::Error);
    }
}
