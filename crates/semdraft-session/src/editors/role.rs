//! Role editor, bound at `draft.roles[key]`.

use std::sync::Arc;

use semdraft_core::lens::{self, RoleLens};
use semdraft_core::schema::{CubeGrant, SchemaGrant};
use semdraft_core::{CoreError, EntityId, Role};

use crate::editors::{ensure_bound, registry_sink, Binding};
use crate::error::SessionError;
use crate::session::{EditSession, RootStore};
use crate::store::Store;

pub struct RoleEditor {
    session: EditSession,
    binding: Binding<RootStore, RoleLens>,
}

impl RoleEditor {
    pub fn init(session: &EditSession, key: EntityId) -> Result<RoleEditor, SessionError> {
        session.ensure_open()?;
        let binding = Binding::new(
            Arc::clone(session.store()),
            Arc::clone(session.pristine_store()),
            key.clone(),
            lens::role_at(key),
            registry_sink(session.registry()),
        )?;
        Ok(RoleEditor {
            session: session.clone(),
            binding,
        })
    }

    pub fn connect(&self, key: EntityId) -> Result<(), SessionError> {
        ensure_bound(&self.binding)?;
        self.binding.rebind(key.clone(), lens::role_at(key))
    }

    pub fn key(&self) -> EntityId {
        self.binding.id()
    }

    pub fn role(&self) -> Result<Role, SessionError> {
        self.binding.live.get()
    }

    pub fn dirty(&self) -> bool {
        self.binding.dirty()
    }

    fn apply<R>(
        &self,
        f: impl FnOnce(&mut Role) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.session.ensure_open()?;
        ensure_bound(&self.binding)?;
        self.binding.live.update(f)
    }

    pub fn rename(&self, name: impl Into<String>) -> Result<(), SessionError> {
        let name = name.into();
        self.apply(|role| {
            role.name = name;
            Ok(())
        })
    }

    /// Grants access to a cube. One grant per cube.
    pub fn add_cube_grant(&self, grant: CubeGrant) -> Result<(), SessionError> {
        self.apply(|role| {
            let schema_grant = role
                .options
                .schema_grant
                .get_or_insert_with(SchemaGrant::default);
            if schema_grant.cube_grants.iter().any(|g| g.cube == grant.cube) {
                return Err(CoreError::AlreadyExists {
                    kind: "cube grant",
                    name: grant.cube,
                }
                .into());
            }
            schema_grant.cube_grants.push(grant);
            Ok(())
        })
    }

    /// Returns whether a grant for `cube` was removed.
    pub fn remove_cube_grant(&self, cube: &str) -> Result<bool, SessionError> {
        self.apply(|role| {
            let Some(schema_grant) = role.options.schema_grant.as_mut() else {
                return Ok(false);
            };
            let before = schema_grant.cube_grants.len();
            schema_grant.cube_grants.retain(|g| g.cube != cube);
            Ok(schema_grant.cube_grants.len() != before)
        })
    }

    pub fn close(&self) {
        self.binding.close();
    }
}

impl Drop for RoleEditor {
    fn drop(&mut self) {
        self.binding.close();
    }
}
