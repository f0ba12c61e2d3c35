//! Composable optics over the document tree.
//!
//! A [`Lens`] focuses a source value onto one of its sub-trees, both for
//! reading and for in-place writing, and reports the [`Path`] it addresses.
//! Lenses compose with [`Lens::then`]: `draft().then(schema()).then(cube(id))`
//! focuses a [`ModelState`] onto one cube.
//!
//! Collection steps ([`ById`]) resolve through the id index of an
//! [`EntityList`], so a bound lens keeps addressing the same entity when its
//! siblings move. A lens whose id is gone yields `None`; callers surface that
//! as a not-found condition instead of materialising an empty entity.

use std::marker::PhantomData;

use crate::draft::{Draft, ModelState, SemanticModel};
use crate::entity::{Entity, EntityList};
use crate::id::EntityId;
use crate::path::Path;
use crate::schema::{Cube, Dimension, Hierarchy, Level, Role, Schema, VirtualCube};

/// Bidirectional focus from `S` onto a sub-tree of type [`Lens::Target`].
pub trait Lens<S>: Clone + Send + Sync + 'static {
    type Target;

    fn view<'a>(&self, source: &'a S) -> Option<&'a Self::Target>;

    fn view_mut<'a>(&self, source: &'a mut S) -> Option<&'a mut Self::Target>;

    /// Location of the focus relative to `S`.
    fn path(&self) -> Path;

    /// Focuses further into the target with `next`.
    fn then<N>(self, next: N) -> Compose<Self, N>
    where
        Self: Sized,
        N: Lens<Self::Target>,
    {
        Compose {
            outer: self,
            inner: next,
        }
    }
}

/// The whole value.
pub struct Identity<S>(PhantomData<fn() -> S>);

impl<S> Identity<S> {
    pub fn new() -> Self {
        Identity(PhantomData)
    }
}

impl<S> Default for Identity<S> {
    fn default() -> Self {
        Identity::new()
    }
}

impl<S> Clone for Identity<S> {
    fn clone(&self) -> Self {
        Identity::new()
    }
}

impl<S: 'static> Lens<S> for Identity<S> {
    type Target = S;

    fn view<'a>(&self, source: &'a S) -> Option<&'a S> {
        Some(source)
    }

    fn view_mut<'a>(&self, source: &'a mut S) -> Option<&'a mut S> {
        Some(source)
    }

    fn path(&self) -> Path {
        Path::root()
    }
}

/// A plain struct field.
pub struct FieldLens<S, T> {
    name: &'static str,
    get: fn(&S) -> &T,
    get_mut: fn(&mut S) -> &mut T,
}

impl<S, T> FieldLens<S, T> {
    pub const fn new(name: &'static str, get: fn(&S) -> &T, get_mut: fn(&mut S) -> &mut T) -> Self {
        FieldLens { name, get, get_mut }
    }
}

impl<S, T> Clone for FieldLens<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for FieldLens<S, T> {}

impl<S: 'static, T: 'static> Lens<S> for FieldLens<S, T> {
    type Target = T;

    fn view<'a>(&self, source: &'a S) -> Option<&'a T> {
        Some((self.get)(source))
    }

    fn view_mut<'a>(&self, source: &'a mut S) -> Option<&'a mut T> {
        Some((self.get_mut)(source))
    }

    fn path(&self) -> Path {
        Path::root().field(self.name)
    }
}

/// The member of an [`EntityList`] field with a given id.
pub struct ById<S, T: Entity> {
    field: &'static str,
    list: fn(&S) -> &EntityList<T>,
    list_mut: fn(&mut S) -> &mut EntityList<T>,
    id: EntityId,
}

impl<S, T: Entity> ById<S, T> {
    pub fn new(
        field: &'static str,
        list: fn(&S) -> &EntityList<T>,
        list_mut: fn(&mut S) -> &mut EntityList<T>,
        id: EntityId,
    ) -> Self {
        ById {
            field,
            list,
            list_mut,
            id,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }
}

impl<S, T: Entity> Clone for ById<S, T> {
    fn clone(&self) -> Self {
        ById {
            field: self.field,
            list: self.list,
            list_mut: self.list_mut,
            id: self.id.clone(),
        }
    }
}

impl<S: 'static, T: Entity + 'static> Lens<S> for ById<S, T> {
    type Target = T;

    fn view<'a>(&self, source: &'a S) -> Option<&'a T> {
        (self.list)(source).get(&self.id)
    }

    fn view_mut<'a>(&self, source: &'a mut S) -> Option<&'a mut T> {
        (self.list_mut)(source).get_mut(&self.id)
    }

    fn path(&self) -> Path {
        Path::root().field(self.field).id(self.id.clone())
    }
}

/// `outer` followed by `inner`.
#[derive(Clone)]
pub struct Compose<A, B> {
    outer: A,
    inner: B,
}

impl<S, A, B> Lens<S> for Compose<A, B>
where
    A: Lens<S>,
    B: Lens<A::Target>,
{
    type Target = B::Target;

    fn view<'a>(&self, source: &'a S) -> Option<&'a B::Target> {
        self.outer.view(source).and_then(|mid| self.inner.view(mid))
    }

    fn view_mut<'a>(&self, source: &'a mut S) -> Option<&'a mut B::Target> {
        self.outer
            .view_mut(source)
            .and_then(|mid| self.inner.view_mut(mid))
    }

    fn path(&self) -> Path {
        self.outer.path().join(&self.inner.path())
    }
}

// ---------------------------------------------------------------------------
// Document lenses
// ---------------------------------------------------------------------------

pub fn model() -> FieldLens<ModelState, SemanticModel> {
    FieldLens::new("model", |s| &s.model, |s| &mut s.model)
}

pub fn draft() -> FieldLens<ModelState, Draft> {
    FieldLens::new("draft", |s| &s.draft, |s| &mut s.draft)
}

pub fn schema() -> FieldLens<Draft, Schema> {
    FieldLens::new("schema", |d| &d.schema, |d| &mut d.schema)
}

pub fn cube(id: EntityId) -> ById<Schema, Cube> {
    ById::new("cubes", |s| &s.cubes, |s| &mut s.cubes, id)
}

pub fn shared_dimension(id: EntityId) -> ById<Schema, Dimension> {
    ById::new("dimensions", |s| &s.dimensions, |s| &mut s.dimensions, id)
}

pub fn virtual_cube(id: EntityId) -> ById<Schema, VirtualCube> {
    ById::new(
        "virtualCubes",
        |s| &s.virtual_cubes,
        |s| &mut s.virtual_cubes,
        id,
    )
}

pub fn role(key: EntityId) -> ById<Draft, Role> {
    ById::new("roles", |d| &d.roles, |d| &mut d.roles, key)
}

pub fn cube_dimension(id: EntityId) -> ById<Cube, Dimension> {
    ById::new("dimensions", |c| &c.dimensions, |c| &mut c.dimensions, id)
}

pub fn hierarchy(id: EntityId) -> ById<Dimension, Hierarchy> {
    ById::new(
        "hierarchies",
        |d| &d.hierarchies,
        |d| &mut d.hierarchies,
        id,
    )
}

pub fn level(id: EntityId) -> ById<Hierarchy, Level> {
    ById::new("levels", |h| &h.levels, |h| &mut h.levels, id)
}

/// `draft.schema.cubes[id]` from the document root.
pub type CubeLens = Compose<SchemaLens, ById<Schema, Cube>>;
/// `draft.schema.dimensions[id]` from the document root.
pub type DimensionLens = Compose<SchemaLens, ById<Schema, Dimension>>;
/// `draft.schema` from the document root.
pub type SchemaLens = Compose<FieldLens<ModelState, Draft>, FieldLens<Draft, Schema>>;
/// `draft.roles[key]` from the document root.
pub type RoleLens = Compose<FieldLens<ModelState, Draft>, ById<Draft, Role>>;

pub fn cube_at(id: EntityId) -> CubeLens {
    draft().then(schema()).then(cube(id))
}

pub fn dimension_at(id: EntityId) -> DimensionLens {
    draft().then(schema()).then(shared_dimension(id))
}

pub fn role_at(key: EntityId) -> RoleLens {
    draft().then(role(key))
}
