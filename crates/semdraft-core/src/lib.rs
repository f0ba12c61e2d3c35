//! Identity, addressing and the domain tree of a semantic-model draft.
//!
//! Every editable entity carries a stable [`EntityId`] independent of its
//! mutable name. Collections are [`EntityList`]s: ordered by display order,
//! looked up by id. [`Path`] and [`Lens`] address sub-trees of the document
//! so that derived stores can bind to them.

pub mod draft;
pub mod entity;
pub mod error;
pub mod id;
pub mod lens;
pub mod path;
pub mod schema;

// Re-export commonly used types
pub use draft::{DataSourceRef, Draft, ModelState, SemanticModel, TableEntity};
pub use entity::{Entity, EntityList};
pub use error::CoreError;
pub use id::{EntityId, ModelId};
pub use lens::{Compose, Lens};
pub use path::{Path, Segment};
pub use schema::{
    CalculatedMember, Cube, CubeUsage, Dimension, DimensionUsage, Hierarchy, Level, Measure,
    Role, Schema, Table, VirtualCube,
};
