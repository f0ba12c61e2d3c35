//! Paths locating a sub-tree inside the document.
//!
//! A path is a sequence of field names and entity ids. Id segments are
//! resolved by identity, never by position, so reordering a collection does
//! not invalidate a path into it.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::EntityId;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// A named field of an object.
    Field(String),
    /// The member of an entity collection with this id.
    Id(EntityId),
}

/// Ordered list of segments, e.g. `draft.schema.cubes[c1].dimensions[d1]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(SmallVec<[Segment; 6]>);

impl Path {
    pub fn root() -> Self {
        Path(SmallVec::new())
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(Segment::Field(name.into()));
        self
    }

    pub fn id(mut self, id: EntityId) -> Self {
        self.0.push(Segment::Id(id));
        self
    }

    /// Concatenates `other` after `self`.
    pub fn join(mut self, other: &Path) -> Self {
        self.0.extend(other.0.iter().cloned());
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` is `other` or lies beneath it.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// The id segment closest to the end, i.e. the entity the path lands in.
    pub fn last_id(&self) -> Option<&EntityId> {
        self.0.iter().rev().find_map(|segment| match segment {
            Segment::Id(id) => Some(id),
            Segment::Field(_) => None,
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Field(name) if i == 0 => write!(f, "{name}")?,
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Id(id) => write!(f, "[{id}]")?,
            }
        }
        Ok(())
    }
}
