//! Id-addressed, order-preserving entity collections.
//!
//! [`EntityList`] keeps entities in display/business order while resolving
//! lookups through an id index, so a store bound to `cubes[id]` keeps pointing
//! at the same cube when its siblings are reordered, inserted or removed.
//!
//! On the wire an `EntityList` is a plain JSON array.

use std::fmt;
use std::marker::PhantomData;

use indexmap::IndexMap;
use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::EntityId;

/// An editable entity with a stable identity.
pub trait Entity: Clone {
    fn id(&self) -> &EntityId;

    /// Checks the entity lists nested inside this entity.
    fn check_nested_ids(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Ordered collection of entities indexed by [`EntityId`].
#[derive(Debug, Clone)]
pub struct EntityList<T: Entity> {
    items: IndexMap<EntityId, T>,
}

impl<T: Entity> EntityList<T> {
    pub fn new() -> Self {
        EntityList {
            items: IndexMap::new(),
        }
    }

    /// Builds a list from entities in order, rejecting duplicate ids.
    pub fn from_vec(entities: Vec<T>) -> Result<Self, CoreError> {
        let mut list = EntityList::new();
        for entity in entities {
            list.push(entity)?;
        }
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut T> {
        self.items.get_mut(id)
    }

    /// Display position of the entity with `id`.
    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.items.get_index_of(id)
    }

    pub fn get_index(&self, index: usize) -> Option<&T> {
        self.items.get_index(index).map(|(_, v)| v)
    }

    pub fn first(&self) -> Option<&T> {
        self.get_index(0)
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.items.keys()
    }

    /// Verifies, recursively, that every entity still carries the id it is
    /// indexed under. A whole entity swapped in through `get_mut` or
    /// `iter_mut` can break this.
    pub fn check_ids(&self) -> Result<(), CoreError> {
        for (id, entity) in &self.items {
            if entity.id() != id {
                return Err(CoreError::IdChanged {
                    id: id.clone(),
                    found: entity.id().clone(),
                });
            }
            entity.check_nested_ids()?;
        }
        Ok(())
    }

    /// Appends an entity; fails if its id is already present.
    pub fn push(&mut self, entity: T) -> Result<(), CoreError> {
        let id = entity.id().clone();
        if self.items.contains_key(&id) {
            return Err(CoreError::DuplicateId { id });
        }
        self.items.insert(id, entity);
        Ok(())
    }

    /// Inserts an entity at `index`, shifting later entities down.
    pub fn insert(&mut self, index: usize, entity: T) -> Result<(), CoreError> {
        let len = self.items.len();
        if index > len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }
        let id = entity.id().clone();
        if self.items.contains_key(&id) {
            return Err(CoreError::DuplicateId { id });
        }
        self.items.shift_insert(index, id, entity);
        Ok(())
    }

    /// Replaces the entity with the same id in place, or appends it.
    pub fn upsert(&mut self, entity: T) {
        let id = entity.id().clone();
        match self.items.get_mut(&id) {
            Some(slot) => *slot = entity,
            None => {
                self.items.insert(id, entity);
            }
        }
    }

    /// Removes an entity, preserving the order of the rest.
    pub fn remove(&mut self, id: &EntityId) -> Option<T> {
        self.items.shift_remove(id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.retain(|_, v| keep(v));
    }

    /// Moves the entity at `from` to position `to` (drag-and-drop reorder).
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), CoreError> {
        let len = self.items.len();
        for index in [from, to] {
            if index >= len {
                return Err(CoreError::IndexOutOfRange { index, len });
            }
        }
        self.items.move_index(from, to);
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }
}

impl<T: Entity> Default for EntityList<T> {
    fn default() -> Self {
        EntityList::new()
    }
}

/// Order-sensitive: reordering a collection is an edit.
impl<T: Entity + PartialEq> PartialEq for EntityList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .values()
                .zip(other.items.values())
                .all(|(a, b)| a == b)
    }
}

impl<'a, T: Entity> IntoIterator for &'a EntityList<T> {
    type Item = &'a T;
    type IntoIter = indexmap::map::Values<'a, EntityId, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.values()
    }
}

impl<T: Entity + Serialize> Serialize for EntityList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for entity in self.items.values() {
            seq.serialize_element(entity)?;
        }
        seq.end()
    }
}

impl<'de, T: Entity + Deserialize<'de>> Deserialize<'de> for EntityList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor<T>(PhantomData<T>);

        impl<'de, T: Entity + Deserialize<'de>> Visitor<'de> for ListVisitor<T> {
            type Value = EntityList<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an array of entities with unique ids")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut list = EntityList::new();
                while let Some(entity) = seq.next_element::<T>()? {
                    list.push(entity).map_err(serde::de::Error::custom)?;
                }
                Ok(list)
            }
        }

        deserializer.deserialize_seq(ListVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Level;

    fn level(id: &str) -> Level {
        Level::new(EntityId::from(id), id)
    }

    fn ids(list: &EntityList<Level>) -> Vec<&str> {
        list.ids().map(|id| id.as_str()).collect()
    }

    #[test]
    fn lookup_survives_reordering() {
        let mut list = EntityList::from_vec(vec![level("a"), level("b"), level("c")]).unwrap();
        list.move_item(0, 2).unwrap();
        assert_eq!(ids(&list), vec!["b", "c", "a"]);
        assert_eq!(list.get(&EntityId::from("a")).unwrap().name, "a");
        assert_eq!(list.position(&EntityId::from("a")), Some(2));
    }

    #[test]
    fn push_rejects_duplicate_ids() {
        let mut list = EntityList::new();
        list.push(level("a")).unwrap();
        let err = list.push(level("a")).unwrap_err();
        assert_eq!(
            err,
            CoreError::DuplicateId {
                id: EntityId::from("a")
            }
        );
    }

    #[test]
    fn insert_and_remove_preserve_order() {
        let mut list = EntityList::from_vec(vec![level("a"), level("c")]).unwrap();
        list.insert(1, level("b")).unwrap();
        assert_eq!(ids(&list), vec!["a", "b", "c"]);
        list.remove(&EntityId::from("a"));
        assert_eq!(ids(&list), vec!["b", "c"]);
        assert!(list.insert(5, level("z")).is_err());
    }

    #[test]
    fn equality_is_order_sensitive() {
        let a = EntityList::from_vec(vec![level("a"), level("b")]).unwrap();
        let mut b = a.clone();
        assert_eq!(a, b);
        b.move_item(0, 1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_array_and_rejects_duplicates() {
        let list = EntityList::from_vec(vec![level("a"), level("b")]).unwrap();
        let json = serde_json::to_value(&list).unwrap();
        assert!(json.is_array());
        assert_eq!(json[1]["__id__"], "b");

        let back: EntityList<Level> = serde_json::from_value(json).unwrap();
        assert_eq!(back, list);

        let dup = serde_json::json!([{"__id__": "x", "name": "x"}, {"__id__": "x", "name": "y"}]);
        assert!(serde_json::from_value::<EntityList<Level>>(dup).is_err());
    }

    #[test]
    fn check_ids_catches_a_swapped_entity() {
        let mut list = EntityList::from_vec(vec![level("a"), level("b")]).unwrap();
        assert!(list.check_ids().is_ok());

        *list.get_mut(&EntityId::from("a")).unwrap() = level("b");
        assert_eq!(
            list.check_ids().unwrap_err(),
            CoreError::IdChanged {
                id: EntityId::from("a"),
                found: EntityId::from("b"),
            }
        );
    }
}
