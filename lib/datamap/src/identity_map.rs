use std::cell::RefCell;
use std::collections::HashMap;

use crate::Id;
use crate::entity::EntityRef;

/// Identity map key for an entity type and id, e.g. `User::42`.
pub fn map_id(entity: &str, id: Id) -> String {
    format!("{entity}::{id}")
}

/// One in-memory instance per entity identity for the lifetime of a unit of
/// work.
///
/// There is no eviction: drop the map with the unit of work. Not shareable
/// across threads.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: RefCell<HashMap<String, EntityRef>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, map_id: &str) -> bool {
        self.entries.borrow().contains_key(map_id)
    }

    pub fn get(&self, map_id: &str) -> Option<EntityRef> {
        self.entries.borrow().get(map_id).cloned()
    }

    /// The mapped entity, or `default` when nothing is mapped. `default` is not stored.
    pub fn get_or(&self, map_id: &str, default: EntityRef) -> EntityRef {
        self.get(map_id).unwrap_or(default)
    }

    pub fn set(&self, map_id: impl Into<String>, entity: EntityRef) {
        self.entries.borrow_mut().insert(map_id.into(), entity);
    }

    pub fn remove(&self, map_id: &str) -> Option<EntityRef> {
        self.entries.borrow_mut().remove(map_id)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}
