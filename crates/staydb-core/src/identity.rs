use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{Entity, EntityKey, EntityType};

/// In-process identity map: at most one live entity per composite key.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    by_type: BTreeMap<EntityType, BTreeMap<Arc<str>, Entity>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entity`, replacing and returning any entity already held under its key.
    pub fn register(&mut self, entity: Entity) -> Option<Entity> {
        self.by_type
            .entry(entity.entity_type())
            .or_default()
            .insert(entity.id.clone(), entity)
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<&Entity> {
        self.by_type.get(&entity_type)?.get(id)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.get(key.entity_type, &key.id).is_some()
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<Entity> {
        let entities = self.by_type.get_mut(&key.entity_type)?;
        let removed = entities.remove(key.id.as_ref());
        if entities.is_empty() {
            self.by_type.remove(&key.entity_type);
        }
        removed
    }

    /// Entities of one type, or of every type.
    pub fn iter(&self, entity_type: Option<EntityType>) -> impl Iterator<Item = &Entity> + '_ {
        self.by_type
            .iter()
            .filter(move |(t, _)| entity_type.map_or(true, |wanted| **t == wanted))
            .flat_map(|(_, entities)| entities.values())
    }

    pub fn iter_mut(&mut self, entity_type: EntityType) -> impl Iterator<Item = &mut Entity> + '_ {
        self.by_type
            .get_mut(&entity_type)
            .into_iter()
            .flat_map(|entities| entities.values_mut())
    }

    /// Snapshot of the matching entities keyed by composite key.
    pub fn all(&self, entity_type: Option<EntityType>) -> BTreeMap<EntityKey, Entity> {
        self.iter(entity_type)
            .map(|e| (e.key(), e.clone()))
            .collect()
    }

    pub fn count(&self, entity_type: Option<EntityType>) -> usize {
        match entity_type {
            Some(t) => self.by_type.get(&t).map_or(0, BTreeMap::len),
            None => self.by_type.values().map(BTreeMap::len).sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.count(None)
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
    }
}
