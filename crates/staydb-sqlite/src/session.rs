use std::{collections::BTreeSet, sync::Arc};

use staydb_core::{Entity, EntityKey, EntityType, IdentityMap};

pub(crate) type LinkPair = (Arc<str>, Arc<str>);

/// Changes registered since the last flush. Reads overlay these on top of
/// the committed rows.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub upserts: IdentityMap,
    pub deletes: BTreeSet<EntityKey>,
    /// Pending link rows, in link order.
    pub linked: Vec<LinkPair>,
    pub unlinked: BTreeSet<LinkPair>,
    /// Listings and amenities re-registered after a pending delete. Their
    /// committed link rows are dropped on flush.
    pub purged: BTreeSet<EntityKey>,
}

impl Session {
    pub fn is_clean(&self) -> bool {
        self.upserts.is_empty()
            && self.deletes.is_empty()
            && self.linked.is_empty()
            && self.unlinked.is_empty()
            && self.purged.is_empty()
    }

    pub fn register(&mut self, entity: Entity) {
        let key = entity.key();
        if self.deletes.remove(&key) && matches!(key.entity_type, EntityType::Listing | EntityType::Amenity) {
            self.purged.insert(key);
        }
        self.upserts.register(entity);
    }

    pub fn delete(&mut self, key: &EntityKey) {
        self.upserts.remove(key);
        self.deletes.insert(key.clone());

        // Committed link rows go with the endpoint through ON DELETE CASCADE.
        let endpoint = |pair: &LinkPair| match key.entity_type {
            EntityType::Listing => pair.0 == key.id,
            EntityType::Amenity => pair.1 == key.id,
            _ => false,
        };
        self.linked.retain(|pair| !endpoint(pair));
        self.unlinked.retain(|pair| !endpoint(pair));
    }

    pub fn is_deleted(&self, entity_type: EntityType, id: &str) -> bool {
        self.deletes.contains(&EntityKey::new(entity_type, id))
    }

    pub fn is_purged(&self, entity_type: EntityType, id: &str) -> bool {
        self.purged.contains(&EntityKey::new(entity_type, id))
    }

    /// Applies pending link changes to the committed amenity ids of a listing.
    pub fn overlay_links(&self, listing_id: &str, committed: Vec<Arc<str>>) -> Vec<Arc<str>> {
        if self.is_deleted(EntityType::Listing, listing_id) {
            return Vec::new();
        }

        let mut ids: Vec<Arc<str>> = if self.is_purged(EntityType::Listing, listing_id) {
            Vec::new()
        } else {
            committed
                .into_iter()
                .filter(|amenity_id| {
                    !self.unlinked.contains(&(Arc::from(listing_id), amenity_id.clone()))
                        && !self.is_deleted(EntityType::Amenity, amenity_id)
                        && !self.is_purged(EntityType::Amenity, amenity_id)
                })
                .collect()
        };
        for (l, a) in &self.linked {
            if l.as_ref() == listing_id && !ids.contains(a) {
                ids.push(a.clone());
            }
        }
        ids
    }

    /// Records a link the caller has checked is not already present.
    pub fn link(&mut self, listing_id: &str, amenity_id: &str) {
        let pair: LinkPair = (Arc::from(listing_id), Arc::from(amenity_id));
        // Cancelling a pending unlink restores the committed row.
        if !self.unlinked.remove(&pair) {
            self.linked.push(pair);
        }
    }

    /// Records an unlink the caller has checked is present.
    pub fn unlink(&mut self, listing_id: &str, amenity_id: &str) {
        let pair: LinkPair = (Arc::from(listing_id), Arc::from(amenity_id));
        let before = self.linked.len();
        self.linked.retain(|p| p != &pair);
        if self.linked.len() == before {
            self.unlinked.insert(pair);
        }
    }
}
