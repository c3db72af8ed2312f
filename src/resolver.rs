use std::sync::Arc;

use thiserror::Error;

use staydb_core::{Entity, EntityKey, EntityType, StorageError};

use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum RelationError {
    #[error("{0} not found")]
    EntityNotFound(EntityKey),
    #[error("amenity {amenity} is not linked to listing {listing}")]
    RelationNotFound { listing: Arc<str>, amenity: Arc<str> },
    #[error("expected a {expected}, got a {found}")]
    WrongType { expected: EntityType, found: EntityType },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Derived collections and the Listing/Amenity link, the same under every
/// backend.
pub struct Resolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Every `child_type` entity referencing `parent`. Pairs with no such
    /// reference (a Region's reviews, say) yield nothing.
    pub fn children_of(
        &self,
        parent: &Entity,
        child_type: EntityType,
    ) -> Result<impl Iterator<Item = Entity>, StorageError> {
        let parent_type = parent.entity_type();
        let parent_id = parent.id().clone();
        let children = self.registry.all(Some(child_type))?;
        Ok(children
            .into_values()
            .filter(move |child| child.parent_id(parent_type) == Some(parent_id.as_ref())))
    }

    /// Amenities linked to the listing, in link order. Ids that no longer
    /// resolve are skipped.
    pub fn amenities_of(&self, listing: &Entity) -> Result<Vec<Entity>, RelationError> {
        expect_type(listing, EntityType::Listing)?;
        let ids = self.registry.backend().linked_amenity_ids(listing.id())?;

        let mut amenities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(amenity) = self.registry.get(EntityType::Amenity, &id)? {
                amenities.push(amenity);
            }
        }
        Ok(amenities)
    }

    /// Links the amenity to the listing and flushes. Linking an already
    /// linked pair changes nothing. Returns the stored amenity and refreshes
    /// `listing`'s amenity ids.
    pub fn link(&self, listing: &mut Entity, amenity: &Entity) -> Result<Entity, RelationError> {
        let amenity = self.endpoints(listing, amenity)?;

        let created = self.registry.backend().link(listing.id(), amenity.id())?;
        if created {
            self.registry.flush()?;
        }
        tracing::debug!(listing_id = %listing.id(), amenity_id = %amenity.id(), created, "Amenity linked");

        self.refresh_links(listing)?;
        Ok(amenity)
    }

    /// Removes the link and flushes. A pair that was never linked is a
    /// [`RelationError::RelationNotFound`].
    pub fn unlink(&self, listing: &mut Entity, amenity: &Entity) -> Result<(), RelationError> {
        let amenity = self.endpoints(listing, amenity)?;

        if !self.registry.backend().unlink(listing.id(), amenity.id())? {
            return Err(RelationError::RelationNotFound {
                listing: listing.id().clone(),
                amenity: amenity.id().clone(),
            });
        }
        self.registry.flush()?;
        tracing::debug!(listing_id = %listing.id(), amenity_id = %amenity.id(), "Amenity unlinked");

        self.refresh_links(listing)?;
        Ok(())
    }

    /// Checks both ends are of the right type and registered; returns the
    /// stored amenity.
    fn endpoints(&self, listing: &Entity, amenity: &Entity) -> Result<Entity, RelationError> {
        expect_type(listing, EntityType::Listing)?;
        expect_type(amenity, EntityType::Amenity)?;

        if self.registry.get(EntityType::Listing, listing.id())?.is_none() {
            return Err(RelationError::EntityNotFound(listing.key()));
        }
        self.registry
            .get(EntityType::Amenity, amenity.id())?
            .ok_or_else(|| RelationError::EntityNotFound(amenity.key()))
    }

    fn refresh_links(&self, listing: &mut Entity) -> Result<(), StorageError> {
        let ids = self.registry.backend().linked_amenity_ids(listing.id())?;
        if let Some(l) = listing.as_listing_mut() {
            l.amenity_ids = ids;
        }
        Ok(())
    }
}

fn expect_type(entity: &Entity, expected: EntityType) -> Result<(), RelationError> {
    if entity.entity_type() == expected {
        Ok(())
    } else {
        Err(RelationError::WrongType {
            expected,
            found: entity.entity_type(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staydb_core::{Amenity, City, Listing, Region, Review, User};
    use staydb_sqlite::SqliteStorage;

    struct World {
        registry: Registry,
        region: Entity,
        city: Entity,
        owner: Entity,
        listing: Entity,
    }

    fn world() -> World {
        let registry = Registry::new(SqliteStorage::open_in_memory().unwrap());
        registry.initialize().unwrap();

        let mut region = Entity::new(Region::new("California"));
        let mut city = Entity::new(City::new(region.id().clone(), "Fremont"));
        let mut owner = Entity::new(User::new("owner@example.com", "pw"));
        let mut listing = Entity::new(Listing::new(owner.id().clone(), city.id().clone(), "Loft"));
        for e in [&mut region, &mut city, &mut owner, &mut listing] {
            registry.save(e).unwrap();
        }
        World {
            registry,
            region,
            city,
            owner,
            listing,
        }
    }

    #[test]
    fn test_children_follow_foreign_keys() {
        let w = world();
        let resolver = Resolver::new(&w.registry);
        let mut other = Entity::new(City::new(w.region.id().clone(), "Napa"));
        w.registry.save(&mut other).unwrap();

        let cities: Vec<Entity> = resolver.children_of(&w.region, EntityType::City).unwrap().collect();
        assert_eq!(cities.len(), 2);

        let listings: Vec<Entity> = resolver.children_of(&w.owner, EntityType::Listing).unwrap().collect();
        assert_eq!(listings, vec![w.listing.clone()]);
        assert_eq!(resolver.children_of(&other, EntityType::Listing).unwrap().count(), 0);
    }

    #[test]
    fn test_children_of_unrelated_pair_is_empty() {
        let w = world();
        let resolver = Resolver::new(&w.registry);
        let mut review = Entity::new(Review::new(w.listing.id().clone(), w.owner.id().clone(), "Great"));
        w.registry.save(&mut review).unwrap();

        assert_eq!(resolver.children_of(&w.region, EntityType::Review).unwrap().count(), 0);
        assert_eq!(resolver.children_of(&w.city, EntityType::Review).unwrap().count(), 0);
        assert_eq!(resolver.children_of(&w.listing, EntityType::Review).unwrap().count(), 1);
        assert_eq!(resolver.children_of(&w.owner, EntityType::Review).unwrap().count(), 1);
    }

    #[test]
    fn test_link_is_idempotent_and_refreshes_listing() {
        let mut w = world();
        let resolver = Resolver::new(&w.registry);
        let mut wifi = Entity::new(Amenity::new("Wifi"));
        w.registry.save(&mut wifi).unwrap();

        let first = resolver.link(&mut w.listing, &wifi).unwrap();
        let second = resolver.link(&mut w.listing, &wifi).unwrap();
        assert_eq!(first, wifi);
        assert_eq!(second, wifi);
        assert_eq!(w.listing.as_listing().unwrap().amenity_ids, vec![wifi.id().clone()]);
        assert_eq!(resolver.amenities_of(&w.listing).unwrap(), vec![wifi]);
    }

    #[test]
    fn test_unlink_distinguishes_missing_link_from_missing_entity() {
        let mut w = world();
        let resolver = Resolver::new(&w.registry);
        let mut wifi = Entity::new(Amenity::new("Wifi"));
        w.registry.save(&mut wifi).unwrap();

        assert!(matches!(
            resolver.unlink(&mut w.listing, &wifi),
            Err(RelationError::RelationNotFound { .. })
        ));

        let ghost = Entity::new(Amenity::new("Sauna"));
        assert!(matches!(
            resolver.unlink(&mut w.listing, &ghost),
            Err(RelationError::EntityNotFound(key)) if key == ghost.key()
        ));

        resolver.link(&mut w.listing, &wifi).unwrap();
        resolver.unlink(&mut w.listing, &wifi).unwrap();
        assert!(w.listing.as_listing().unwrap().amenity_ids.is_empty());
    }

    #[test]
    fn test_wrong_endpoint_types_are_rejected() {
        let mut w = world();
        let resolver = Resolver::new(&w.registry);
        let mut city = w.city.clone();

        assert!(matches!(
            resolver.link(&mut city, &w.region),
            Err(RelationError::WrongType {
                expected: EntityType::Listing,
                found: EntityType::City
            })
        ));
        assert!(matches!(
            resolver.link(&mut w.listing, &w.region),
            Err(RelationError::WrongType {
                expected: EntityType::Amenity,
                ..
            })
        ));
        assert!(resolver.amenities_of(&w.city).is_err());
    }
}
