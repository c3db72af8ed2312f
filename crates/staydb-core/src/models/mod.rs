use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{codec, timestamp};

mod kinds;

pub use kinds::{Amenity, City, Listing, Region, Review, User};

/// Plain mapping of field name to primitive value, the encoded form of an entity.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Region,
    User,
    City,
    Amenity,
    Listing,
    Review,
}

impl EntityType {
    /// Every type, parents before the types that reference them.
    pub const ALL: [EntityType; 6] = [
        EntityType::Region,
        EntityType::User,
        EntityType::City,
        EntityType::Amenity,
        EntityType::Listing,
        EntityType::Review,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityType::Region => "Region",
            EntityType::User => "User",
            EntityType::City => "City",
            EntityType::Amenity => "Amenity",
            EntityType::Listing => "Listing",
            EntityType::Review => "Review",
        }
    }

    /// Fields holding the id of another entity. These are fixed at creation.
    pub fn foreign_keys(&self) -> &'static [&'static str] {
        match self {
            EntityType::City => &["region_id"],
            EntityType::Listing => &["owner_id", "city_id"],
            EntityType::Review => &["listing_id", "user_id"],
            EntityType::Region | EntityType::User | EntityType::Amenity => &[],
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityType {
    type Err = codec::CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| codec::CodecError::UnknownType(s.to_string()))
    }
}

/// Composite identity of an entity: its type name plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: Arc<str>,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: impl Into<Arc<str>>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity_type, self.id)
    }
}

impl FromStr for EntityKey {
    type Err = codec::CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_name, id) = s
            .split_once('.')
            .ok_or_else(|| codec::CodecError::InvalidKey(s.to_string()))?;
        if id.is_empty() {
            return Err(codec::CodecError::InvalidKey(s.to_string()));
        }
        Ok(EntityKey::new(type_name.parse()?, id))
    }
}

/// Type-specific payload of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Region(Region),
    User(User),
    City(City),
    Amenity(Amenity),
    Listing(Listing),
    Review(Review),
}

impl EntityData {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityData::Region(_) => EntityType::Region,
            EntityData::User(_) => EntityType::User,
            EntityData::City(_) => EntityType::City,
            EntityData::Amenity(_) => EntityType::Amenity,
            EntityData::Listing(_) => EntityType::Listing,
            EntityData::Review(_) => EntityType::Review,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub(crate) id: Arc<str>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub data: EntityData,
    /// Attributes the typed model does not know about, kept verbatim.
    pub extra: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(data: impl Into<EntityData>) -> Self {
        let now = timestamp::now();
        Self {
            id: new_id(),
            created_at: now,
            updated_at: now,
            data: data.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Assigned once at creation; never changes.
    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub fn entity_type(&self) -> EntityType {
        self.data.entity_type()
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type(), self.id.clone())
    }

    /// Marks the entity as modified now.
    pub fn touch(&mut self) {
        self.updated_at = timestamp::now().max(self.created_at);
    }

    /// Id of the `parent_type` entity this entity points at, if it has such a reference.
    pub fn parent_id(&self, parent_type: EntityType) -> Option<&str> {
        let id = match (&self.data, parent_type) {
            (EntityData::City(c), EntityType::Region) => &c.region_id,
            (EntityData::Listing(l), EntityType::City) => &l.city_id,
            (EntityData::Listing(l), EntityType::User) => &l.owner_id,
            (EntityData::Review(r), EntityType::Listing) => &r.listing_id,
            (EntityData::Review(r), EntityType::User) => &r.user_id,
            _ => return None,
        };
        Some(id.as_ref())
    }

    /// Assigns every attribute in `changes` except identity, timestamps and
    /// foreign keys. Unknown attributes land in `extra`.
    pub fn apply_update(&mut self, changes: &Record) -> Result<(), codec::CodecError> {
        codec::apply_update(self, changes)
    }

    pub fn as_listing(&self) -> Option<&Listing> {
        match &self.data {
            EntityData::Listing(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_listing_mut(&mut self) -> Option<&mut Listing> {
        match &mut self.data {
            EntityData::Listing(l) => Some(l),
            _ => None,
        }
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut record = codec::encode(self, codec::Redaction::None);
        record.remove(codec::CLASS_KEY);
        write!(f, "[{}] ({}) {}", self.entity_type(), self.id, Value::Object(record))
    }
}

pub fn new_id() -> Arc<str> {
    Arc::from(Uuid::new_v4().to_string())
}

macro_rules! impl_from_kind {
    ($($kind:ident),*) => {
        $(
            impl From<$kind> for EntityData {
                fn from(value: $kind) -> Self {
                    EntityData::$kind(value)
                }
            }
        )*
    };
}

impl_from_kind!(Region, User, City, Amenity, Listing, Review);
