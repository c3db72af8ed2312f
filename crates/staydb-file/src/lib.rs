//! JSON file storage backend for StayDB.
//!
//! The whole identity map lives in memory and is written out as one JSON
//! document mapping `"<Type>.<id>"` to the encoded entity. Writes go to a
//! sibling temporary file that is renamed over the document, so a failed
//! flush never leaves a half-written document behind.

use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::Value;

use staydb_core::{
    codec, BackendKind, Entity, EntityKey, EntityType, IdentityMap, Record, Redaction, StorageBackend,
    StorageError, CLASS_KEY,
};

pub const DEFAULT_PATH: &str = "file.json";

pub struct FileStorage {
    path: PathBuf,
    objects: RwLock<IdentityMap>,
    /// Listings deleted through this handle. Registering one again starts
    /// it without links.
    deleted_listings: Mutex<BTreeSet<Arc<str>>>,
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new(DEFAULT_PATH)
    }
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            objects: RwLock::new(IdentityMap::new()),
            deleted_listings: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<document>.tmp` next to the document.
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IdentityMap>, StorageError> {
        self.objects
            .read()
            .map_err(|_| StorageError::Other("file storage lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IdentityMap>, StorageError> {
        self.objects
            .write()
            .map_err(|_| StorageError::Other("file storage lock poisoned".to_string()))
    }

    fn deleted_listings(&self) -> Result<MutexGuard<'_, BTreeSet<Arc<str>>>, StorageError> {
        self.deleted_listings
            .lock()
            .map_err(|_| StorageError::Other("file storage lock poisoned".to_string()))
    }

    /// Reads the document, returning `None` if it doesn't exist.
    fn read_document(&self) -> Result<Option<Vec<Entity>>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::IOError(e)),
        };

        let document: Record = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", self.path.display(), e)))?;

        let mut entities = Vec::with_capacity(document.len());
        for (raw_key, value) in document {
            entities.push(decode_entry(&raw_key, value)?);
        }
        Ok(Some(entities))
    }

    fn write_document(&self, objects: &IdentityMap) -> Result<(), StorageError> {
        let document: Record = objects
            .iter(None)
            .map(|e| (e.key().to_string(), Value::Object(codec::encode(e, Redaction::None))))
            .collect();
        let bytes = serde_json::to_vec(&document).map_err(|e| StorageError::Other(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.temp_path();
        let written = File::create(&tmp_path).and_then(|mut tmp| {
            tmp.write_all(&bytes)?;
            tmp.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::IOError(e));
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn decode_entry(raw_key: &str, value: Value) -> Result<Entity, StorageError> {
    let key: EntityKey = raw_key
        .parse()
        .map_err(|e| StorageError::Corrupt(format!("key `{}`: {}", raw_key, e)))?;

    let record = match value {
        Value::Object(record) => record,
        other => {
            return Err(StorageError::Corrupt(format!(
                "entry `{}` is not an object: {}",
                raw_key, other
            )))
        }
    };

    match record.get(CLASS_KEY) {
        None => {}
        Some(Value::String(class)) if class == key.entity_type.name() => {}
        Some(other) => {
            return Err(StorageError::Corrupt(format!(
                "entry `{}` is tagged {}",
                raw_key, other
            )))
        }
    }

    let entity = codec::decode(&record, key.entity_type)
        .map_err(|e| StorageError::Corrupt(format!("entry `{}`: {}", raw_key, e)))?;
    if entity.id() != &key.id {
        return Err(StorageError::Corrupt(format!(
            "entry `{}` holds id `{}`",
            raw_key, entity.id()
        )));
    }
    Ok(entity)
}

impl StorageBackend for FileStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn initialize(&self) -> Result<(), StorageError> {
        let entities = match self.read_document()? {
            Some(entities) => entities,
            None => {
                tracing::debug!(path = %self.path.display(), "No storage document, starting empty");
                return Ok(());
            }
        };

        let mut objects = self.write()?;
        let loaded = entities.len();
        for entity in entities {
            objects.register(entity);
        }
        tracing::debug!(path = %self.path.display(), entities = loaded, "Storage document loaded");
        Ok(())
    }

    fn register(&self, mut entity: Entity) -> Result<(), StorageError> {
        let mut objects = self.write()?;
        let id = entity.id().clone();
        if let Some(listing) = entity.as_listing_mut() {
            let stored = objects
                .get(EntityType::Listing, &id)
                .and_then(Entity::as_listing)
                .map(|l| l.amenity_ids.clone());
            let recreated = stored.is_none() && self.deleted_listings()?.remove(&id);
            match stored {
                // Links only change through link/unlink; a stale copy can't restore them.
                Some(ids) => listing.amenity_ids = ids,
                None if recreated => listing.amenity_ids.clear(),
                None => {
                    let mut seen = BTreeSet::new();
                    listing.amenity_ids.retain(|a| seen.insert(a.clone()));
                }
            }
        }
        objects.register(entity);
        Ok(())
    }

    fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>, StorageError> {
        Ok(self.read()?.get(entity_type, id).cloned())
    }

    fn all(&self, entity_type: Option<EntityType>) -> Result<BTreeMap<EntityKey, Entity>, StorageError> {
        Ok(self.read()?.all(entity_type))
    }

    fn count(&self, entity_type: Option<EntityType>) -> Result<usize, StorageError> {
        Ok(self.read()?.count(entity_type))
    }

    fn delete(&self, key: &EntityKey) -> Result<(), StorageError> {
        let mut objects = self.write()?;
        if objects.remove(key).is_none() {
            return Ok(());
        }
        if key.entity_type == EntityType::Listing {
            self.deleted_listings()?.insert(key.id.clone());
        }

        // A deleted amenity must not stay linked from any listing.
        if key.entity_type == EntityType::Amenity {
            for listing in objects.iter_mut(EntityType::Listing) {
                if let Some(l) = listing.as_listing_mut() {
                    l.amenity_ids.retain(|id| id != &key.id);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        let objects = self.read()?;
        self.write_document(&objects)?;
        tracing::debug!(path = %self.path.display(), entities = objects.len(), "Storage document written");
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let entities = self.read_document()?.unwrap_or_default();
        let mut objects = self.write()?;
        objects.clear();
        for entity in entities {
            objects.register(entity);
        }
        tracing::debug!(path = %self.path.display(), "Unflushed changes discarded");
        Ok(())
    }

    fn linked_amenity_ids(&self, listing_id: &str) -> Result<Vec<Arc<str>>, StorageError> {
        let objects = self.read()?;
        Ok(objects
            .get(EntityType::Listing, listing_id)
            .and_then(Entity::as_listing)
            .map(|l| l.amenity_ids.clone())
            .unwrap_or_default())
    }

    fn link(&self, listing_id: &str, amenity_id: &str) -> Result<bool, StorageError> {
        let mut objects = self.write()?;
        let listing = objects
            .iter_mut(EntityType::Listing)
            .find(|l| l.id().as_ref() == listing_id)
            .and_then(Entity::as_listing_mut)
            .ok_or_else(|| StorageError::Other(format!("listing not registered: {}", listing_id)))?;

        if listing.amenity_ids.iter().any(|id| id.as_ref() == amenity_id) {
            return Ok(false);
        }
        listing.amenity_ids.push(Arc::from(amenity_id));
        Ok(true)
    }

    fn unlink(&self, listing_id: &str, amenity_id: &str) -> Result<bool, StorageError> {
        let mut objects = self.write()?;
        let Some(listing) = objects
            .iter_mut(EntityType::Listing)
            .find(|l| l.id().as_ref() == listing_id)
            .and_then(Entity::as_listing_mut)
        else {
            return Ok(false);
        };

        let before = listing.amenity_ids.len();
        listing.amenity_ids.retain(|id| id.as_ref() != amenity_id);
        Ok(listing.amenity_ids.len() != before)
    }
}
