use std::collections::BTreeMap;

use staydb_core::{codec, BackendKind, Entity, EntityKey, EntityType, Record, StorageBackend, StorageError};
use staydb_file::FileStorage;
use staydb_sqlite::SqliteStorage;

use crate::config::StorageConfig;

/// Live view of every entity, backed by the storage chosen at startup.
///
/// Reads reflect registered changes immediately; nothing is durable until
/// [`Registry::flush`] (or [`Registry::save`] / [`Registry::remove`]).
pub struct Registry {
    backend: Box<dyn StorageBackend>,
}

impl Registry {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Opens the configured backend and loads its durable state.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend: Box<dyn StorageBackend> = match config.backend_kind()? {
            BackendKind::File => Box::new(FileStorage::new(&config.file.path)),
            BackendKind::Relational => Box::new(SqliteStorage::new(&config.sqlite.path)?),
        };
        let registry = Self { backend };
        registry.initialize()?;
        tracing::info!(backend = %registry.backend_kind(), "Storage ready");
        Ok(registry)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub(crate) fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    pub fn initialize(&self) -> Result<(), StorageError> {
        self.backend.initialize()
    }

    /// Inserts or replaces the entity under its type and id.
    pub fn register(&self, entity: Entity) -> Result<(), StorageError> {
        self.backend.register(entity)
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>, StorageError> {
        self.backend.get(entity_type, id)
    }

    pub fn all(&self, entity_type: Option<EntityType>) -> Result<BTreeMap<EntityKey, Entity>, StorageError> {
        self.backend.all(entity_type)
    }

    pub fn count(&self, entity_type: Option<EntityType>) -> Result<usize, StorageError> {
        self.backend.count(entity_type)
    }

    /// Removes the entity if present; a missing entity is not an error.
    pub fn delete(&self, entity: &Entity) -> Result<(), StorageError> {
        self.backend.delete(&entity.key())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.backend.flush()
    }

    pub fn rollback(&self) -> Result<(), StorageError> {
        self.backend.rollback()
    }

    /// Stamps `updated_at`, registers the entity and flushes.
    pub fn save(&self, entity: &mut Entity) -> Result<(), StorageError> {
        entity.touch();
        self.register(entity.clone())?;
        self.flush()
    }

    /// Deletes the entity and flushes.
    pub fn remove(&self, entity: &Entity) -> Result<(), StorageError> {
        self.delete(entity)?;
        self.flush()
    }

    /// Encoded form for read-out, with the active backend's redaction.
    pub fn encode(&self, entity: &Entity) -> Record {
        codec::encode(entity, self.backend_kind().redaction())
    }
}
