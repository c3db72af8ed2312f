use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use crate::{
    codec::{CodecError, Redaction},
    models::{Entity, EntityKey, EntityType},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("corrupt storage document: {0}")]
    Corrupt(String),
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Relational,
}

impl BackendKind {
    /// The flat file is the full system of record and keeps every field;
    /// relational read-out hides secrets.
    pub fn redaction(&self) -> Redaction {
        match self {
            BackendKind::File => Redaction::None,
            BackendKind::Relational => Redaction::Secrets,
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::File => f.write_str("file"),
            BackendKind::Relational => f.write_str("db"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "fs" | "json" => Ok(BackendKind::File),
            "db" | "sqlite" | "relational" => Ok(BackendKind::Relational),
            _ => Err(StorageError::UnknownBackend(s.to_string())),
        }
    }
}

pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Loads durable state. Safe to call more than once.
    fn initialize(&self) -> Result<(), StorageError>;

    // Identity map
    fn register(&self, entity: Entity) -> Result<(), StorageError>;
    fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>, StorageError>;
    fn all(&self, entity_type: Option<EntityType>) -> Result<BTreeMap<EntityKey, Entity>, StorageError>;
    fn count(&self, entity_type: Option<EntityType>) -> Result<usize, StorageError>;
    fn delete(&self, key: &EntityKey) -> Result<(), StorageError>;

    /// Makes every pending change durable, all or nothing.
    fn flush(&self) -> Result<(), StorageError>;

    /// Discards changes made since the last flush.
    fn rollback(&self) -> Result<(), StorageError>;

    // Listing <-> Amenity
    fn linked_amenity_ids(&self, listing_id: &str) -> Result<Vec<Arc<str>>, StorageError>;
    /// Returns false when the pair was already linked.
    fn link(&self, listing_id: &str, amenity_id: &str) -> Result<bool, StorageError>;
    /// Returns false when the pair was not linked.
    fn unlink(&self, listing_id: &str, amenity_id: &str) -> Result<bool, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("db".parse::<BackendKind>().unwrap(), BackendKind::Relational);
        assert_eq!(" File ".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!(matches!("mongo".parse::<BackendKind>(), Err(StorageError::UnknownBackend(_))));
    }

    #[test]
    fn test_redaction_depends_on_backend() {
        assert_eq!(BackendKind::File.redaction(), Redaction::None);
        assert_eq!(BackendKind::Relational.redaction(), Redaction::Secrets);
    }
}
