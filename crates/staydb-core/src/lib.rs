//! Core types and traits for StayDB storage backends.
//!
//! This crate provides the entity model, the serialization codec, the
//! in-process identity map and the `StorageBackend` trait, enabling pluggable
//! storage implementations in separate crates.

pub mod codec;
pub mod identity;
pub mod models;
pub mod storage;
pub mod timestamp;

// Re-export key types at crate root for convenience
pub use codec::{decode, encode, CodecError, Redaction, CLASS_KEY};
pub use identity::IdentityMap;
pub use models::{
    Amenity, City, Entity, EntityData, EntityKey, EntityType, Listing, Record, Region, Review,
    User,
};
pub use storage::{BackendKind, StorageBackend, StorageError};
