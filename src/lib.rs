//! StayDB: interrelated lodging entities behind interchangeable storage
//! backends.
//!
//! The [`Registry`] is the entry point. It owns the backend chosen at
//! startup and exposes identity-map access and persistence. The
//! [`Resolver`] walks relations between entities and maintains the
//! Listing/Amenity link.

pub mod config;
pub mod registry;
pub mod resolver;

pub use registry::Registry;
pub use resolver::{RelationError, Resolver};
pub use staydb_core::*;
