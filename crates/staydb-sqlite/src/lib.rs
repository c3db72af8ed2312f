//! SQLite storage backend for StayDB.
//!
//! One table per entity type plus the `listing_amenities` join table.
//! Changes are collected in a session and written in a single transaction
//! on flush; reads see committed rows with the session laid over them.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use rusqlite::{
    params, params_from_iter,
    types::{Value as SqlValue, ValueRef},
    Connection, ErrorCode,
};
use serde_json::{Number, Value};

use staydb_core::{
    codec, BackendKind, Entity, EntityKey, EntityType, Record, Redaction, StorageBackend, StorageError,
    CLASS_KEY,
};

mod schema;
mod session;

use schema::{all_columns, select_sql, table_name, upsert_sql, DERIVED_FIELDS, EXTRA_COLUMN, SCHEMA};
use session::Session;

pub const DEFAULT_PATH: &str = "staydb.sqlite";

struct Inner {
    conn: Connection,
    session: Session,
    /// Listings deleted through this handle. Registering one again starts
    /// it without links.
    deleted_listings: BTreeSet<Arc<str>>,
}

pub struct SqliteStorage {
    inner: Mutex<Inner>,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(sql_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(sql_err)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                session: Session::default(),
                deleted_listings: BTreeSet::new(),
            }),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::new(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Other("sqlite storage lock poisoned".to_string()))
    }
}

impl Inner {
    fn committed_rows(&self, entity_type: EntityType, id: Option<&str>) -> Result<Vec<Entity>, StorageError> {
        let columns = all_columns(entity_type);
        let mut sql = select_sql(entity_type);
        if id.is_some() {
            sql.push_str(" WHERE id = ?1");
        }

        let mut stmt = self.conn.prepare_cached(&sql).map_err(sql_err)?;
        let mut rows = match id {
            Some(id) => stmt.query(params![id]),
            None => stmt.query([]),
        }
        .map_err(sql_err)?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().map_err(sql_err)? {
            let mut record = Record::new();
            let mut extra = Record::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(sql_err)?;
                if *column == EXTRA_COLUMN {
                    extra = parse_extra(entity_type, value)?;
                } else {
                    record.insert(column.to_string(), from_sql(value));
                }
            }
            for (key, value) in extra {
                record.entry(key).or_insert(value);
            }
            entities.push(codec::decode(&record, entity_type)?);
        }
        Ok(entities)
    }

    /// Committed link rows grouped by listing, each group in link order.
    fn committed_links(&self, listing_id: Option<&str>) -> Result<BTreeMap<Arc<str>, Vec<Arc<str>>>, StorageError> {
        let mut sql = "SELECT listing_id, amenity_id FROM listing_amenities".to_string();
        if listing_id.is_some() {
            sql.push_str(" WHERE listing_id = ?1");
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = self.conn.prepare_cached(&sql).map_err(sql_err)?;
        let mut rows = match listing_id {
            Some(id) => stmt.query(params![id]),
            None => stmt.query([]),
        }
        .map_err(sql_err)?;

        let mut links: BTreeMap<Arc<str>, Vec<Arc<str>>> = BTreeMap::new();
        while let Some(row) = rows.next().map_err(sql_err)? {
            let listing: String = row.get(0).map_err(sql_err)?;
            let amenity: String = row.get(1).map_err(sql_err)?;
            links.entry(Arc::from(listing)).or_default().push(Arc::from(amenity));
        }
        Ok(links)
    }

    fn linked_amenity_ids(&self, listing_id: &str) -> Result<Vec<Arc<str>>, StorageError> {
        let committed = self
            .committed_links(Some(listing_id))?
            .remove(listing_id)
            .unwrap_or_default();
        Ok(self.session.overlay_links(listing_id, committed))
    }

    fn listing_exists(&self, id: &str) -> Result<bool, StorageError> {
        if self.session.is_deleted(EntityType::Listing, id) {
            return Ok(false);
        }
        if self.session.upserts.get(EntityType::Listing, id).is_some() {
            return Ok(true);
        }
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table_name(EntityType::Listing));
        self.conn
            .query_row(&sql, params![id], |row| row.get(0))
            .map_err(sql_err)
    }

    fn count_rows(&self, entity_type: EntityType) -> Result<usize, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table_name(entity_type));
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(sql_err)?;
        Ok(count as usize)
    }
}

fn sql_err(e: rusqlite::Error) -> StorageError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StorageError::Constraint(e.to_string()),
        _ => StorageError::Other(e.to_string()),
    }
}

fn parse_extra(entity_type: EntityType, value: ValueRef<'_>) -> Result<Record, StorageError> {
    match value {
        ValueRef::Null => Ok(Record::new()),
        ValueRef::Text(text) => serde_json::from_slice(text).map_err(|e| {
            StorageError::Corrupt(format!("{} extra column: {}", table_name(entity_type), e))
        }),
        _ => Err(StorageError::Corrupt(format!(
            "{} extra column is not text",
            table_name(entity_type)
        ))),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn to_sql(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Column values for an upsert, in `all_columns` order. Secrets are stored;
/// redaction only applies to read-out.
fn row_values(entity: &Entity) -> Result<Vec<SqlValue>, StorageError> {
    let mut record = codec::encode(entity, Redaction::None);
    record.remove(CLASS_KEY);
    for field in DERIVED_FIELDS {
        record.remove(field);
    }

    let columns = all_columns(entity.entity_type());
    let mut values = Vec::with_capacity(columns.len());
    for column in &columns {
        if *column != EXTRA_COLUMN {
            values.push(to_sql(record.remove(*column).unwrap_or(Value::Null)));
        }
    }
    // Whatever is left has no column of its own.
    let extra = serde_json::to_string(&record).map_err(|e| StorageError::Other(e.to_string()))?;
    values.push(SqlValue::Text(extra));
    Ok(values)
}

impl StorageBackend for SqliteStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn initialize(&self) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.conn.execute_batch(SCHEMA).map_err(sql_err)?;
        inner.session = Session::default();
        inner.deleted_listings.clear();
        tracing::debug!("SQLite schema ready");
        Ok(())
    }

    fn register(&self, entity: Entity) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        // A listing new to the store brings its amenity ids along. Otherwise
        // links only change through link/unlink.
        let carried = match entity.as_listing() {
            Some(listing)
                if !inner.listing_exists(entity.id())? && !inner.deleted_listings.remove(entity.id()) =>
            {
                listing.amenity_ids.clone()
            }
            _ => Vec::new(),
        };

        let listing_id = entity.id().clone();
        inner.session.register(entity);
        let mut seen = BTreeSet::new();
        for amenity_id in carried {
            if seen.insert(amenity_id.clone()) {
                inner.session.link(&listing_id, &amenity_id);
            }
        }
        Ok(())
    }

    fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>, StorageError> {
        let inner = self.lock()?;
        if inner.session.is_deleted(entity_type, id) {
            return Ok(None);
        }

        let mut entity = match inner.session.upserts.get(entity_type, id) {
            Some(pending) => pending.clone(),
            None => match inner.committed_rows(entity_type, Some(id))?.pop() {
                Some(row) => row,
                None => return Ok(None),
            },
        };
        if let Some(listing) = entity.as_listing_mut() {
            listing.amenity_ids = inner.linked_amenity_ids(id)?;
        }
        Ok(Some(entity))
    }

    fn all(&self, entity_type: Option<EntityType>) -> Result<BTreeMap<EntityKey, Entity>, StorageError> {
        let inner = self.lock()?;
        let types: Vec<EntityType> = match entity_type {
            Some(t) => vec![t],
            None => EntityType::ALL.to_vec(),
        };

        let mut result = BTreeMap::new();
        for t in types {
            for entity in inner.committed_rows(t, None)? {
                if !inner.session.is_deleted(t, entity.id()) {
                    result.insert(entity.key(), entity);
                }
            }
            for pending in inner.session.upserts.iter(Some(t)) {
                result.insert(pending.key(), pending.clone());
            }
        }

        if entity_type.map_or(true, |t| t == EntityType::Listing) {
            let mut links = inner.committed_links(None)?;
            for entity in result.values_mut() {
                let id = entity.id().clone();
                if let Some(listing) = entity.as_listing_mut() {
                    let committed = links.remove(&id).unwrap_or_default();
                    listing.amenity_ids = inner.session.overlay_links(&id, committed);
                }
            }
        }
        Ok(result)
    }

    fn count(&self, entity_type: Option<EntityType>) -> Result<usize, StorageError> {
        {
            let inner = self.lock()?;
            if inner.session.is_clean() {
                return match entity_type {
                    Some(t) => inner.count_rows(t),
                    None => EntityType::ALL.iter().map(|t| inner.count_rows(*t)).sum(),
                };
            }
        }
        Ok(self.all(entity_type)?.len())
    }

    fn delete(&self, key: &EntityKey) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if key.entity_type == EntityType::Listing && inner.listing_exists(&key.id)? {
            inner.deleted_listings.insert(key.id.clone());
        }
        inner.session.delete(key);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if inner.session.is_clean() {
            return Ok(());
        }

        let session = &inner.session;
        let tx = inner.conn.transaction().map_err(sql_err)?;

        for (listing_id, amenity_id) in &session.unlinked {
            tx.execute(
                "DELETE FROM listing_amenities WHERE listing_id = ?1 AND amenity_id = ?2",
                params![listing_id.as_ref(), amenity_id.as_ref()],
            )
            .map_err(sql_err)?;
        }

        for key in &session.purged {
            let column = match key.entity_type {
                EntityType::Listing => "listing_id",
                _ => "amenity_id",
            };
            tx.execute(
                &format!("DELETE FROM listing_amenities WHERE {} = ?1", column),
                params![key.id.as_ref()],
            )
            .map_err(sql_err)?;
        }

        // Dependents go before the rows they reference.
        for t in EntityType::ALL.iter().rev() {
            let sql = format!("DELETE FROM {} WHERE id = ?1", table_name(*t));
            for key in session.deletes.iter().filter(|k| k.entity_type == *t) {
                tx.execute(&sql, params![key.id.as_ref()]).map_err(sql_err)?;
            }
        }

        for t in EntityType::ALL {
            let sql = upsert_sql(t);
            for entity in session.upserts.iter(Some(t)) {
                tx.execute(&sql, params_from_iter(row_values(entity)?))
                    .map_err(sql_err)?;
            }
        }

        for (listing_id, amenity_id) in &session.linked {
            tx.execute(
                "INSERT INTO listing_amenities (listing_id, amenity_id) VALUES (?1, ?2)
                 ON CONFLICT (listing_id, amenity_id) DO NOTHING",
                params![listing_id.as_ref(), amenity_id.as_ref()],
            )
            .map_err(sql_err)?;
        }

        tx.commit().map_err(sql_err)?;
        let upserts = session.upserts.len();
        let deletes = session.deletes.len();
        inner.session = Session::default();
        tracing::debug!(upserts, deletes, "SQLite session flushed");
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        self.lock()?.session = Session::default();
        tracing::debug!("SQLite session discarded");
        Ok(())
    }

    fn linked_amenity_ids(&self, listing_id: &str) -> Result<Vec<Arc<str>>, StorageError> {
        self.lock()?.linked_amenity_ids(listing_id)
    }

    fn link(&self, listing_id: &str, amenity_id: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        if inner
            .linked_amenity_ids(listing_id)?
            .iter()
            .any(|id| id.as_ref() == amenity_id)
        {
            return Ok(false);
        }
        inner.session.link(listing_id, amenity_id);
        Ok(true)
    }

    fn unlink(&self, listing_id: &str, amenity_id: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        if !inner
            .linked_amenity_ids(listing_id)?
            .iter()
            .any(|id| id.as_ref() == amenity_id)
        {
            return Ok(false);
        }
        inner.session.unlink(listing_id, amenity_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staydb_core::{Amenity, City, EntityData, Listing, Region, User};

    fn storage() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.initialize().unwrap();
        storage
    }

    /// Region, city, owner and listing, flushed.
    fn seeded(storage: &SqliteStorage) -> Entity {
        let region = Entity::new(Region::new("California"));
        let city = Entity::new(City::new(region.id().clone(), "Fremont"));
        let owner = Entity::new(User::new("owner@example.com", "pw"));
        let listing = Entity::new(Listing::new(owner.id().clone(), city.id().clone(), "Loft"));
        for e in [region, city, owner, listing.clone()] {
            storage.register(e).unwrap();
        }
        storage.flush().unwrap();
        listing
    }

    #[test]
    fn test_reads_see_unflushed_changes() {
        let storage = storage();
        let region = Entity::new(Region::new("Oregon"));
        storage.register(region.clone()).unwrap();

        assert_eq!(storage.get(EntityType::Region, region.id()).unwrap(), Some(region.clone()));
        assert_eq!(storage.count(Some(EntityType::Region)).unwrap(), 1);

        storage.flush().unwrap();
        assert_eq!(storage.get(EntityType::Region, region.id()).unwrap(), Some(region.clone()));

        storage.delete(&region.key()).unwrap();
        assert!(storage.get(EntityType::Region, region.id()).unwrap().is_none());
        assert_eq!(storage.count(Some(EntityType::Region)).unwrap(), 0);
        assert_eq!(storage.all(None).unwrap().len(), 0);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staydb.sqlite");
        let path = path.to_str().unwrap();

        let mut user = User::new("a@b.io", "hunter2");
        user.last_name = "Lovelace".to_string();
        let mut user = Entity::new(user);
        user.extra.insert("locale".to_string(), Value::from("en-GB"));
        {
            let storage = SqliteStorage::new(path).unwrap();
            storage.initialize().unwrap();
            storage.register(user.clone()).unwrap();
            storage.flush().unwrap();
        }

        let reopened = SqliteStorage::new(path).unwrap();
        reopened.initialize().unwrap();
        // Secrets are stored; only encoded read-out drops them.
        assert_eq!(reopened.get(EntityType::User, user.id()).unwrap(), Some(user));
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let storage = storage();
        let mut region = Entity::new(Region::new("Nevada"));
        storage.register(region.clone()).unwrap();
        storage.flush().unwrap();

        region.data = EntityData::Region(Region::new("Nevada State"));
        region.touch();
        storage.register(region.clone()).unwrap();
        storage.flush().unwrap();

        assert_eq!(storage.count(Some(EntityType::Region)).unwrap(), 1);
        assert_eq!(storage.get(EntityType::Region, region.id()).unwrap(), Some(region));
    }

    #[test]
    fn test_dangling_reference_aborts_whole_flush() {
        let storage = storage();
        let region = Entity::new(Region::new("Texas"));
        let orphan = Entity::new(City::new("no-such-region", "Nowhere"));
        storage.register(region.clone()).unwrap();
        storage.register(orphan).unwrap();

        assert!(matches!(storage.flush(), Err(StorageError::Constraint(_))));
        // Still pending, nothing committed.
        assert_eq!(storage.count(None).unwrap(), 2);
        storage.rollback().unwrap();
        assert_eq!(storage.count(None).unwrap(), 0);
    }

    #[test]
    fn test_deleting_referenced_parent_is_a_constraint_error() {
        let storage = storage();
        seeded(&storage);
        let region = storage.all(Some(EntityType::Region)).unwrap().into_values().next().unwrap();

        storage.delete(&region.key()).unwrap();
        assert!(matches!(storage.flush(), Err(StorageError::Constraint(_))));
    }

    #[test]
    fn test_links_live_in_join_table() {
        let storage = storage();
        let listing = seeded(&storage);
        let wifi = Entity::new(Amenity::new("Wifi"));
        let pool = Entity::new(Amenity::new("Pool"));
        storage.register(wifi.clone()).unwrap();
        storage.register(pool.clone()).unwrap();

        assert!(storage.link(listing.id(), wifi.id()).unwrap());
        assert!(storage.link(listing.id(), pool.id()).unwrap());
        assert!(!storage.link(listing.id(), wifi.id()).unwrap());
        storage.flush().unwrap();

        assert_eq!(
            storage.linked_amenity_ids(listing.id()).unwrap(),
            vec![wifi.id().clone(), pool.id().clone()]
        );
        let stored = storage.get(EntityType::Listing, listing.id()).unwrap().unwrap();
        assert_eq!(stored.as_listing().unwrap().amenity_ids.len(), 2);

        assert!(storage.unlink(listing.id(), wifi.id()).unwrap());
        assert!(!storage.unlink(listing.id(), wifi.id()).unwrap());
        storage.flush().unwrap();
        assert_eq!(storage.linked_amenity_ids(listing.id()).unwrap(), vec![pool.id().clone()]);
    }

    #[test]
    fn test_deleting_endpoint_cascades_links() {
        let storage = storage();
        let listing = seeded(&storage);
        let wifi = Entity::new(Amenity::new("Wifi"));
        storage.register(wifi.clone()).unwrap();
        storage.link(listing.id(), wifi.id()).unwrap();
        storage.flush().unwrap();

        storage.delete(&listing.key()).unwrap();
        storage.flush().unwrap();

        let remaining: i64 = storage
            .lock()
            .unwrap()
            .conn
            .query_row("SELECT COUNT(*) FROM listing_amenities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(storage.get(EntityType::Amenity, wifi.id()).unwrap().is_some());
    }

    #[test]
    fn test_recreated_listing_drops_committed_links() {
        let storage = storage();
        let mut listing = seeded(&storage);
        let wifi = Entity::new(Amenity::new("Wifi"));
        storage.register(wifi.clone()).unwrap();
        storage.link(listing.id(), wifi.id()).unwrap();
        storage.flush().unwrap();

        storage.delete(&listing.key()).unwrap();
        if let Some(l) = listing.as_listing_mut() {
            l.amenity_ids = vec![wifi.id().clone()];
        }
        storage.register(listing.clone()).unwrap();
        assert!(storage.linked_amenity_ids(listing.id()).unwrap().is_empty());

        storage.flush().unwrap();
        assert!(storage.linked_amenity_ids(listing.id()).unwrap().is_empty());
        let remaining: i64 = storage
            .lock()
            .unwrap()
            .conn
            .query_row("SELECT COUNT(*) FROM listing_amenities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_first_registration_carries_links() {
        let storage = storage();
        let existing = seeded(&storage);
        let wifi = Entity::new(Amenity::new("Wifi"));
        let pool = Entity::new(Amenity::new("Pool"));
        storage.register(wifi.clone()).unwrap();
        storage.register(pool.clone()).unwrap();

        let mut listing = Listing::new(
            existing.as_listing().unwrap().owner_id.clone(),
            existing.as_listing().unwrap().city_id.clone(),
            "Cabin",
        );
        listing.amenity_ids = vec![wifi.id().clone(), pool.id().clone(), wifi.id().clone()];
        let mut listing = Entity::new(listing);
        storage.register(listing.clone()).unwrap();
        storage.flush().unwrap();

        let both = vec![wifi.id().clone(), pool.id().clone()];
        assert_eq!(storage.linked_amenity_ids(listing.id()).unwrap(), both);

        // A later copy without links leaves the stored ones alone.
        if let Some(l) = listing.as_listing_mut() {
            l.amenity_ids.clear();
        }
        storage.register(listing.clone()).unwrap();
        storage.flush().unwrap();
        assert_eq!(storage.linked_amenity_ids(listing.id()).unwrap(), both);
    }

    #[test]
    fn test_non_finite_coordinates_survive() {
        let storage = storage();
        let listing = seeded(&storage);
        let mut updated = storage.get(EntityType::Listing, listing.id()).unwrap().unwrap();
        if let Some(l) = updated.as_listing_mut() {
            l.latitude = f64::INFINITY;
            l.longitude = 12.5;
        }
        storage.register(updated).unwrap();
        storage.flush().unwrap();

        let stored = storage.get(EntityType::Listing, listing.id()).unwrap().unwrap();
        let l = stored.as_listing().unwrap();
        assert_eq!(l.latitude, f64::INFINITY);
        assert_eq!(l.longitude, 12.5);
    }
}
