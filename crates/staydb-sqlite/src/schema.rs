use staydb_core::EntityType;

pub(crate) const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS regions (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        name TEXT NOT NULL,
        extra TEXT NOT NULL DEFAULT '{}',
        CHECK (created_at <= updated_at)
    );

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        email TEXT NOT NULL,
        password TEXT NOT NULL,
        first_name TEXT,
        last_name TEXT,
        extra TEXT NOT NULL DEFAULT '{}',
        CHECK (created_at <= updated_at)
    );

    CREATE TABLE IF NOT EXISTS cities (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        region_id TEXT NOT NULL REFERENCES regions(id),
        name TEXT NOT NULL,
        extra TEXT NOT NULL DEFAULT '{}',
        CHECK (created_at <= updated_at)
    );

    CREATE TABLE IF NOT EXISTS amenities (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        name TEXT NOT NULL,
        extra TEXT NOT NULL DEFAULT '{}',
        CHECK (created_at <= updated_at)
    );

    CREATE TABLE IF NOT EXISTS listings (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        owner_id TEXT NOT NULL REFERENCES users(id),
        city_id TEXT NOT NULL REFERENCES cities(id),
        name TEXT NOT NULL,
        description TEXT,
        number_rooms INTEGER NOT NULL DEFAULT 0,
        number_bathrooms INTEGER NOT NULL DEFAULT 0,
        max_guest INTEGER NOT NULL DEFAULT 0,
        price_by_night INTEGER NOT NULL DEFAULT 0,
        latitude REAL,
        longitude REAL,
        extra TEXT NOT NULL DEFAULT '{}',
        CHECK (created_at <= updated_at)
    );

    CREATE TABLE IF NOT EXISTS reviews (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        listing_id TEXT NOT NULL REFERENCES listings(id),
        user_id TEXT NOT NULL REFERENCES users(id),
        text TEXT NOT NULL,
        extra TEXT NOT NULL DEFAULT '{}',
        CHECK (created_at <= updated_at)
    );

    CREATE TABLE IF NOT EXISTS listing_amenities (
        listing_id TEXT NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
        amenity_id TEXT NOT NULL REFERENCES amenities(id) ON DELETE CASCADE,
        PRIMARY KEY (listing_id, amenity_id)
    );

    CREATE INDEX IF NOT EXISTS idx_cities_region ON cities(region_id);
    CREATE INDEX IF NOT EXISTS idx_listings_city ON listings(city_id);
    CREATE INDEX IF NOT EXISTS idx_listings_owner ON listings(owner_id);
    CREATE INDEX IF NOT EXISTS idx_reviews_listing ON reviews(listing_id);
    CREATE INDEX IF NOT EXISTS idx_listing_amenities_amenity ON listing_amenities(amenity_id);
";

/// Columns shared by every entity table, in row order.
pub(crate) const BASE_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Column holding the JSON object of attributes without a dedicated column.
pub(crate) const EXTRA_COLUMN: &str = "extra";

/// Encoded fields that are never stored on the entity row.
pub(crate) const DERIVED_FIELDS: [&str; 1] = ["amenity_ids"];

pub(crate) fn table_name(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Region => "regions",
        EntityType::User => "users",
        EntityType::City => "cities",
        EntityType::Amenity => "amenities",
        EntityType::Listing => "listings",
        EntityType::Review => "reviews",
    }
}

/// Type-specific columns, in row order after [`BASE_COLUMNS`].
pub(crate) fn columns(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Region | EntityType::Amenity => &["name"],
        EntityType::User => &["email", "password", "first_name", "last_name"],
        EntityType::City => &["region_id", "name"],
        EntityType::Listing => &[
            "owner_id",
            "city_id",
            "name",
            "description",
            "number_rooms",
            "number_bathrooms",
            "max_guest",
            "price_by_night",
            "latitude",
            "longitude",
        ],
        EntityType::Review => &["listing_id", "user_id", "text"],
    }
}

/// Every column of the table, in row order.
pub(crate) fn all_columns(entity_type: EntityType) -> Vec<&'static str> {
    BASE_COLUMNS
        .iter()
        .chain(columns(entity_type))
        .copied()
        .chain(std::iter::once(EXTRA_COLUMN))
        .collect()
}

pub(crate) fn select_sql(entity_type: EntityType) -> String {
    format!(
        "SELECT {} FROM {}",
        all_columns(entity_type).join(", "),
        table_name(entity_type)
    )
}

/// `INSERT .. ON CONFLICT DO UPDATE` keeps the row in place, so rows that
/// reference it (and their cascades) are untouched.
pub(crate) fn upsert_sql(entity_type: EntityType) -> String {
    let cols = all_columns(entity_type);
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
    let updates: Vec<String> = cols
        .iter()
        .skip(1)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
        table_name(entity_type),
        cols.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_shape() {
        let sql = upsert_sql(EntityType::City);
        assert_eq!(
            sql,
            "INSERT INTO cities (id, created_at, updated_at, region_id, name, extra) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT(id) DO UPDATE SET \
             created_at = excluded.created_at, updated_at = excluded.updated_at, \
             region_id = excluded.region_id, name = excluded.name, extra = excluded.extra"
        );
    }

    #[test]
    fn test_every_type_has_a_table() {
        for t in EntityType::ALL {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table_name(t))));
            for column in columns(t) {
                assert!(SCHEMA.contains(&format!("        {} ", column)), "{} lacks {}", t, column);
            }
        }
    }
}
