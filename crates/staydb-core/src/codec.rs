//! Conversion between entities and their encoded [`Record`] form.
//!
//! Encoded records hold only JSON primitives (plus the `amenity_ids` list),
//! carry the type name under [`CLASS_KEY`] and write timestamps in the
//! canonical form from [`crate::timestamp`].

use std::{collections::BTreeMap, sync::Arc};

use serde_json::{Number, Value};
use thiserror::Error;

use crate::{
    models::{Amenity, City, Entity, EntityData, EntityType, Listing, Record, Region, Review, User},
    timestamp,
};

/// Reserved key holding the type name of an encoded entity.
pub const CLASS_KEY: &str = "__class__";

/// Fields omitted from encoded output when secrets are redacted.
pub const SECRET_FIELDS: &[&str] = &["password"];

/// Keys a bulk update never assigns.
const PROTECTED_KEYS: &[&str] = &["id", "created_at", "updated_at", "amenity_ids", CLASS_KEY];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redaction {
    /// Encode every field.
    None,
    /// Drop [`SECRET_FIELDS`].
    Secrets,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("unknown entity type: {0}")]
    UnknownType(String),
    #[error("invalid entity key: {0}")]
    InvalidKey(String),
    #[error("entity id must be a non-empty string")]
    InvalidId,
    #[error("field `{field}`: expected {expected}, found {found}")]
    InvalidField {
        field: String,
        expected: &'static str,
        found: String,
    },
    #[error("field `{field}`: invalid timestamp `{value}`")]
    InvalidTimestamp { field: String, value: String },
    #[error("updated_at precedes created_at")]
    TimestampOrder,
}

pub fn encode(entity: &Entity, redaction: Redaction) -> Record {
    let mut record = Record::new();
    for (key, value) in &entity.extra {
        record.insert(key.clone(), value.clone());
    }

    let mut out = FieldWriter { record: &mut record };
    out.text("id", &entity.id);
    out.text("created_at", &timestamp::format(entity.created_at));
    out.text("updated_at", &timestamp::format(entity.updated_at));
    match &entity.data {
        EntityData::Region(r) => r.write(&mut out),
        EntityData::User(u) => u.write(&mut out),
        EntityData::City(c) => c.write(&mut out),
        EntityData::Amenity(a) => a.write(&mut out),
        EntityData::Listing(l) => l.write(&mut out),
        EntityData::Review(r) => r.write(&mut out),
    }

    if redaction == Redaction::Secrets {
        for field in SECRET_FIELDS {
            record.remove(*field);
        }
    }
    record.insert(CLASS_KEY.to_string(), Value::String(entity.entity_type().name().to_string()));
    record
}

/// Builds an entity of `entity_type` from `record`.
///
/// A missing id or timestamp is generated, so a bare attribute mapping
/// produces a fresh entity. Keys the type does not define are kept in
/// [`Entity::extra`].
pub fn decode(record: &Record, entity_type: EntityType) -> Result<Entity, CodecError> {
    let mut fields = record.clone();
    fields.remove(CLASS_KEY);

    let id = match fields.remove("id") {
        None | Some(Value::Null) => crate::models::new_id(),
        Some(Value::String(s)) if !s.is_empty() => Arc::from(s),
        Some(_) => return Err(CodecError::InvalidId),
    };

    let created_at = take_timestamp(&mut fields, "created_at")?.unwrap_or_else(timestamp::now);
    let updated_at = take_timestamp(&mut fields, "updated_at")?.unwrap_or(created_at);
    if updated_at < created_at {
        return Err(CodecError::TimestampOrder);
    }

    let mut reader = FieldReader { fields: &mut fields };
    let data = match entity_type {
        EntityType::Region => EntityData::Region(Region::read(&mut reader)?),
        EntityType::User => EntityData::User(User::read(&mut reader)?),
        EntityType::City => EntityData::City(City::read(&mut reader)?),
        EntityType::Amenity => EntityData::Amenity(Amenity::read(&mut reader)?),
        EntityType::Listing => EntityData::Listing(Listing::read(&mut reader)?),
        EntityType::Review => EntityData::Review(Review::read(&mut reader)?),
    };

    Ok(Entity {
        id,
        created_at,
        updated_at,
        data,
        extra: fields.into_iter().collect::<BTreeMap<_, _>>(),
    })
}

pub(crate) fn apply_update(entity: &mut Entity, changes: &Record) -> Result<(), CodecError> {
    let entity_type = entity.entity_type();
    let foreign_keys = entity_type.foreign_keys();

    let mut record = encode(entity, Redaction::None);
    for (key, value) in changes {
        if PROTECTED_KEYS.contains(&key.as_str()) || foreign_keys.contains(&key.as_str()) {
            continue;
        }
        record.insert(key.clone(), value.clone());
    }

    let updated = decode(&record, entity_type)?;
    entity.data = updated.data;
    entity.extra = updated.extra;
    Ok(())
}

fn take_timestamp(fields: &mut Record, field: &str) -> Result<Option<time::OffsetDateTime>, CodecError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => timestamp::parse(&s)
            .map(Some)
            .ok_or(CodecError::InvalidTimestamp {
                field: field.to_string(),
                value: s,
            }),
        Some(other) => Err(invalid(field, "timestamp string", &other)),
    }
}

fn invalid(field: &str, expected: &'static str, found: &Value) -> CodecError {
    CodecError::InvalidField {
        field: field.to_string(),
        expected,
        found: found.to_string(),
    }
}

/// Writes typed fields into a record.
pub(crate) struct FieldWriter<'a> {
    record: &'a mut Record,
}

impl FieldWriter<'_> {
    pub(crate) fn text(&mut self, key: &str, value: &str) {
        self.record.insert(key.to_string(), Value::String(value.to_string()));
    }

    pub(crate) fn int(&mut self, key: &str, value: i64) {
        self.record.insert(key.to_string(), Value::from(value));
    }

    /// Non-finite values have no JSON number form and fall back to text.
    pub(crate) fn float(&mut self, key: &str, value: f64) {
        let encoded = match Number::from_f64(value) {
            Some(n) => Value::Number(n),
            None if value.is_nan() => Value::String("NaN".to_string()),
            None if value > 0.0 => Value::String("inf".to_string()),
            None => Value::String("-inf".to_string()),
        };
        self.record.insert(key.to_string(), encoded);
    }

    pub(crate) fn ids(&mut self, key: &str, ids: &[Arc<str>]) {
        let list = ids.iter().map(|id| Value::String(id.to_string())).collect();
        self.record.insert(key.to_string(), Value::Array(list));
    }
}

/// Takes typed fields out of a record, leaving unknown keys behind.
/// Absent and null fields read as the type's zero value.
pub(crate) struct FieldReader<'a> {
    fields: &'a mut Record,
}

impl FieldReader<'_> {
    pub(crate) fn text(&mut self, key: &str) -> Result<String, CodecError> {
        match self.fields.remove(key) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(invalid(key, "string", &other)),
        }
    }

    pub(crate) fn id(&mut self, key: &str) -> Result<Arc<str>, CodecError> {
        self.text(key).map(Arc::from)
    }

    pub(crate) fn int(&mut self, key: &str) -> Result<i64, CodecError> {
        match self.fields.remove(key) {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => Ok(i),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                    _ => Err(invalid(key, "integer", &Value::Number(n))),
                },
            },
            Some(other) => Err(invalid(key, "integer", &other)),
        }
    }

    pub(crate) fn float(&mut self, key: &str) -> Result<f64, CodecError> {
        match self.fields.remove(key) {
            None | Some(Value::Null) => Ok(0.0),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid(key, "number", &Value::Number(n))),
            Some(Value::String(s)) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                _ => s
                    .parse::<f64>()
                    .map_err(|_| invalid(key, "number", &Value::String(s.clone()))),
            },
            Some(other) => Err(invalid(key, "number", &other)),
        }
    }

    pub(crate) fn ids(&mut self, key: &str) -> Result<Vec<Arc<str>>, CodecError> {
        let items = match self.fields.remove(key) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => return Err(invalid(key, "list of ids", &other)),
        };

        let mut ids: Vec<Arc<str>> = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => {
                    if !ids.iter().any(|id| id.as_ref() == s) {
                        ids.push(Arc::from(s));
                    }
                }
                other => return Err(invalid(key, "list of ids", &other)),
            }
        }
        Ok(ids)
    }
}
