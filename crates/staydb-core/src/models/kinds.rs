use std::sync::Arc;

use crate::codec::{CodecError, FieldReader, FieldWriter};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Region {
    pub name: String,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub(crate) fn write(&self, out: &mut FieldWriter) {
        out.text("name", &self.name);
    }

    pub(crate) fn read(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            name: fields.text("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub email: String,
    /// Secret; dropped from encoded output under relational storage.
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub(crate) fn write(&self, out: &mut FieldWriter) {
        out.text("email", &self.email);
        out.text("password", &self.password);
        out.text("first_name", &self.first_name);
        out.text("last_name", &self.last_name);
    }

    pub(crate) fn read(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            email: fields.text("email")?,
            password: fields.text("password")?,
            first_name: fields.text("first_name")?,
            last_name: fields.text("last_name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct City {
    pub region_id: Arc<str>,
    pub name: String,
}

impl City {
    pub fn new(region_id: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            name: name.into(),
        }
    }

    pub(crate) fn write(&self, out: &mut FieldWriter) {
        out.text("region_id", &self.region_id);
        out.text("name", &self.name);
    }

    pub(crate) fn read(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            region_id: fields.id("region_id")?,
            name: fields.text("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Amenity {
    pub name: String,
}

impl Amenity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub(crate) fn write(&self, out: &mut FieldWriter) {
        out.text("name", &self.name);
    }

    pub(crate) fn read(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            name: fields.text("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub owner_id: Arc<str>,
    pub city_id: Arc<str>,
    pub name: String,
    pub description: String,
    pub number_rooms: i64,
    pub number_bathrooms: i64,
    pub max_guest: i64,
    pub price_by_night: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Linked amenities, in link order, without duplicates.
    pub amenity_ids: Vec<Arc<str>>,
}

impl Listing {
    pub fn new(owner_id: impl Into<Arc<str>>, city_id: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            city_id: city_id.into(),
            name: name.into(),
            description: String::new(),
            number_rooms: 0,
            number_bathrooms: 0,
            max_guest: 0,
            price_by_night: 0,
            latitude: 0.0,
            longitude: 0.0,
            amenity_ids: Vec::new(),
        }
    }

    pub(crate) fn write(&self, out: &mut FieldWriter) {
        out.text("owner_id", &self.owner_id);
        out.text("city_id", &self.city_id);
        out.text("name", &self.name);
        out.text("description", &self.description);
        out.int("number_rooms", self.number_rooms);
        out.int("number_bathrooms", self.number_bathrooms);
        out.int("max_guest", self.max_guest);
        out.int("price_by_night", self.price_by_night);
        out.float("latitude", self.latitude);
        out.float("longitude", self.longitude);
        out.ids("amenity_ids", &self.amenity_ids);
    }

    pub(crate) fn read(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            owner_id: fields.id("owner_id")?,
            city_id: fields.id("city_id")?,
            name: fields.text("name")?,
            description: fields.text("description")?,
            number_rooms: fields.int("number_rooms")?,
            number_bathrooms: fields.int("number_bathrooms")?,
            max_guest: fields.int("max_guest")?,
            price_by_night: fields.int("price_by_night")?,
            latitude: fields.float("latitude")?,
            longitude: fields.float("longitude")?,
            amenity_ids: fields.ids("amenity_ids")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub listing_id: Arc<str>,
    pub user_id: Arc<str>,
    pub text: String,
}

impl Review {
    pub fn new(listing_id: impl Into<Arc<str>>, user_id: impl Into<Arc<str>>, text: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            user_id: user_id.into(),
            text: text.into(),
        }
    }

    pub(crate) fn write(&self, out: &mut FieldWriter) {
        out.text("listing_id", &self.listing_id);
        out.text("user_id", &self.user_id);
        out.text("text", &self.text);
    }

    pub(crate) fn read(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            listing_id: fields.id("listing_id")?,
            user_id: fields.id("user_id")?,
            text: fields.text("text")?,
        })
    }
}
