//! Conversion between framework items and stored MongoDB documents.
//!
//! A stored document keeps the item metadata in reserved top-level fields and
//! inlines the payload next to them:
//!
//! ```text
//! { "_id": <id>, "_etag": "<etag>", "_updated": <date>, "name": "...", ... }
//! ```
//!
//! The payload's own `id` key is never persisted; it is put back on the way
//! out. Documents written by other tools may lack `_etag`, in which case an
//! entity tag is derived from the identifier (see [`synthetic_etag`]).

use bson::{Bson, Document};
use serde_json::{Map, Value};
use strata_resource::item::{ID_FIELD, Item};
use strata_resource::StorageResult;

use crate::error::serialization_error;

/// Primary key field.
pub const ID: &str = "_id";
/// Entity tag field.
pub const ETAG: &str = "_etag";
/// Last modification time field.
pub const UPDATED: &str = "_updated";

/// Prefix of entity tags derived from the identifier of a document that
/// has no stored `_etag`.
pub const SYNTHETIC_ETAG_PREFIX: &str = "p-";

const RESERVED_FIELDS: [&str; 3] = [ID, ETAG, UPDATED];

/// The stored form of an [`Item`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    /// Value of `_id`.
    pub id: Bson,
    /// Value of `_etag`, empty when the field is absent.
    pub etag: String,
    /// Value of `_updated`.
    pub updated: bson::DateTime,
    /// Every other top-level field.
    pub payload: Document,
}

impl StoredItem {
    /// Encodes an item. The item is left untouched.
    pub fn from_item(item: &Item) -> StorageResult<Self> {
        let mut payload = Document::new();
        for (key, value) in &item.payload {
            if key == ID_FIELD {
                continue;
            }
            if RESERVED_FIELDS.contains(&key.as_str()) {
                tracing::warn!(field = %key, "dropping payload field shadowing a reserved field");
                continue;
            }
            payload.insert(key.clone(), to_bson(value)?);
        }

        Ok(Self {
            id: to_bson(&item.id)?,
            etag: item.etag.clone(),
            updated: bson::DateTime::from_chrono(item.updated),
            payload,
        })
    }

    /// Splits a raw document into metadata and payload.
    pub fn from_document(mut doc: Document) -> StorageResult<Self> {
        let id = doc
            .remove(ID)
            .ok_or_else(|| serialization_error(format!("stored document has no {} field", ID)))?;

        let etag = match doc.remove(ETAG) {
            None | Some(Bson::Null) => String::new(),
            Some(Bson::String(etag)) => etag,
            Some(other) => {
                return Err(serialization_error(format!(
                    "invalid {} value: {}",
                    ETAG, other
                )));
            }
        };

        let updated = match doc.remove(UPDATED) {
            None | Some(Bson::Null) => bson::DateTime::from_millis(0),
            Some(Bson::DateTime(updated)) => updated,
            Some(other) => {
                return Err(serialization_error(format!(
                    "invalid {} value: {}",
                    UPDATED, other
                )));
            }
        };

        Ok(Self {
            id,
            etag,
            updated,
            payload: doc,
        })
    }

    /// Assembles the document to persist. `_etag` is omitted when empty.
    pub fn into_document(self) -> Document {
        let mut doc = Document::new();
        doc.insert(ID, self.id);
        if !self.etag.is_empty() {
            doc.insert(ETAG, self.etag);
        }
        doc.insert(UPDATED, self.updated);
        for (key, value) in self.payload {
            doc.insert(key, value);
        }
        doc
    }

    /// Decodes into an item, reinjecting the identifier into the payload and
    /// synthesizing an entity tag when none was stored.
    pub fn into_item(self) -> StorageResult<Item> {
        let etag = if self.etag.is_empty() {
            synthetic_etag(&self.id)
        } else {
            self.etag
        };
        let id = self.id.into_relaxed_extjson();

        let mut payload = match Bson::Document(self.payload).into_relaxed_extjson() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.insert(ID_FIELD.to_string(), id.clone());

        Ok(Item {
            id,
            etag,
            updated: self.updated.to_chrono(),
            payload,
        })
    }
}

/// Converts an item into the document to persist.
pub fn to_stored(item: &Item) -> StorageResult<Document> {
    StoredItem::from_item(item).map(StoredItem::into_document)
}

/// Converts a fetched document back into an item.
///
/// The returned item always carries a non-empty entity tag.
pub fn from_stored(doc: Document) -> StorageResult<Item> {
    StoredItem::from_document(doc)?.into_item()
}

/// Entity tag for a document stored without one: the reserved prefix
/// followed by the identifier's hex (object ids) or display form.
pub fn synthetic_etag(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => format!("{}{}", SYNTHETIC_ETAG_PREFIX, oid.to_hex()),
        Bson::String(s) => format!("{}{}", SYNTHETIC_ETAG_PREFIX, s),
        other => format!("{}{}", SYNTHETIC_ETAG_PREFIX, other),
    }
}

/// Converts a framework value into BSON.
///
/// Values are read as relaxed extended JSON, so `{"$oid": "..."}` becomes an
/// object id.
pub fn to_bson(value: &Value) -> StorageResult<Bson> {
    Bson::try_from(value.clone())
        .map_err(|e| serialization_error(format!("cannot convert {} to BSON: {}", value, e)))
}
