//! Resource items and result lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The payload key under which an item's identifier is exposed to callers.
pub const ID_FIELD: &str = "id";

/// A resource instance as seen by the framework.
///
/// `payload` holds the resource fields. When an item is read back from
/// storage its identifier is also present in the payload under
/// [`ID_FIELD`]; storage handlers strip it again before persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// The item identifier. Opaque to the framework.
    pub id: Value,
    /// Entity tag used for optimistic concurrency control.
    pub etag: String,
    /// Last modification time.
    pub updated: DateTime<Utc>,
    /// The resource fields.
    pub payload: Map<String, Value>,
}

impl Item {
    /// Creates an item stamped with the current time and a fresh entity tag.
    pub fn new(id: impl Into<Value>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            etag: uuid::Uuid::new_v4().simple().to_string(),
            updated: Utc::now(),
            payload,
        }
    }

    /// Replaces the entity tag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = etag.into();
        self
    }

    /// Replaces the modification time.
    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = updated;
        self
    }

    /// Returns a payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

/// A page of items returned by a find operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemList {
    /// Total number of items matching the query, when known.
    pub total: Option<u64>,
    /// The limit applied to the query, `None` when unlimited.
    pub limit: Option<u64>,
    /// The items on this page.
    pub items: Vec<Item>,
}

impl ItemList {
    /// Creates an empty list for the given limit with an unknown total.
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            total: None,
            limit,
            items: Vec::new(),
        }
    }

    /// Number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the page holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
