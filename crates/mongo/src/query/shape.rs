//! Sort, projection and pagination options.

use std::collections::HashSet;

use bson::{Document, doc};
use mongodb::options::FindOptions;
use strata_resource::item::ID_FIELD;
use strata_resource::query::{Query, STAR_PROJECTION, Window};

use super::filter::field_name;
use crate::codec::{ETAG, ID, UPDATED};

/// Builds the sort document of a query.
///
/// Falls back to `_id` ascending so that pagination stays deterministic.
/// MongoDB rejects duplicate sort keys, so when a field appears more than
/// once only its last occurrence is kept, at that occurrence's position.
pub fn sort_document(query: &Query) -> Document {
    if query.sort.is_empty() {
        return doc! { ID: 1 };
    }

    let mut seen = HashSet::new();
    let mut keys: Vec<(&str, i32)> = query
        .sort
        .iter()
        .rev()
        .map(|sort| {
            let direction = if sort.reversed { -1 } else { 1 };
            (field_name(&sort.name), direction)
        })
        .filter(|(name, _)| seen.insert(*name))
        .collect();
    keys.reverse();

    let mut sort = Document::new();
    for (name, direction) in keys {
        sort.insert(name, direction);
    }
    sort
}

/// Builds the projection document of a query.
///
/// Returns `None` to fetch whole documents, which is the case when no field
/// or the `*` wildcard is requested. Otherwise the metadata fields needed to
/// rebuild an item are always included, and nested paths are widened to
/// their top-level field.
pub fn projection_document(query: &Query) -> Option<Document> {
    if query.projection.is_empty() || query.projection.iter().any(|f| f == STAR_PROJECTION) {
        return None;
    }

    let mut projection = doc! { ID: 1, ETAG: 1, UPDATED: 1 };
    for field in &query.projection {
        if field == ID_FIELD {
            continue;
        }
        let top_level = field.split('.').next().unwrap_or(field);
        projection.insert(field_name(top_level), 1);
    }
    Some(projection)
}

/// Applies a pagination window.
///
/// The driver reads a zero limit as "no limit"; callers must handle
/// `Some(0)` themselves before getting here.
pub fn apply_window(options: &mut FindOptions, window: Window) {
    if window.offset > 0 {
        options.skip = Some(window.offset);
    }
    if let Some(limit) = window.limit {
        options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
    }
}

/// Builds the find options (sort, projection and window) of a query.
pub fn find_options(query: &Query) -> FindOptions {
    let mut options = FindOptions::default();
    options.sort = Some(sort_document(query));
    options.projection = projection_document(query);
    if let Some(window) = query.window {
        apply_window(&mut options, window);
    }
    options
}
