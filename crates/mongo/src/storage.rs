//! `Storer` implementation for MongoDB.
//!
//! Every operation acquires a collection handle, issues its native calls and
//! releases the handle on every exit path. The context is checked before the
//! first call, raced against every round trip, and checked again once results
//! are in. Cancellation observed after a write succeeded is reported as an
//! error even though the write took effect.

use std::future::IntoFuture;
use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mongodb::options::{CountOptions, FindOptions};
use mongodb::{Collection, Cursor, Database};
use strata_resource::context::Context;
use strata_resource::error::{ClearError, ContextError, StorageError, StorageResult};
use strata_resource::item::{Item, ItemList};
use strata_resource::query::{Query, Window};
use strata_resource::storage::{Reducer, Storer};

use crate::codec::{self, ETAG, ID, SYNTHETIC_ETAG_PREFIX};
use crate::error::{driver_error, is_duplicate_key};
use crate::query::{apply_window, find_options, sort_document, translate_predicate};

/// Smallest server-side time budget. `maxTimeMS` is whole milliseconds and
/// the server reads 0 as "no limit".
const MIN_SERVER_TIME: Duration = Duration::from_millis(1);

/// Storage handler for the items of one resource, kept in one collection.
///
/// Created with [`MongoBackend::handler`](crate::MongoBackend::handler) or
/// [`MongoHandler::new`]. Cloning is cheap and clones share the driver's
/// connection pool.
#[derive(Debug, Clone)]
pub struct MongoHandler {
    database: Database,
    collection: String,
}

/// A collection handle scoped to one operation.
struct CollectionGuard {
    collection: Collection<Document>,
}

impl Deref for CollectionGuard {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        tracing::trace!(collection = %self.collection.name(), "released collection handle");
    }
}

impl MongoHandler {
    /// Creates a handler storing items in `collection` of `database`.
    pub fn new(database: Database, collection: impl Into<String>) -> Self {
        Self {
            database,
            collection: collection.into(),
        }
    }

    /// Returns the collection name.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Returns the database name.
    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    fn acquire(&self, ctx: &Context) -> StorageResult<CollectionGuard> {
        ctx.check()?;
        tracing::trace!(collection = %self.collection, "acquired collection handle");
        Ok(CollectionGuard {
            collection: self.database.collection(&self.collection),
        })
    }

    /// Tells a missing document apart from a stale entity tag after a
    /// conditional write matched nothing.
    async fn missing_or_conflict(
        &self,
        ctx: &Context,
        collection: &Collection<Document>,
        id: Bson,
    ) -> StorageError {
        let found = call(
            ctx,
            collection.find_one(doc! { ID: id }).projection(doc! { ID: 1 }),
        )
        .await;
        match found {
            Ok(found) => unmatched_write_error(found.is_some(), ctx.err()),
            Err(err) => err,
        }
    }

    async fn open_cursor(
        &self,
        ctx: &Context,
        collection: &Collection<Document>,
        filter: Document,
        mut options: FindOptions,
    ) -> StorageResult<Cursor<Document>> {
        options.max_time = server_time_limit(ctx);
        tracing::debug!(collection = %self.collection, %filter, "find");
        call(ctx, collection.find(filter).with_options(options)).await
    }

    /// Returns the ids of the documents the window of `query` currently
    /// selects, in query order.
    ///
    /// This is the first half of a windowed [`clear`](Storer::clear); pass
    /// the result to [`delete_ids`](Self::delete_ids) for the second.
    pub async fn select_window(&self, ctx: &Context, query: &Query) -> StorageResult<Vec<Bson>> {
        if query.limit() == Some(0) {
            return Ok(Vec::new());
        }
        let filter = translate_predicate(&query.predicate)?;
        let collection = self.acquire(ctx)?;

        let mut options = FindOptions::default();
        options.sort = Some(sort_document(query));
        options.projection = Some(doc! { ID: 1 });
        apply_window(&mut options, query.window.unwrap_or_default());

        let mut cursor = self.open_cursor(ctx, &collection, filter, options).await?;
        let mut ids = Vec::new();
        while call(ctx, cursor.advance()).await? {
            let mut doc = cursor.deserialize_current().map_err(driver_error)?;
            if let Some(id) = doc.remove(ID) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Deletes exactly the documents with the given ids, returning how many
    /// were removed. Documents already gone are not counted.
    pub async fn delete_ids(&self, ctx: &Context, ids: Vec<Bson>) -> Result<u64, ClearError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let collection = self.acquire(ctx)?;
        self.delete_matching(ctx, &collection, doc! { ID: { "$in": ids } })
            .await
    }

    async fn delete_matching(
        &self,
        ctx: &Context,
        collection: &Collection<Document>,
        filter: Document,
    ) -> Result<u64, ClearError> {
        tracing::debug!(collection = %self.collection, %filter, "delete many");
        let result = call(ctx, collection.delete_many(filter)).await?;
        clear_outcome(result.deleted_count, ctx)
    }
}

#[async_trait]
impl Storer for MongoHandler {
    async fn insert(&self, ctx: &Context, items: &[Item]) -> StorageResult<()> {
        let docs = items
            .iter()
            .map(codec::to_stored)
            .collect::<StorageResult<Vec<_>>>()?;
        let collection = self.acquire(ctx)?;
        if docs.is_empty() {
            return Ok(());
        }

        tracing::debug!(collection = %self.collection, count = docs.len(), "insert");
        match ctx.run(collection.insert_many(docs)).await? {
            Err(err) if is_duplicate_key(&err) => {
                tracing::warn!(collection = %self.collection, "insert rejected: duplicate id");
                Err(StorageError::Conflict)
            }
            result => {
                ctx.check()?;
                result.map(|_| ()).map_err(driver_error)
            }
        }
    }

    async fn update(&self, ctx: &Context, item: &Item, original: &Item) -> StorageResult<()> {
        let replacement = codec::to_stored(item)?;
        let filter = guard_filter(original)?;
        let collection = self.acquire(ctx)?;

        tracing::debug!(collection = %self.collection, %filter, "replace");
        let result = call(ctx, collection.replace_one(filter, replacement)).await?;
        if result.matched_count == 0 {
            let id = codec::to_bson(&original.id)?;
            return Err(self.missing_or_conflict(ctx, &collection, id).await);
        }
        write_outcome(ctx)
    }

    async fn delete(&self, ctx: &Context, item: &Item) -> StorageResult<()> {
        let filter = guard_filter(item)?;
        let collection = self.acquire(ctx)?;

        tracing::debug!(collection = %self.collection, %filter, "delete");
        let result = call(ctx, collection.delete_one(filter)).await?;
        if result.deleted_count == 0 {
            let id = codec::to_bson(&item.id)?;
            return Err(self.missing_or_conflict(ctx, &collection, id).await);
        }
        write_outcome(ctx)
    }

    async fn clear(&self, ctx: &Context, query: &Query) -> Result<u64, ClearError> {
        let Some(window) = query.window else {
            let filter = translate_predicate(&query.predicate)?;
            let collection = self.acquire(ctx)?;
            return self.delete_matching(ctx, &collection, filter).await;
        };
        if window.limit == Some(0) {
            return Ok(0);
        }

        // delete_many takes no skip or limit, so the window is resolved
        // into an id list first. The two round trips are not isolated:
        // documents inserted in between are not removed, and documents
        // removed in between are not counted.
        let ids = self.select_window(ctx, query).await?;
        self.delete_ids(ctx, ids).await
    }

    async fn find(&self, ctx: &Context, query: &Query) -> StorageResult<ItemList> {
        // The driver reads a zero limit as "no limit", so a request for no
        // items is answered with a count instead.
        if query.limit() == Some(0) {
            let total = self.count(ctx, query).await?;
            return Ok(ItemList {
                total: Some(total),
                limit: Some(0),
                items: Vec::new(),
            });
        }

        let filter = translate_predicate(&query.predicate)?;
        let collection = self.acquire(ctx)?;

        let mut cursor = self
            .open_cursor(ctx, &collection, filter, find_options(query))
            .await?;
        let mut list = ItemList::new(query.limit());
        while call(ctx, cursor.advance()).await? {
            let doc = cursor.deserialize_current().map_err(driver_error)?;
            // Returning drops the cursor, which kills it server side.
            ctx.check()?;
            list.items.push(codec::from_stored(doc)?);
        }

        list.total = infer_total(query.window, list.items.len() as u64);
        Ok(list)
    }

    async fn reduce(
        &self,
        ctx: &Context,
        query: &Query,
        reducer: &mut Reducer<'_>,
    ) -> StorageResult<()> {
        if query.limit() == Some(0) {
            return Ok(());
        }

        let filter = translate_predicate(&query.predicate)?;
        let collection = self.acquire(ctx)?;

        let mut cursor = self
            .open_cursor(ctx, &collection, filter, find_options(query))
            .await?;
        while call(ctx, cursor.advance()).await? {
            let doc = cursor.deserialize_current().map_err(driver_error)?;
            ctx.check()?;
            reducer(codec::from_stored(doc)?)?;
        }
        Ok(())
    }

    async fn count(&self, ctx: &Context, query: &Query) -> StorageResult<u64> {
        let filter = translate_predicate(&query.predicate)?;
        let collection = self.acquire(ctx)?;

        let mut options = CountOptions::default();
        options.max_time = server_time_limit(ctx);
        tracing::debug!(collection = %self.collection, %filter, "count");
        call(ctx, collection.count_documents(filter).with_options(options)).await
    }
}

/// Races a driver call against the context.
async fn call<F, T>(ctx: &Context, fut: F) -> StorageResult<T>
where
    F: IntoFuture<Output = mongodb::error::Result<T>>,
{
    ctx.run(fut).await?.map_err(driver_error)
}

/// Time budget forwarded to the server as `maxTimeMS`.
///
/// Rounded up to [`MIN_SERVER_TIME`] so that a nearly expired context never
/// reaches the server as an unbounded query.
pub(crate) fn server_time_limit(ctx: &Context) -> Option<Duration> {
    ctx.remaining().map(|budget| budget.max(MIN_SERVER_TIME))
}

/// Result of a conditional write the server applied. A context that
/// finished meanwhile is still reported.
pub(crate) fn write_outcome(ctx: &Context) -> StorageResult<()> {
    match ctx.err() {
        Some(err) => {
            tracing::warn!(error = %err, "write applied after the context finished");
            Err(err.into())
        }
        None => Ok(()),
    }
}

/// Result of a bulk delete that removed `removed` documents. A context that
/// finished meanwhile is reported together with the count.
pub(crate) fn clear_outcome(removed: u64, ctx: &Context) -> Result<u64, ClearError> {
    match ctx.err() {
        Some(err) => {
            tracing::warn!(removed, error = %err, "clear completed after the context finished");
            Err(ClearError::new(removed, err))
        }
        None => Ok(removed),
    }
}

/// Builds the match filter of a conditional write: the item id, plus its
/// entity tag when one was stored, or the absence of `_etag` when the tag
/// was derived from the id.
pub(crate) fn guard_filter(item: &Item) -> StorageResult<Document> {
    let mut filter = doc! { ID: codec::to_bson(&item.id)? };
    if item.etag.starts_with(SYNTHETIC_ETAG_PREFIX) {
        filter.insert(ETAG, doc! { "$exists": false });
    } else {
        filter.insert(ETAG, item.etag.as_str());
    }
    Ok(filter)
}

/// Error for a conditional write that matched nothing, given whether the id
/// still exists and whether the context is done.
pub(crate) fn unmatched_write_error(exists: bool, ctx_err: Option<ContextError>) -> StorageError {
    if !exists {
        return StorageError::NotFound;
    }
    match ctx_err {
        Some(err) => err.into(),
        None => {
            tracing::warn!("conditional write rejected: entity tag mismatch");
            StorageError::Conflict
        }
    }
}

/// Deduces the total number of matches from a page, when possible.
///
/// The total is known when the result set ran out before the limit. With an
/// offset and an empty page the offset may lie past the end, so the total
/// stays unknown.
pub(crate) fn infer_total(window: Option<Window>, returned: u64) -> Option<u64> {
    let (offset, limit) = window.map_or((0, None), |w| (w.offset, w.limit));
    if limit.is_some_and(|limit| returned >= limit) {
        return None;
    }
    if offset == 0 {
        Some(returned)
    } else if returned > 0 {
        Some(offset + returned)
    } else {
        None
    }
}
