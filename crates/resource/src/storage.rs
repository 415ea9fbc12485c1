//! The storage contract.
//!
//! This module defines the [`Storer`] trait, which a storage handler
//! implements to persist the items of one resource. The framework validates
//! items, computes entity tags and resolves queries before calling in; the
//! handler only maps those onto its database.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{ClearError, StorageResult};
use crate::item::{Item, ItemList};
use crate::query::Query;

/// Callback receiving items one at a time from [`Storer::reduce`].
pub type Reducer<'a> = dyn FnMut(Item) -> StorageResult<()> + Send + 'a;

/// Storage handler for a single resource.
///
/// Every operation takes the caller's [`Context`] first. Handlers hold no
/// per-call state and may be shared between concurrent callers.
///
/// # Optimistic Concurrency
///
/// `update` and `delete` are conditional: they only take effect if the stored
/// item still carries the entity tag of the item the caller last read. A
/// stale tag yields [`StorageError::Conflict`](crate::error::StorageError::Conflict)
/// and the caller is expected to re-read before retrying. Handlers never
/// retry on their own.
///
/// # Example
///
/// ```ignore
/// use strata_resource::{Context, Query, Storer, Window};
///
/// async fn first_page<S: Storer>(storage: &S) -> Result<(), StorageError> {
///     let ctx = Context::background();
///     let page = storage
///         .find(&ctx, &Query::new().with_window(Window::new(0, 20)))
///         .await?;
///     println!("{} items, total {:?}", page.len(), page.total);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Storer: Send + Sync {
    /// Stores new items.
    ///
    /// # Errors
    ///
    /// * `StorageError::Conflict` - If an item id is already taken
    async fn insert(&self, ctx: &Context, items: &[Item]) -> StorageResult<()>;

    /// Replaces `original` with `item`.
    ///
    /// # Errors
    ///
    /// * `StorageError::NotFound` - If no item has the original id
    /// * `StorageError::Conflict` - If the stored entity tag is no longer the original's
    async fn update(&self, ctx: &Context, item: &Item, original: &Item) -> StorageResult<()>;

    /// Deletes `item`.
    ///
    /// # Errors
    ///
    /// Same as [`update`](Self::update).
    async fn delete(&self, ctx: &Context, item: &Item) -> StorageResult<()>;

    /// Deletes every item matching `query`, returning how many were removed.
    ///
    /// On failure the returned [`ClearError`] still reports the number of
    /// items removed before the error occurred.
    async fn clear(&self, ctx: &Context, query: &Query) -> Result<u64, ClearError>;

    /// Returns the page of items matching `query`.
    async fn find(&self, ctx: &Context, query: &Query) -> StorageResult<ItemList>;

    /// Streams the items matching `query` into `reducer`.
    ///
    /// Stops at the first error returned by `reducer`.
    async fn reduce(
        &self,
        ctx: &Context,
        query: &Query,
        reducer: &mut Reducer<'_>,
    ) -> StorageResult<()>;

    /// Counts the items matching the predicate of `query`.
    async fn count(&self, ctx: &Context, query: &Query) -> StorageResult<u64>;
}
