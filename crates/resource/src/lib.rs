//! Strata resource model
//!
//! This crate defines the storage-agnostic vocabulary shared by the Strata
//! resource framework and its storage handlers:
//!
//! - [`item`] - Resource items and result pages
//! - [`query`] - Query descriptors: predicate trees, sort, projection, windows
//! - [`context`] - Cancellable, deadline-bearing execution contexts
//! - [`error`] - The error vocabulary storage handlers report in
//! - [`storage`] - The [`Storer`] trait storage handlers implement
//!
//! Storage handlers live in their own crates (for example `strata-mongo`) and
//! translate these types into their native representation.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod context;
pub mod error;
pub mod item;
pub mod query;
pub mod storage;

// Re-export commonly used types at crate root
pub use context::{CancelHandle, Context};
pub use error::{BackendError, ClearError, ContextError, StorageError, StorageResult};
pub use item::{ID_FIELD, Item, ItemList};
pub use query::{Expression, Predicate, Query, SortField, Window};
pub use storage::{Reducer, Storer};
