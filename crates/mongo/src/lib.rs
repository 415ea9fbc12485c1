//! MongoDB storage handler for Strata resources
//!
//! This crate implements the [`Storer`](strata_resource::Storer) contract on
//! top of a MongoDB collection. Each resource is kept in its own collection;
//! items are stored as flat documents with their metadata in reserved fields
//! (`_id`, `_etag`, `_updated`).
//!
//! # Architecture
//!
//! - [`codec`] - Item to document conversion
//! - [`query`] - Predicate compiler and sort/projection/window normalization
//! - [`storage`] - The CRUD operations, with entity-tag guarded writes
//! - [`backend`] - Client configuration and handler creation
//!
//! # Example
//!
//! ```no_run
//! use strata_mongo::{MongoBackend, MongoConfig};
//! use strata_resource::{Context, Query, Storer, Window};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MongoBackend::connect(MongoConfig {
//!     database: "blog".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let users = backend.handler("users");
//! let page = users
//!     .find(&Context::background(), &Query::new().with_window(Window::new(0, 20)))
//!     .await?;
//! println!("{} users", page.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Handlers hold no locks and no per-call state. Conflicting writes are
//! serialized by the entity-tag guard on `update` and `delete`: a write only
//! matches when the stored tag is still the one the caller read, otherwise
//! the caller gets a conflict and must re-read.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod codec;
mod error;
pub mod query;
pub mod storage;

pub use backend::{MongoBackend, MongoConfig};
pub use storage::MongoHandler;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
