//! Translation of framework queries into MongoDB query fragments.
//!
//! - [`filter`] compiles predicate trees into filter documents
//! - [`shape`] derives sort, projection and skip/limit options

pub mod filter;
pub mod shape;

pub use filter::{field_name, translate_predicate};
pub use shape::{apply_window, find_options, projection_document, sort_document};
