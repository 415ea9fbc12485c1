//! Query descriptors.
//!
//! A [`Query`] bundles everything a read, clear or count needs: a
//! [`Predicate`] selecting items, the sort order, the projected fields and an
//! optional pagination [`Window`]. Queries are built fresh per request and are
//! never mutated by storage handlers.
//!
//! ```
//! use serde_json::json;
//! use strata_resource::query::{Expression, Predicate, Query, SortField, Window};
//!
//! let query = Query::new()
//!     .with_predicate(Predicate::new(vec![
//!         Expression::equal("public", json!(true)),
//!         Expression::greater_than("views", json!(100)),
//!     ]))
//!     .with_sort(SortField::parse("-updated"))
//!     .with_window(Window::new(0, 20));
//!
//! assert_eq!(query.sort[0].name, "updated");
//! assert!(query.sort[0].reversed);
//! ```

// Variant fields are described on their variant
#![allow(missing_docs)]

use regex::Regex;
use serde_json::Value;

/// Projection entry selecting every field.
pub const STAR_PROJECTION: &str = "*";

/// A complete query descriptor.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Filter selecting the items.
    pub predicate: Predicate,
    /// Sort order, most significant first.
    pub sort: Vec<SortField>,
    /// Requested field names. Empty means every field.
    pub projection: Vec<String>,
    /// Pagination window, `None` for the whole result set.
    pub window: Option<Window>,
}

impl Query {
    /// Creates a query matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the predicate.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Appends a sort field.
    pub fn with_sort(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    /// Appends a projected field.
    pub fn with_projection(mut self, field: impl Into<String>) -> Self {
        self.projection.push(field.into());
        self
    }

    /// Sets the pagination window.
    pub fn with_window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    /// Returns the window limit, `None` when absent or unlimited.
    pub fn limit(&self) -> Option<u64> {
        self.window.and_then(|w| w.limit)
    }

    /// Returns the window offset, zero when absent.
    pub fn offset(&self) -> u64 {
        self.window.map(|w| w.offset).unwrap_or(0)
    }
}

/// A sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    /// Field name.
    pub name: String,
    /// Descending order when `true`.
    pub reversed: bool,
}

impl SortField {
    /// Ascending sort on `name`.
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reversed: false,
        }
    }

    /// Descending sort on `name`.
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reversed: true,
        }
    }

    /// Parses `name` or `-name`.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('-') {
            Some(name) => Self::desc(name),
            None => Self::asc(s),
        }
    }
}

/// Pagination window.
///
/// `limit: None` returns every item after `offset`. `limit: Some(0)` is a
/// legitimate request for no items at all, typically issued to learn the
/// total count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    /// Number of leading items to skip.
    pub offset: u64,
    /// Maximum number of items to return.
    pub limit: Option<u64>,
}

impl Window {
    /// A window of at most `limit` items starting at `offset`.
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Every item starting at `offset`.
    pub fn unlimited(offset: u64) -> Self {
        Self {
            offset,
            limit: None,
        }
    }
}

/// A list of expressions that must all match.
#[derive(Debug, Clone, Default)]
pub struct Predicate(pub Vec<Expression>);

impl Predicate {
    /// Creates a predicate from its top-level expressions.
    pub fn new(expressions: Vec<Expression>) -> Self {
        Self(expressions)
    }

    /// Returns `true` if the predicate matches everything.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the top-level expressions.
    pub fn iter(&self) -> std::slice::Iter<'_, Expression> {
        self.0.iter()
    }
}

impl From<Vec<Expression>> for Predicate {
    fn from(expressions: Vec<Expression>) -> Self {
        Self(expressions)
    }
}

impl<'a> IntoIterator for &'a Predicate {
    type Item = &'a Expression;
    type IntoIter = std::slice::Iter<'a, Expression>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A node of a predicate tree.
///
/// Leaf nodes bind to exactly one field. Storage handlers translate the
/// variants they understand and reject the rest, so new variants may appear.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Expression {
    /// All sub-expressions must match.
    And(Vec<Expression>),
    /// At least one sub-expression must match.
    Or(Vec<Expression>),
    /// A nested predicate, matching when all of its expressions match.
    Group(Predicate),
    /// All sub-expressions must match within the same element of an array field.
    ElemMatch {
        field: String,
        expressions: Vec<Expression>,
    },
    /// Field value is one of `values`.
    In { field: String, values: Vec<Value> },
    /// Field value is none of `values`.
    NotIn { field: String, values: Vec<Value> },
    /// Field is present.
    Exist { field: String },
    /// Field is absent.
    NotExist { field: String },
    /// Field equals `value`.
    Equal { field: String, value: Value },
    /// Field differs from `value`.
    NotEqual { field: String, value: Value },
    /// Field is greater than `value`.
    GreaterThan { field: String, value: Value },
    /// Field is greater than or equal to `value`.
    GreaterOrEqual { field: String, value: Value },
    /// Field is lower than `value`.
    LowerThan { field: String, value: Value },
    /// Field is lower than or equal to `value`.
    LowerOrEqual { field: String, value: Value },
    /// Field matches (or, when `negated`, does not match) `pattern`.
    Regex {
        field: String,
        pattern: Regex,
        negated: bool,
    },
    /// An operator contributed by a query-language extension.
    ///
    /// Storage handlers that do not know `name` reject the query.
    Extension {
        name: String,
        field: String,
        value: Value,
    },
}

impl Expression {
    /// Builds an [`Expression::Equal`].
    pub fn equal(field: impl Into<String>, value: Value) -> Self {
        Self::Equal {
            field: field.into(),
            value,
        }
    }

    /// Builds an [`Expression::NotEqual`].
    pub fn not_equal(field: impl Into<String>, value: Value) -> Self {
        Self::NotEqual {
            field: field.into(),
            value,
        }
    }

    /// Builds an [`Expression::GreaterThan`].
    pub fn greater_than(field: impl Into<String>, value: Value) -> Self {
        Self::GreaterThan {
            field: field.into(),
            value,
        }
    }

    /// Builds an [`Expression::GreaterOrEqual`].
    pub fn greater_or_equal(field: impl Into<String>, value: Value) -> Self {
        Self::GreaterOrEqual {
            field: field.into(),
            value,
        }
    }

    /// Builds an [`Expression::LowerThan`].
    pub fn lower_than(field: impl Into<String>, value: Value) -> Self {
        Self::LowerThan {
            field: field.into(),
            value,
        }
    }

    /// Builds an [`Expression::LowerOrEqual`].
    pub fn lower_or_equal(field: impl Into<String>, value: Value) -> Self {
        Self::LowerOrEqual {
            field: field.into(),
            value,
        }
    }

    /// Builds an [`Expression::In`].
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Builds an [`Expression::NotIn`].
    pub fn not_in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::NotIn {
            field: field.into(),
            values,
        }
    }

    /// Builds an [`Expression::Exist`].
    pub fn exist(field: impl Into<String>) -> Self {
        Self::Exist {
            field: field.into(),
        }
    }

    /// Builds an [`Expression::NotExist`].
    pub fn not_exist(field: impl Into<String>) -> Self {
        Self::NotExist {
            field: field.into(),
        }
    }

    /// Builds a matching [`Expression::Regex`].
    pub fn regex(field: impl Into<String>, pattern: Regex) -> Self {
        Self::Regex {
            field: field.into(),
            pattern,
            negated: false,
        }
    }

    /// Builds a negated [`Expression::Regex`].
    pub fn not_regex(field: impl Into<String>, pattern: Regex) -> Self {
        Self::Regex {
            field: field.into(),
            pattern,
            negated: true,
        }
    }

    /// Builds an [`Expression::ElemMatch`].
    pub fn elem_match(field: impl Into<String>, expressions: Vec<Expression>) -> Self {
        Self::ElemMatch {
            field: field.into(),
            expressions,
        }
    }

    /// Builds an [`Expression::Extension`].
    pub fn extension(name: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        Self::Extension {
            name: name.into(),
            field: field.into(),
            value,
        }
    }
}
