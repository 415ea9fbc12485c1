//! Predicate tree to MongoDB filter compiler.
//!
//! Translation is an explicit allow-list: every [`Expression`] variant with a
//! MongoDB counterpart is mapped, anything else fails with
//! [`StorageError::NotImplemented`] and no partial filter is produced.

use bson::{Bson, Document, doc};
use strata_resource::item::ID_FIELD;
use strata_resource::query::{Expression, Predicate};
use strata_resource::{StorageError, StorageResult};

use crate::codec::{self, ID};

/// Maps a framework field name onto its stored name.
///
/// The framework `id` is the `_id` primary key; every other name is kept.
pub fn field_name(name: &str) -> &str {
    if name == ID_FIELD { ID } else { name }
}

/// Compiles a predicate into a filter document.
///
/// An empty predicate yields an empty filter, matching every document.
pub fn translate_predicate(predicate: &Predicate) -> StorageResult<Document> {
    let mut filter = Document::new();
    for expression in predicate {
        translate_expression(expression, &mut filter)?;
    }
    Ok(filter)
}

/// Adds the clause for `expression` to `filter`.
fn translate_expression(expression: &Expression, filter: &mut Document) -> StorageResult<()> {
    match expression {
        Expression::And(expressions) => {
            filter.insert("$and", translate_list(expressions)?);
        }
        Expression::Or(expressions) => {
            filter.insert("$or", translate_list(expressions)?);
        }
        Expression::Group(predicate) => {
            for expression in predicate {
                translate_expression(expression, filter)?;
            }
        }
        Expression::ElemMatch { field, expressions } => {
            let mut inner = Document::new();
            for expression in expressions {
                translate_expression(expression, &mut inner)?;
            }
            filter.insert(field_name(field), doc! { "$elemMatch": inner });
        }
        Expression::In { field, values } => {
            filter.insert(field_name(field), doc! { "$in": to_bson_array(values)? });
        }
        Expression::NotIn { field, values } => {
            filter.insert(field_name(field), doc! { "$nin": to_bson_array(values)? });
        }
        Expression::Exist { field } => {
            filter.insert(field_name(field), doc! { "$exists": true });
        }
        Expression::NotExist { field } => {
            filter.insert(field_name(field), doc! { "$exists": false });
        }
        Expression::Equal { field, value } => {
            filter.insert(field_name(field), codec::to_bson(value)?);
        }
        Expression::NotEqual { field, value } => {
            filter.insert(field_name(field), doc! { "$ne": codec::to_bson(value)? });
        }
        Expression::GreaterThan { field, value } => {
            filter.insert(field_name(field), doc! { "$gt": codec::to_bson(value)? });
        }
        Expression::GreaterOrEqual { field, value } => {
            filter.insert(field_name(field), doc! { "$gte": codec::to_bson(value)? });
        }
        Expression::LowerThan { field, value } => {
            filter.insert(field_name(field), doc! { "$lt": codec::to_bson(value)? });
        }
        Expression::LowerOrEqual { field, value } => {
            filter.insert(field_name(field), doc! { "$lte": codec::to_bson(value)? });
        }
        Expression::Regex {
            field,
            pattern,
            negated,
        } => {
            let clause = if *negated {
                // $not only accepts a regex object, not a $regex operator.
                doc! {
                    "$not": Bson::RegularExpression(bson::Regex {
                        pattern: pattern.as_str().to_string(),
                        options: String::new(),
                    })
                }
            } else {
                doc! { "$regex": pattern.as_str() }
            };
            filter.insert(field_name(field), clause);
        }
        other => {
            tracing::debug!(expression = ?other, "unsupported predicate expression");
            return Err(StorageError::NotImplemented);
        }
    }
    Ok(())
}

/// Compiles each expression into its own filter document.
fn translate_list(expressions: &[Expression]) -> StorageResult<Vec<Document>> {
    expressions
        .iter()
        .map(|expression| {
            let mut filter = Document::new();
            translate_expression(expression, &mut filter)?;
            Ok(filter)
        })
        .collect()
}

fn to_bson_array(values: &[serde_json::Value]) -> StorageResult<Vec<Bson>> {
    values.iter().map(codec::to_bson).collect()
}
