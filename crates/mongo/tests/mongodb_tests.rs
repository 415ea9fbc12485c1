//! MongoDB storage handler integration tests.
//!
//! Run with:
//!   RUN_MONGODB_TESTS=1 cargo test -p strata-mongo --test mongodb_tests

mod common;

use std::time::Duration;

use bson::{Bson, doc};
use regex::Regex;
use serde_json::json;
use strata_resource::{
    Context, ContextError, Expression, Item, Predicate, Query, SortField, StorageError, Storer,
    Window,
};

use common::{create_backend, create_handler, ids, item, items, skip_if_disabled};

fn ctx() -> Context {
    Context::background().with_timeout(Duration::from_secs(30))
}

// ============================================================================
// Insert
// ============================================================================

#[tokio::test]
async fn mongo_insert_and_find() {
    if skip_if_disabled("mongo_insert_and_find") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let inserted = items(3);

    handler.insert(&ctx, &inserted).await.unwrap();

    let list = handler.find(&ctx, &Query::new()).await.unwrap();
    assert_eq!(list.items, inserted);
    assert_eq!(list.total, Some(3));
    assert_eq!(list.limit, None);
}

#[tokio::test]
async fn mongo_insert_duplicate_in_batch_is_conflict() {
    if skip_if_disabled("mongo_insert_duplicate_in_batch_is_conflict") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();

    let err = handler
        .insert(&ctx, &[item("a", "one", 1), item("a", "two", 2)])
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn mongo_insert_existing_id_is_conflict() {
    if skip_if_disabled("mongo_insert_existing_id_is_conflict") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();

    handler.insert(&ctx, &[item("a", "one", 1)]).await.unwrap();
    let err = handler
        .insert(&ctx, &[item("a", "two", 2)])
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn mongo_insert_nothing() {
    if skip_if_disabled("mongo_insert_nothing") {
        return;
    }
    let handler = create_handler().await;
    handler.insert(&ctx(), &[]).await.unwrap();
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn mongo_update_with_current_etag() {
    if skip_if_disabled("mongo_update_with_current_etag") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let original = item("a", "one", 1);
    handler.insert(&ctx, &[original.clone()]).await.unwrap();

    let updated = item("a", "uno", 1);
    handler.update(&ctx, &updated, &original).await.unwrap();

    let list = handler.find(&ctx, &Query::new()).await.unwrap();
    assert_eq!(list.items, vec![updated]);
}

#[tokio::test]
async fn mongo_update_with_stale_etag_is_conflict() {
    if skip_if_disabled("mongo_update_with_stale_etag_is_conflict") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let original = item("a", "one", 1);
    handler.insert(&ctx, &[original.clone()]).await.unwrap();

    let first = item("a", "uno", 1);
    handler.update(&ctx, &first, &original).await.unwrap();

    // A second writer still holding the original loses.
    let second = item("a", "ein", 1);
    let err = handler.update(&ctx, &second, &original).await.unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn mongo_update_missing_is_not_found() {
    if skip_if_disabled("mongo_update_missing_is_not_found") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let original = item("ghost", "one", 1);

    let err = handler
        .update(&ctx, &item("ghost", "two", 2), &original)
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn mongo_update_document_without_stored_etag() {
    if skip_if_disabled("mongo_update_document_without_stored_etag") {
        return;
    }
    let backend = create_backend().await;
    let name = format!("raw_{}", uuid::Uuid::new_v4().simple());
    let handler = backend.handler(name.clone());
    let ctx = ctx();

    // Written by another tool: no _etag, no _updated.
    backend
        .database()
        .collection::<bson::Document>(&name)
        .insert_one(doc! {"_id": "raw", "name": "external"})
        .await
        .unwrap();

    let list = handler.find(&ctx, &Query::new()).await.unwrap();
    let original = list.items[0].clone();
    assert_eq!(original.etag, "p-raw");
    assert_eq!(original.get("id"), Some(&json!("raw")));

    let updated = item("raw", "adopted", 1);
    handler.update(&ctx, &updated, &original).await.unwrap();

    // The document now has a real tag, so the synthetic one is stale.
    let err = handler
        .update(&ctx, &item("raw", "again", 2), &original)
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err:?}");
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn mongo_delete_outcomes() {
    if skip_if_disabled("mongo_delete_outcomes") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let original = item("a", "one", 1);
    handler.insert(&ctx, &[original.clone()]).await.unwrap();

    let stale = original.clone().with_etag("stale");
    let err = handler.delete(&ctx, &stale).await.unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err:?}");

    handler.delete(&ctx, &original).await.unwrap();

    let err = handler.delete(&ctx, &original).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err:?}");
}

// ============================================================================
// Find
// ============================================================================

#[tokio::test]
async fn mongo_find_window_larger_than_results() {
    if skip_if_disabled("mongo_find_window_larger_than_results") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(5)).await.unwrap();

    let query = Query::new().with_window(Window::new(0, 10));
    let list = handler.find(&ctx, &query).await.unwrap();
    assert_eq!(list.len(), 5);
    assert_eq!(list.total, Some(5));
    assert_eq!(list.limit, Some(10));
}

#[tokio::test]
async fn mongo_find_offset_past_end_has_unknown_total() {
    if skip_if_disabled("mongo_find_offset_past_end_has_unknown_total") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(5)).await.unwrap();

    let query = Query::new().with_window(Window::new(10, 10));
    let list = handler.find(&ctx, &query).await.unwrap();
    assert!(list.is_empty());
    assert_eq!(list.total, None);
}

#[tokio::test]
async fn mongo_find_zero_limit_counts() {
    if skip_if_disabled("mongo_find_zero_limit_counts") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(5)).await.unwrap();

    let query = Query::new()
        .with_predicate(Predicate::new(vec![Expression::greater_or_equal(
            "rank",
            json!(2),
        )]))
        .with_window(Window::new(0, 0));
    let list = handler.find(&ctx, &query).await.unwrap();
    assert!(list.is_empty());
    assert_eq!(list.total, Some(3));
    assert_eq!(list.limit, Some(0));
}

#[tokio::test]
async fn mongo_find_full_page_has_unknown_total() {
    if skip_if_disabled("mongo_find_full_page_has_unknown_total") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let inserted = items(5);
    handler.insert(&ctx, &inserted).await.unwrap();

    let query = Query::new().with_window(Window::new(1, 2));
    let list = handler.find(&ctx, &query).await.unwrap();
    assert_eq!(ids(&list.items), ids(&inserted[1..3]));
    assert_eq!(list.total, None);

    let query = Query::new().with_window(Window::new(3, 5));
    let list = handler.find(&ctx, &query).await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list.total, Some(5));
}

#[tokio::test]
async fn mongo_find_sorted() {
    if skip_if_disabled("mongo_find_sorted") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let inserted = items(4);
    handler.insert(&ctx, &inserted).await.unwrap();

    let query = Query::new().with_sort(SortField::parse("-rank"));
    let list = handler.find(&ctx, &query).await.unwrap();
    let mut expected = ids(&inserted);
    expected.reverse();
    assert_eq!(ids(&list.items), expected);
}

#[tokio::test]
async fn mongo_find_with_predicates() {
    if skip_if_disabled("mongo_find_with_predicates") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let inserted = items(5);
    handler.insert(&ctx, &inserted).await.unwrap();

    let find = |expressions: Vec<Expression>| {
        let handler = handler.clone();
        let ctx = ctx.clone();
        async move {
            let query = Query::new().with_predicate(Predicate::new(expressions));
            ids(&handler.find(&ctx, &query).await.unwrap().items)
        }
    };

    assert_eq!(
        find(vec![Expression::equal("id", json!("item-2"))]).await,
        vec![json!("item-2")]
    );
    assert_eq!(
        find(vec![Expression::in_values(
            "name",
            vec![json!("name-1"), json!("name-3")]
        )])
        .await,
        vec![json!("item-1"), json!("item-3")]
    );
    assert_eq!(
        find(vec![Expression::Or(vec![
            Expression::lower_than("rank", json!(1)),
            Expression::greater_than("rank", json!(3)),
        ])])
        .await,
        vec![json!("item-0"), json!("item-4")]
    );
    assert_eq!(
        find(vec![Expression::not_regex(
            "name",
            Regex::new("^name-[0-3]$").unwrap()
        )])
        .await,
        vec![json!("item-4")]
    );
    assert_eq!(find(vec![Expression::not_exist("name")]).await.len(), 0);
}

#[tokio::test]
async fn mongo_find_with_elem_match() {
    if skip_if_disabled("mongo_find_with_elem_match") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let mut a = item("a", "a", 1);
    a.payload
        .insert("tags".to_string(), json!([{"k": "x", "v": 1}, {"k": "y", "v": 5}]));
    let mut b = item("b", "b", 2);
    b.payload
        .insert("tags".to_string(), json!([{"k": "x", "v": 5}, {"k": "y", "v": 1}]));
    handler.insert(&ctx, &[a, b]).await.unwrap();

    let query = Query::new().with_predicate(Predicate::new(vec![Expression::elem_match(
        "tags",
        vec![
            Expression::equal("k", json!("x")),
            Expression::greater_than("v", json!(2)),
        ],
    )]));
    let list = handler.find(&ctx, &query).await.unwrap();
    assert_eq!(ids(&list.items), vec![json!("b")]);
}

#[tokio::test]
async fn mongo_find_with_projection() {
    if skip_if_disabled("mongo_find_with_projection") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let original = item("a", "one", 7);
    handler.insert(&ctx, &[original.clone()]).await.unwrap();

    let query = Query::new().with_projection("name");
    let list = handler.find(&ctx, &query).await.unwrap();
    let found = &list.items[0];
    assert_eq!(found.etag, original.etag);
    assert_eq!(found.get("name"), Some(&json!("one")));
    assert_eq!(found.get("id"), Some(&json!("a")));
    assert_eq!(found.get("rank"), None);
}

#[tokio::test]
async fn mongo_find_unsupported_predicate() {
    if skip_if_disabled("mongo_find_unsupported_predicate") {
        return;
    }
    let handler = create_handler().await;
    let query = Query::new().with_predicate(Predicate::new(vec![Expression::extension(
        "near",
        "loc",
        json!([0, 0]),
    )]));
    let err = handler.find(&ctx(), &query).await.unwrap_err();
    assert!(matches!(err, StorageError::NotImplemented));
}

#[tokio::test]
async fn mongo_find_cancelled_context() {
    if skip_if_disabled("mongo_find_cancelled_context") {
        return;
    }
    let handler = create_handler().await;
    let (ctx, cancel) = ctx().with_cancel();
    cancel.cancel();

    let err = handler.find(&ctx, &Query::new()).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Context(ContextError::Cancelled)
    ));
}

#[tokio::test]
async fn mongo_object_id_items() {
    if skip_if_disabled("mongo_object_id_items") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let oid = bson::oid::ObjectId::new();
    let original = Item::new(json!({"$oid": oid.to_hex()}), serde_json::Map::new());
    handler.insert(&ctx, &[original.clone()]).await.unwrap();

    let query = Query::new().with_predicate(Predicate::new(vec![Expression::equal(
        "id",
        json!({"$oid": oid.to_hex()}),
    )]));
    let list = handler.find(&ctx, &query).await.unwrap();
    assert_eq!(list.items[0].id, original.id);

    handler.delete(&ctx, &list.items[0]).await.unwrap();
}

// ============================================================================
// Reduce
// ============================================================================

#[tokio::test]
async fn mongo_reduce_streams_items() {
    if skip_if_disabled("mongo_reduce_streams_items") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(5)).await.unwrap();

    let mut seen = Vec::new();
    let query = Query::new().with_window(Window::new(1, 3));
    handler
        .reduce(&ctx, &query, &mut |item: Item| {
            seen.push(item.id);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(seen, vec![json!("item-1"), json!("item-2"), json!("item-3")]);
}

#[tokio::test]
async fn mongo_reduce_stops_on_error() {
    if skip_if_disabled("mongo_reduce_stops_on_error") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(5)).await.unwrap();

    let mut calls = 0;
    let err = handler
        .reduce(&ctx, &Query::new(), &mut |_item: Item| {
            calls += 1;
            if calls == 2 {
                Err(StorageError::Conflict)
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(calls, 2);
}

#[tokio::test]
async fn mongo_reduce_zero_limit_is_noop() {
    if skip_if_disabled("mongo_reduce_zero_limit_is_noop") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(2)).await.unwrap();

    let mut calls = 0;
    let query = Query::new().with_window(Window::new(0, 0));
    handler
        .reduce(&ctx, &query, &mut |_item: Item| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(calls, 0);
}

// ============================================================================
// Count and Clear
// ============================================================================

#[tokio::test]
async fn mongo_count() {
    if skip_if_disabled("mongo_count") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(6)).await.unwrap();

    assert_eq!(handler.count(&ctx, &Query::new()).await.unwrap(), 6);
    let query = Query::new()
        .with_predicate(Predicate::new(vec![Expression::lower_than("rank", json!(2))]))
        .with_window(Window::new(0, 1));
    assert_eq!(handler.count(&ctx, &query).await.unwrap(), 2);
}

#[tokio::test]
async fn mongo_clear_with_predicate() {
    if skip_if_disabled("mongo_clear_with_predicate") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(5)).await.unwrap();

    let query = Query::new().with_predicate(Predicate::new(vec![Expression::greater_than(
        "rank",
        json!(2),
    )]));
    assert_eq!(handler.clear(&ctx, &query).await.unwrap(), 2);
    assert_eq!(handler.count(&ctx, &Query::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn mongo_clear_with_window() {
    if skip_if_disabled("mongo_clear_with_window") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    let inserted = items(6);
    handler.insert(&ctx, &inserted).await.unwrap();

    let query = Query::new()
        .with_sort(SortField::desc("rank"))
        .with_window(Window::new(1, 2));
    assert_eq!(handler.clear(&ctx, &query).await.unwrap(), 2);

    // item-4 and item-3 were the second and third by descending rank.
    let left = handler.find(&ctx, &Query::new()).await.unwrap();
    assert_eq!(
        ids(&left.items),
        vec![
            json!("item-0"),
            json!("item-1"),
            json!("item-2"),
            json!("item-5")
        ]
    );
}

#[tokio::test]
async fn mongo_clear_window_ignores_later_inserts() {
    if skip_if_disabled("mongo_clear_window_ignores_later_inserts") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(6)).await.unwrap();

    let query = Query::new()
        .with_sort(SortField::desc("rank"))
        .with_window(Window::new(1, 2));
    let selected = handler.select_window(&ctx, &query).await.unwrap();
    assert_eq!(
        selected,
        vec![Bson::from("item-4"), Bson::from("item-3")]
    );

    // Would now rank first and shift the window, but was not selected.
    handler
        .insert(&ctx, &[item("item-9", "name-9", 9)])
        .await
        .unwrap();

    assert_eq!(handler.delete_ids(&ctx, selected).await.unwrap(), 2);
    let left = handler.find(&ctx, &Query::new()).await.unwrap();
    assert_eq!(
        ids(&left.items),
        vec![
            json!("item-0"),
            json!("item-1"),
            json!("item-2"),
            json!("item-5"),
            json!("item-9")
        ]
    );
}

#[tokio::test]
async fn mongo_clear_window_counts_only_removed() {
    if skip_if_disabled("mongo_clear_window_counts_only_removed") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(4)).await.unwrap();

    let query = Query::new().with_window(Window::new(0, 3));
    let selected = handler.select_window(&ctx, &query).await.unwrap();
    assert_eq!(selected.len(), 3);

    let gone = Query::new().with_predicate(Predicate::new(vec![Expression::equal(
        "id",
        json!("item-1"),
    )]));
    assert_eq!(handler.clear(&ctx, &gone).await.unwrap(), 1);

    assert_eq!(handler.delete_ids(&ctx, selected).await.unwrap(), 2);
    let left = handler.find(&ctx, &Query::new()).await.unwrap();
    assert_eq!(ids(&left.items), vec![json!("item-3")]);
}

#[tokio::test]
async fn mongo_select_window_with_zero_limit_is_empty() {
    if skip_if_disabled("mongo_select_window_with_zero_limit_is_empty") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(3)).await.unwrap();

    let query = Query::new().with_window(Window::new(0, 0));
    assert!(handler.select_window(&ctx, &query).await.unwrap().is_empty());
    assert_eq!(handler.delete_ids(&ctx, Vec::new()).await.unwrap(), 0);
    assert_eq!(handler.count(&ctx, &Query::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn mongo_clear_cancelled_context_removes_nothing() {
    if skip_if_disabled("mongo_clear_cancelled_context_removes_nothing") {
        return;
    }
    let handler = create_handler().await;
    let live = ctx();
    handler.insert(&live, &items(3)).await.unwrap();

    let (cancelled, cancel) = live.clone().with_cancel();
    cancel.cancel();
    let err = handler.clear(&cancelled, &Query::new()).await.unwrap_err();
    assert_eq!(err.removed, 0);
    assert!(matches!(
        err.source,
        StorageError::Context(ContextError::Cancelled)
    ));
    assert_eq!(handler.count(&live, &Query::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn mongo_clear_with_zero_limit_removes_nothing() {
    if skip_if_disabled("mongo_clear_with_zero_limit_removes_nothing") {
        return;
    }
    let handler = create_handler().await;
    let ctx = ctx();
    handler.insert(&ctx, &items(3)).await.unwrap();

    let query = Query::new().with_window(Window::new(0, 0));
    assert_eq!(handler.clear(&ctx, &query).await.unwrap(), 0);
    assert_eq!(handler.count(&ctx, &Query::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn mongo_health_check() {
    if skip_if_disabled("mongo_health_check") {
        return;
    }
    let backend = create_backend().await;
    backend.health_check().await.unwrap();
}
