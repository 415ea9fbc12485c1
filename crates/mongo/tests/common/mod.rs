//! Shared MongoDB test harness.
//!
//! Tests in this crate run against a real MongoDB started with testcontainers.
//! They require Docker and are skipped unless `RUN_MONGODB_TESTS=1` is set.
//! `MONGODB_TEST_URI` points them at an existing server instead.

#![allow(dead_code)]

use chrono::{SubsecRound, Utc};
use serde_json::{Map, Value, json};
use strata_mongo::{MongoBackend, MongoConfig, MongoHandler};
use strata_resource::Item;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::mongo::Mongo;
use tokio::sync::OnceCell;

/// Shared MongoDB reused across all tests of a test binary.
struct SharedMongo {
    uri: String,
    /// Kept alive for the duration of the test binary; dropped at process exit.
    _container: Option<testcontainers::ContainerAsync<Mongo>>,
}

static SHARED_MONGO: OnceCell<SharedMongo> = OnceCell::const_new();

fn run_mongodb_tests() -> bool {
    std::env::var("RUN_MONGODB_TESTS").ok().as_deref() == Some("1")
}

/// Returns `true` (and says so) when MongoDB tests are disabled.
pub fn skip_if_disabled(test_name: &str) -> bool {
    if run_mongodb_tests() {
        return false;
    }
    eprintln!("skipping MongoDB test {test_name} (set RUN_MONGODB_TESTS=1 to enable)");
    true
}

async fn shared_mongo() -> &'static SharedMongo {
    SHARED_MONGO
        .get_or_init(|| async {
            if let Ok(uri) = std::env::var("MONGODB_TEST_URI") {
                return SharedMongo {
                    uri,
                    _container: None,
                };
            }

            let container = Mongo::default()
                .start()
                .await
                .expect("Failed to start MongoDB container");
            let host = container
                .get_host()
                .await
                .expect("Failed to get host")
                .to_string();
            let port = container
                .get_host_port_ipv4(27017)
                .await
                .expect("Failed to get host port");

            SharedMongo {
                uri: format!("mongodb://{}:{}", host, port),
                _container: Some(container),
            }
        })
        .await
}

/// Creates a handler on a fresh, uniquely named collection.
pub async fn create_handler() -> MongoHandler {
    let mongo = shared_mongo().await;
    let backend = MongoBackend::connect(MongoConfig {
        uri: mongo.uri.clone(),
        database: "strata_test".to_string(),
        ..Default::default()
    })
    .await
    .expect("Failed to create MongoDB backend");
    backend.handler(format!("items_{}", uuid::Uuid::new_v4().simple()))
}

/// Creates a backend connected to the shared server.
pub async fn create_backend() -> MongoBackend {
    let mongo = shared_mongo().await;
    MongoBackend::connect(MongoConfig {
        uri: mongo.uri.clone(),
        database: "strata_test".to_string(),
        ..Default::default()
    })
    .await
    .expect("Failed to create MongoDB backend")
}

/// Builds an item with a `name` and a numeric `rank`.
///
/// The timestamp is truncated to the millisecond precision MongoDB stores.
pub fn item(id: &str, name: &str, rank: i64) -> Item {
    let mut payload = Map::new();
    payload.insert("id".to_string(), json!(id));
    payload.insert("name".to_string(), json!(name));
    payload.insert("rank".to_string(), json!(rank));
    Item::new(id, payload).with_updated(Utc::now().trunc_subsecs(3))
}

/// Builds `count` items with ids `item-0..`, names `name-0..` and ranks `0..`.
pub fn items(count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| item(&format!("item-{}", i), &format!("name-{}", i), i as i64))
        .collect()
}

/// Extracts the ids of a list of items.
pub fn ids(items: &[Item]) -> Vec<Value> {
    items.iter().map(|item| item.id.clone()).collect()
}
