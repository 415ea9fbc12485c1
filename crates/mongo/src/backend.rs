//! MongoDB backend configuration and client management.

use std::fmt::Debug;
use std::time::Duration;

use bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use serde::{Deserialize, Serialize};
use strata_resource::error::{BackendError, StorageError, StorageResult};

use crate::error::BACKEND_NAME;
use crate::storage::MongoHandler;

/// Configuration for the MongoDB backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Connection string (default: `"mongodb://localhost:27017"`).
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database holding the resource collections (default: `"strata"`).
    #[serde(default = "default_database")]
    pub database: String,

    /// Application name reported to the server. Overrides `appName` from
    /// the connection string when set.
    #[serde(default)]
    pub app_name: Option<String>,

    /// Maximum number of pooled connections per server (default: 10).
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Connection timeout in milliseconds (default: 10000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Server selection timeout in milliseconds (default: 30000).
    #[serde(default = "default_server_selection_timeout_ms")]
    pub server_selection_timeout_ms: u64,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "strata".to_string()
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    10000
}

fn default_server_selection_timeout_ms() -> u64 {
    30000
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
            app_name: None,
            max_pool_size: default_max_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            server_selection_timeout_ms: default_server_selection_timeout_ms(),
        }
    }
}

/// MongoDB backend: a driver client bound to one database.
///
/// The client pools connections internally; handlers created from the same
/// backend share that pool.
pub struct MongoBackend {
    client: Client,
    config: MongoConfig,
}

impl Debug for MongoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoBackend")
            .field("database", &self.config.database)
            .field("max_pool_size", &self.config.max_pool_size)
            .finish_non_exhaustive()
    }
}

impl MongoBackend {
    /// Creates a backend from configuration.
    ///
    /// The client connects lazily, so this succeeds without a reachable
    /// server as long as the connection string is valid.
    pub async fn connect(config: MongoConfig) -> StorageResult<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| connection_failed(format!("Invalid connection string: {}", e)))?;

        if config.app_name.is_some() {
            options.app_name = config.app_name.clone();
        }
        options.max_pool_size = Some(config.max_pool_size);
        options.connect_timeout = Some(Duration::from_millis(config.connect_timeout_ms));
        options.server_selection_timeout =
            Some(Duration::from_millis(config.server_selection_timeout_ms));

        let client = Client::with_options(options)
            .map_err(|e| connection_failed(format!("Failed to build client: {}", e)))?;

        tracing::info!(database = %config.database, "MongoDB backend initialized");

        Ok(Self { client, config })
    }

    /// Wraps an existing client.
    pub fn from_client(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            config: MongoConfig {
                database: database.into(),
                ..Default::default()
            },
        }
    }

    /// Returns the driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Returns the configured database.
    pub fn database(&self) -> Database {
        self.client.database(&self.config.database)
    }

    /// Creates a storage handler for the items kept in `collection`.
    pub fn handler(&self, collection: impl Into<String>) -> MongoHandler {
        MongoHandler::new(self.database(), collection)
    }

    /// Pings the server.
    pub async fn health_check(&self) -> StorageResult<()> {
        self.database()
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| {
                StorageError::Backend(BackendError::Unavailable {
                    backend_name: BACKEND_NAME.to_string(),
                    message: format!("Health check failed: {}", e),
                })
            })?;
        Ok(())
    }
}

fn connection_failed(message: String) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: BACKEND_NAME.to_string(),
        message,
    })
}
