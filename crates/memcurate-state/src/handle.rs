//! Connection configuration for the SurrealDB backend

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

/// Default embedded store, relative to the working directory.
pub const DEFAULT_LOCAL_PATH: &str = ".memcurate/db";

/// Credentials for a remote SurrealDB instance.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Root user (true) or database user (false)
    pub is_root: bool,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Any `surrealdb::engine::any` URL: `mem://`, `surrealkv://path`, `ws://host`, `wss://host`
    pub url: String,
    /// Namespace (default: "memcurate")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    pub credentials: Option<Credentials>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::local(DEFAULT_LOCAL_PATH)
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "memcurate".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }

    /// Ephemeral in-process store.
    pub fn in_memory() -> Self {
        Self::new("mem://")
    }

    /// Embedded on-disk store at `path`.
    pub fn local(path: &str) -> Self {
        Self::new(format!("surrealkv://{path}"))
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - MEMCURATE_DB_URL (optional, default: `surrealkv://.memcurate/db`)
    /// - MEMCURATE_DB_NAMESPACE (optional, default: "memcurate")
    /// - MEMCURATE_DB_DATABASE (optional, default: "main")
    /// - MEMCURATE_DB_USER / MEMCURATE_DB_PASSWORD (optional, both or neither)
    /// - MEMCURATE_DB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut config = match std::env::var("MEMCURATE_DB_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url),
            _ => Self::default(),
        };
        if let Ok(ns) = std::env::var("MEMCURATE_DB_NAMESPACE") {
            config.namespace = ns;
        }
        if let Ok(db) = std::env::var("MEMCURATE_DB_DATABASE") {
            config.database = db;
        }

        match (
            std::env::var("MEMCURATE_DB_USER"),
            std::env::var("MEMCURATE_DB_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => {
                let is_root = std::env::var("MEMCURATE_DB_ROOT")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false);
                config.credentials = Some(Credentials {
                    username,
                    password,
                    is_root,
                });
            }
            (Ok(_), Err(_)) => return Err("MEMCURATE_DB_PASSWORD not set".to_string()),
            (Err(_), Ok(_)) => return Err("MEMCURATE_DB_USER not set".to_string()),
            (Err(_), Err(_)) => {}
        }

        Ok(config)
    }

    /// Local directory backing a `surrealkv://` URL, if any.
    fn local_dir(&self) -> Option<&str> {
        self.url.strip_prefix("surrealkv://")
    }

    /// Open the connection, authenticate, select ns/db and initialize the schema.
    #[instrument(skip(self), fields(url = %self.url, namespace = %self.namespace, database = %self.database))]
    pub async fn connect(&self) -> Result<Surreal<Any>> {
        if let Some(dir) = self.local_dir() {
            std::fs::create_dir_all(dir).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    dir, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(&self.url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", self.url, e)))?;

        if let Some(creds) = &self.credentials {
            if creds.is_root {
                db.signin(Root {
                    username: &creds.username,
                    password: &creds.password,
                })
                .await
                .map_err(|e| StateError::Connection(format!("Root authentication failed: {}", e)))?;
            } else {
                db.signin(Database {
                    namespace: &self.namespace,
                    database: &self.database,
                    username: &creds.username,
                    password: &creds.password,
                })
                .await
                .map_err(|e| {
                    StateError::Connection(format!("Database authentication failed: {}", e))
                })?;
            }
        }

        db.use_ns(&self.namespace)
            .use_db(&self.database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("Connected to SurrealDB");
        Ok(db)
    }
}
