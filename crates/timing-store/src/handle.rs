//! SurrealDB-backed TimingRepository
//!
//! Manages the connection and provides:
//! - import_event (seed a source dataset)
//! - load_event / load_records
//! - persist_record (upsert) / released_records
//!
//! Supports in-memory, URL (`SURREALDB_URL`) and cloud (WebSocket) connections.

use std::collections::HashSet;

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument, warn};

use crate::error::StoreError;
use crate::migrations;
use crate::schema::{released_key, EventRow, TimingRow};
use crate::storage_traits::{
    EventDataset, EventId, EventInfo, StoreResult, TimingRecord, TimingRepository,
};
use crate::Result;

const DEFAULT_NAMESPACE: &str = "stage_replay";
const DEFAULT_DATABASE: &str = "main";

/// Configuration for SurrealDB Cloud connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "stage_replay")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new cloud configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "stage_replay")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database = std::env::var("SURREALDB_DATABASE")
            .unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// SurrealDB-backed implementation of [`TimingRepository`].
#[derive(Clone)]
pub struct SurrealTimingRepository {
    db: Surreal<Any>,
}

impl SurrealTimingRepository {
    /// Connect to SurrealDB in-memory and set up schema.
    #[instrument(skip_all)]
    pub async fn in_memory() -> Result<Self> {
        info!("Connecting to SurrealDB (in-memory)");
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB URL (`mem://`, `surrealkv://path`, `ws://...`).
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect(url: &str) -> Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Connect to SurrealDB Cloud
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn connect_cloud(config: CloudConfig) -> Result<Self> {
        info!("Connecting to SurrealDB Cloud (root={})", config.is_root);

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StoreError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        migrations::init_schema(&db).await?;
        info!("SurrealDB Cloud connected and schema initialized");
        Ok(Self { db })
    }

    /// Connect using environment variables
    ///
    /// If SURREALDB_ENDPOINT is set, connects to cloud.
    /// If SURREALDB_URL is set, connects to that URL.
    /// Otherwise, falls back to in-memory.
    #[instrument(skip_all)]
    pub async fn from_env() -> Result<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            info!("Cloud config found, connecting to SurrealDB Cloud");
            return Self::connect_cloud(config).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            info!("SURREALDB_URL found, connecting to {}", url);
            return Self::connect(&url).await;
        }

        info!("No cloud config found, using in-memory database");
        Self::in_memory().await
    }

    /// Store an event and its source records, replacing any previous copy.
    ///
    /// Duplicate `(competitor, stage)` pairs keep the first occurrence.
    #[instrument(skip(self, dataset), fields(event_id = %dataset.event.id, records = dataset.records.len()))]
    pub async fn import_event(&self, dataset: &EventDataset) -> Result<()> {
        let event_id = dataset.event.id.0.clone();

        self.db
            .query("DELETE events WHERE event_id = $id; DELETE timings WHERE event_id = $id;")
            .bind(("id", event_id))
            .await?
            .check()?;

        let event_row = EventRow::from(&dataset.event);
        let mut seen = HashSet::with_capacity(dataset.records.len());
        let rows: Vec<TimingRow> = dataset
            .records
            .iter()
            .filter(|r| seen.insert(r.key()))
            .map(|r| TimingRow::new(&dataset.event.id, r))
            .collect();

        let duplicates = dataset.records.len() - rows.len();
        if duplicates > 0 {
            warn!(duplicates, "Dropped duplicate timing records on import");
        }
        let imported = rows.len();

        self.db
            .query("CREATE events CONTENT $event; INSERT INTO timings $rows;")
            .bind(("event", event_row))
            .bind(("rows", rows))
            .await?
            .check()?;

        info!("Imported event with {} records", imported);
        Ok(())
    }
}

#[async_trait]
impl TimingRepository for SurrealTimingRepository {
    #[instrument(skip(self))]
    async fn load_event(&self, event_id: &EventId) -> StoreResult<EventInfo> {
        let mut result = self
            .db
            .query("SELECT * FROM events WHERE event_id = $id")
            .bind(("id", event_id.0.clone()))
            .await?;

        let rows: Vec<EventRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(EventRow::into_info)
            .ok_or_else(|| StoreError::NotFound {
                event_id: event_id.0.clone(),
            })
    }

    #[instrument(skip(self))]
    async fn load_records(&self, event_id: &EventId) -> StoreResult<Vec<TimingRecord>> {
        self.load_event(event_id).await?;

        let mut result = self
            .db
            .query("SELECT * FROM timings WHERE event_id = $id ORDER BY competitor, stage")
            .bind(("id", event_id.0.clone()))
            .await?;

        let rows: Vec<TimingRow> = result.take(0)?;
        if rows.is_empty() {
            return Err(StoreError::EmptyDataset {
                event_id: event_id.0.clone(),
            });
        }

        debug!("Loaded {} timing rows", rows.len());
        Ok(rows.into_iter().map(TimingRow::into_record).collect())
    }

    async fn persist_record(&self, event_id: &EventId, record: &TimingRecord) -> StoreResult<()> {
        let persist_err = |e: surrealdb::Error| StoreError::Persist {
            competitor: record.competitor.0,
            stage: record.stage.0,
            reason: e.to_string(),
        };

        self.db
            .query("UPSERT type::thing('released_timings', $key) CONTENT $row")
            .bind(("key", released_key(event_id, record)))
            .bind(("row", TimingRow::released(event_id, record)))
            .await
            .map_err(persist_err)?
            .check()
            .map_err(persist_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn released_records(&self, event_id: &EventId) -> StoreResult<Vec<TimingRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM released_timings WHERE event_id = $id ORDER BY stage, competitor")
            .bind(("id", event_id.0.clone()))
            .await?;

        let rows: Vec<TimingRow> = result.take(0)?;
        Ok(rows.into_iter().map(TimingRow::into_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_config_defaults() {
        let config = CloudConfig::new("wss://example", "user", "pass");
        assert_eq!(config.namespace, "stage_replay");
        assert_eq!(config.database, "main");
        assert!(!config.is_root);

        let config = config
            .with_namespace("ns")
            .with_database("db")
            .with_root(true);
        assert_eq!(config.namespace, "ns");
        assert_eq!(config.database, "db");
        assert!(config.is_root);
    }
}
