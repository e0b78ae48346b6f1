//! Database adapters for the stores vecshift can migrate between.

pub mod common;
pub mod milvus;
pub mod oceanbase;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// One embedding row plus its owning identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    /// Source-assigned opaque id, unique within a store.
    pub id: String,
    /// Fixed-length embedding.
    pub vector: Vec<f32>,
    /// Owning team.
    pub team_id: String,
    /// Owning dataset.
    pub dataset_id: String,
    /// Owning collection.
    pub collection_id: String,
    /// Creation timestamp, the CDC watermark column.
    pub createtime: DateTime<Utc>,
}

/// Kind of store an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL with the pgvector extension.
    Pg,
    /// OceanBase over the MySQL protocol, vector emulated as a JSON column.
    OceanBase,
    /// Milvus via its REST API.
    Milvus,
}

impl DatabaseType {
    /// The config tag for this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pg => "pg",
            Self::OceanBase => "oceanbase",
            Self::Milvus => "milvus",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform contract over the three stores.
///
/// Adapters own their client: it is built in [`connect`](Self::connect) and
/// dropped in [`disconnect`](Self::disconnect); every other method requires a
/// prior `connect`. Batch pagination is stable id-range cursoring — records
/// are totally ordered by `id`, and a page is "the first `limit` ids greater
/// than the cursor". Adapters surface errors directly and never retry;
/// retry policy belongs to the orchestrator.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Establish the connection pool or client.
    async fn connect(&mut self) -> Result<()>;

    /// Release the connection pool or client. Called when a run ends,
    /// whether it completed, failed, or was shut down out of CDC polling.
    async fn disconnect(&mut self) -> Result<()>;

    /// Total record count in the managed table/collection.
    async fn get_total_count(&self) -> Result<u64>;

    /// Read up to `limit` records with `id > after_id`, ordered by `id`
    /// ascending. `None` starts from the beginning.
    async fn read_batch(&self, after_id: Option<&str>, limit: usize) -> Result<Vec<VectorRecord>>;

    /// Read records with `createtime` in `[start, end]` (inclusive), ordered
    /// by `(createtime, id)`.
    async fn read_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VectorRecord>>;

    /// Read up to `limit` records with `id` in `[start_id, end_id]`
    /// (inclusive), ordered by `id`.
    async fn read_by_id_range(
        &self,
        start_id: &str,
        end_id: &str,
        limit: usize,
    ) -> Result<Vec<VectorRecord>>;

    /// Upsert `records` and return the ids written. Writing the same id
    /// twice replaces the record, never duplicates it.
    async fn write_batch(&self, records: &[VectorRecord]) -> Result<Vec<String>>;

    /// Existence check by id.
    async fn validate_record(&self, id: &str) -> Result<bool>;

    /// Idempotent creation of the table/collection and its index.
    async fn init_schema(&self) -> Result<()>;

    /// The kind of store this adapter talks to.
    fn db_type(&self) -> DatabaseType;
}

/// Create an adapter from a database configuration.
///
/// # Errors
///
/// Returns an error if the configuration is invalid for the selected type.
pub fn create_adapter(config: &DatabaseConfig) -> Result<Box<dyn DatabaseAdapter>> {
    match config {
        DatabaseConfig::Pg(cfg) => Ok(Box::new(postgres::PgAdapter::new(cfg.clone()))),
        DatabaseConfig::OceanBase(cfg) => {
            Ok(Box::new(oceanbase::OceanBaseAdapter::new(cfg.clone())))
        }
        DatabaseConfig::Milvus(cfg) => Ok(Box::new(milvus::MilvusAdapter::new(cfg.clone()))),
    }
}
