//! PostgreSQL adapter (pgvector extension, native vector type).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::debug;

use crate::adapters::common::{validate_url, CONNECT_TIMEOUT};
use crate::adapters::{DatabaseAdapter, DatabaseType, VectorRecord};
use crate::config::PgConfig;
use crate::error::{Error, Result};

const SELECT_COLUMNS: &str = "id, vector, team_id, dataset_id, collection_id, createtime";

/// Adapter for PostgreSQL with the pgvector extension.
pub struct PgAdapter {
    config: PgConfig,
    pool: Option<PgPool>,
}

impl PgAdapter {
    /// Create an adapter from its configuration. No connection is made until
    /// [`connect`](DatabaseAdapter::connect).
    #[must_use]
    pub fn new(config: PgConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| Error::Connection("pg adapter is not connected".to_string()))
    }

    fn batch_sql(&self, with_cursor: bool) -> String {
        let cursor = if with_cursor { "WHERE id > $1 " } else { "" };
        let limit = if with_cursor { "$2" } else { "$1" };
        format!(
            "SELECT {SELECT_COLUMNS} FROM \"{}\" {cursor}ORDER BY id LIMIT {limit}",
            self.config.table
        )
    }

    fn time_range_sql(&self) -> String {
        format!(
            "SELECT {SELECT_COLUMNS} FROM \"{}\" \
             WHERE createtime >= $1 AND createtime <= $2 ORDER BY createtime, id",
            self.config.table
        )
    }

    fn id_range_sql(&self) -> String {
        format!(
            "SELECT {SELECT_COLUMNS} FROM \"{}\" \
             WHERE id >= $1 AND id <= $2 ORDER BY id LIMIT $3",
            self.config.table
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO \"{}\" (id, vector, team_id, dataset_id, collection_id, createtime) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
               vector = EXCLUDED.vector, \
               team_id = EXCLUDED.team_id, \
               dataset_id = EXCLUDED.dataset_id, \
               collection_id = EXCLUDED.collection_id, \
               createtime = EXCLUDED.createtime",
            self.config.table
        )
    }

    fn record_from_row(row: &PgRow) -> Result<VectorRecord> {
        let vector: Vector = row
            .try_get("vector")
            .map_err(|e| Error::Read(format!("bad vector column: {e}")))?;
        Ok(VectorRecord {
            id: row.try_get("id").map_err(|e| Error::Read(e.to_string()))?,
            vector: vector.to_vec(),
            team_id: row
                .try_get("team_id")
                .map_err(|e| Error::Read(e.to_string()))?,
            dataset_id: row
                .try_get("dataset_id")
                .map_err(|e| Error::Read(e.to_string()))?,
            collection_id: row
                .try_get("collection_id")
                .map_err(|e| Error::Read(e.to_string()))?,
            createtime: row
                .try_get("createtime")
                .map_err(|e| Error::Read(e.to_string()))?,
        })
    }

    fn collect_records(rows: Vec<PgRow>) -> Result<Vec<VectorRecord>> {
        rows.iter().map(Self::record_from_row).collect()
    }
}

#[async_trait]
impl DatabaseAdapter for PgAdapter {
    async fn connect(&mut self) -> Result<()> {
        validate_url(&self.config.url, &["postgres", "postgresql"])?;

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(CONNECT_TIMEOUT)
            .idle_timeout(Duration::from_secs(30))
            .connect(&self.config.url)
            .await
            .map_err(|e| Error::Connection(format!("pg connect failed: {e}")))?;

        debug!(table = %self.config.table, "connected to postgres");
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn get_total_count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.config.table);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("pg count failed: {e}")))?;
        Ok(count as u64)
    }

    async fn read_batch(&self, after_id: Option<&str>, limit: usize) -> Result<Vec<VectorRecord>> {
        let sql = self.batch_sql(after_id.is_some());
        let mut query = sqlx::query(&sql);
        if let Some(id) = after_id {
            query = query.bind(id.to_string());
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("pg batch read failed: {e}")))?;
        Self::collect_records(rows)
    }

    async fn read_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VectorRecord>> {
        let rows = sqlx::query(&self.time_range_sql())
            .bind(start)
            .bind(end)
            .fetch_all(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("pg time-range read failed: {e}")))?;
        Self::collect_records(rows)
    }

    async fn read_by_id_range(
        &self,
        start_id: &str,
        end_id: &str,
        limit: usize,
    ) -> Result<Vec<VectorRecord>> {
        let rows = sqlx::query(&self.id_range_sql())
            .bind(start_id)
            .bind(end_id)
            .bind(limit as i64)
            .fetch_all(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("pg id-range read failed: {e}")))?;
        Self::collect_records(rows)
    }

    async fn write_batch(&self, records: &[VectorRecord]) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let sql = self.upsert_sql();
        let pool = self.pool()?;
        let mut written = Vec::with_capacity(records.len());
        for record in records {
            sqlx::query(&sql)
                .bind(&record.id)
                .bind(Vector::from(record.vector.clone()))
                .bind(&record.team_id)
                .bind(&record.dataset_id)
                .bind(&record.collection_id)
                .bind(record.createtime)
                .execute(pool)
                .await
                .map_err(|e| Error::Write(format!("pg upsert of {} failed: {e}", record.id)))?;
            written.push(record.id.clone());
        }
        Ok(written)
    }

    async fn validate_record(&self, id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM \"{}\" WHERE id = $1", self.config.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("pg existence check failed: {e}")))?;
        Ok(row.is_some())
    }

    async fn init_schema(&self) -> Result<()> {
        let pool = self.pool()?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await
            .map_err(|e| Error::Write(format!("cannot enable pgvector: {e}")))?;

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ( \
               id TEXT PRIMARY KEY, \
               vector vector({}) NOT NULL, \
               team_id TEXT NOT NULL, \
               dataset_id TEXT NOT NULL, \
               collection_id TEXT NOT NULL, \
               createtime TIMESTAMPTZ NOT NULL DEFAULT now() \
             )",
            self.config.table, self.config.dimension
        );
        sqlx::query(&create_table)
            .execute(pool)
            .await
            .map_err(|e| Error::Write(format!("cannot create table: {e}")))?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS \"{0}_vector_idx\" \
             ON \"{0}\" USING hnsw (vector vector_cosine_ops) \
             WITH (m = 16, ef_construction = 64)",
            self.config.table
        );
        sqlx::query(&create_index)
            .execute(pool)
            .await
            .map_err(|e| Error::Write(format!("cannot create vector index: {e}")))?;

        // CDC polls by createtime.
        let create_time_index = format!(
            "CREATE INDEX IF NOT EXISTS \"{0}_createtime_idx\" ON \"{0}\" (createtime, id)",
            self.config.table
        );
        sqlx::query(&create_time_index)
            .execute(pool)
            .await
            .map_err(|e| Error::Write(format!("cannot create createtime index: {e}")))?;

        Ok(())
    }

    fn db_type(&self) -> DatabaseType {
        DatabaseType::Pg
    }
}

#[cfg(test)]
#[path = "postgres_tests.rs"]
mod tests;
