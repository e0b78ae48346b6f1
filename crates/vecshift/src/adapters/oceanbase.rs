//! OceanBase adapter (MySQL protocol, vector emulated as a JSON column).
//!
//! OceanBase has no native vector type on the MySQL surface, so the
//! embedding is persisted as a JSON array column and parsed back on read.
//! Everything else is plain relational SQL with the same id/createtime
//! ordering contract as the PostgreSQL adapter.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{MySqlPool, Row};
use std::time::Duration;
use tracing::debug;

use crate::adapters::common::{parse_vector_from_json, validate_url, CONNECT_TIMEOUT};
use crate::adapters::{DatabaseAdapter, DatabaseType, VectorRecord};
use crate::config::OceanBaseConfig;
use crate::error::{Error, Result};

const SELECT_COLUMNS: &str = "id, vector, team_id, dataset_id, collection_id, createtime";

/// Adapter for OceanBase over the MySQL protocol.
pub struct OceanBaseAdapter {
    config: OceanBaseConfig,
    pool: Option<MySqlPool>,
}

impl OceanBaseAdapter {
    /// Create an adapter from its configuration. No connection is made until
    /// [`connect`](DatabaseAdapter::connect).
    #[must_use]
    pub fn new(config: OceanBaseConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> Result<&MySqlPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| Error::Connection("oceanbase adapter is not connected".to_string()))
    }

    fn batch_sql(&self, with_cursor: bool) -> String {
        let cursor = if with_cursor { "WHERE id > ? " } else { "" };
        format!(
            "SELECT {SELECT_COLUMNS} FROM `{}` {cursor}ORDER BY id LIMIT ?",
            self.config.table
        )
    }

    fn time_range_sql(&self) -> String {
        format!(
            "SELECT {SELECT_COLUMNS} FROM `{}` \
             WHERE createtime >= ? AND createtime <= ? ORDER BY createtime, id",
            self.config.table
        )
    }

    fn id_range_sql(&self) -> String {
        format!(
            "SELECT {SELECT_COLUMNS} FROM `{}` \
             WHERE id >= ? AND id <= ? ORDER BY id LIMIT ?",
            self.config.table
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO `{}` (id, vector, team_id, dataset_id, collection_id, createtime) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE \
               vector = VALUES(vector), \
               team_id = VALUES(team_id), \
               dataset_id = VALUES(dataset_id), \
               collection_id = VALUES(collection_id), \
               createtime = VALUES(createtime)",
            self.config.table
        )
    }

    fn record_from_row(row: &MySqlRow) -> Result<VectorRecord> {
        let vector_json: serde_json::Value = row
            .try_get("vector")
            .map_err(|e| Error::Read(format!("bad vector column: {e}")))?;
        let createtime: NaiveDateTime = row
            .try_get("createtime")
            .map_err(|e| Error::Read(e.to_string()))?;
        Ok(VectorRecord {
            id: row.try_get("id").map_err(|e| Error::Read(e.to_string()))?,
            vector: parse_vector_from_json(&vector_json, "vector")?,
            team_id: row
                .try_get("team_id")
                .map_err(|e| Error::Read(e.to_string()))?,
            dataset_id: row
                .try_get("dataset_id")
                .map_err(|e| Error::Read(e.to_string()))?,
            collection_id: row
                .try_get("collection_id")
                .map_err(|e| Error::Read(e.to_string()))?,
            createtime: DateTime::from_naive_utc_and_offset(createtime, Utc),
        })
    }

    fn collect_records(rows: Vec<MySqlRow>) -> Result<Vec<VectorRecord>> {
        rows.iter().map(Self::record_from_row).collect()
    }
}

#[async_trait]
impl DatabaseAdapter for OceanBaseAdapter {
    async fn connect(&mut self) -> Result<()> {
        validate_url(&self.config.url, &["mysql"])?;

        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(CONNECT_TIMEOUT)
            .idle_timeout(Duration::from_secs(30))
            .connect(&self.config.url)
            .await
            .map_err(|e| Error::Connection(format!("oceanbase connect failed: {e}")))?;

        debug!(table = %self.config.table, "connected to oceanbase");
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
        let sql = format!("SELECT COUNT(*) FROM `{}`", self.config.table);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("oceanbase count failed: {e}")))?;
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
            .map_err(|e| Error::Read(format!("oceanbase batch read failed: {e}")))?;
        Self::collect_records(rows)
    }

    async fn read_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VectorRecord>> {
        let rows = sqlx::query(&self.time_range_sql())
            .bind(start.naive_utc())
            .bind(end.naive_utc())
            .fetch_all(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("oceanbase time-range read failed: {e}")))?;
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
            .map_err(|e| Error::Read(format!("oceanbase id-range read failed: {e}")))?;
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
            let vector_json = serde_json::to_string(&record.vector)?;
            sqlx::query(&sql)
                .bind(&record.id)
                .bind(vector_json)
                .bind(&record.team_id)
                .bind(&record.dataset_id)
                .bind(&record.collection_id)
                .bind(record.createtime.naive_utc())
                .execute(pool)
                .await
                .map_err(|e| {
                    Error::Write(format!("oceanbase upsert of {} failed: {e}", record.id))
                })?;
            written.push(record.id.clone());
        }
        Ok(written)
    }

    async fn validate_record(&self, id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM `{}` WHERE id = ?", self.config.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| Error::Read(format!("oceanbase existence check failed: {e}")))?;
        Ok(row.is_some())
    }

    async fn init_schema(&self) -> Result<()> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS `{}` ( \
               id VARCHAR(255) PRIMARY KEY, \
               vector JSON NOT NULL, \
               team_id VARCHAR(64) NOT NULL, \
               dataset_id VARCHAR(64) NOT NULL, \
               collection_id VARCHAR(64) NOT NULL, \
               createtime DATETIME(3) NOT NULL, \
               INDEX idx_createtime (createtime, id) \
             )",
            self.config.table
        );
        sqlx::query(&create_table)
            .execute(self.pool()?)
            .await
            .map_err(|e| Error::Write(format!("cannot create table: {e}")))?;
        Ok(())
    }

    fn db_type(&self) -> DatabaseType {
        DatabaseType::OceanBase
    }
}

#[cfg(test)]
#[path = "oceanbase_tests.rs"]
mod tests;
