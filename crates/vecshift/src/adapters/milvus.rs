//! Milvus adapter (v2 REST API).
//!
//! Milvus has no offset-stable scan, so pagination relies on primary-key
//! filter expressions (`id > "cursor"`) with a client-side sort and slice
//! for stable ordering. `createtime` is stored as epoch milliseconds in an
//! Int64 scalar field so time-window filters stay expressible in the query
//! language.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapters::common::{create_http_client, parse_vector_from_json, validate_url};
use crate::adapters::{DatabaseAdapter, DatabaseType, VectorRecord};
use crate::config::MilvusConfig;
use crate::error::{Error, Result};

const OUTPUT_FIELDS: [&str; 6] = [
    "id",
    "vector",
    "team_id",
    "dataset_id",
    "collection_id",
    "createtime",
];

/// Server-side cap on rows returned per query request.
const MAX_QUERY_LIMIT: usize = 16_384;

/// Response envelope of the Milvus v2 REST API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// Adapter for Milvus via its REST API.
pub struct MilvusAdapter {
    config: MilvusConfig,
    client: Option<Client>,
}

impl MilvusAdapter {
    /// Create an adapter from its configuration. No client is built until
    /// [`connect`](DatabaseAdapter::connect).
    #[must_use]
    pub fn new(config: MilvusConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Connection("milvus adapter is not connected".to_string()))
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/v2/vectordb{}",
            self.config.milvus_address.trim_end_matches('/'),
            path
        )
    }

    /// Escapes a string value for use inside a filter expression.
    fn escape_filter_value(value: &str) -> String {
        value.replace('\\', "\\\\").replace('"', "\\\"")
    }

    async fn api_post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.api_url(path);
        let mut request = self.client()?.post(&url).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(format!("milvus request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!(
                "milvus {path} returned {status}: {body}"
            )));
        }

        let envelope: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Read(format!("cannot parse milvus response: {e}")))?;

        if envelope.code != 0 {
            return Err(Error::Read(format!(
                "milvus {path} error {}: {}",
                envelope.code, envelope.message
            )));
        }
        Ok(envelope.data)
    }

    async fn query(&self, filter: &str, limit: usize) -> Result<Vec<VectorRecord>> {
        // The endpoint applies a small default row cap when `limit` is
        // absent, so it is always sent explicitly.
        let body = json!({
            "collectionName": self.config.collection,
            "filter": filter,
            "outputFields": OUTPUT_FIELDS,
            "limit": limit,
        });

        let data = self.api_post("/entities/query", &body).await?;
        let entities = data
            .as_array()
            .ok_or_else(|| Error::Read("milvus query data is not an array".to_string()))?;
        entities.iter().map(Self::record_from_entity).collect()
    }

    fn record_from_entity(entity: &Value) -> Result<VectorRecord> {
        let get_str = |field: &str| -> Result<String> {
            entity
                .get(field)
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| Error::Read(format!("milvus entity missing field '{field}'")))
        };

        let vector_value = entity
            .get("vector")
            .ok_or_else(|| Error::Read("milvus entity missing field 'vector'".to_string()))?;
        let createtime_ms = entity
            .get("createtime")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Read("milvus entity missing field 'createtime'".to_string()))?;
        let createtime = Utc
            .timestamp_millis_opt(createtime_ms)
            .single()
            .ok_or_else(|| Error::Read(format!("invalid createtime {createtime_ms}")))?;

        Ok(VectorRecord {
            id: get_str("id")?,
            vector: parse_vector_from_json(vector_value, "vector")?,
            team_id: get_str("team_id")?,
            dataset_id: get_str("dataset_id")?,
            collection_id: get_str("collection_id")?,
            createtime,
        })
    }

    fn entity_from_record(record: &VectorRecord) -> Value {
        json!({
            "id": record.id,
            "vector": record.vector,
            "team_id": record.team_id,
            "dataset_id": record.dataset_id,
            "collection_id": record.collection_id,
            "createtime": record.createtime.timestamp_millis(),
        })
    }
}

#[async_trait]
impl DatabaseAdapter for MilvusAdapter {
    async fn connect(&mut self) -> Result<()> {
        validate_url(&self.config.milvus_address, &["http", "https"])?;
        let client = create_http_client();
        self.client = Some(client);

        // Round-trip to verify the endpoint is reachable.
        let body = json!({ "collectionName": self.config.collection });
        self.api_post("/collections/has", &body).await?;
        debug!(collection = %self.config.collection, "connected to milvus");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }

    async fn get_total_count(&self) -> Result<u64> {
        let body = json!({
            "collectionName": self.config.collection,
            "filter": "",
            "outputFields": ["count(*)"],
        });
        let data = self.api_post("/entities/query", &body).await?;
        data.as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("count(*)"))
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Read("milvus count query returned no rows".to_string()))
    }

    async fn read_batch(&self, after_id: Option<&str>, limit: usize) -> Result<Vec<VectorRecord>> {
        let filter = match after_id {
            Some(id) => format!("id > \"{}\"", Self::escape_filter_value(id)),
            None => "id != \"\"".to_string(),
        };
        // The REST query does not guarantee result order, so a server-side
        // `limit` can return an arbitrary subset of the matching ids and
        // advancing the cursor past its max would skip the unreturned rest.
        // Over-fetch, sort, and slice the page client-side instead.
        let mut records = self.query(&filter, MAX_QUERY_LIMIT).await?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn read_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VectorRecord>> {
        let window = format!(
            "createtime >= {} and createtime <= {}",
            start.timestamp_millis(),
            end.timestamp_millis()
        );
        // One query caps out at the server row limit, which would silently
        // truncate a busy window. Page by id cursor inside the window until
        // it is exhausted.
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let filter = match &cursor {
                Some(id) => format!("{window} and id > \"{}\"", Self::escape_filter_value(id)),
                None => window.clone(),
            };
            let mut page = self.query(&filter, MAX_QUERY_LIMIT).await?;
            if page.is_empty() {
                break;
            }
            page.sort_by(|a, b| a.id.cmp(&b.id));
            if let Some(last) = page.last() {
                cursor = Some(last.id.clone());
            }
            records.append(&mut page);
        }
        records.sort_by(|a, b| (a.createtime, &a.id).cmp(&(b.createtime, &b.id)));
        Ok(records)
    }

    async fn read_by_id_range(
        &self,
        start_id: &str,
        end_id: &str,
        limit: usize,
    ) -> Result<Vec<VectorRecord>> {
        let filter = format!(
            "id >= \"{}\" and id <= \"{}\"",
            Self::escape_filter_value(start_id),
            Self::escape_filter_value(end_id)
        );
        let mut records = self.query(&filter, MAX_QUERY_LIMIT).await?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn write_batch(&self, records: &[VectorRecord]) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let data: Vec<Value> = records.iter().map(Self::entity_from_record).collect();
        let body = json!({
            "collectionName": self.config.collection,
            "data": data,
        });
        self.api_post("/entities/upsert", &body)
            .await
            .map_err(|e| match e {
                Error::Read(msg) => Error::Write(msg),
                other => other,
            })?;
        Ok(records.iter().map(|r| r.id.clone()).collect())
    }

    async fn validate_record(&self, id: &str) -> Result<bool> {
        let filter = format!("id == \"{}\"", Self::escape_filter_value(id));
        let body = json!({
            "collectionName": self.config.collection,
            "filter": filter,
            "outputFields": ["id"],
            "limit": 1,
        });
        let data = self.api_post("/entities/query", &body).await?;
        Ok(data.as_array().is_some_and(|rows| !rows.is_empty()))
    }

    async fn init_schema(&self) -> Result<()> {
        let body = json!({ "collectionName": self.config.collection });
        let data = self.api_post("/collections/has", &body).await?;
        let exists = data.get("has").and_then(Value::as_bool).unwrap_or(false);

        if !exists {
            let create = json!({
                "collectionName": self.config.collection,
                "dimension": self.config.dimension,
                "idType": "VarChar",
                "autoId": false,
                "primaryFieldName": "id",
                "vectorFieldName": "vector",
                "metricType": "COSINE",
                "params": { "max_length": "255", "enableDynamicField": true },
            });
            self.api_post("/collections/create", &create)
                .await
                .map_err(|e| match e {
                    Error::Read(msg) => Error::Write(msg),
                    other => other,
                })?;
        }

        // Load is required before the collection is queryable; idempotent.
        let load = json!({ "collectionName": self.config.collection });
        self.api_post("/collections/load", &load).await?;
        Ok(())
    }

    fn db_type(&self) -> DatabaseType {
        DatabaseType::Milvus
    }
}

#[cfg(test)]
#[path = "milvus_tests.rs"]
mod tests;
