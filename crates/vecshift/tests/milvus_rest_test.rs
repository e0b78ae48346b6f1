//! Milvus REST adapter tests against a mocked v2 endpoint.

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vecshift::adapters::milvus::MilvusAdapter;
use vecshift::config::MilvusConfig;
use vecshift::{DatabaseAdapter, Error};

fn config_for(server: &MockServer) -> MilvusConfig {
    MilvusConfig {
        milvus_address: server.uri(),
        collection: "vector_records".to_string(),
        dimension: 4,
        token: None,
    }
}

async fn mount_has(server: &MockServer, has: bool) {
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "has": has }
        })))
        .mount(server)
        .await;
}

fn entity(id: &str, createtime_ms: i64) -> serde_json::Value {
    json!({
        "id": id,
        "vector": [0.1, 0.2, 0.3, 0.4],
        "team_id": "team-a",
        "dataset_id": "ds-1",
        "collection_id": "col-1",
        "createtime": createtime_ms
    })
}

#[tokio::test]
async fn test_connect_verifies_endpoint() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();
}

#[tokio::test]
async fn test_connect_fails_on_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1100,
            "message": "collection name is invalid"
        })))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    let result = adapter.connect().await;
    assert!(matches!(result, Err(Error::Read(_))));
}

#[tokio::test]
async fn test_get_total_count() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(json!({ "outputFields": ["count(*)"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ { "count(*)": 42 } ]
        })))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();
    assert_eq!(adapter.get_total_count().await.unwrap(), 42);
}

#[tokio::test]
async fn test_read_batch_sorts_by_id_and_uses_cursor_filter() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;
    // The store may return entities in any order.
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(json!({ "filter": "id > \"id2\"" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ entity("id4", 2000), entity("id3", 1000) ]
        })))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();

    let records = adapter.read_batch(Some("id2"), 10).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["id3", "id4"]);
    assert_eq!(records[0].vector.len(), 4);
}

#[tokio::test]
async fn test_read_batch_pagination_never_skips_unordered_results() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;

    // The server is free to answer a query in any order, so the adapter
    // must over-fetch and slice the page client-side. A request sized to
    // the batch could legally come back as {id4, id1} and cursoring past
    // id4 would lose id2/id3 forever.
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(
            json!({ "filter": "id != \"\"", "limit": 16384 }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [
                entity("id4", 4000),
                entity("id1", 1000),
                entity("id5", 5000),
                entity("id2", 2000),
                entity("id3", 3000)
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(json!({ "filter": "id > \"id2\"" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ entity("id4", 4000), entity("id5", 5000), entity("id3", 3000) ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(json!({ "filter": "id > \"id4\"" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ entity("id5", 5000) ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(json!({ "filter": "id > \"id5\"" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": []
        })))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();

    let mut ids = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = adapter.read_batch(cursor.as_deref(), 2).await.unwrap();
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 2);
        cursor = page.last().map(|r| r.id.clone());
        ids.extend(page.into_iter().map(|r| r.id));
    }
    assert_eq!(ids, vec!["id1", "id2", "id3", "id4", "id5"]);
}

#[tokio::test]
async fn test_time_range_pages_until_window_exhausted() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;

    let start = Utc.timestamp_millis_opt(1_000).unwrap();
    let end = Utc.timestamp_millis_opt(2_000).unwrap();

    // A single capped query would truncate a busy window, so the adapter
    // pages by id cursor inside the createtime filter until empty.
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(
            json!({ "filter": "createtime >= 1000 and createtime <= 2000" }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ entity("idB", 1500), entity("idA", 1200) ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(
            json!({ "filter": "createtime >= 1000 and createtime <= 2000 and id > \"idB\"" }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ entity("idC", 1800) ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(
            json!({ "filter": "createtime >= 1000 and createtime <= 2000 and id > \"idC\"" }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": []
        })))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();

    let records = adapter.read_by_time_range(start, end).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["idA", "idB", "idC"]);
}

#[tokio::test]
async fn test_write_batch_upserts_and_returns_ids() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/upsert"))
        .and(body_partial_json(
            json!({ "collectionName": "vector_records" }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "upsertCount": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();

    let records: Vec<vecshift::VectorRecord> = vec![
        serde_json::from_value(entity_record("idA")).unwrap(),
        serde_json::from_value(entity_record("idB")).unwrap(),
    ];
    let written = adapter.write_batch(&records).await.unwrap();
    assert_eq!(written, vec!["idA".to_string(), "idB".to_string()]);
}

fn entity_record(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "vector": [0.1, 0.2, 0.3, 0.4],
        "teamId": "team-a",
        "datasetId": "ds-1",
        "collectionId": "col-1",
        "createtime": "2024-06-01T00:00:00Z"
    })
}

#[tokio::test]
async fn test_write_batch_error_maps_to_write() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/upsert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 65535,
            "message": "quota exceeded"
        })))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();

    let records = vec![serde_json::from_value(entity_record("idA")).unwrap()];
    let result = adapter.write_batch(&records).await;
    assert!(matches!(result, Err(Error::Write(_))));
}

#[tokio::test]
async fn test_init_schema_creates_missing_collection_and_loads() {
    let server = MockServer::start().await;
    mount_has(&server, false).await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/create"))
        .and(body_partial_json(json!({
            "collectionName": "vector_records",
            "dimension": 4,
            "idType": "VarChar"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/load"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();
    adapter.init_schema().await.unwrap();
}

#[tokio::test]
async fn test_init_schema_skips_create_when_collection_exists() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/load"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();
    adapter.init_schema().await.unwrap();
}

#[tokio::test]
async fn test_validate_record_existence() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(json!({ "filter": "id == \"idA\"" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ { "id": "idA" } ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .and(body_partial_json(json!({ "filter": "id == \"missing\"" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": []
        })))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();
    assert!(adapter.validate_record("idA").await.unwrap());
    assert!(!adapter.validate_record("missing").await.unwrap());
}

#[tokio::test]
async fn test_http_error_maps_to_connection() {
    let server = MockServer::start().await;
    mount_has(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let mut adapter = MilvusAdapter::new(config_for(&server));
    adapter.connect().await.unwrap();
    let result = adapter.get_total_count().await;
    assert!(matches!(result, Err(Error::Connection(_))));
}
