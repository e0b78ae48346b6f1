//! Tests for the PostgreSQL adapter.

use super::*;

fn test_config() -> PgConfig {
    PgConfig {
        url: "postgres://localhost:5432/vectors".to_string(),
        table: "vector_records".to_string(),
        dimension: 1536,
        max_connections: 5,
    }
}

#[test]
fn test_pg_adapter_type() {
    let adapter = PgAdapter::new(test_config());
    assert_eq!(adapter.db_type(), DatabaseType::Pg);
    assert_eq!(adapter.db_type().as_str(), "pg");
}

#[test]
fn test_pg_batch_sql_without_cursor() {
    let adapter = PgAdapter::new(test_config());
    let sql = adapter.batch_sql(false);
    assert!(sql.contains("FROM \"vector_records\""));
    assert!(sql.contains("ORDER BY id LIMIT $1"));
    assert!(!sql.contains("id >"));
}

#[test]
fn test_pg_batch_sql_with_cursor() {
    let adapter = PgAdapter::new(test_config());
    let sql = adapter.batch_sql(true);
    assert!(sql.contains("WHERE id > $1"));
    assert!(sql.contains("ORDER BY id LIMIT $2"));
}

#[test]
fn test_pg_time_range_sql_is_inclusive_and_ordered() {
    let adapter = PgAdapter::new(test_config());
    let sql = adapter.time_range_sql();
    assert!(sql.contains("createtime >= $1"));
    assert!(sql.contains("createtime <= $2"));
    assert!(sql.ends_with("ORDER BY createtime, id"));
}

#[test]
fn test_pg_id_range_sql_is_inclusive_and_bounded() {
    let adapter = PgAdapter::new(test_config());
    let sql = adapter.id_range_sql();
    assert!(sql.contains("id >= $1"));
    assert!(sql.contains("id <= $2"));
    assert!(sql.contains("LIMIT $3"));
}

#[test]
fn test_pg_upsert_sql_replaces_on_conflict() {
    let adapter = PgAdapter::new(test_config());
    let sql = adapter.upsert_sql();
    assert!(sql.contains("ON CONFLICT (id) DO UPDATE"));
    assert!(sql.contains("vector = EXCLUDED.vector"));
    assert!(sql.contains("createtime = EXCLUDED.createtime"));
}

#[test]
fn test_pg_rejects_invalid_url_scheme() {
    let mut config = test_config();
    config.url = "http://localhost:5432/vectors".to_string();
    let mut adapter = PgAdapter::new(config);
    let result = tokio_test::block_on(adapter.connect());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_pg_methods_require_connect() {
    let adapter = PgAdapter::new(test_config());
    let result = tokio_test::block_on(adapter.get_total_count());
    assert!(matches!(result, Err(Error::Connection(_))));
}
