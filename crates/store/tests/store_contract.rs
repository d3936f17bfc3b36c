use std::sync::Arc;

use anyhow::Result;
use tracebase_core::config::StorageConfig;
use tracebase_core::model::SpanKind;
use tracebase_core::query::QueryCriteria;
use tracebase_core::time::DAY_MILLIS;
use tracebase_store::schema::SCHEMA_SQL;
use tracebase_store::{ConnectionPool, Store};

const TRACE_128: &str = "463ac35c9f6413ad48485a3953bb6124";
const TRACE_64: &str = "48485a3953bb6124";

fn criteria() -> QueryCriteria {
    QueryCriteria {
        end_ts: testkit::base_micros() / 1000 + 60_000,
        lookback: DAY_MILLIS,
        ..QueryCriteria::default()
    }
}

#[test]
fn sample_trace_round_trips() -> Result<()> {
    let store = Store::open_in_memory()?;
    store.accept(&testkit::sample_trace(TRACE_64))?;

    let trace = store.get_trace(TRACE_64)?;
    assert_eq!(trace.len(), 2);

    let root = &trace[0];
    assert_eq!(root.name, "get /v1/orders");
    assert_eq!(root.kind, Some(SpanKind::Server));
    assert_eq!(root.tags["http.path"], "/v1/orders");
    assert_eq!(root.annotations.len(), 1);
    assert_eq!(root.annotations[0].value, "retry");
    let endpoint = root.local_endpoint.as_ref().unwrap();
    assert_eq!(endpoint.service_name, "api");
    assert_eq!(endpoint.ipv4.as_deref(), Some("10.0.0.1"));
    assert_eq!(endpoint.port, Some(8080));

    let child = &trace[1];
    assert_eq!(child.parent_id.as_deref(), Some("000000000000000a"));
    assert_eq!(child.tags["error"], "timeout");
    Ok(())
}

#[test]
fn retrieved_spans_serialize_camel_case() -> Result<()> {
    let store = Store::open_in_memory()?;
    store.accept(&testkit::sample_trace(TRACE_64))?;

    let trace = store.get_trace(TRACE_64)?;
    let json = serde_json::to_value(&trace[1])?;
    assert_eq!(json["traceId"], TRACE_64);
    assert_eq!(json["parentId"], "000000000000000a");
    assert_eq!(json["kind"], "CLIENT");
    assert_eq!(json["localEndpoint"]["serviceName"], "cache");
    Ok(())
}

#[test]
fn double_accept_changes_nothing() -> Result<()> {
    let store = Store::open_in_memory()?;
    let batch = testkit::sample_trace(TRACE_64);
    store.accept(&batch)?;
    let before = store.status()?;

    store.accept(&batch)?;
    let after = store.status()?;

    assert_eq!(after.spans_count, before.spans_count);
    assert_eq!(after.annotations_count, before.annotations_count);
    assert_eq!(after.dependencies_count, before.dependencies_count);

    let links = store.get_dependencies(criteria().end_ts, DAY_MILLIS)?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].call_count, 1);
    assert_eq!(links[0].error_count, 1);
    Ok(())
}

#[test]
fn links_merge_across_days() -> Result<()> {
    let store = Store::open_in_memory()?;
    let day_one = testkit::sample_trace("000000000000000a");
    let mut day_two = testkit::sample_trace("000000000000000b");
    for span in &mut day_two {
        span.timestamp += DAY_MILLIS * 1000;
    }
    store.accept(&day_one)?;
    store.accept(&day_two)?;

    let end_ts = testkit::base_micros() / 1000 + DAY_MILLIS + 60_000;

    let both_days = store.get_dependencies(end_ts, 2 * DAY_MILLIS)?;
    assert_eq!(both_days.len(), 1);
    assert_eq!(both_days[0].parent, "api");
    assert_eq!(both_days[0].child, "cache");
    assert_eq!(both_days[0].call_count, 2);
    assert_eq!(both_days[0].error_count, 2);

    // 60s of lookback from 00:01 stays inside the second day bucket.
    let one_day = store.get_dependencies(end_ts, 60_000)?;
    assert_eq!(one_day[0].call_count, 1);
    Ok(())
}

#[test]
fn duration_bound_is_inclusive() -> Result<()> {
    let store = Store::open_in_memory()?;
    let mut short = testkit::span("000000000000000a", "000000000000000a", "api");
    short.duration = 99;
    let mut exact = testkit::span("000000000000000b", "000000000000000b", "api");
    exact.duration = 100;
    store.accept(&[short, exact])?;

    let traces = store.get_traces(&QueryCriteria {
        min_duration: Some(100),
        ..criteria()
    })?;
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0][0].trace_id, "000000000000000b");

    let bounded = store.get_traces(&QueryCriteria {
        min_duration: Some(100),
        max_duration: Some(100),
        ..criteria()
    })?;
    assert_eq!(bounded.len(), 1);
    Ok(())
}

#[test]
fn strict_ids_separate_what_lenient_ids_group() -> Result<()> {
    let spans = vec![
        testkit::span(TRACE_128, "000000000000000a", "api"),
        testkit::span(TRACE_64, "000000000000000b", "api"),
    ];

    let strict = Store::open_in_memory()?;
    strict.accept(&spans)?;
    assert_eq!(strict.get_trace(TRACE_64)?.len(), 1);
    assert_eq!(strict.get_traces(&criteria())?.len(), 2);

    let lenient = Store::open(&StorageConfig {
        strict_trace_id: false,
        ..StorageConfig::in_memory()
    })?;
    lenient.accept(&spans)?;
    assert_eq!(lenient.get_trace(TRACE_64)?.len(), 2);
    assert_eq!(lenient.get_trace(TRACE_128)?.len(), 2);
    let grouped = lenient.get_traces(&criteria())?;
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].len(), 2);
    Ok(())
}

#[test]
fn remote_service_filter_fails_before_touching_the_pool() -> Result<()> {
    let cfg = StorageConfig {
        pool_size: 1,
        acquire_timeout: std::time::Duration::from_millis(50),
        ..StorageConfig::in_memory()
    };
    let pool = Arc::new(ConnectionPool::open(&cfg)?);
    {
        let conn = pool.acquire()?;
        conn.execute_batch(SCHEMA_SQL)?;
    }
    let store = Store::from_pool(pool.clone(), &cfg)?;

    // Hold the only connection so any query that reaches the pool stalls.
    let _held = pool.acquire()?;

    let err = store
        .get_traces(&QueryCriteria {
            remote_service_name: Some("billing".to_string()),
            ..criteria()
        })
        .err()
        .expect("remote filter should be rejected");
    assert!(err.to_string().contains("remoteService=billing"));
    assert!(!err.to_string().contains("no database connection"));

    // A well-formed query does reach the pool and times out instead.
    let err = store.get_traces(&criteria()).err().expect("pool is exhausted");
    assert!(err.to_string().contains("no database connection"));
    Ok(())
}

const LEGACY_SCHEMA_SQL: &str = "
CREATE SEQUENCE IF NOT EXISTS span_row_id_seq;
CREATE TABLE IF NOT EXISTS spans (
  span_row_id BIGINT PRIMARY KEY DEFAULT nextval('span_row_id_seq'),
  trace_id TEXT NOT NULL,
  id TEXT NOT NULL,
  parent_id TEXT NOT NULL DEFAULT '0',
  kind TEXT NOT NULL DEFAULT '',
  name TEXT NOT NULL DEFAULT '',
  debug BOOLEAN NOT NULL DEFAULT false,
  shared BOOLEAN NOT NULL DEFAULT false,
  start_ts BIGINT,
  duration BIGINT,
  UNIQUE (trace_id, id, kind)
);
CREATE TABLE IF NOT EXISTS annotations (
  span_row_id BIGINT NOT NULL,
  a_key TEXT NOT NULL,
  a_value TEXT,
  a_type INTEGER NOT NULL,
  a_timestamp BIGINT NOT NULL,
  service_name TEXT,
  ipv4 TEXT,
  port INTEGER,
  UNIQUE (span_row_id, a_key, a_timestamp)
);
";

const LEGACY_DEPENDENCIES_SQL: &str = "
CREATE TABLE IF NOT EXISTS dependencies (
  day BIGINT NOT NULL,
  parent TEXT NOT NULL,
  child TEXT NOT NULL,
  call_count BIGINT NOT NULL DEFAULT 0,
  UNIQUE (day, parent, child)
);
";

fn legacy_store(with_dependencies: bool) -> Result<Store> {
    let cfg = StorageConfig::in_memory();
    let pool = Arc::new(ConnectionPool::open(&cfg)?);
    {
        let conn = pool.acquire()?;
        conn.execute_batch(LEGACY_SCHEMA_SQL)?;
        if with_dependencies {
            conn.execute_batch(LEGACY_DEPENDENCIES_SQL)?;
        }
    }
    Ok(Store::from_pool(pool, &cfg)?)
}

#[test]
fn missing_ipv6_column_degrades_silently() -> Result<()> {
    let store = legacy_store(true)?;
    assert!(!store.capabilities().ipv6);

    let mut span = testkit::span(TRACE_64, "000000000000000a", "api");
    if let Some(endpoint) = &mut span.local_endpoint {
        endpoint.ipv6 = Some("::1".to_string());
    }
    store.accept(&[span])?;

    let trace = store.get_trace(TRACE_64)?;
    let endpoint = trace[0].local_endpoint.as_ref().unwrap();
    assert_eq!(endpoint.ipv4.as_deref(), Some("10.0.0.1"));
    assert_eq!(endpoint.ipv6, None);
    Ok(())
}

#[test]
fn missing_error_count_column_reads_as_zero() -> Result<()> {
    let store = legacy_store(true)?;
    assert!(store.capabilities().pre_aggregated_dependencies);
    assert!(!store.capabilities().error_count);

    store.accept(&testkit::sample_trace(TRACE_64))?;

    let links = store.get_dependencies(criteria().end_ts, DAY_MILLIS)?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].call_count, 1);
    assert_eq!(links[0].error_count, 0);
    Ok(())
}

#[test]
fn missing_dependencies_table_reconstructs_from_spans() -> Result<()> {
    let store = legacy_store(false)?;
    assert!(!store.capabilities().pre_aggregated_dependencies);

    store.accept(&testkit::sample_trace("000000000000000a"))?;
    store.accept(&testkit::sample_trace("000000000000000b"))?;

    let links = store.get_dependencies(criteria().end_ts, DAY_MILLIS)?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].parent, "api");
    assert_eq!(links[0].child, "cache");
    assert_eq!(links[0].call_count, 2);
    assert_eq!(links[0].error_count, 2);
    Ok(())
}

#[test]
fn data_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = StorageConfig {
        db_path: dir.path().join("traces.duckdb"),
        ..StorageConfig::default()
    };

    {
        let store = Store::open(&cfg)?;
        store.accept(&testkit::sample_trace(TRACE_64))?;
    }

    let reopened = Store::open(&cfg)?;
    assert_eq!(reopened.get_trace(TRACE_64)?.len(), 2);
    assert!(reopened.status()?.db_size_bytes > 0);
    Ok(())
}

#[test]
fn unknown_trace_reads_empty() -> Result<()> {
    let store = Store::open_in_memory()?;
    assert!(store.get_trace("deadbeef")?.is_empty());
    assert!(store.get_service_names()?.is_empty());
    assert!(store.get_traces(&criteria())?.is_empty());
    Ok(())
}

#[test]
fn searches_match_by_tag_and_annotation() -> Result<()> {
    let store = Store::open_in_memory()?;
    store.accept(&testkit::sample_trace(TRACE_64))?;

    // Exact tag value.
    let by_value = store.get_traces(&QueryCriteria {
        service_name: Some("api".to_string()),
        tags: [("http.path".to_string(), "/v1/orders".to_string())].into(),
        ..criteria()
    })?;
    assert_eq!(by_value.len(), 1);

    // Key-exists matches timed annotations too.
    let by_annotation = store.get_traces(&QueryCriteria {
        service_name: Some("api".to_string()),
        tags: [("retry".to_string(), String::new())].into(),
        ..criteria()
    })?;
    assert_eq!(by_annotation.len(), 1);

    let miss = store.get_traces(&QueryCriteria {
        service_name: Some("api".to_string()),
        tags: [("http.path".to_string(), "/other".to_string())].into(),
        ..criteria()
    })?;
    assert!(miss.is_empty());
    Ok(())
}
