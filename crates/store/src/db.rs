use std::fs;
use std::sync::Arc;

use duckdb::Connection;
use serde::Serialize;
use tracebase_core::config::StorageConfig;
use tracebase_core::contract::{SpanConsumer, SpanStore};
use tracebase_core::error::{Result, TracebaseError};
use tracebase_core::model::{DependencyLink, Span};
use tracebase_core::query::QueryCriteria;

use crate::pool::{ConnectionPool, PooledConn};
use crate::probe::{self, Capabilities};
use crate::schema::{SCHEMA_SQL, Schema};

/// Handle to one trace database. Cheap to clone; clones share the pool and
/// the probed schema.
#[derive(Clone)]
pub struct Store {
    pool: Arc<ConnectionPool>,
    pub(crate) schema: Arc<Schema>,
    db_path: String,
    pub(crate) search_enabled: bool,
    pub(crate) autocomplete_keys: Vec<String>,
}

impl Store {
    /// Opens the database named by the config, applies the schema, and
    /// probes what the resulting tables can serve.
    pub fn open(cfg: &StorageConfig) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::open(cfg)?);
        {
            let conn = pool.acquire()?;
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|e| TracebaseError::Store(format!("failed to initialize schema: {e}")))?;
        }
        Self::from_pool(pool, cfg)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StorageConfig::in_memory())
    }

    /// Wraps an externally managed pool without touching the schema. The
    /// tables are probed as found, so a store opened this way degrades to
    /// whatever the live database actually has.
    pub fn from_pool(pool: Arc<ConnectionPool>, cfg: &StorageConfig) -> Result<Self> {
        let capabilities = {
            let conn = pool.acquire()?;
            probe::probe(&conn)?
        };
        Ok(Self {
            pool,
            schema: Schema::new(capabilities, cfg.strict_trace_id),
            db_path: cfg.db_path.display().to_string(),
            search_enabled: cfg.search_enabled,
            autocomplete_keys: cfg.autocomplete_keys.clone(),
        })
    }

    pub(crate) fn conn(&self) -> Result<PooledConn<'_>> {
        self.pool.acquire()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.schema.capabilities
    }

    /// One round-trip health check.
    pub fn check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| TracebaseError::Store(format!("health check failed: {e}")))?;
        Ok(())
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let conn = self.conn()?;

        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?;
        let annotations_count = scalar_usize(&conn, "SELECT COUNT(*) FROM annotations")?;
        let dependencies_count = if self.schema.capabilities.pre_aggregated_dependencies {
            scalar_usize(&conn, "SELECT COUNT(*) FROM dependencies")?
        } else {
            0
        };

        let oldest_start_ts = scalar_opt(&conn, "SELECT MIN(start_ts) FROM spans")?;
        let newest_start_ts = scalar_opt(&conn, "SELECT MAX(start_ts) FROM spans")?;

        let db_size_bytes = if self.db_path == ":memory:" {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStatus {
            db_path: self.db_path.clone(),
            db_size_bytes,
            spans_count,
            annotations_count,
            dependencies_count,
            oldest_start_ts,
            newest_start_ts,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub spans_count: usize,
    pub annotations_count: usize,
    pub dependencies_count: usize,
    pub oldest_start_ts: Option<i64>,
    pub newest_start_ts: Option<i64>,
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| TracebaseError::Store(format!("query failed: {e}")))
}

fn scalar_opt(conn: &Connection, sql: &str) -> Result<Option<i64>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
        .map_err(|e| TracebaseError::Store(format!("query failed: {e}")))
}

impl SpanStore for Store {
    fn get_trace(&self, trace_id: &str) -> Result<Vec<Span>> {
        self.get_trace(trace_id)
    }

    fn get_traces(&self, criteria: &QueryCriteria) -> Result<Vec<Vec<Span>>> {
        self.get_traces(criteria)
    }

    fn get_service_names(&self) -> Result<Vec<String>> {
        self.get_service_names()
    }

    fn get_span_names(&self, service_name: &str) -> Result<Vec<String>> {
        self.get_span_names(service_name)
    }

    fn get_remote_service_names(&self, service_name: &str) -> Result<Vec<String>> {
        self.get_remote_service_names(service_name)
    }

    fn get_dependencies(&self, end_ts: i64, lookback: i64) -> Result<Vec<DependencyLink>> {
        self.get_dependencies(end_ts, lookback)
    }

    fn get_autocomplete_values(&self, key: &str) -> Result<Vec<String>> {
        self.get_autocomplete_values(key)
    }
}

impl SpanConsumer for Store {
    fn accept(&self, spans: &[Span]) -> Result<()> {
        self.accept(spans)
    }
}
