use duckdb::{Connection, params_from_iter};
use tracebase_core::error::{Result, TracebaseError};
use tracebase_core::ids::{self, TraceIdPair};
use tracebase_core::model::Span;
use tracebase_core::query::QueryCriteria;

use crate::Store;
use crate::assemble::{self, AnnotationRow, SpanRow};
use crate::builder::{self, SpanQuery, SqlQuery};
use crate::schema::Schema;

impl Store {
    /// Retrieves one trace by id. Works regardless of the search toggle,
    /// and accepts any hex width the id normalizer accepts.
    pub fn get_trace(&self, trace_id: &str) -> Result<Vec<Span>> {
        let pair = TraceIdPair::from_stored(ids::normalize_trace_id(trace_id)?);
        let conn = self.conn()?;
        let span_rows = fetch_span_rows(
            &conn,
            builder::build(&self.schema, &SpanQuery::ByTraceId(pair))?,
        )?;
        let annotation_rows = fetch_annotation_rows(&conn, &self.schema, &span_rows)?;
        Ok(assemble::assemble(&span_rows, &annotation_rows))
    }

    /// Criteria search in two phases: resolve the ids of the most recent
    /// matching traces, then load those traces whole. Criteria problems,
    /// including the unsupported remote-service filter, surface before a
    /// connection is ever taken from the pool.
    pub fn get_traces(&self, criteria: &QueryCriteria) -> Result<Vec<Vec<Span>>> {
        if !self.search_enabled {
            return Ok(Vec::new());
        }
        let phase_one = builder::build(&self.schema, &SpanQuery::ByCriteria(criteria.clone()))?;

        let conn = self.conn()?;
        let pairs = fetch_trace_id_pairs(&conn, phase_one)?;
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let span_rows = fetch_span_rows(
            &conn,
            builder::build(&self.schema, &SpanQuery::ByTraceIdSet(pairs.clone()))?,
        )?;
        let annotation_rows = fetch_annotation_rows(&conn, &self.schema, &span_rows)?;
        let spans = assemble::assemble(&span_rows, &annotation_rows);
        Ok(assemble::group_traces(
            spans,
            &pairs,
            self.schema.strict_trace_id,
        ))
    }

    pub fn get_service_names(&self) -> Result<Vec<String>> {
        if !self.search_enabled {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        fetch_strings(&conn, builder::service_names())
    }

    pub fn get_span_names(&self, service_name: &str) -> Result<Vec<String>> {
        if !self.search_enabled || service_name.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        fetch_strings(&conn, builder::span_names(service_name))
    }

    /// Always empty: the span table has no remote_service_name column, and
    /// filtering on it is rejected up front in the query builder.
    pub fn get_remote_service_names(&self, _service_name: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Serves values only for keys the store was configured to index.
    pub fn get_autocomplete_values(&self, key: &str) -> Result<Vec<String>> {
        if !self.autocomplete_keys.iter().any(|k| k == key) {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        fetch_strings(&conn, builder::autocomplete_values(key))
    }
}

fn fetch_trace_id_pairs(conn: &Connection, query: SqlQuery) -> Result<Vec<TraceIdPair>> {
    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| TracebaseError::Store(format!("prepare trace id query failed: {e}")))?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| TracebaseError::Store(format!("query trace ids failed: {e}")))?;

    let mut pairs = Vec::new();
    for row in rows {
        let id = row.map_err(|e| TracebaseError::Store(format!("map trace id row failed: {e}")))?;
        pairs.push(TraceIdPair::from_stored(id));
    }
    Ok(pairs)
}

fn fetch_span_rows(conn: &Connection, query: SqlQuery) -> Result<Vec<SpanRow>> {
    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| TracebaseError::Store(format!("prepare span query failed: {e}")))?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), |row| {
            Ok(SpanRow {
                span_row_id: row.get::<_, i64>(0)?,
                trace_id: row.get::<_, String>(1)?,
                id: row.get::<_, String>(2)?,
                parent_id: row.get::<_, Option<String>>(3)?,
                kind: row.get::<_, Option<String>>(4)?,
                name: row.get::<_, String>(5)?,
                debug: row.get::<_, Option<bool>>(6)?,
                shared: row.get::<_, Option<bool>>(7)?,
                start_ts: row.get::<_, Option<i64>>(8)?,
                duration: row.get::<_, Option<i64>>(9)?,
            })
        })
        .map_err(|e| TracebaseError::Store(format!("query spans failed: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| TracebaseError::Store(format!("map span row failed: {e}")))?);
    }
    Ok(out)
}

fn fetch_annotation_rows(
    conn: &Connection,
    schema: &Schema,
    span_rows: &[SpanRow],
) -> Result<Vec<AnnotationRow>> {
    if span_rows.is_empty() {
        return Ok(Vec::new());
    }
    let span_row_ids: Vec<i64> = span_rows.iter().map(|r| r.span_row_id).collect();
    let query = builder::annotation_rows(schema, &span_row_ids);

    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| TracebaseError::Store(format!("prepare annotation query failed: {e}")))?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), |row| {
            Ok(AnnotationRow {
                span_row_id: row.get::<_, i64>(0)?,
                a_key: row.get::<_, String>(1)?,
                a_value: row.get::<_, Option<String>>(2)?,
                a_type: row.get::<_, i32>(3)?,
                a_timestamp: row.get::<_, Option<i64>>(4)?,
                service_name: row.get::<_, Option<String>>(5)?,
                ipv4: row.get::<_, Option<String>>(6)?,
                ipv6: row.get::<_, Option<String>>(7)?,
                port: row.get::<_, Option<i32>>(8)?,
            })
        })
        .map_err(|e| TracebaseError::Store(format!("query annotations failed: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(
            row.map_err(|e| TracebaseError::Store(format!("map annotation row failed: {e}")))?,
        );
    }
    Ok(out)
}

pub(crate) fn fetch_strings(conn: &Connection, query: SqlQuery) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| TracebaseError::Store(format!("prepare name query failed: {e}")))?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| TracebaseError::Store(format!("query names failed: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| TracebaseError::Store(format!("map name row failed: {e}")))?);
    }
    Ok(out)
}
